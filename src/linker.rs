//! Attach repository, thread and mention tags to outgoing patches.

use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    event::{is_hex32, tag_values, Draft, Tag, ROOT_MARKER},
    filter::repository_lookup,
    nip19::{Identifier, RepositoryPointer},
    pool::RelayPool,
    relay::{relay_set, FoundEvent},
};

/// Where a batch of patches is addressed.
#[derive(Debug, Clone)]
pub enum RepositoryTarget {
    /// Published without any `a` tag.
    Dangling,
    Pointer(RepositoryPointer),
}

/// Everything the linker needs to address one send.
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub repository: RepositoryTarget,
    /// `nevent`, `note` or hex id of the event being replied to.
    pub reply_to: Option<String>,
    /// `nprofile`, `npub` or hex public keys to mention.
    pub mentions: Vec<String>,
    /// Relays searched for the repository besides its own hints.
    pub relays: Vec<String>,
}

/// Result of linking a batch.
#[derive(Debug, Clone, Default)]
pub struct Linked {
    /// Extra publish relays contributed by the repository, the reply
    /// target and the mentions.
    pub relays: Vec<String>,
    /// The repository announcement and the relay it was found on.
    pub repository: Option<FoundEvent>,
}

/// Tags patches with their addressing metadata.
pub struct TagLinker {
    pool: RelayPool,
}

impl TagLinker {
    pub fn new(pool: RelayPool) -> Self {
        Self { pool }
    }

    /// Link a batch of sibling drafts.
    ///
    /// Reply and mention targets are resolved before any network lookup, so
    /// a bad one fails the whole batch without side effects. Every draft gets
    /// the repository and mention tags. Only the first draft is tied to the
    /// reply target; later ones lose the root marker since they will be
    /// threaded under the first with [`reply_to`].
    pub async fn link(&self, drafts: &mut [Draft], req: &LinkRequest) -> Result<Linked> {
        let thread = req.reply_to.as_deref().map(resolve_thread).transpose()?;
        let mentions = req
            .mentions
            .iter()
            .map(String::as_str)
            .map(resolve_mention)
            .collect::<Result<Vec<_>>>()?;

        let mut linked = Linked::default();

        if let RepositoryTarget::Pointer(pointer) = &req.repository {
            let found = self.find_repository(pointer, &req.relays).await?;
            for draft in drafts.iter_mut() {
                draft.tags.retain(|t| t.name() != "a");
                draft.push_tag(Tag::address(
                    pointer.kind,
                    &pointer.pubkey,
                    &pointer.identifier,
                    &found.relay,
                ));
                draft.push_unique(Tag::pubkey(&pointer.pubkey));
            }
            linked.relays.extend(
                tag_values(&found.event.tags, "patches")
                    .chain(tag_values(&found.event.tags, "relays"))
                    .map(str::to_string),
            );
            linked.repository = Some(found);
        }

        if let Some((id, hints)) = thread {
            if let Some(first) = drafts.first_mut() {
                reply_to(first, &id, hints.first().map(String::as_str).unwrap_or_default());
            }
            linked.relays.extend(hints);
        }
        for draft in drafts.iter_mut().skip(1) {
            draft.remove_tags("t", ROOT_MARKER);
        }

        for (pubkey, hints) in mentions {
            for draft in drafts.iter_mut() {
                draft.push_unique(Tag::pubkey(&pubkey));
            }
            linked.relays.extend(hints);
        }

        linked.relays = relay_set(&linked.relays);
        debug!(relays = ?linked.relays, "linked");
        Ok(linked)
    }

    async fn find_repository(
        &self,
        pointer: &RepositoryPointer,
        relays: &[String],
    ) -> Result<FoundEvent> {
        let candidates = relay_set(pointer.relays.iter().chain(relays));
        let found = self
            .pool
            .query_single(&candidates, &repository_lookup(pointer))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!(
                    "repository {} on {}",
                    pointer.address(),
                    candidates.join(", ")
                )),
                other => other,
            })?;
        info!(relay = %found.relay, address = %pointer.address(), "found repository");
        Ok(found)
    }
}

/// Make `draft` a reply to `id`. A reply is never a thread root.
pub fn reply_to(draft: &mut Draft, id: &str, relay: &str) {
    draft.remove_tags("t", ROOT_MARKER);
    draft
        .tags
        .retain(|t| !(t.name() == "e" && t.0.get(3).map(String::as_str) == Some("reply")));
    draft.push_tag(Tag::reply(id, relay));
}

/// Only event pointers and bare hex ids name a thread. An `npub` also
/// decodes to 32 hex bytes but points at a user.
pub(crate) fn resolve_thread(input: &str) -> Result<(String, Vec<String>)> {
    let raw = input.trim();
    if is_hex32(raw) {
        return Ok((raw.to_ascii_lowercase(), vec![]));
    }
    match Identifier::parse(raw, None) {
        Identifier::Event(pointer) => Ok((pointer.id, pointer.relays)),
        _ => Err(Error::InvalidThread(input.to_string())),
    }
}

fn resolve_mention(input: &str) -> Result<(String, Vec<String>)> {
    match Identifier::parse(input, None) {
        Identifier::Profile(pointer) => Ok((pointer.pubkey, pointer.relays)),
        Identifier::PublicKey(raw) if is_hex32(&raw) => Ok((raw.to_ascii_lowercase(), vec![])),
        _ => Err(Error::InvalidMention(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{Event, REPOSITORY_ANNOUNCEMENT},
        nip19::{encode_npub, to_bech32, EventPointer, ProfilePointer},
        relay::memory::MemoryRelays,
        signer::{KeySigner, Signer},
    };
    use std::{sync::Arc, time::Duration};

    fn owner() -> KeySigner {
        KeySigner::from_secret(&"07".repeat(32)).unwrap()
    }

    fn announcement(identifier: &str) -> Event {
        let mut draft = Draft::new(REPOSITORY_ANNOUNCEMENT, "");
        draft.push_tag(Tag::new(["d", identifier]));
        draft.push_tag(Tag::new(["patches", "wss://patches.one", "wss://patches.two"]));
        draft.push_tag(Tag::new(["relays", "wss://patches.one"]));
        owner().sign(draft).unwrap()
    }

    fn pointer(relays: &[&str]) -> RepositoryPointer {
        RepositoryPointer {
            kind: REPOSITORY_ANNOUNCEMENT,
            pubkey: owner().public_key(),
            identifier: "myrepo".into(),
            relays: relays.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn linker(memory: MemoryRelays) -> TagLinker {
        let pool = RelayPool::new(Arc::new(memory)).with_timeout(Duration::from_millis(300));
        TagLinker::new(pool)
    }

    fn request(repository: RepositoryTarget) -> LinkRequest {
        LinkRequest {
            repository,
            reply_to: None,
            mentions: vec![],
            relays: vec![],
        }
    }

    fn count(draft: &Draft, name: &str) -> usize {
        draft.tags.iter().filter(|t| t.name() == name).count()
    }

    #[tokio::test]
    async fn repository_adds_address_and_owner_tags() {
        let linker = linker(
            MemoryRelays::new()
                .unreachable("wss://hint")
                .with_event("wss://found", announcement("myrepo")),
        );
        let mut drafts = vec![Draft::patch("From 1"), Draft::patch("From 2")];
        let mut req = request(RepositoryTarget::Pointer(pointer(&["wss://hint"])));
        req.relays = vec!["wss://found".into()];
        let linked = linker.link(&mut drafts, &req).await.unwrap();

        let owner_pk = owner().public_key();
        for draft in &drafts {
            assert_eq!(count(draft, "a"), 1);
            let a = draft.tags.iter().find(|t| t.name() == "a").unwrap();
            assert_eq!(a.0[1], format!("30617:{owner_pk}:myrepo"));
            assert_eq!(a.0[2], "wss://found");
            assert!(draft.has_tag("p", &owner_pk));
        }
        assert!(drafts[0].has_tag("t", ROOT_MARKER));
        assert!(!drafts[1].has_tag("t", ROOT_MARKER));
        assert_eq!(linked.relays, vec!["wss://patches.one", "wss://patches.two"]);
        assert_eq!(linked.repository.unwrap().relay, "wss://found");
    }

    #[tokio::test]
    async fn relinking_never_duplicates_the_address() {
        let linker = linker(MemoryRelays::new().with_event("wss://r", announcement("myrepo")));
        let mut drafts = vec![Draft::patch("From 1")];
        let req = request(RepositoryTarget::Pointer(pointer(&["wss://r"])));
        linker.link(&mut drafts, &req).await.unwrap();
        linker.link(&mut drafts, &req).await.unwrap();
        assert_eq!(count(&drafts[0], "a"), 1);
        assert_eq!(count(&drafts[0], "p"), 1);
    }

    #[tokio::test]
    async fn dangling_skips_the_lookup() {
        let linker = linker(MemoryRelays::new());
        let mut drafts = vec![Draft::patch("From 1")];
        let linked = linker
            .link(&mut drafts, &request(RepositoryTarget::Dangling))
            .await
            .unwrap();
        assert_eq!(count(&drafts[0], "a"), 0);
        assert!(linked.repository.is_none());
    }

    #[tokio::test]
    async fn missing_repository_is_not_found() {
        let linker = linker(MemoryRelays::new().with_event("wss://r", announcement("other")));
        let mut drafts = vec![Draft::patch("From 1")];
        let err = linker
            .link(
                &mut drafts,
                &request(RepositoryTarget::Pointer(pointer(&["wss://r"]))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(count(&drafts[0], "a"), 0);
    }

    #[tokio::test]
    async fn reply_replaces_root_marker_and_adds_hints() {
        let linker = linker(MemoryRelays::new());
        let target = EventPointer {
            id: "ee".repeat(32),
            relays: vec!["wss://thread".into()],
            author: None,
            kind: None,
        };
        let mut req = request(RepositoryTarget::Dangling);
        req.reply_to = Some(target.encode().unwrap());
        let mut drafts = vec![Draft::patch("From 1"), Draft::patch("From 2")];
        let linked = linker.link(&mut drafts, &req).await.unwrap();

        let first = &drafts[0];
        assert!(!first.has_tag("t", ROOT_MARKER));
        assert!(first
            .tags
            .contains(&Tag::reply(&"ee".repeat(32), "wss://thread")));
        assert_eq!(count(&drafts[1], "e"), 0);
        assert!(!drafts[1].has_tag("t", ROOT_MARKER));
        assert_eq!(linked.relays, vec!["wss://thread"]);
    }

    #[tokio::test]
    async fn invalid_reply_fails_before_any_lookup() {
        // No relays at all: a lookup would fail with NoRelaysAvailable.
        let linker = linker(MemoryRelays::new());
        let mut req = request(RepositoryTarget::Pointer(pointer(&[])));
        req.reply_to = Some("not-a-thread".into());
        let mut drafts = vec![Draft::patch("From 1")];
        let before = drafts.clone();
        let err = linker.link(&mut drafts, &req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidThread(_)));
        assert_eq!(drafts, before);
    }

    #[tokio::test]
    async fn user_and_repository_pointers_are_not_threads() {
        let linker = linker(MemoryRelays::new());
        let profile = ProfilePointer {
            pubkey: "ab".repeat(32),
            relays: vec![],
        };
        for target in [
            encode_npub(&"ab".repeat(32)).unwrap(),
            profile.encode().unwrap(),
            pointer(&["wss://r"]).encode().unwrap(),
        ] {
            let mut req = request(RepositoryTarget::Dangling);
            req.reply_to = Some(target.clone());
            let mut drafts = vec![Draft::patch("From 1")];
            let before = drafts.clone();
            let err = linker.link(&mut drafts, &req).await.unwrap_err();
            assert!(matches!(err, Error::InvalidThread(t) if t == target));
            assert_eq!(drafts, before);
        }
    }

    #[tokio::test]
    async fn hex_and_note_ids_are_threads() {
        let linker = linker(MemoryRelays::new());
        let note = to_bech32("note", &[0xee; 32]).unwrap();
        for target in ["EE".repeat(32), note] {
            let mut req = request(RepositoryTarget::Dangling);
            req.reply_to = Some(target);
            let mut drafts = vec![Draft::patch("From 1")];
            linker.link(&mut drafts, &req).await.unwrap();
            assert!(drafts[0].tags.contains(&Tag::reply(&"ee".repeat(32), "")));
        }
    }

    #[tokio::test]
    async fn mentions_resolve_profiles_and_hex() {
        let linker = linker(MemoryRelays::new());
        let profile = ProfilePointer {
            pubkey: "cc".repeat(32),
            relays: vec!["wss://friend".into()],
        };
        let mut req = request(RepositoryTarget::Dangling);
        req.mentions = vec![profile.encode().unwrap(), "DD".repeat(32), "cc".repeat(32)];
        let mut drafts = vec![Draft::patch("From 1")];
        let linked = linker.link(&mut drafts, &req).await.unwrap();
        assert!(drafts[0].has_tag("p", &"cc".repeat(32)));
        assert!(drafts[0].has_tag("p", &"dd".repeat(32)));
        assert_eq!(count(&drafts[0], "p"), 2);
        assert_eq!(linked.relays, vec!["wss://friend"]);
    }

    #[tokio::test]
    async fn invalid_mention_aborts() {
        let linker = linker(MemoryRelays::new());
        let mut req = request(RepositoryTarget::Pointer(pointer(&[])));
        req.mentions = vec!["bob".into()];
        let mut drafts = vec![Draft::patch("From 1")];
        let err = linker.link(&mut drafts, &req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidMention(m) if m == "bob"));
    }
}
