//! Nostr event model for git patches and repository announcements.

use std::time::{SystemTime, UNIX_EPOCH};

use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Repository announcement (NIP-34), addressable by `kind:pubkey:d`.
pub const REPOSITORY_ANNOUNCEMENT: u32 = 30617;
/// A single `git format-patch` body.
pub const PATCH: u32 = 1617;
pub const ISSUE: u32 = 1621;
pub const REPLY: u32 = 1622;

/// Marker carried by the first patch of a new thread.
pub const ROOT_MARKER: &str = "root";

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// The first element names the tag and the rest hold data. The ones this
/// tool reads and writes:
///
/// - `a` – `kind:pubkey:identifier` address of the target repository
/// - `p` – a mentioned or addressed public key
/// - `e` – the event being replied to
/// - `t` – hashtag, or the `root` marker of a new patch thread
/// - `d` – repository identifier on announcements
/// - `relays` / `patches` – relays a repository wants patches sent to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(parts.into_iter().map(Into::into).collect())
    }

    /// Repository addressing tag `["a", "kind:pubkey:identifier", relay]`.
    pub fn address(kind: u32, pubkey: &str, identifier: &str, relay: &str) -> Self {
        Tag::new([
            "a".to_string(),
            repository_address(kind, pubkey, identifier),
            relay.to_string(),
        ])
    }

    pub fn pubkey(pubkey: &str) -> Self {
        Tag::new(["p", pubkey])
    }

    /// NIP-10 reply tag `["e", id, relay, "reply"]`.
    pub fn reply(id: &str, relay: &str) -> Self {
        Tag::new(["e", id, relay, "reply"])
    }

    pub fn hashtag(value: &str) -> Self {
        Tag::new(["t", value])
    }

    pub fn root_marker() -> Self {
        Tag::hashtag(ROOT_MARKER)
    }

    pub fn name(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    fn is(&self, name: &str, value: &str) -> bool {
        self.name() == name && self.value() == Some(value)
    }
}

/// Canonical `kind:pubkey:identifier` address string.
///
/// Every `a` tag and every `#a` filter is produced here.
pub fn repository_address(kind: u32, pubkey: &str, identifier: &str) -> String {
    format!("{kind}:{pubkey}:{identifier}")
}

/// Split an address produced by [`repository_address`]. The identifier may
/// itself contain colons.
pub fn parse_address(address: &str) -> Option<(u32, &str, &str)> {
    let mut parts = address.splitn(3, ':');
    let kind = parts.next()?.parse().ok()?;
    let pubkey = parts.next()?;
    let identifier = parts.next()?;
    Some((kind, pubkey, identifier))
}

/// First tag named `name`.
pub fn first_tag<'a>(tags: &'a [Tag], name: &str) -> Option<&'a Tag> {
    tags.iter().find(|t| t.name() == name)
}

/// All data values of every tag named `name`, in order.
pub fn tag_values<'a>(tags: &'a [Tag], name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    tags.iter()
        .filter(move |t| t.name() == name)
        .flat_map(|t| t.0.iter().skip(1).map(String::as_str))
}

/// Unsigned message. Tags can only be mutated in this form; signing consumes
/// it and yields an immutable [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl Draft {
    pub fn new(kind: u32, content: impl Into<String>) -> Self {
        Self {
            created_at: now(),
            kind,
            tags: vec![],
            content: content.into(),
        }
    }

    /// A patch draft, carrying the root marker of a new thread.
    pub fn patch(content: impl Into<String>) -> Self {
        let mut draft = Self::new(PATCH, content);
        draft.tags.push(Tag::new(["alt", "a git patch"]));
        draft.tags.push(Tag::root_marker());
        draft
    }

    pub fn push_tag(&mut self, tag: Tag) {
        self.tags.push(tag);
    }

    /// Append `tag` unless an identical tag is already present.
    pub fn push_unique(&mut self, tag: Tag) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn has_tag(&self, name: &str, value: &str) -> bool {
        self.tags.iter().any(|t| t.is(name, value))
    }

    pub fn remove_tags(&mut self, name: &str, value: &str) {
        self.tags.retain(|t| !t.is(name, value));
    }

    /// Hash this draft as it would be signed by `pubkey`.
    pub fn hash(&self, pubkey: &str) -> Result<[u8; 32]> {
        hash_fields(pubkey, self.created_at, self.kind, &self.tags, &self.content)
    }
}

/// Signed Nostr event as sent to and received from relays.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "79be...",
///   "kind": 1617,
///   "created_at": 1700000000,
///   "tags": [["a", "30617:79be...:myrepo", "wss://relay"], ["t", "root"]],
///   "content": "From 1a2b... Mon Sep 17 00:00:00 2001\n...",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1617` or `30617`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    pub tags: Vec<Tag>,
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    pub fn first_tag(&self, name: &str) -> Option<&Tag> {
        first_tag(&self.tags, name)
    }

    /// The `d` identifier of an addressable event.
    pub fn identifier(&self) -> Option<&str> {
        self.first_tag("d").and_then(Tag::value)
    }

    /// Check that `id` matches the content and `sig` is a valid Schnorr
    /// signature by `pubkey`.
    pub fn verify(&self) -> anyhow::Result<()> {
        let hash = event_hash(self)?;
        if hex::encode(hash) != self.id {
            anyhow::bail!("id mismatch");
        }
        let sig = Signature::from_slice(&hex::decode(&self.sig)?)?;
        let pk = XOnlyPublicKey::from_slice(&hex::decode(&self.pubkey)?)?;
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest_slice(&hash)?;
        secp.verify_schnorr(&sig, &msg, &pk)?;
        Ok(())
    }
}

/// Recompute the Nostr event hash from its fields.
pub fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    hash_fields(&ev.pubkey, ev.created_at, ev.kind, &ev.tags, &ev.content)
}

fn hash_fields(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let data = serde_json::to_vec(&arr)?;
    Ok(Sha256::digest(&data).into())
}

/// True for a 64-character hex string (public key or event id).
pub fn is_hex32(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

pub(crate) fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
