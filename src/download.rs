//! `git str show` and `git str download`: find patches on relays.

use std::{
    collections::HashSet,
    fs,
    io::Write,
    path::Path,
    time::{Duration, UNIX_EPOCH},
};

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Args;
use tracing::{debug, warn};

use crate::{
    app::App,
    display::{heading, patch_file_name},
    error::Error,
    event::PATCH,
    filter::{self, Discovery},
    nip19::{encode_npub, Identifier},
    relay::{relay_set, FoundEvent},
};

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// `naddr`, `nevent`, `nprofile`, `npub` or hex public key. Without any,
    /// patches to the local repository or hashtag are listed.
    pub identifiers: Vec<String>,
    /// Extra relay to query. Repeatable.
    #[arg(short = 'r', long = "relay")]
    pub relays: Vec<String>,
    /// Maximum number of patches per relay and identifier.
    #[arg(short = 'l', long, default_value_t = 15)]
    pub limit: usize,
    /// Only patches carrying this hashtag.
    #[arg(short = 't', long)]
    pub hashtag: Option<String>,
}

/// Print every matching patch.
pub async fn show(app: &mut App<'_>, args: QueryArgs) -> anyhow::Result<()> {
    let now = Utc::now();
    for found in discover(app, &args).await? {
        app.println(&heading(&found.event, now))?;
        app.println(&found.event.content)?;
    }
    Ok(())
}

/// Save every matching patch under `.git/str/patches`. Returns the number of
/// new files written.
pub async fn download(app: &mut App<'_>, args: QueryArgs) -> anyhow::Result<usize> {
    let base = app.git.git_dir()?.join("str").join("patches");
    fs::create_dir_all(&base).with_context(|| format!("creating {}", base.display()))?;

    let mut written = 0;
    for found in discover(app, &args).await? {
        let ev = &found.event;
        let Some(name) = patch_file_name(ev) else {
            warn!(id = %ev.id, "skipping patch without a subject");
            continue;
        };
        let path = base.join(name);
        if path.exists() {
            debug!(path = %path.display(), "already downloaded");
            continue;
        }
        save(&base, &path, &ev.content, ev.created_at)?;
        let author = encode_npub(&ev.pubkey).unwrap_or_else(|_| ev.pubkey.clone());
        eprintln!(
            "- downloaded patch {} from {author}, saved as '{}'",
            ev.id,
            path.display()
        );
        app.println(&path.display().to_string())?;
        written += 1;
    }
    Ok(written)
}

/// Atomically write `content` to `path` via a temp file in `dir`, stamped
/// with the event's creation time.
fn save(dir: &Path, path: &Path, content: &str, created_at: u64) -> anyhow::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file()
        .set_modified(UNIX_EPOCH + Duration::from_secs(created_at))
        .with_context(|| format!("setting modification time of {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Run one query per identifier and merge the results.
///
/// Undecodable identifiers are reported and skipped; if every identifier
/// was bad the whole command fails.
async fn discover(app: &App<'_>, args: &QueryArgs) -> anyhow::Result<Vec<FoundEvent>> {
    let defaults = app.settings.defaults();
    let hashtag = args.hashtag.as_deref();

    let identifiers: Vec<Option<Identifier>> = if args.identifiers.is_empty() {
        vec![None]
    } else {
        args.identifiers
            .iter()
            .map(|arg| Some(Identifier::parse(arg, Some(PATCH))))
            .collect()
    };

    let mut discoveries: Vec<Discovery> = vec![];
    for (index, identifier) in identifiers.iter().enumerate() {
        match filter::build(identifier.as_ref(), hashtag, &defaults, Some(args.limit)) {
            Ok(discovery) => discoveries.push(discovery),
            Err(Error::NoCriteria) => return Err(Error::NoCriteria.into()),
            Err(e) => {
                let arg = args.identifiers.get(index).map(String::as_str).unwrap_or("");
                eprintln!("invalid argument '{arg}': {e}");
            }
        }
    }
    if discoveries.is_empty() {
        bail!("no usable identifiers");
    }

    let mut seen = HashSet::new();
    let mut out = vec![];
    for discovery in discoveries {
        let relays = relay_set(
            discovery
                .relays
                .iter()
                .chain(&args.relays)
                .chain(&app.settings.patches_relays),
        );
        let found = app.pool.query_many(&relays, &discovery.filter)?.collect().await;
        out.extend(found.into_iter().filter(|f| seen.insert(f.event.id.clone())));
    }
    out.sort_by_key(|f| std::cmp::Reverse(f.event.created_at));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Settings, KEY_ID, KEY_PATCHES_RELAY, KEY_PUBLICKEY},
        event::{Draft, Event, Tag, REPOSITORY_ANNOUNCEMENT},
        git::Git,
        nip19::ProfilePointer,
        pool::RelayPool,
        prompt::ScriptedInput,
        relay::memory::MemoryRelays,
        signer::{KeySigner, Signer},
    };
    use std::{collections::BTreeMap, sync::Arc};
    use tempfile::TempDir;

    fn contributor() -> KeySigner {
        KeySigner::from_secret(&"0a".repeat(32)).unwrap()
    }

    fn owner_pk() -> String {
        "ab".repeat(32)
    }

    fn patch(subject: &str, created_at: u64, repo: Option<&str>) -> Event {
        let mut draft = Draft::patch(format!("From x\nSubject: [PATCH] {subject}\n\nbody\n"));
        draft.created_at = created_at;
        if let Some(id) = repo {
            draft.push_tag(Tag::address(REPOSITORY_ANNOUNCEMENT, &owner_pk(), id, ""));
        }
        contributor().sign(draft).unwrap()
    }

    struct Harness {
        config: BTreeMap<String, String>,
        input: ScriptedInput,
        out: Vec<u8>,
        pool: RelayPool,
        git: Git,
    }

    impl Harness {
        fn new(memory: MemoryRelays, config: &[(&str, &str)], dir: Option<&Path>) -> Self {
            Self {
                config: config
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                input: ScriptedInput::new(Vec::<String>::new()),
                out: vec![],
                pool: RelayPool::new(Arc::new(memory)).with_timeout(Duration::from_millis(300)),
                git: dir.map(Git::in_dir).unwrap_or_default(),
            }
        }

        fn app(&mut self) -> App<'_> {
            App {
                settings: Settings::load(&self.config),
                pool: self.pool.clone(),
                git: self.git.clone(),
                config: &mut self.config,
                input: &mut self.input,
                out: &mut self.out,
            }
        }

        fn output(&self) -> String {
            String::from_utf8(self.out.clone()).unwrap()
        }
    }

    fn query(identifiers: &[&str], relays: &[&str]) -> QueryArgs {
        QueryArgs {
            identifiers: identifiers.iter().map(|s| s.to_string()).collect(),
            relays: relays.iter().map(|s| s.to_string()).collect(),
            limit: 15,
            hashtag: None,
        }
    }

    #[tokio::test]
    async fn show_lists_patches_to_local_repository() {
        let memory = MemoryRelays::new()
            .with_event("wss://p", patch("older", 100, Some("myrepo")))
            .with_event("wss://p", patch("elsewhere", 150, Some("other")))
            .with_event("wss://q", patch("newer", 200, Some("myrepo")));
        let pk = owner_pk();
        let mut h = Harness::new(
            memory,
            &[
                (KEY_ID, "myrepo"),
                (KEY_PUBLICKEY, pk.as_str()),
                (KEY_PATCHES_RELAY, "wss://p wss://q"),
            ],
            None,
        );
        show(&mut h.app(), query(&[], &[])).await.unwrap();
        let out = h.output();
        let newer = out.find("[PATCH] newer").unwrap();
        let older = out.find("[PATCH] older").unwrap();
        assert!(newer < older);
        assert!(!out.contains("elsewhere"));
    }

    #[tokio::test]
    async fn show_without_criteria_fails() {
        let mut h = Harness::new(MemoryRelays::new(), &[], None);
        let err = show(&mut h.app(), query(&[], &["wss://p"]))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoCriteria)));
    }

    #[tokio::test]
    async fn profile_argument_queries_its_relay_hints() {
        let profile = ProfilePointer {
            pubkey: contributor().public_key(),
            relays: vec!["wss://hinted".into()],
        }
        .encode()
        .unwrap();
        let memory = MemoryRelays::new().with_event("wss://hinted", patch("mine", 1, None));
        let mut h = Harness::new(memory, &[], None);
        show(&mut h.app(), query(&[&profile, "garbage"], &[]))
            .await
            .unwrap();
        assert!(h.output().contains("[PATCH] mine"));
    }

    #[tokio::test]
    async fn only_bad_identifiers_fail() {
        let mut h = Harness::new(MemoryRelays::new(), &[], None);
        let err = show(&mut h.app(), query(&["garbage"], &["wss://p"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no usable identifiers"));
    }

    #[tokio::test]
    async fn download_writes_each_patch_once() {
        if std::process::Command::new("git").arg("--version").output().is_err() {
            return;
        }
        let dir = TempDir::new().unwrap();
        Git::in_dir(dir.path()).run(&["init", "-q"]).unwrap();
        let ev = patch("fix a/b", 1_700_000_000, None);
        let memory = MemoryRelays::new().with_event("wss://p", ev.clone());
        let mut h = Harness::new(memory, &[], Some(dir.path()));

        let args = query(&[&ev.pubkey], &["wss://p"]);
        assert_eq!(download(&mut h.app(), args.clone()).await.unwrap(), 1);
        let name = format!("2023-11-14 [{}] [PATCH] fix a_b", &ev.id[..8]);
        let saved = dir.path().join(".git/str/patches").join(name);
        assert_eq!(fs::read_to_string(&saved).unwrap(), ev.content);
        let mtime = fs::metadata(&saved).unwrap().modified().unwrap();
        assert_eq!(mtime, UNIX_EPOCH + Duration::from_secs(1_700_000_000));

        assert_eq!(download(&mut h.app(), args).await.unwrap(), 0);
    }
}
