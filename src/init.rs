//! `git str init`: announce the current repository.

use anyhow::{bail, Context};
use clap::Args;
use tracing::warn;

use crate::{
    app::App,
    config::{split_list, ConfigSource, KEY_PUBLICKEY},
    display::sprint_repository,
    event::{Draft, Tag, REPOSITORY_ANNOUNCEMENT},
    nip19::RepositoryPointer,
    prompt::ask_or_default,
    relay::relay_set,
    signer::Signer,
};

const DEFAULT_PATCHES_RELAYS: &str =
    "wss://relay.nostr.bg wss://nostr21.com wss://nostr.fmt.wiz.biz";

#[derive(Args, Debug, Clone, Default)]
pub struct InitArgs {
    /// Repository identifier, unique per key.
    #[arg(long)]
    pub id: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// URL the repository can be cloned from.
    #[arg(long)]
    pub clone_url: Option<String>,
    /// URL the repository can be browsed at.
    #[arg(long)]
    pub web_url: Option<String>,
    /// Relays to watch for patches.
    #[arg(long)]
    pub patches_relay: Option<String>,
    /// Relay to publish the announcement to. Repeatable.
    #[arg(short = 'r', long = "relay")]
    pub relays: Vec<String>,
    /// Secret key to sign with, as hex or `nsec`.
    #[arg(long, env = "NOSTR_SECRET_KEY", hide_env_values = true)]
    pub sec: Option<String>,
    /// Take configured or default values instead of prompting.
    #[arg(short, long)]
    pub yes: bool,
}

/// One announcement field.
struct Field {
    /// Flag and `str.` config key name.
    name: &'static str,
    tag: &'static str,
    prompt: &'static str,
    optional: bool,
    multi: bool,
}

const FIELDS: [Field; 6] = [
    Field {
        name: "id",
        tag: "d",
        prompt: "specify the repository unique id (for this keypair)",
        optional: false,
        multi: false,
    },
    Field {
        name: "patches-relay",
        tag: "relays",
        prompt: "specify relay URLs to watch for patches",
        optional: false,
        multi: true,
    },
    Field {
        name: "clone-url",
        tag: "clone",
        prompt: "specify the repository URL for git clone",
        optional: false,
        multi: true,
    },
    Field {
        name: "name",
        tag: "name",
        prompt: "specify the repository name",
        optional: true,
        multi: false,
    },
    Field {
        name: "description",
        tag: "description",
        prompt: "specify the repository description",
        optional: true,
        multi: false,
    },
    Field {
        name: "web-url",
        tag: "web",
        prompt: "specify the repository URL for browsing on the web",
        optional: true,
        multi: true,
    },
];

pub async fn run(app: &mut App<'_>, args: InitArgs) -> anyhow::Result<()> {
    let mut draft = Draft::new(REPOSITORY_ANNOUNCEMENT, "");
    let mut identifier = String::new();

    for field in &FIELDS {
        let value = match given(&args, field.name) {
            Some(v) => v.trim().to_string(),
            None => {
                let current = app
                    .config
                    .get(&format!("str.{}", field.name))
                    .unwrap_or_else(|| default_for(app, field.name, &identifier));
                if args.yes {
                    current
                } else {
                    let mut prompt = field.prompt.to_string();
                    if field.optional {
                        prompt.push_str(" (optional)");
                    }
                    if field.multi {
                        prompt.push('*');
                    }
                    prompt.push_str(": ");
                    let optional = field.optional;
                    ask_or_default(app.input, &prompt, &current, &|a| optional || !a.is_empty())?
                }
            }
        };

        if value.is_empty() {
            if !field.optional {
                bail!("'{}' is mandatory", field.name);
            }
            continue;
        }
        app.config.set(&format!("str.{}", field.name), &value)?;
        let mut tag = vec![field.tag.to_string()];
        if field.multi {
            tag.extend(split_list(&value));
        } else {
            tag.push(value.clone());
        }
        draft.push_tag(Tag(tag));
        if field.name == "id" {
            identifier = value;
        }
    }

    let signer = app.signer(args.sec.as_deref())?;
    let ev = signer.sign(draft)?;
    app.config.set(KEY_PUBLICKEY, &ev.pubkey)?;
    eprintln!("announcing repository\n{}", sprint_repository(&ev));

    let relays = relay_set(args.relays.iter().chain(&app.settings.relays));
    match app.pool.publish_many(&relays, &ev).await {
        Ok(report) => {
            let pointer = RepositoryPointer {
                kind: REPOSITORY_ANNOUNCEMENT,
                pubkey: ev.pubkey.clone(),
                identifier,
                relays: report.accepted_relays(),
            };
            app.println(&pointer.encode()?)?;
            Ok(())
        }
        Err(e) => {
            warn!("{e}");
            app.print_event(&ev)?;
            Err(e).context("couldn't publish the announcement to any relay, use -r/--relay")
        }
    }
}

fn given(args: &InitArgs, name: &str) -> Option<String> {
    match name {
        "id" => args.id.clone(),
        "patches-relay" => args.patches_relay.clone(),
        "clone-url" => args.clone_url.clone(),
        "name" => args.name.clone(),
        "description" => args.description.clone(),
        "web-url" => args.web_url.clone(),
        _ => None,
    }
}

fn default_for(app: &App<'_>, name: &str, identifier: &str) -> String {
    match name {
        "id" => app
            .git
            .toplevel()
            .ok()
            .or_else(|| std::env::current_dir().ok())
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default(),
        "name" => identifier.to_string(),
        "patches-relay" => DEFAULT_PATCHES_RELAYS.to_string(),
        "clone-url" => app.git.remote_url("origin").unwrap_or_default(),
        "web-url" => app
            .git
            .remote_url("origin")
            .and_then(|clone| web_url(&clone))
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Browsable URL for a clone URL, when one can be guessed.
fn web_url(clone: &str) -> Option<String> {
    if clone.starts_with("http") {
        return Some(clone.trim_end_matches(".git").to_string());
    }
    let rest = clone.strip_prefix("git@")?;
    let (host, path) = rest.split_once(':')?;
    Some(format!("https://{host}/{}", path.trim_end_matches(".git")))
}
