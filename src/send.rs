//! `git str send`: publish commits as patch events.

use std::path::Path;

use anyhow::{bail, Context};
use clap::Args;
use tracing::warn;

use crate::{
    app::App,
    config::KEY_UPSTREAM,
    display::{sprint_patch, sprint_repository},
    error::Error,
    event::{Draft, Event, Tag, PATCH, REPOSITORY_ANNOUNCEMENT},
    linker::{reply_to, resolve_thread, LinkRequest, RepositoryTarget, TagLinker},
    nip19::{self, EventPointer, Identifier},
    prompt::confirm,
    relay::relay_set,
    signer::Signer,
    splitter::split_patches,
};

#[derive(Args, Debug, Clone, Default)]
pub struct SendArgs {
    /// Commit range for `git format-patch`, or a patch file.
    pub target: String,
    /// Repository to address, as `naddr`.
    #[arg(short = 'a', long)]
    pub repository: Option<String>,
    /// Publish without addressing any repository.
    #[arg(long, conflicts_with = "repository")]
    pub dangling: bool,
    /// Event this patch replies to, as `nevent` or hex id.
    #[arg(short = 'e', long = "in-reply-to")]
    pub in_reply_to: Option<String>,
    /// Public key to mention, as `nprofile`, `npub` or hex. Repeatable.
    #[arg(short = 'p', long = "mention")]
    pub mentions: Vec<String>,
    /// Extra relay to publish to. Repeatable.
    #[arg(short = 'r', long = "relay")]
    pub relays: Vec<String>,
    /// Secret key to sign with, as hex or `nsec`.
    #[arg(long, env = "NOSTR_SECRET_KEY", hide_env_values = true)]
    pub sec: Option<String>,
    /// Publish without asking for confirmation.
    #[arg(short, long)]
    pub yes: bool,
    /// Print the signed events instead of publishing them.
    #[arg(long)]
    pub dry_run: bool,
}

/// Where the repository target came from.
enum Origin {
    Upstream,
    Given(String),
}

pub async fn run(app: &mut App<'_>, args: SendArgs) -> anyhow::Result<()> {
    let patch = load_patch(app, &args.target)?;
    let parts = split_patches(&patch);
    if parts.is_empty() {
        bail!("the patch for '{}' is empty", args.target);
    }
    let mut drafts: Vec<Draft> = parts
        .into_iter()
        .map(|content| {
            let mut draft = Draft::patch(content);
            if let Some(tag) = &app.settings.hashtag {
                draft.push_unique(Tag::hashtag(tag));
            }
            draft
        })
        .collect();

    let (repository, origin) = target_repository(app, &args)?;
    let request = LinkRequest {
        repository,
        reply_to: target_thread(app, &args)?,
        mentions: args.mentions.clone(),
        relays: relay_set(
            args.relays
                .iter()
                .chain(&app.settings.patches_relays)
                .chain(&app.settings.relays),
        ),
    };
    let linked = TagLinker::new(app.pool.clone())
        .link(&mut drafts, &request)
        .await?;
    if let Some(found) = &linked.repository {
        eprintln!(
            "found upstream repository on {}\n{}",
            found.relay,
            sprint_repository(&found.event)
        );
    }

    let relays = relay_set(
        linked
            .relays
            .iter()
            .chain(&args.relays)
            .chain(&app.settings.relays),
    );
    if relays.is_empty() {
        return Err(Error::NoRelaysAvailable.into());
    }

    let signer = app.signer(args.sec.as_deref())?;
    let events = sign_series(&signer, drafts, &relays[0])?;
    for ev in &events {
        eprintln!("\nwill publish event\n{}", sprint_patch(ev));
    }

    if args.dry_run {
        for ev in &events {
            app.print_event(ev)?;
        }
        return Ok(());
    }
    if !args.yes && !confirm(app.input, "proceed to publish the event? ")? {
        for ev in &events {
            app.print_event(ev)?;
        }
        bail!("publishing cancelled");
    }

    let mut failed = 0;
    for ev in &events {
        match app.pool.publish_many(&relays, ev).await {
            Ok(report) => {
                let pointer = EventPointer {
                    id: ev.id.clone(),
                    relays: report.accepted_relays(),
                    author: Some(ev.pubkey.clone()),
                    kind: Some(PATCH),
                };
                app.println(&pointer.encode()?)?;
            }
            Err(e) => {
                warn!("{e}");
                failed += 1;
                app.print_event(ev)?;
            }
        }
    }

    if let Origin::Given(target) = origin {
        if !args.yes
            && app.settings.upstream.as_deref() != Some(target.as_str())
            && confirm(app.input, "store it as your main upstream target? ")?
        {
            app.config.set(KEY_UPSTREAM, &target)?;
        }
    }

    if failed > 0 {
        bail!("failed to publish {failed} of {} patches", events.len());
    }
    Ok(())
}

/// Patch text from a file, or from `git format-patch`.
fn load_patch(app: &App<'_>, target: &str) -> anyhow::Result<String> {
    let path = Path::new(target);
    if path.is_file() {
        return std::fs::read_to_string(path).with_context(|| format!("reading {target}"));
    }
    Ok(app
        .git
        .format_patch(target)
        .with_context(|| format!("getting patch for '{target}'"))?)
}

fn target_repository(
    app: &mut App<'_>,
    args: &SendArgs,
) -> anyhow::Result<(RepositoryTarget, Origin)> {
    if args.dangling {
        return Ok((RepositoryTarget::Dangling, Origin::Upstream));
    }
    let (text, origin) = match (&args.repository, &app.settings.upstream) {
        (Some(given), _) => (given.clone(), Origin::Given(given.clone())),
        (None, Some(upstream)) => (upstream.clone(), Origin::Upstream),
        (None, None) => {
            let answer = app
                .input
                .ask_until("repository to target with this (naddr1...): ", &|a| {
                    matches!(
                        nip19::decode(a, Some(REPOSITORY_ANNOUNCEMENT)),
                        Ok(Identifier::Repository(_))
                    )
                })?;
            (answer.clone(), Origin::Given(answer))
        }
    };
    match nip19::decode(&text, Some(REPOSITORY_ANNOUNCEMENT))? {
        Identifier::Repository(pointer) => Ok((RepositoryTarget::Pointer(pointer), origin)),
        _ => bail!("invalid target '{text}': expected a repository naddr"),
    }
}

/// The reply target from `--in-reply-to`, or asked for when interactive.
/// A blank answer means no thread.
fn target_thread(app: &mut App<'_>, args: &SendArgs) -> anyhow::Result<Option<String>> {
    if args.in_reply_to.is_some() || args.yes || args.dry_run {
        return Ok(args.in_reply_to.clone());
    }
    let answer = app.input.ask_until(
        "reference a thread? (nevent or hex) (leave blank if not): ",
        &|a| a.is_empty() || resolve_thread(a).is_ok(),
    )?;
    Ok(Some(answer).filter(|a| !a.is_empty()))
}

/// Sign drafts in order, threading every later patch under the first.
fn sign_series(signer: &dyn Signer, drafts: Vec<Draft>, hint: &str) -> anyhow::Result<Vec<Event>> {
    let mut events: Vec<Event> = Vec::with_capacity(drafts.len());
    for mut draft in drafts {
        if let Some(first) = events.first() {
            reply_to(&mut draft, &first.id, hint);
        }
        events.push(signer.sign(draft)?);
    }
    Ok(events)
}
