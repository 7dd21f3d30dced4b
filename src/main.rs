//! Command line interface for exchanging git patches over Nostr relays.
//! Supports sending patches, listing and downloading them, and announcing a
//! repository.

mod app;
mod config;
mod display;
mod download;
mod error;
mod event;
mod filter;
mod git;
mod init;
mod linker;
mod nip19;
mod pool;
mod prompt;
mod relay;
mod send;
mod signer;
mod splitter;

use std::{io, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tracing::debug;
#[cfg(not(test))]
use tracing_subscriber::EnvFilter;

use app::App;
use config::Settings;
use download::QueryArgs;
use git::Git;
use init::InitArgs;
use pool::RelayPool;
use prompt::TerminalInput;
use relay::WsTransport;
use send::SendArgs;

/// Command line interface entry point.
#[derive(Parser, Debug)]
#[command(
    name = "git-str",
    author,
    version,
    about = "Send and fetch git patches over Nostr relays"
)]
struct Cli {
    /// Log debug output to stderr.
    #[arg(long, global = true)]
    verbose: bool,
    /// Seconds to wait for each relay.
    #[arg(long, global = true)]
    timeout: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

/// Supported subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a commit or patch file as patch events.
    Send(SendArgs),
    /// Print patches matching the given identifiers.
    Show(QueryArgs),
    /// Save patches matching the given identifiers under `.git/str/patches`.
    Download(QueryArgs),
    /// Announce the current repository.
    Init(InitArgs),
}

/// Execute the selected subcommand against the repository in the current
/// directory.
async fn run(cli: Cli) -> anyhow::Result<()> {
    let git = Git::new();
    let mut settings = Settings::load(&git);
    if let Some(secs) = cli.timeout {
        settings.timeout = Duration::from_secs(secs);
    }
    debug!(?settings, "loaded settings");

    let transport = Arc::new(WsTransport::new(settings.tor_socks.clone()));
    let pool = RelayPool::new(transport).with_timeout(settings.timeout);
    let mut store = git.clone();
    let mut input = TerminalInput::stdin();
    let mut stdout = io::stdout().lock();
    let mut app = App {
        settings,
        pool,
        git,
        config: &mut store,
        input: &mut input,
        out: &mut stdout,
    };

    match cli.command {
        Commands::Send(args) => send::run(&mut app, args).await,
        Commands::Show(args) => download::show(&mut app, args).await,
        Commands::Download(args) => download::download(&mut app, args).await.map(|_| ()),
        Commands::Init(args) => init::run(&mut app, args).await,
    }
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_send_flags() {
        let cli = Cli::try_parse_from([
            "git-str",
            "--timeout",
            "5",
            "send",
            "HEAD~1",
            "-a",
            "naddr1xyz",
            "-p",
            "npub1a",
            "-p",
            "npub1b",
            "-r",
            "wss://one",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Some(5));
        match cli.command {
            Commands::Send(args) => {
                assert_eq!(args.target, "HEAD~1");
                assert_eq!(args.repository.as_deref(), Some("naddr1xyz"));
                assert_eq!(args.mentions, vec!["npub1a", "npub1b"]);
                assert_eq!(args.relays, vec!["wss://one"]);
                assert!(args.dry_run);
                assert!(!args.yes);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dangling_conflicts_with_repository() {
        let res = Cli::try_parse_from([
            "git-str",
            "send",
            "x.patch",
            "--dangling",
            "-a",
            "naddr1",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn query_flags_default_limit() {
        let cli =
            Cli::try_parse_from(["git-str", "show", "npub1x", "-t", "rust", "--verbose"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Show(args) => {
                assert_eq!(args.limit, 15);
                assert_eq!(args.hashtag.as_deref(), Some("rust"));
                assert_eq!(args.identifiers, vec!["npub1x"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
