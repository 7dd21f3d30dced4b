//! Shared context handed to every subcommand.

use std::io::Write;

use anyhow::Context as _;

use crate::{
    config::{ConfigStore, Settings},
    event::Event,
    git::Git,
    pool::RelayPool,
    prompt::InputProvider,
    signer::KeySigner,
};

/// Collaborators of one command run.
///
/// Results go to `out`; progress and previews go to stderr.
pub struct App<'a> {
    pub settings: Settings,
    pub pool: RelayPool,
    pub git: Git,
    pub config: &'a mut dyn ConfigStore,
    pub input: &'a mut dyn InputProvider,
    pub out: &'a mut dyn Write,
}

impl App<'_> {
    /// Signer from `--sec`, or from a prompt when none was given.
    pub fn signer(&mut self, sec: Option<&str>) -> anyhow::Result<KeySigner> {
        let secret = match sec.map(str::trim).filter(|s| !s.is_empty()) {
            Some(sec) => sec.to_string(),
            None => self.input.ask_until("secret key (hex or nsec): ", &|a| {
                KeySigner::from_secret(a).is_ok()
            })?,
        };
        Ok(KeySigner::from_secret(&secret)?)
    }

    /// Print the full signed event so it can be published by other means.
    pub fn print_event(&mut self, ev: &Event) -> anyhow::Result<()> {
        let json = serde_json::to_string(ev)?;
        writeln!(self.out, "{json}").context("writing output")?;
        Ok(())
    }

    pub fn println(&mut self, line: &str) -> anyhow::Result<()> {
        writeln!(self.out, "{line}").context("writing output")?;
        Ok(())
    }
}
