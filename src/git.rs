//! Thin wrapper around the local `git` binary.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use tracing::debug;

use crate::{
    config::{ConfigSource, ConfigStore},
    error::{Error, Result},
};

/// Runs `git` in a fixed working directory.
#[derive(Debug, Clone, Default)]
pub struct Git {
    dir: Option<PathBuf>,
}

impl Git {
    /// Run in the current directory.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: Some(dir.as_ref().to_path_buf()),
        }
    }

    /// Run `git args...` and return its raw stdout.
    pub fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        debug!(?args, "git");
        let out = cmd
            .args(args)
            .output()
            .map_err(|e| Error::Git(format!("running git: {e}")))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(Error::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        String::from_utf8(out.stdout).map_err(|_| Error::Git("output is not utf-8".into()))
    }

    /// Value of `key`, or `None` when unset or git fails.
    pub fn config_get(&self, key: &str) -> Option<String> {
        self.run(&["config", "--get", key])
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Store `key` in the repository-local config.
    pub fn config_set_local(&self, key: &str, value: &str) -> Result<()> {
        self.run(&["config", "--local", key, value]).map(|_| ())
    }

    /// `git format-patch --stdout <rev>`, untrimmed.
    pub fn format_patch(&self, rev: &str) -> Result<String> {
        self.run(&["format-patch", "--stdout", rev])
    }

    /// The repository's `.git` directory.
    pub fn git_dir(&self) -> Result<PathBuf> {
        let out = self.run(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Root of the working tree.
    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    pub fn remote_url(&self, remote: &str) -> Option<String> {
        self.config_get(&format!("remote.{remote}.url"))
    }
}

impl ConfigSource for Git {
    fn get(&self, key: &str) -> Option<String> {
        self.config_get(key)
    }
}

impl ConfigStore for Git {
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.config_set_local(key, value)
    }
}
