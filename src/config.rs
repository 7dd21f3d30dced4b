//! Settings read from `git config` under the `str.` section.

use std::{collections::BTreeMap, time::Duration};

use tracing::warn;

use crate::{
    error::Result,
    event::{is_hex32, repository_address, REPOSITORY_ANNOUNCEMENT},
    filter::Defaults,
    pool::DEFAULT_TIMEOUT,
};

/// Repository identifier (`d` tag of the announcement).
pub const KEY_ID: &str = "str.id";
/// Repository author public key, hex.
pub const KEY_PUBLICKEY: &str = "str.publickey";
/// Default target repository as `naddr`.
pub const KEY_UPSTREAM: &str = "str.upstream";
/// Default publish relays.
pub const KEY_RELAYS: &str = "str.relays";
/// Default discovery relays.
pub const KEY_PATCHES_RELAY: &str = "str.patches-relay";
pub const KEY_HASHTAG: &str = "str.hashtag";
pub const KEY_TOR_SOCKS: &str = "str.tor-socks";
/// Per-relay timeout in seconds.
pub const KEY_TIMEOUT: &str = "str.timeout";

/// Read-only view of key/value configuration.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Configuration that can also remember values for this repository.
pub trait ConfigStore: ConfigSource {
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

impl ConfigSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

impl ConfigStore for BTreeMap<String, String> {
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Runtime settings for one invocation.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub id: Option<String>,
    /// Only kept when it is a valid hex key.
    pub publickey: Option<String>,
    pub upstream: Option<String>,
    pub relays: Vec<String>,
    pub patches_relays: Vec<String>,
    pub hashtag: Option<String>,
    /// Optional SOCKS5 proxy (host:port).
    pub tor_socks: Option<String>,
    pub timeout: Duration,
}

impl Settings {
    /// Load every known key from `source`. Missing keys fall back to empty
    /// values; a malformed timeout falls back to the default with a warning.
    pub fn load(source: &dyn ConfigSource) -> Self {
        let get = |key: &str| {
            source
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let publickey = get(KEY_PUBLICKEY).and_then(|pk| {
            if is_hex32(&pk) {
                Some(pk.to_ascii_lowercase())
            } else {
                warn!("ignoring {KEY_PUBLICKEY}: not a hex public key");
                None
            }
        });
        let timeout = match get(KEY_TIMEOUT) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!("ignoring {KEY_TIMEOUT}={raw}: expected seconds");
                    DEFAULT_TIMEOUT
                }
            },
            None => DEFAULT_TIMEOUT,
        };

        Self {
            id: get(KEY_ID),
            publickey,
            upstream: get(KEY_UPSTREAM),
            relays: split_list(get(KEY_RELAYS).unwrap_or_default()),
            patches_relays: split_list(get(KEY_PATCHES_RELAY).unwrap_or_default()),
            hashtag: get(KEY_HASHTAG),
            tor_socks: get(KEY_TOR_SOCKS),
            timeout,
        }
    }

    /// `kind:pubkey:identifier` of the local repository, if configured.
    pub fn repository_address(&self) -> Option<String> {
        match (&self.id, &self.publickey) {
            (Some(id), Some(pk)) => Some(repository_address(REPOSITORY_ANNOUNCEMENT, pk, id)),
            _ => None,
        }
    }

    /// Fallbacks for the filter builder.
    pub fn defaults(&self) -> Defaults {
        Defaults {
            repository: self.repository_address(),
            hashtag: self.hashtag.clone(),
        }
    }
}

/// Split a list value on commas and whitespace, dropping empties.
pub fn split_list(input: impl AsRef<str>) -> Vec<String> {
    input
        .as_ref()
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn loads_git_config_keys() {
        let pk = "AB".repeat(32);
        let cfg = Settings::load(&source(&[
            (KEY_ID, "myrepo"),
            (KEY_PUBLICKEY, pk.as_str()),
            (KEY_RELAYS, "wss://r1, wss://r2\twss://r3"),
            (KEY_PATCHES_RELAY, "wss://p"),
            (KEY_HASHTAG, " gitstr "),
            (KEY_TOR_SOCKS, ""),
            (KEY_TIMEOUT, "5"),
        ]));
        assert_eq!(cfg.id.as_deref(), Some("myrepo"));
        assert_eq!(cfg.publickey, Some("ab".repeat(32)));
        assert_eq!(cfg.relays, vec!["wss://r1", "wss://r2", "wss://r3"]);
        assert_eq!(cfg.patches_relays, vec!["wss://p"]);
        assert_eq!(cfg.hashtag.as_deref(), Some("gitstr"));
        assert_eq!(cfg.tor_socks, None);
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(
            cfg.repository_address(),
            Some(format!("30617:{}:myrepo", "ab".repeat(32)))
        );
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = Settings::load(&source(&[
            (KEY_ID, "myrepo"),
            (KEY_PUBLICKEY, "npub1notallowed"),
            (KEY_TIMEOUT, "soon"),
        ]));
        assert_eq!(cfg.publickey, None);
        assert_eq!(cfg.repository_address(), None);
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
        assert!(cfg.defaults().repository.is_none());
    }

    #[test]
    fn split_list_handles_commas_and_spaces() {
        assert_eq!(split_list("a, b , ,c\nd"), vec!["a", "b", "c", "d"]);
        assert!(split_list("").is_empty());
    }
}
