//! Discovery filters: turning decoded identifiers into NIP-01 `REQ` filters.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::{
    error::{Error, Result},
    event::{is_hex32, Event, PATCH, REPOSITORY_ANNOUNCEMENT},
    nip19::{Identifier, ProfilePointer, RepositoryPointer},
};

/// NIP-01 filter. Empty sets mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryFilter {
    pub kinds: BTreeSet<u32>,
    pub authors: BTreeSet<String>,
    pub ids: BTreeSet<String>,
    /// Tag filters keyed by tag name without the `#` prefix.
    pub tags: BTreeMap<String, BTreeSet<String>>,
    pub limit: Option<usize>,
}

impl DiscoveryFilter {
    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        self.authors.insert(pubkey.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.ids.insert(id.into());
        self
    }

    pub fn tag(mut self, name: &str, value: impl Into<String>) -> Self {
        self.tags
            .entry(name.to_string())
            .or_default()
            .insert(value.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether the filter narrows beyond kinds, so it cannot return a
    /// relay's whole stream of patches.
    pub fn is_selective(&self) -> bool {
        !self.authors.is_empty()
            || !self.ids.is_empty()
            || self.tags.values().any(|v| !v.is_empty())
    }

    /// Serialize into the JSON object sent inside `REQ`.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if !self.ids.is_empty() {
            map.insert("ids".into(), strings(&self.ids));
        }
        if !self.authors.is_empty() {
            map.insert("authors".into(), strings(&self.authors));
        }
        if !self.kinds.is_empty() {
            map.insert(
                "kinds".into(),
                Value::Array(self.kinds.iter().map(|k| Value::Number((*k).into())).collect()),
            );
        }
        for (tag, values) in &self.tags {
            if values.is_empty() {
                continue;
            }
            map.insert(format!("#{tag}"), strings(values));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".into(), Value::Number(limit.into()));
        }
        Value::Object(map)
    }

    /// Whether `ev` satisfies every criterion. `limit` is not considered.
    pub fn matches(&self, ev: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&ev.id) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&ev.pubkey) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&ev.kind) {
            return false;
        }
        self.tags.iter().all(|(name, values)| {
            values.is_empty()
                || ev
                    .tags
                    .iter()
                    .any(|t| t.name() == name && t.value().is_some_and(|v| values.contains(v)))
        })
    }
}

fn strings(values: &BTreeSet<String>) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

/// Filter that finds the announcement behind a repository pointer.
pub fn repository_lookup(pointer: &RepositoryPointer) -> DiscoveryFilter {
    DiscoveryFilter::default()
        .kind(REPOSITORY_ANNOUNCEMENT)
        .author(&pointer.pubkey)
        .tag("d", &pointer.identifier)
}

/// Local fallbacks consulted when arguments leave a query open.
#[derive(Debug, Clone, Default)]
pub struct Defaults {
    /// Address (`kind:pubkey:identifier`) of the local repository.
    pub repository: Option<String>,
    pub hashtag: Option<String>,
}

/// A patch query plus the relays its pointer suggested.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub filter: DiscoveryFilter,
    /// Relay hints from the pointer; merged into the queried relay set, never
    /// into the filter.
    pub relays: Vec<String>,
}

/// Build the patch query for one command argument.
///
/// - a repository pointer selects patches addressed to it (`#a`);
/// - a profile or public key selects patches by that author, to the local
///   repository when one is configured;
/// - an event pointer selects that event by id;
/// - an explicit hashtag always adds `#t`.
///
/// With nothing selective the local repository and then the configured
/// hashtag are tried; if neither exists this fails with
/// [`Error::NoCriteria`].
pub fn build(
    identifier: Option<&Identifier>,
    hashtag: Option<&str>,
    defaults: &Defaults,
    limit: Option<usize>,
) -> Result<Discovery> {
    let mut filter = DiscoveryFilter::default().kind(PATCH);
    if let Some(limit) = limit {
        filter = filter.limit(limit);
    }
    let relays = identifier.map(|i| i.relays().to_vec()).unwrap_or_default();

    match identifier {
        Some(Identifier::Repository(pointer)) => {
            filter = filter.tag("a", pointer.address());
        }
        Some(
            Identifier::Profile(ProfilePointer { pubkey, .. }) | Identifier::PublicKey(pubkey),
        ) => {
            if !is_hex32(pubkey) {
                return Err(Error::invalid(pubkey, "not a pointer or hex public key"));
            }
            filter = filter.author(pubkey.to_ascii_lowercase());
            if let Some(address) = &defaults.repository {
                filter = filter.tag("a", address);
            }
        }
        Some(Identifier::Event(pointer)) => {
            filter = filter.id(&pointer.id);
        }
        Some(Identifier::Invalid { input, reason }) => {
            return Err(Error::invalid(input, reason));
        }
        None => {}
    }

    if let Some(tag) = hashtag.filter(|t| !t.is_empty()) {
        filter = filter.tag("t", tag);
    }

    if !filter.is_selective() {
        if let Some(address) = &defaults.repository {
            filter = filter.tag("a", address);
        } else if let Some(tag) = defaults.hashtag.as_deref().filter(|t| !t.is_empty()) {
            filter = filter.tag("t", tag);
        } else {
            return Err(Error::NoCriteria);
        }
    }

    Ok(Discovery { filter, relays })
}
