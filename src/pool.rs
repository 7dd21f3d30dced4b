//! Relay fan-out: one task per relay, merged and deduplicated results.

use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinSet, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    event::Event,
    filter::DiscoveryFilter,
    relay::{FoundEvent, RelayTransport},
};

/// Default per-relay deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How one relay answered a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub relay: String,
    pub accepted: bool,
    /// Rejection message or transport failure, when not accepted.
    pub reason: Option<String>,
}

/// Outcomes of a publish with at least one acceptance, in relay input order.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub outcomes: Vec<PublishOutcome>,
}

impl PublishReport {
    pub fn accepted_relays(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.accepted)
            .map(|o| o.relay.clone())
            .collect()
    }
}

/// Fans operations out over a relay set through a shared transport.
#[derive(Clone)]
pub struct RelayPool {
    transport: Arc<dyn RelayTransport>,
    timeout: Duration,
}

impl RelayPool {
    pub fn new(transport: Arc<dyn RelayTransport>) -> Self {
        Self {
            transport,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound every per-relay operation by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Query every relay concurrently.
    ///
    /// The returned stream yields each distinct event once, in arrival order,
    /// tagged with the first relay that delivered it. It ends when all relays
    /// have finished, failed or timed out. Dropping it cancels whatever is
    /// still running.
    pub fn query_many(&self, relays: &[String], filter: &DiscoveryFilter) -> Result<QueryStream> {
        if relays.is_empty() {
            return Err(Error::NoRelaysAvailable);
        }
        let (tx, rx) = mpsc::channel(64);
        let mut tasks = JoinSet::new();
        for relay in relays {
            let transport = self.transport.clone();
            let relay = relay.clone();
            let filter = filter.clone();
            let tx = tx.clone();
            let limit = self.timeout;
            tasks.spawn(async move {
                debug!(%relay, "querying");
                match timeout(limit, transport.query(&relay, &filter, tx)).await {
                    Ok(Ok(())) => debug!(%relay, "end of stored events"),
                    Ok(Err(e)) => warn!("{e}"),
                    Err(_) => warn!(%relay, "query timed out"),
                }
            });
        }
        Ok(QueryStream {
            rx,
            seen: HashSet::new(),
            filter: filter.clone(),
            _tasks: tasks,
        })
    }

    /// First event matching `filter` on any relay.
    ///
    /// Remaining relay work is cancelled as soon as a match arrives. If every
    /// relay finishes without one, or the overall deadline passes, the lookup
    /// fails with [`Error::NotFound`].
    pub async fn query_single(
        &self,
        relays: &[String],
        filter: &DiscoveryFilter,
    ) -> Result<FoundEvent> {
        let mut stream = self.query_many(relays, filter)?;
        match timeout(self.timeout, stream.next()).await {
            Ok(Some(found)) => Ok(found),
            Ok(None) | Err(_) => Err(Error::NotFound(describe(filter))),
        }
    }

    /// Send `event` to every relay concurrently.
    ///
    /// Returns one outcome per relay in input order, or
    /// [`Error::PublishFailure`] carrying them all when nobody accepted.
    pub async fn publish_many(&self, relays: &[String], event: &Event) -> Result<PublishReport> {
        if relays.is_empty() {
            return Err(Error::NoRelaysAvailable);
        }
        let mut tasks = JoinSet::new();
        for (index, relay) in relays.iter().enumerate() {
            let transport = self.transport.clone();
            let relay = relay.clone();
            let event = event.clone();
            let limit = self.timeout;
            tasks.spawn(async move {
                let result = match timeout(limit, transport.publish(&relay, &event)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(Error::Relay { reason, .. })) => Some(reason),
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some("timed out".to_string()),
                };
                (index, relay, result)
            });
        }

        let mut outcomes: Vec<Option<PublishOutcome>> = vec![None; relays.len()];
        while let Some(joined) = tasks.join_next().await {
            let Ok((index, relay, reason)) = joined else {
                continue;
            };
            match &reason {
                None => info!(%relay, id = %event.id, "published"),
                Some(reason) => warn!(%relay, id = %event.id, "publish failed: {reason}"),
            }
            outcomes[index] = Some(PublishOutcome {
                relay,
                accepted: reason.is_none(),
                reason,
            });
        }
        let outcomes: Vec<PublishOutcome> = outcomes
            .into_iter()
            .zip(relays)
            .map(|(outcome, relay)| {
                outcome.unwrap_or_else(|| PublishOutcome {
                    relay: relay.clone(),
                    accepted: false,
                    reason: Some("task failed".into()),
                })
            })
            .collect();

        if outcomes.iter().any(|o| o.accepted) {
            Ok(PublishReport { outcomes })
        } else {
            Err(Error::PublishFailure { outcomes })
        }
    }
}

/// Merged, deduplicated results of [`RelayPool::query_many`].
pub struct QueryStream {
    rx: mpsc::Receiver<FoundEvent>,
    seen: HashSet<String>,
    filter: DiscoveryFilter,
    _tasks: JoinSet<()>,
}

impl QueryStream {
    /// Next unseen matching event, or `None` once every relay is done.
    pub async fn next(&mut self) -> Option<FoundEvent> {
        while let Some(found) = self.rx.recv().await {
            if !self.filter.matches(&found.event) {
                debug!(relay = %found.relay, id = %found.event.id, "discarding non-matching event");
                continue;
            }
            if self.seen.insert(found.event.id.clone()) {
                return Some(found);
            }
        }
        None
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Vec<FoundEvent> {
        let mut out = vec![];
        while let Some(found) = self.next().await {
            out.push(found);
        }
        out
    }
}

fn describe(filter: &DiscoveryFilter) -> String {
    filter.to_json().to_string()
}
