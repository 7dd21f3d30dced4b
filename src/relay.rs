//! NIP-01 relay transport over WebSocket.
//!
//! [`RelayTransport`] is the seam the fan-out engine talks through. The
//! production [`WsTransport`] keeps one connection per relay address for the
//! life of the process; tests swap in an in-memory relay set.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{Error, Result},
    event::Event,
    filter::DiscoveryFilter,
};

/// An event together with the relay it arrived from.
#[derive(Debug, Clone)]
pub struct FoundEvent {
    pub relay: String,
    pub event: Event,
}

/// Access to individual relays.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Run `filter` against `relay`, pushing events into `found` as they
    /// arrive. Returns once the relay signals end of stored events.
    async fn query(
        &self,
        relay: &str,
        filter: &DiscoveryFilter,
        found: mpsc::Sender<FoundEvent>,
    ) -> Result<()>;

    /// Send `event` to `relay` and wait for its `OK`. A rejection is an
    /// [`Error::Relay`] carrying the relay's reason.
    async fn publish(&self, relay: &str, event: &Event) -> Result<()>;
}

type Socket = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// WebSocket transport with a per-address connection cache.
///
/// Each cached socket sits behind its own lock, so two operations on the same
/// relay take turns instead of interleaving frames.
pub struct WsTransport {
    tor_socks: Option<String>,
    connections: Mutex<HashMap<String, Arc<AsyncMutex<Socket>>>>,
}

impl WsTransport {
    pub fn new(tor_socks: Option<String>) -> Self {
        Self {
            tor_socks,
            connections: Mutex::new(HashMap::new()),
        }
    }

    async fn socket(&self, relay: &str) -> Result<Arc<AsyncMutex<Socket>>> {
        if let Some(socket) = self.cached(relay) {
            return Ok(socket);
        }
        debug!(relay, "connecting");
        let ws = connect_ws(relay, self.tor_socks.as_deref())
            .await
            .map_err(|e| Error::relay(relay, format!("connect: {e}")))?;
        let socket = Arc::new(AsyncMutex::new(ws));
        if let Ok(mut conns) = self.connections.lock() {
            conns.insert(relay.to_string(), socket.clone());
        }
        Ok(socket)
    }

    fn cached(&self, relay: &str) -> Option<Arc<AsyncMutex<Socket>>> {
        self.connections.lock().ok()?.get(relay).cloned()
    }

    fn evict(&self, relay: &str) {
        if let Ok(mut conns) = self.connections.lock() {
            conns.remove(relay);
        }
    }

    /// Drop `socket` from the cache, unless it was already replaced.
    fn evict_socket(&self, relay: &str, socket: &Arc<AsyncMutex<Socket>>) {
        if let Ok(mut conns) = self.connections.lock() {
            if conns.get(relay).is_some_and(|s| Arc::ptr_eq(s, socket)) {
                conns.remove(relay);
            }
        }
    }
}

/// Evicts a socket whose subscription may still be open: the query failed,
/// timed out or was cancelled before it could send `CLOSE`.
struct OpenSubscription<'a> {
    transport: &'a WsTransport,
    relay: &'a str,
    socket: Arc<AsyncMutex<Socket>>,
    closed: bool,
}

impl Drop for OpenSubscription<'_> {
    fn drop(&mut self) {
        if !self.closed {
            debug!(relay = self.relay, "dropping connection with an open subscription");
            self.transport.evict_socket(self.relay, &self.socket);
        }
    }
}

#[async_trait]
impl RelayTransport for WsTransport {
    async fn query(
        &self,
        relay: &str,
        filter: &DiscoveryFilter,
        found: mpsc::Sender<FoundEvent>,
    ) -> Result<()> {
        let socket = self.socket(relay).await?;
        let mut sub = OpenSubscription {
            transport: self,
            relay,
            socket: socket.clone(),
            closed: false,
        };
        let mut ws = socket.lock().await;
        let result = run_query(&mut ws, relay, filter, found).await;
        sub.closed = result.is_ok();
        result
    }

    async fn publish(&self, relay: &str, event: &Event) -> Result<()> {
        let socket = self.socket(relay).await?;
        let mut ws = socket.lock().await;
        let result = run_publish(&mut ws, relay, event).await;
        if let Err(Error::Relay { reason, .. }) = &result {
            if !reason.starts_with("rejected") {
                self.evict(relay);
            }
        }
        result
    }
}

/// Issue a `REQ`, stream matching events until `EOSE`, then `CLOSE`.
async fn run_query(
    ws: &mut Socket,
    relay: &str,
    filter: &DiscoveryFilter,
    found: mpsc::Sender<FoundEvent>,
) -> Result<()> {
    let sub_id = subscription_id();
    let req = json!(["REQ", sub_id, filter.to_json()]);
    send(ws, relay, req).await?;

    while let Some(msg) = ws.next().await {
        let txt = match msg.map_err(|e| Error::relay(relay, e))? {
            Message::Text(txt) => txt,
            Message::Close(_) => return Err(Error::relay(relay, "connection closed")),
            _ => continue,
        };
        let Ok(val) = serde_json::from_str::<Value>(&txt) else {
            continue;
        };
        let Some(arr) = val.as_array() else {
            continue;
        };
        let for_us = arr.get(1).and_then(|v| v.as_str()) == Some(sub_id.as_str());
        match arr.first().and_then(|v| v.as_str()) {
            Some("EVENT") if for_us && arr.len() >= 3 => {
                let ev = match serde_json::from_value::<Event>(arr[2].clone()) {
                    Ok(ev) => ev,
                    Err(e) => {
                        warn!(relay, "malformed event: {e}");
                        continue;
                    }
                };
                if let Err(e) = ev.verify() {
                    warn!(relay, id = %ev.id, "dropping event: {e}");
                    continue;
                }
                let item = FoundEvent {
                    relay: relay.to_string(),
                    event: ev,
                };
                if found.send(item).await.is_err() {
                    // Nobody is listening any more.
                    break;
                }
            }
            Some("EOSE") if for_us => break,
            Some("CLOSED") if for_us => {
                let reason = arr.get(2).and_then(|v| v.as_str()).unwrap_or_default();
                return Err(Error::relay(relay, format!("subscription closed: {reason}")));
            }
            Some("NOTICE") => {
                debug!(relay, notice = %arr.get(1).unwrap_or(&serde_json::Value::Null), "relay notice");
            }
            _ => {}
        }
    }

    send(ws, relay, json!(["CLOSE", sub_id])).await
}

/// Send an `EVENT` and wait for the matching `OK`.
async fn run_publish(ws: &mut Socket, relay: &str, event: &Event) -> Result<()> {
    send(ws, relay, json!(["EVENT", event])).await?;

    while let Some(msg) = ws.next().await {
        let txt = match msg.map_err(|e| Error::relay(relay, e))? {
            Message::Text(txt) => txt,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(val) = serde_json::from_str::<Value>(&txt) else {
            continue;
        };
        let Some(arr) = val.as_array() else {
            continue;
        };
        match arr.first().and_then(|v| v.as_str()) {
            Some("OK") if arr.get(1).and_then(|v| v.as_str()) == Some(event.id.as_str()) => {
                let accepted = arr.get(2).and_then(|v| v.as_bool()).unwrap_or(false);
                let message = arr.get(3).and_then(|v| v.as_str()).unwrap_or_default();
                if accepted {
                    return Ok(());
                }
                return Err(Error::relay(relay, format!("rejected: {message}")));
            }
            Some("NOTICE") => {
                debug!(relay, notice = %arr.get(1).unwrap_or(&serde_json::Value::Null), "relay notice");
            }
            _ => {}
        }
    }
    Err(Error::relay(relay, "connection closed before OK"))
}

async fn send(ws: &mut Socket, relay: &str, frame: Value) -> Result<()> {
    ws.send(Message::Text(frame.to_string()))
        .await
        .map_err(|e| Error::relay(relay, e))
}

fn subscription_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(relay: &str, tor_socks: Option<&str>) -> anyhow::Result<Socket> {
    let url = Url::parse(relay)?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow::anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async_tls(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
pub(crate) trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Normalize a user-given relay address. Returns `None` for anything that is
/// not a usable `ws://` or `wss://` URL.
pub fn normalize_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("wss://{trimmed}")
    };
    let url = Url::parse(&with_scheme).ok()?;
    if !matches!(url.scheme(), "ws" | "wss") || url.host_str().is_none() {
        return None;
    }
    let mut out = url.to_string();
    if url.path() == "/" && url.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    Some(out)
}

/// Normalize and deduplicate relay addresses, keeping first occurrences.
pub fn relay_set<I, S>(relays: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = vec![];
    for relay in relays {
        match normalize_url(relay.as_ref()) {
            Some(url) if !out.contains(&url) => out.push(url),
            Some(_) => {}
            None => warn!(relay = relay.as_ref(), "ignoring invalid relay address"),
        }
    }
    out
}
