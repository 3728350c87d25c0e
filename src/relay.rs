//! Relay transport: NIP-01 filters, cancellation and a WebSocket client.

use std::{
    collections::{BTreeMap, HashSet},
    future::Future,
    sync::Once,
    time::Duration,
};

use futures_util::{future::join_all, SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;
use crate::error::{ChanError, Result};
use crate::event::{Event, Tag};

/// Source and sink of events.
///
/// Queries are read-only and may be repeated; publishing is not idempotent
/// from the caller's point of view and is never retried.
pub trait Transport: Send + Sync {
    fn query(
        &self,
        filters: &[Filter],
        cancel: &CancelSignal,
    ) -> impl Future<Output = Result<Vec<Event>>> + Send;

    fn publish(&self, event: &Event) -> impl Future<Output = Result<()>> + Send;
}

/// NIP-01 subscription filter.
///
/// Tag constraints serialize as `"#<name>": [values]` next to the fixed keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Require a tag named `name` whose value is one of `values`.
    pub fn tag<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.insert(
            format!("#{name}"),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `ev` satisfies every constraint. `limit` is not a per-event
    /// constraint and is ignored here.
    pub fn matches(&self, ev: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&ev.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.contains(&ev.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&ev.kind) {
                return false;
            }
        }
        if self.since.is_some_and(|since| ev.created_at < since)
            || self.until.is_some_and(|until| ev.created_at > until)
        {
            return false;
        }
        self.tags.iter().all(|(key, values)| {
            let name = key.strip_prefix('#').unwrap_or(key);
            ev.tags_named(name)
                .filter_map(Tag::value)
                .any(|v| values.iter().any(|want| want == v))
        })
    }
}

/// Receiving side of a cancellation request.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

/// Triggers the paired [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Create a linked handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.rx {
            let mut rx = rx.clone();
            let fired = rx.wait_for(|cancelled| *cancelled).await.is_ok();
            if fired {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

/// Messages a relay sends back to a client.
#[derive(Debug, PartialEq)]
enum RelayMessage {
    Event { sub: String, event: Event },
    Eose(String),
    Closed { sub: String, reason: String },
    Status { id: String, accepted: bool, message: String },
    Notice(String),
}

fn parse_relay_message(text: &str) -> Option<RelayMessage> {
    let val: Value = serde_json::from_str(text).ok()?;
    let arr = val.as_array()?;
    let str_at = |i: usize| arr.get(i).and_then(Value::as_str).map(str::to_string);
    match arr.first()?.as_str()? {
        "EVENT" => Some(RelayMessage::Event {
            sub: str_at(1)?,
            event: serde_json::from_value(arr.get(2)?.clone()).ok()?,
        }),
        "EOSE" => Some(RelayMessage::Eose(str_at(1)?)),
        "CLOSED" => Some(RelayMessage::Closed {
            sub: str_at(1)?,
            reason: str_at(2).unwrap_or_default(),
        }),
        "OK" => Some(RelayMessage::Status {
            id: str_at(1)?,
            accepted: arr.get(2)?.as_bool()?,
            message: str_at(3).unwrap_or_default(),
        }),
        "NOTICE" => Some(RelayMessage::Notice(str_at(1).unwrap_or_default())),
        _ => None,
    }
}

/// Stable subscription id for a set of filters sent to one relay.
fn subscription_id(relay: &str, filters: &[Filter]) -> Result<String> {
    let mut hasher = Sha1::new();
    hasher.update(relay.as_bytes());
    hasher.update(serde_json::to_vec(filters)?);
    let digest = hex::encode(hasher.finalize());
    Ok(format!("chanstr-{}", &digest[..16]))
}

/// WebSocket client fanning each request out to every configured relay.
#[derive(Debug, Clone)]
pub struct RelayClient {
    relays: Vec<String>,
    tor_socks: Option<String>,
    query_timeout: Duration,
    publish_timeout: Duration,
}

impl RelayClient {
    pub fn new(relays: Vec<String>, query_timeout: Duration, publish_timeout: Duration) -> Self {
        Self {
            relays,
            tor_socks: None,
            query_timeout,
            publish_timeout,
        }
    }

    /// Route every connection through a SOCKS5 proxy (`host:port`).
    pub fn with_socks(mut self, proxy: Option<String>) -> Self {
        self.tor_socks = proxy;
        self
    }

    pub fn from_settings(cfg: &Settings) -> Self {
        Self::new(cfg.relays.clone(), cfg.query_timeout, cfg.publish_timeout)
            .with_socks(cfg.tor_socks.clone())
    }

    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    /// Check that `relay` accepts a WebSocket handshake.
    pub async fn probe(&self, relay: &str) -> Result<()> {
        let mut ws = timeout(self.query_timeout, connect_ws(relay, self.tor_socks.as_deref()))
            .await
            .map_err(|_| ChanError::Timeout(self.query_timeout))??;
        ws.close(None).await?;
        Ok(())
    }

    async fn query_relay(&self, relay: &str, filters: &[Filter]) -> Result<Vec<Event>> {
        let mut ws = connect_ws(relay, self.tor_socks.as_deref()).await?;
        let sub_id = subscription_id(relay, filters)?;
        let mut req = vec![json!("REQ"), json!(sub_id)];
        for filter in filters {
            req.push(serde_json::to_value(filter)?);
        }
        ws.send(Message::Text(Value::Array(req).to_string())).await?;
        debug!(relay, sub = %sub_id, "subscription opened");

        let mut events = Vec::new();
        while let Some(msg) = ws.next().await {
            match msg? {
                Message::Text(txt) => match parse_relay_message(&txt) {
                    Some(RelayMessage::Event { sub, event }) if sub == sub_id => events.push(event),
                    Some(RelayMessage::Eose(sub)) if sub == sub_id => break,
                    Some(RelayMessage::Closed { sub, reason }) if sub == sub_id => {
                        warn!(relay, %reason, "subscription closed by relay");
                        break;
                    }
                    Some(RelayMessage::Notice(notice)) => debug!(relay, %notice, "relay notice"),
                    Some(_) => {}
                    None => debug!(relay, "ignoring unparsable relay message"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }

        let close = json!(["CLOSE", sub_id]);
        if let Err(e) = ws.send(Message::Text(close.to_string())).await {
            debug!(relay, error = %e, "could not close subscription");
        }
        // The relay may already be gone once the subscription ends.
        let _ = ws.close(None).await;
        debug!(relay, count = events.len(), "subscription finished");
        Ok(events)
    }

    async fn publish_relay(&self, relay: &str, event: &Event) -> Result<()> {
        let mut ws = connect_ws(relay, self.tor_socks.as_deref()).await?;
        ws.send(Message::Text(json!(["EVENT", event]).to_string()))
            .await?;
        let outcome = loop {
            match ws.next().await {
                Some(Ok(Message::Text(txt))) => match parse_relay_message(&txt) {
                    Some(RelayMessage::Status {
                        id,
                        accepted,
                        message,
                    }) if id == event.id => {
                        break if accepted {
                            Ok(())
                        } else {
                            Err(ChanError::Rejected(message))
                        };
                    }
                    _ => {}
                },
                Some(Ok(Message::Close(_))) | None => {
                    break Err(ChanError::transport("connection closed before OK"))
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
            }
        };
        let _ = ws.close(None).await;
        outcome
    }
}

impl Transport for RelayClient {
    async fn query(&self, filters: &[Filter], cancel: &CancelSignal) -> Result<Vec<Event>> {
        if cancel.is_cancelled() {
            return Err(ChanError::Cancelled);
        }
        if self.relays.is_empty() {
            return Err(ChanError::transport("no relays configured"));
        }
        let fetches = self.relays.iter().map(|relay| async move {
            let res = timeout(self.query_timeout, self.query_relay(relay, filters))
                .await
                .unwrap_or_else(|_| Err(ChanError::Timeout(self.query_timeout)));
            (relay.as_str(), res)
        });
        let results = tokio::select! {
            results = join_all(fetches) => results,
            _ = cancel.cancelled() => return Err(ChanError::Cancelled),
        };

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut answered = 0;
        let mut first_err = None;
        for (relay, res) in results {
            match res {
                Ok(batch) => {
                    answered += 1;
                    events.extend(batch.into_iter().filter(|ev| seen.insert(ev.id.clone())));
                }
                Err(e) => {
                    warn!(relay, error = %e, "relay query failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) if answered == 0 => Err(e),
            _ => Ok(events),
        }
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        if self.relays.is_empty() {
            return Err(ChanError::transport("no relays configured"));
        }
        let sends = self.relays.iter().map(|relay| async move {
            let res = timeout(self.publish_timeout, self.publish_relay(relay, event))
                .await
                .unwrap_or_else(|_| Err(ChanError::Timeout(self.publish_timeout)));
            (relay.as_str(), res)
        });

        let mut accepted = 0;
        let mut rejection = None;
        let mut first_err = None;
        for (relay, res) in join_all(sends).await {
            match res {
                Ok(()) => accepted += 1,
                Err(ChanError::Rejected(reason)) => {
                    warn!(relay, %reason, "relay rejected event");
                    rejection.get_or_insert(ChanError::Rejected(reason));
                }
                Err(e) => {
                    warn!(relay, error = %e, "publish failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        if accepted > 0 {
            info!(id = %event.id, accepted, relays = self.relays.len(), "event published");
            return Ok(());
        }
        Err(rejection
            .or(first_err)
            .unwrap_or_else(|| ChanError::transport("no relay accepted the event")))
    }
}

type RelayStream = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

fn install_tls_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means a provider is already in place.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
///
/// `wss://` relays get a TLS session on top of the TCP or SOCKS stream.
async fn connect_ws(relay: &str, tor_socks: Option<&str>) -> Result<RelayStream> {
    let url = Url::parse(relay).map_err(|e| ChanError::transport(format!("{relay}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| ChanError::transport(format!("{relay}: missing host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ChanError::transport(format!("{relay}: missing port")))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(
            Socks5Stream::connect(proxy, (host, port))
                .await
                .map_err(|e| ChanError::transport(format!("socks proxy {proxy}: {e}")))?,
        )
    } else {
        Box::new(
            TcpStream::connect((host, port))
                .await
                .map_err(|e| ChanError::transport(format!("{relay}: {e}")))?,
        )
    };
    install_tls_provider();
    let (ws, _) = client_async_tls(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
