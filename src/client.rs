//! Subscription manager: REQ fan-out, per-subscription demultiplexing, and
//! merge/dedup across relays.
//!
//! A [`RelayClient`] owns its own connection map and routing table, so
//! multiple independent clients can coexist in one process and nothing is
//! shared through module-level state. Inbound frames are dispatched by the
//! subscription id embedded in every relay message, which lets any number of
//! subscriptions share one connection without clobbering each other.

use std::collections::{HashMap, HashSet};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::filter::Filter;
use crate::relay::{RelayConnection, RelayMessage};

/// Update delivered to one subscription's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionUpdate {
    /// An event matching the subscription's filter.
    Event(Event),
    /// The named relay finished replaying stored events.
    Eose(String),
    /// The named relay closed or errored; it will send nothing further.
    RelayLost(String),
}

/// Publish acknowledgement routed by event id.
#[derive(Debug, Clone)]
pub(crate) struct Ack {
    pub relay: String,
    pub accepted: bool,
    pub message: String,
}

struct SubEntry {
    relays: HashSet<String>,
    tx: mpsc::UnboundedSender<SubscriptionUpdate>,
}

/// Routing table shared with the per-connection dispatch tasks.
#[derive(Default)]
pub(crate) struct Router {
    subs: Mutex<HashMap<String, SubEntry>>,
    publishes: Mutex<HashMap<String, mpsc::UnboundedSender<Ack>>>,
}

impl Router {
    fn register_sub(&self, id: &str, tx: mpsc::UnboundedSender<SubscriptionUpdate>) {
        self.subs.lock().unwrap().insert(
            id.to_string(),
            SubEntry {
                relays: HashSet::new(),
                tx,
            },
        );
    }

    fn bind(&self, id: &str, relay: &str) {
        if let Some(entry) = self.subs.lock().unwrap().get_mut(id) {
            entry.relays.insert(relay.to_string());
        }
    }

    fn unbind(&self, id: &str, relay: &str) {
        if let Some(entry) = self.subs.lock().unwrap().get_mut(id) {
            entry.relays.remove(relay);
        }
    }

    fn unregister_sub(&self, id: &str) {
        self.subs.lock().unwrap().remove(id);
    }

    pub(crate) fn register_publish(&self, event_id: &str, tx: mpsc::UnboundedSender<Ack>) {
        self.publishes
            .lock()
            .unwrap()
            .insert(event_id.to_string(), tx);
    }

    pub(crate) fn unregister_publish(&self, event_id: &str) {
        self.publishes.lock().unwrap().remove(event_id);
    }

    /// Route one frame received on `relay` to its owner. Frames for unknown
    /// or unbound subscription ids are dropped.
    fn route(&self, relay: &str, msg: RelayMessage) {
        match msg {
            RelayMessage::Event { sub_id, event } => {
                let subs = self.subs.lock().unwrap();
                if let Some(entry) = subs.get(&sub_id) {
                    if entry.relays.contains(relay) {
                        let _ = entry.tx.send(SubscriptionUpdate::Event(event));
                    }
                }
            }
            RelayMessage::Eose { sub_id } => {
                let subs = self.subs.lock().unwrap();
                if let Some(entry) = subs.get(&sub_id) {
                    if entry.relays.contains(relay) {
                        let _ = entry.tx.send(SubscriptionUpdate::Eose(relay.to_string()));
                    }
                }
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                let publishes = self.publishes.lock().unwrap();
                if let Some(tx) = publishes.get(&event_id) {
                    let _ = tx.send(Ack {
                        relay: relay.to_string(),
                        accepted,
                        message,
                    });
                }
            }
            RelayMessage::Notice { message } => {
                debug!(relay = %relay, "relay notice: {message}");
            }
        }
    }

    /// Finalize everything bound to a dead relay so no caller hangs on it.
    fn relay_lost(&self, relay: &str) {
        let mut subs = self.subs.lock().unwrap();
        for entry in subs.values_mut() {
            if entry.relays.remove(relay) {
                let _ = entry
                    .tx
                    .send(SubscriptionUpdate::RelayLost(relay.to_string()));
            }
        }
        let publishes = self.publishes.lock().unwrap();
        for tx in publishes.values() {
            let _ = tx.send(Ack {
                relay: relay.to_string(),
                accepted: false,
                message: "connection closed".into(),
            });
        }
    }
}

/// Result of a bounded subscription.
///
/// Reports relay coverage alongside the merged events so callers can tell
/// "zero results" apart from "zero relays answered".
#[derive(Debug, Default)]
pub struct Collected {
    /// Merged events, deduplicated by id across relays (first seen wins).
    pub events: Vec<Event>,
    /// Relays that replayed their stored events to completion.
    pub eose_relays: usize,
    /// Relays that could not be reached or dropped mid-subscription.
    pub lost_relays: usize,
    /// Whether the deadline expired before every relay finished.
    pub timed_out: bool,
}

/// Client context owning connections and subscriptions to a set of relays.
pub struct RelayClient {
    proxy: Option<String>,
    conns: tokio::sync::Mutex<HashMap<String, Arc<RelayConnection>>>,
    router: Arc<Router>,
    sub_prefix: String,
    sub_counter: AtomicU64,
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayClient {
    pub fn new() -> Self {
        Self::with_proxy(None)
    }

    /// Client whose connections are established through a SOCKS5 proxy.
    pub fn with_proxy(proxy: Option<String>) -> Self {
        Self {
            proxy,
            conns: tokio::sync::Mutex::new(HashMap::new()),
            router: Arc::new(Router::default()),
            // Client-scoped prefix so ids from a previous process or client
            // sharing the same relay never collide with ours.
            sub_prefix: format!("{:04x}", rand::random::<u16>()),
            sub_counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    /// Next subscription id. Never reused while the client lives.
    fn next_sub_id(&self) -> String {
        let n = self.sub_counter.fetch_add(1, Ordering::SeqCst);
        format!("q{}-{}", self.sub_prefix, n)
    }

    /// Return an open connection to `url`, reusing one when possible.
    pub(crate) async fn connection(&self, url: &str) -> Result<Arc<RelayConnection>> {
        let mut conns = self.conns.lock().await;
        if let Some(conn) = conns.get(url) {
            if conn.is_open() {
                return Ok(conn.clone());
            }
            conns.remove(url);
        }
        let (conn, rx) = RelayConnection::open(url, self.proxy.as_deref()).await?;
        let conn = Arc::new(conn);
        conns.insert(url.to_string(), conn.clone());
        tokio::spawn(dispatch(url.to_string(), rx, self.router.clone()));
        Ok(conn)
    }

    /// Fan a REQ out to `relays`, registering the subscription id before the
    /// first send so early frames cannot be lost. Returns the reached
    /// connections and how many relays were lost up front.
    async fn fan_out(
        &self,
        id: &str,
        relays: &[String],
        filter: &Filter,
    ) -> (Vec<Arc<RelayConnection>>, usize) {
        let req = json!(["REQ", id, filter.to_json()]).to_string();
        let mut reached = Vec::new();
        let mut lost = 0;
        let mut targeted = HashSet::new();
        for url in relays {
            if !targeted.insert(url.as_str()) {
                continue;
            }
            match self.connection(url).await {
                Ok(conn) => {
                    self.router.bind(id, url);
                    match conn.send(req.clone()).await {
                        Ok(()) => reached.push(conn),
                        Err(e) => {
                            warn!(relay = %url, "REQ send failed: {e}");
                            self.router.unbind(id, url);
                            lost += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(relay = %url, "connect failed: {e}");
                    lost += 1;
                }
            }
        }
        (reached, lost)
    }

    /// Bounded subscription: send one REQ to every relay, merge and dedup
    /// events, and resolve once every reached relay EOSEd or was lost, or
    /// when `timeout` elapses, whichever comes first. A timeout resolves with
    /// whatever was collected; it is not an error.
    pub async fn subscribe(
        &self,
        relays: &[String],
        filter: &Filter,
        timeout: Duration,
    ) -> Result<Collected> {
        if relays.is_empty() {
            return Err(Error::NoRelays);
        }
        let id = self.next_sub_id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.router.register_sub(&id, tx);
        let (reached, mut lost) = self.fan_out(&id, relays, filter).await;

        let mut pending: HashSet<String> =
            reached.iter().map(|c| c.url().to_string()).collect();
        let mut events = Vec::new();
        let mut seen = HashSet::new();
        let mut eose = 0;
        let mut timed_out = false;
        let deadline = Instant::now() + timeout;
        while !pending.is_empty() {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(SubscriptionUpdate::Event(ev))) => {
                    if seen.insert(ev.id.clone()) {
                        events.push(ev);
                    }
                }
                Ok(Some(SubscriptionUpdate::Eose(relay))) => {
                    if pending.remove(&relay) {
                        eose += 1;
                    }
                }
                Ok(Some(SubscriptionUpdate::RelayLost(relay))) => {
                    if pending.remove(&relay) {
                        lost += 1;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        self.router.unregister_sub(&id);
        let close = json!(["CLOSE", id]).to_string();
        for conn in &reached {
            let _ = conn.send(close.clone()).await;
        }
        Ok(Collected {
            events,
            eose_relays: eose,
            lost_relays: lost,
            timed_out,
        })
    }

    /// Streaming subscription. Stays live across EOSE so late events keep
    /// flowing; the caller ends it with [`Subscription::cancel`].
    pub async fn subscribe_stream(
        &self,
        relays: &[String],
        filter: &Filter,
    ) -> Result<Subscription> {
        if relays.is_empty() {
            return Err(Error::NoRelays);
        }
        let id = self.next_sub_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.router.register_sub(&id, tx);
        let (reached, _lost) = self.fan_out(&id, relays, filter).await;
        if reached.is_empty() {
            self.router.unregister_sub(&id);
            return Err(Error::NoRelays);
        }
        Ok(Subscription {
            id,
            rx,
            seen: HashSet::new(),
            conns: reached,
            router: self.router.clone(),
            cancelled: false,
        })
    }

    /// Close every connection owned by this client. Idempotent.
    pub async fn shutdown(&self) {
        let mut conns = self.conns.lock().await;
        for (_, conn) in conns.drain() {
            conn.close().await;
        }
    }
}

/// Per-connection dispatch: forwards frames into the routing table and
/// finalizes all bound subscriptions when the connection dies.
async fn dispatch(
    url: String,
    mut rx: mpsc::UnboundedReceiver<RelayMessage>,
    router: Arc<Router>,
) {
    while let Some(msg) = rx.recv().await {
        router.route(&url, msg);
    }
    debug!(relay = %url, "connection closed");
    router.relay_lost(&url);
}

/// Handle for a live streaming subscription.
pub struct Subscription {
    id: String,
    rx: mpsc::UnboundedReceiver<SubscriptionUpdate>,
    seen: HashSet<String>,
    conns: Vec<Arc<RelayConnection>>,
    router: Arc<Router>,
    cancelled: bool,
}

impl Subscription {
    /// Subscription id as sent in the REQ.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// How many relays the REQ actually reached. This is the upper bound on
    /// the `Eose` and `RelayLost` updates the stream can deliver, so a caller
    /// tallying them knows when every relay is accounted for.
    pub fn relay_count(&self) -> usize {
        self.conns.len()
    }

    /// Next update. Duplicate events (same id from several relays) are
    /// filtered out. Returns `None` once cancelled or after every relay was
    /// lost.
    pub async fn next(&mut self) -> Option<SubscriptionUpdate> {
        loop {
            match self.rx.recv().await? {
                SubscriptionUpdate::Event(ev) => {
                    if self.seen.insert(ev.id.clone()) {
                        return Some(SubscriptionUpdate::Event(ev));
                    }
                }
                other => return Some(other),
            }
        }
    }

    /// Stop the subscription: sends CLOSE on every relay it reached and
    /// drops the routing entry. Cancelling twice is a no-op.
    pub async fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.router.unregister_sub(&self.id);
        let close = json!(["CLOSE", self.id]).to_string();
        for conn in &self.conns {
            let _ = conn.send(close.clone()).await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Bookkeeping only; the CLOSE frame needs an async context and is
        // sent by `cancel`.
        self.router.unregister_sub(&self.id);
    }
}
