//! Event publishing across write relays.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::warn;

use crate::client::RelayClient;
use crate::config::{write_urls, RelayDescriptor};
use crate::error::{Error, Result};
use crate::event::{Event, UnsignedEvent};

/// External signing capability (NIP-07 equivalent). The engine never holds
/// key material of its own; anything that can produce a valid signed event
/// qualifies.
#[allow(async_fn_in_trait)]
pub trait Signer {
    /// Hex-encoded x-only public key this signer signs as.
    fn public_key(&self) -> String;

    /// Produce the signed event: fill in `pubkey`, compute `id`, sign.
    async fn sign(&self, event: UnsignedEvent) -> Result<Event>;
}

/// Per-relay outcome of one publish attempt.
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Relays that accepted the event (or took the send without objection).
    pub accepted: Vec<String>,
    /// Relays that failed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl PublishReport {
    /// Partial success counts: one accepting relay makes the publish succeed.
    pub fn success(&self) -> bool {
        !self.accepted.is_empty()
    }

    pub fn published_count(&self) -> usize {
        self.accepted.len()
    }
}

/// Sign `event` exactly once and broadcast the canonical signed event to
/// every relay independently. Signing failure is terminal: nothing is sent.
pub async fn publish<S: Signer>(
    client: &RelayClient,
    event: UnsignedEvent,
    signer: &S,
    relays: &[RelayDescriptor],
    timeout: Duration,
) -> Result<(Event, PublishReport)> {
    if write_urls(relays).is_empty() {
        return Err(Error::NoRelays);
    }
    let signed = signer.sign(event).await?;
    let report = broadcast(client, &signed, relays, timeout).await?;
    Ok((signed, report))
}

/// Send one already-signed event to every write-enabled relay, recording
/// each relay's acknowledgement separately. Read-only relays are skipped
/// without being counted either way.
///
/// Relays that answer with `["OK", id, false, reason]` within the window are
/// recorded as failed; relays that took the send but never acknowledge are
/// counted as accepted, since older relays never send OK at all.
pub async fn broadcast(
    client: &RelayClient,
    event: &Event,
    relays: &[RelayDescriptor],
    timeout: Duration,
) -> Result<PublishReport> {
    let writers = write_urls(relays);
    if writers.is_empty() {
        return Err(Error::NoRelays);
    }
    let router = client.router();
    let (tx, mut rx) = mpsc::unbounded_channel();
    router.register_publish(&event.id, tx);

    let msg = json!(["EVENT", event]).to_string();
    let mut report = PublishReport::default();
    let mut pending = HashSet::new();
    let mut targeted = HashSet::new();
    for url in &writers {
        if !targeted.insert(url.as_str()) {
            continue;
        }
        let sent = match client.connection(url).await {
            Ok(conn) => conn.send(msg.clone()).await,
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => {
                pending.insert(url.to_string());
            }
            Err(e) => {
                warn!(relay = %url, "publish send failed: {e}");
                report.failed.push((url.to_string(), e.to_string()));
            }
        }
    }

    let deadline = Instant::now() + timeout;
    while !pending.is_empty() {
        match timeout_at(deadline, rx.recv()).await {
            Ok(Some(ack)) => {
                if pending.remove(&ack.relay) {
                    if ack.accepted {
                        report.accepted.push(ack.relay);
                    } else {
                        report.failed.push((ack.relay, ack.message));
                    }
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
    router.unregister_publish(&event.id);

    // No contrary acknowledgement before the deadline: treat the clean send
    // as accepted (pre-NIP-20 relays never acknowledge).
    let mut silent: Vec<String> = pending.into_iter().collect();
    silent.sort();
    report.accepted.extend(silent);
    Ok(report)
}
