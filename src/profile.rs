//! Profile resolution (kind 0).

use std::time::Duration;

use futures_util::{stream, StreamExt};
use tracing::debug;

use crate::client::RelayClient;
use crate::config::{read_urls, RelayDescriptor};
use crate::error::Result;
use crate::event::{self, ProfileMetadata, KIND_PROFILE};
use crate::filter::Filter;

/// Fetch the profile for `pubkey` from the read-enabled relays in `relays`.
///
/// Each is queried with `{kinds: [0], authors: [pubkey], limit: 1}`;
/// among the candidates the newest one whose content parses wins. Malformed
/// content only disqualifies that candidate; it never propagates as an
/// error. `None` means no relay produced a parsable profile in time.
pub async fn fetch_profile(
    client: &RelayClient,
    pubkey: &str,
    relays: &[RelayDescriptor],
    timeout: Duration,
) -> Result<Option<ProfileMetadata>> {
    let filter = Filter::new()
        .kinds([KIND_PROFILE])
        .authors([pubkey])
        .limit(1);
    let mut collected = client
        .subscribe(&read_urls(relays), &filter, timeout)
        .await?;
    collected
        .events
        .retain(|e| e.kind == KIND_PROFILE && e.pubkey == pubkey);
    event::sort_events(&mut collected.events);
    for ev in &collected.events {
        match ProfileMetadata::parse(&ev.content) {
            Some(profile) => return Ok(Some(profile)),
            None => debug!(event = %ev.id, "skipping kind-0 event with malformed content"),
        }
    }
    Ok(None)
}

/// Resolve many profiles for a feed render: at most `max_concurrent` fetches
/// in flight, a short `per_timeout` each, and a shortened-pubkey placeholder
/// for anything that did not resolve in time, so one unresponsive relay
/// cannot stall the whole batch. Results come back in input order.
pub async fn fetch_profiles(
    client: &RelayClient,
    pubkeys: &[String],
    relays: &[RelayDescriptor],
    per_timeout: Duration,
    max_concurrent: usize,
) -> Vec<(String, ProfileMetadata)> {
    stream::iter(pubkeys)
        .map(|pk| async move {
            let profile = fetch_profile(client, pk, relays, per_timeout)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| placeholder(pk));
            (pk.clone(), profile)
        })
        .buffered(max_concurrent.max(1))
        .collect()
        .await
}

/// Placeholder profile shown while (or instead of) the real one.
pub fn placeholder(pubkey: &str) -> ProfileMetadata {
    ProfileMetadata {
        name: Some(shorten(pubkey)),
        ..Default::default()
    }
}

/// Abbreviate a hex pubkey for display: first six characters plus ellipsis.
pub fn shorten(pubkey: &str) -> String {
    if pubkey.len() > 6 {
        format!("{}...", &pubkey[..6])
    } else {
        pubkey.to_string()
    }
}
