//! Social graph analysis over kind-3 contact lists.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::client::RelayClient;
use crate::config::{read_urls, RelayDescriptor};
use crate::error::{Error, Result};
use crate::event::{self, Event, KIND_CONTACTS, KIND_NOTE};
use crate::filter::Filter;

/// Backoff between follower-query retries.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Partition of a subject's relations.
#[derive(Debug, Default, PartialEq)]
pub struct RelationPartition {
    /// Followed by the subject and following the subject back.
    pub mutual: BTreeSet<String>,
    /// Followed by the subject, not following back.
    pub following_only: BTreeSet<String>,
    /// Following the subject, not followed back.
    pub follower_only: BTreeSet<String>,
}

/// Pubkeys the subject follows: `p` tags of the subject's single newest
/// kind-3 event. Older contact lists are discarded entirely.
pub async fn fetch_follows(
    client: &RelayClient,
    subject: &str,
    relays: &[RelayDescriptor],
    timeout: Duration,
) -> Result<BTreeSet<String>> {
    let filter = Filter::new()
        .kinds([KIND_CONTACTS])
        .authors([subject])
        .limit(1);
    let collected = client
        .subscribe(&read_urls(relays), &filter, timeout)
        .await?;
    let newest = event::newest(
        collected
            .events
            .iter()
            .filter(|e| e.kind == KIND_CONTACTS && e.pubkey == subject),
    );
    Ok(newest
        .map(|ev| ev.p_tags().map(str::to_string).collect())
        .unwrap_or_default())
}

/// Pubkeys following the subject, discovered with a global `#p` tag scan:
/// `{kinds: [3], "#p": [subject]}` across all relays, keeping for each
/// author only their newest kind-3 event (a stale contact list must not
/// resurrect an unfollow).
///
/// There is no direct "who follows X" query in the protocol, so coverage is
/// only as good as the relays' tag indexes. When no relay even finishes the
/// scan the result would be an empty set indistinguishable from zero
/// followers; that case surfaces as [`Error::FollowersUnavailable`] instead.
/// An empty result from healthy relays is retried up to `retries` times with
/// a short backoff, purely to reduce false negatives.
pub async fn fetch_followers(
    client: &RelayClient,
    subject: &str,
    relays: &[RelayDescriptor],
    timeout: Duration,
    retries: u32,
) -> Result<BTreeSet<String>> {
    let filter = Filter::new().kinds([KIND_CONTACTS]).tag("p", [subject]);
    let readers = read_urls(relays);
    for attempt in 0..=retries {
        let collected = client.subscribe(&readers, &filter, timeout).await?;
        if collected.eose_relays == 0 && collected.events.is_empty() {
            return Err(Error::FollowersUnavailable);
        }
        let followers = followers_from_events(&collected.events, subject);
        if !followers.is_empty() {
            return Ok(followers);
        }
        if attempt < retries {
            debug!(attempt = attempt + 1, "empty followers result, retrying");
            sleep(RETRY_BACKOFF).await;
        }
    }
    Ok(BTreeSet::new())
}

/// Authors whose newest kind-3 event in `events` still lists `subject`.
fn followers_from_events(events: &[Event], subject: &str) -> BTreeSet<String> {
    let mut newest_by_author: HashMap<&str, &Event> = HashMap::new();
    for ev in events.iter().filter(|e| e.kind == KIND_CONTACTS) {
        newest_by_author
            .entry(ev.pubkey.as_str())
            .and_modify(|cur| {
                let newer = ev.created_at > cur.created_at
                    || (ev.created_at == cur.created_at && ev.id < cur.id);
                if newer {
                    *cur = ev;
                }
            })
            .or_insert(ev);
    }
    newest_by_author
        .into_iter()
        .filter(|(_, ev)| ev.p_tags().any(|p| p == subject))
        .map(|(author, _)| author.to_string())
        .collect()
}

/// Partition `following` against `followers` by exact pubkey equality.
pub fn partition(following: &BTreeSet<String>, followers: &BTreeSet<String>) -> RelationPartition {
    RelationPartition {
        mutual: following.intersection(followers).cloned().collect(),
        following_only: following.difference(followers).cloned().collect(),
        follower_only: followers.difference(following).cloned().collect(),
    }
}

/// Fetch both sides of the subject's graph and partition them.
pub async fn compute_relations(
    client: &RelayClient,
    subject: &str,
    relays: &[RelayDescriptor],
    timeout: Duration,
    follower_retries: u32,
) -> Result<RelationPartition> {
    let (following, followers) = tokio::join!(
        fetch_follows(client, subject, relays, timeout),
        fetch_followers(client, subject, relays, timeout, follower_retries),
    );
    Ok(partition(&following?, &followers?))
}

/// Kind-1 notes authored by the subject's follow set, newest first.
/// Whether the subject's own notes are included is the caller's policy.
pub async fn fetch_feed(
    client: &RelayClient,
    subject: &str,
    relays: &[RelayDescriptor],
    timeout: Duration,
    limit: u32,
    include_self: bool,
) -> Result<Vec<Event>> {
    let mut authors = fetch_follows(client, subject, relays, timeout).await?;
    if include_self {
        authors.insert(subject.to_string());
    }
    if authors.is_empty() {
        return Ok(vec![]);
    }
    let filter = Filter::new()
        .kinds([KIND_NOTE])
        .authors(authors.iter().cloned())
        .limit(limit);
    let mut collected = client
        .subscribe(&read_urls(relays), &filter, timeout)
        .await?;
    collected
        .events
        .retain(|e| e.kind == KIND_NOTE && authors.contains(&e.pubkey));
    event::sort_events(&mut collected.events);
    collected.events.truncate(limit as usize);
    Ok(collected.events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

    fn contacts_event(id: &str, author: &str, created_at: u64, follows: &[&str]) -> Event {
        Event {
            id: id.into(),
            pubkey: author.into(),
            kind: 3,
            created_at,
            tags: follows.iter().map(|p| Tag::new(["p", *p])).collect(),
            content: String::new(),
            sig: String::new(),
        }
    }

    /// Relay that answers every REQ with the same events and an EOSE.
    async fn mock_graph_relay(events: Vec<Event>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let events = events.clone();
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(TMsg::Text(txt))) = ws.next().await {
                        let v: Value = serde_json::from_str(&txt).unwrap();
                        if v[0] == "REQ" {
                            let sub = v[1].as_str().unwrap().to_string();
                            for ev in &events {
                                ws.send(TMsg::Text(json!(["EVENT", sub, ev]).to_string()))
                                    .await
                                    .unwrap();
                            }
                            ws.send(TMsg::Text(json!(["EOSE", sub]).to_string()))
                                .await
                                .unwrap();
                        }
                    }
                });
            }
        });
        format!("ws://{}", addr)
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn partition_splits_three_ways() {
        let following = set(&["A", "B", "C"]);
        let followers = set(&["B", "C", "D"]);
        let p = partition(&following, &followers);
        assert_eq!(p.mutual, set(&["B", "C"]));
        assert_eq!(p.following_only, set(&["A"]));
        assert_eq!(p.follower_only, set(&["D"]));
    }

    #[test]
    fn partition_of_empty_sets_is_empty() {
        let p = partition(&BTreeSet::new(), &BTreeSet::new());
        assert_eq!(p, RelationPartition::default());
    }

    #[test]
    fn followers_use_only_newest_contact_list_per_author() {
        // f1 unfollowed the subject in a newer event; f2 still follows.
        let events = vec![
            contacts_event("aa", "f1", 100, &["subject"]),
            contacts_event("bb", "f1", 200, &["other"]),
            contacts_event("cc", "f2", 50, &["subject", "other"]),
        ];
        assert_eq!(followers_from_events(&events, "subject"), set(&["f2"]));
    }

    #[tokio::test]
    async fn fetch_follows_takes_newest_list() {
        let subject = "a1".repeat(32);
        let relay = mock_graph_relay(vec![
            contacts_event("aa", &subject, 100, &["old1", "old2"]),
            contacts_event("bb", &subject, 200, &["new1"]),
        ])
        .await;
        let client = RelayClient::new();
        let relays = [RelayDescriptor::new(relay)];
        let follows = fetch_follows(&client, &subject, &relays, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(follows, set(&["new1"]));
    }

    #[tokio::test]
    async fn compute_relations_end_to_end() {
        let subject = "a1".repeat(32);
        let relay = mock_graph_relay(vec![
            contacts_event("aa", &subject, 100, &["B", "C", "A"]),
            contacts_event("bb", "B", 100, &[&subject]),
            contacts_event("cc", "C", 100, &[&subject, "A"]),
            contacts_event("dd", "D", 100, &[&subject]),
        ])
        .await;
        let client = RelayClient::new();
        let relays = [RelayDescriptor::new(relay)];
        let p = compute_relations(&client, &subject, &relays, Duration::from_secs(5), 0)
            .await
            .unwrap();
        assert_eq!(p.mutual, set(&["B", "C"]));
        assert_eq!(p.following_only, set(&["A"]));
        assert_eq!(p.follower_only, set(&["D"]));
    }

    #[tokio::test]
    async fn followers_unavailable_when_no_relay_answers() {
        // Relay drops every connection before answering.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let ws = accept_async(stream).await.unwrap();
                drop(ws);
            }
        });

        let client = RelayClient::new();
        let url = format!("ws://{}", addr);
        let relays = [RelayDescriptor::new(url)];
        match fetch_followers(&client, "subject", &relays, Duration::from_secs(5), 0).await {
            Err(Error::FollowersUnavailable) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_followers_from_healthy_relay_is_zero_not_error() {
        let relay = mock_graph_relay(vec![]).await;
        let client = RelayClient::new();
        let relays = [RelayDescriptor::new(relay)];
        let followers = fetch_followers(&client, "subject", &relays, Duration::from_secs(5), 0)
            .await
            .unwrap();
        assert!(followers.is_empty());
    }

    #[tokio::test]
    async fn empty_followers_are_retried() {
        // First REQ gets an empty EOSE, the second gets a follower.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut reqs = 0;
            while let Some(Ok(TMsg::Text(txt))) = ws.next().await {
                let v: Value = serde_json::from_str(&txt).unwrap();
                if v[0] == "REQ" {
                    reqs += 1;
                    let sub = v[1].as_str().unwrap().to_string();
                    if reqs > 1 {
                        let ev = contacts_event("aa", "f1", 100, &["subject"]);
                        ws.send(TMsg::Text(json!(["EVENT", sub, ev]).to_string()))
                            .await
                            .unwrap();
                    }
                    ws.send(TMsg::Text(json!(["EOSE", sub]).to_string()))
                        .await
                        .unwrap();
                }
            }
        });

        let client = RelayClient::new();
        let url = format!("ws://{}", addr);
        let relays = [RelayDescriptor::new(url)];
        let followers = fetch_followers(&client, "subject", &relays, Duration::from_secs(5), 3)
            .await
            .unwrap();
        assert_eq!(followers, set(&["f1"]));
    }

    #[tokio::test]
    async fn feed_respects_include_self_policy() {
        let subject = "a1".repeat(32);
        fn note(id: &str, author: &str, created_at: u64) -> Event {
            Event {
                id: id.into(),
                pubkey: author.into(),
                kind: 1,
                created_at,
                tags: vec![],
                content: format!("note {id}"),
                sig: String::new(),
            }
        }
        // The mock ignores filters, so the kind-3 event comes back on the
        // feed query too and must be dropped client-side.
        let relay = mock_graph_relay(vec![
            contacts_event("aa", &subject, 100, &["friend"]),
            note("n1", "friend", 10),
            note("n2", "friend", 30),
        ])
        .await;
        let client = RelayClient::new();
        let feed = fetch_feed(
            &client,
            &subject,
            &[RelayDescriptor::new(relay)],
            Duration::from_secs(5),
            10,
            true,
        )
        .await
        .unwrap();
        let ids: Vec<&str> = feed.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["n2", "n1"]);
    }

    #[tokio::test]
    async fn feed_without_follows_is_empty() {
        let relay = mock_graph_relay(vec![]).await;
        let client = RelayClient::new();
        let feed = fetch_feed(
            &client,
            &"a1".repeat(32),
            &[RelayDescriptor::new(relay)],
            Duration::from_secs(5),
            10,
            false,
        )
        .await
        .unwrap();
        assert!(feed.is_empty());
    }
}
