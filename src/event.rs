//! Nostr event model.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Profile metadata (kind 0).
pub const KIND_PROFILE: u32 = 0;
/// Short text note (kind 1).
pub const KIND_NOTE: u32 = 1;
/// Contact list (kind 3).
pub const KIND_CONTACTS: u32 = 3;
/// Trust rating (kind 33).
pub const KIND_RATING: u32 = 33;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and
/// the following elements hold data. Common examples include:
///
/// - `p` references another author's public key
/// - `e` links to another event ID
/// - `rating` / `category` carry the payload of a kind-33 trust rating
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from string-ish parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(parts.into_iter().map(Into::into).collect())
    }

    /// Tag type, e.g. `p` in `["p", "<pubkey>"]`.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// First data element, e.g. the pubkey in `["p", "<pubkey>"]`.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// Signed Nostr event as received verbatim from a relay.
///
/// Events are untrusted input: `content` is only JSON for specific kinds and
/// is parsed defensively by the callers that care about it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key, 32-byte hex.
    pub pubkey: String,
    /// Event kind number.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Ordered list of tags.
    pub tags: Vec<Tag>,
    /// Event payload.
    pub content: String,
    /// Schnorr signature over the event id.
    pub sig: String,
}

impl Event {
    /// Values of all `p` tags, in tag order.
    pub fn p_tags(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .filter(|t| t.name() == Some("p"))
            .filter_map(|t| t.value())
    }

    /// First data element of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name() == Some(name))
            .and_then(|t| t.value())
    }
}

/// Event prior to signing. The signer fills in `pubkey`, `id`, and `sig`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnsignedEvent {
    /// Event kind number.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Ordered list of tags.
    pub tags: Vec<Tag>,
    /// Event payload.
    pub content: String,
}

impl UnsignedEvent {
    /// Build an unsigned event with the current timestamp.
    pub fn new(kind: u32, tags: Vec<Tag>, content: impl Into<String>) -> Self {
        Self {
            kind,
            created_at: unix_now(),
            tags,
            content: content.into(),
        }
    }

    /// Kind-1 short text note.
    pub fn note(content: impl Into<String>) -> Self {
        Self::new(KIND_NOTE, vec![], content)
    }

    /// Kind-0 profile update. The whole profile replaces any previous one.
    pub fn profile(meta: &ProfileMetadata) -> Self {
        let content = serde_json::to_string(meta).unwrap_or_else(|_| "{}".into());
        Self::new(KIND_PROFILE, vec![], content)
    }

    /// Kind-3 contact list with one `p` tag per followed pubkey.
    pub fn contacts<I, S>(follows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = follows
            .into_iter()
            .map(|p| Tag::new(["p".to_string(), p.into()]))
            .collect();
        Self::new(KIND_CONTACTS, tags, "")
    }

    /// Kind-33 trust rating of `target` within `category`.
    pub fn rating(target: impl Into<String>, rating: f64, category: impl Into<String>) -> Self {
        let tags = vec![
            Tag::new(["p".to_string(), target.into()]),
            Tag::new(["rating".to_string(), rating.to_string()]),
            Tag::new(["category".to_string(), category.into()]),
        ];
        Self::new(KIND_RATING, tags, "")
    }
}

/// Profile fields parsed from a kind-0 event's `content`.
///
/// Replaced as a unit from the newest kind-0 event seen; never merged
/// field-by-field across events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl ProfileMetadata {
    /// Parse profile fields from a kind-0 `content` string. Malformed JSON
    /// yields `None` rather than an error.
    pub fn parse(content: &str) -> Option<Self> {
        serde_json::from_str(content).ok()
    }
}

/// Current Unix timestamp in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Sort events newest-first, breaking `created_at` ties by lexical event id
/// so ordering is deterministic.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// The newest event among `events`, with the same tiebreak as [`sort_events`].
pub fn newest<'a, I>(events: I) -> Option<&'a Event>
where
    I: IntoIterator<Item = &'a Event>,
{
    events.into_iter().min_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(id: &str, created_at: u64) -> Event {
        Event {
            id: id.into(),
            pubkey: "p".into(),
            kind: 1,
            created_at,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn p_tags_extracts_in_order() {
        let mut e = ev("aa", 1);
        e.tags = vec![
            Tag::new(["p", "k1"]),
            Tag::new(["e", "x"]),
            Tag::new(["p", "k2"]),
        ];
        let ps: Vec<&str> = e.p_tags().collect();
        assert_eq!(ps, vec!["k1", "k2"]);
    }

    #[test]
    fn profile_parse_accepts_unknown_fields() {
        let p = ProfileMetadata::parse(r#"{"name":"alice","display_name":"A"}"#).unwrap();
        assert_eq!(p.name.as_deref(), Some("alice"));
        assert!(p.about.is_none());
    }

    #[test]
    fn profile_parse_rejects_malformed() {
        assert!(ProfileMetadata::parse("not json").is_none());
        assert!(ProfileMetadata::parse("[1,2]").is_none());
    }

    #[test]
    fn sort_events_newest_first_with_id_tiebreak() {
        let mut events = vec![ev("bb", 1), ev("cc", 2), ev("aa", 1)];
        sort_events(&mut events);
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["cc", "aa", "bb"]);
    }

    #[test]
    fn newest_picks_max_created_at() {
        let events = vec![ev("aa", 100), ev("bb", 200)];
        assert_eq!(newest(&events).unwrap().id, "bb");
    }

    #[test]
    fn newest_tie_is_deterministic() {
        let events = vec![ev("bb", 5), ev("aa", 5)];
        assert_eq!(newest(&events).unwrap().id, "aa");
        assert!(newest(std::iter::empty()).is_none());
    }

    #[test]
    fn rating_builder_shapes_tags() {
        let ev = UnsignedEvent::rating("target", 2.5, "competence");
        assert_eq!(ev.kind, KIND_RATING);
        assert_eq!(ev.tags[0], Tag::new(["p", "target"]));
        assert_eq!(ev.tags[1], Tag::new(["rating", "2.5"]));
        assert_eq!(ev.tags[2], Tag::new(["category", "competence"]));
    }

    #[test]
    fn contacts_builder_emits_p_tags() {
        let ev = UnsignedEvent::contacts(["k1", "k2"]);
        assert_eq!(ev.kind, KIND_CONTACTS);
        assert_eq!(ev.tags.len(), 2);
        assert_eq!(ev.tags[0].value(), Some("k1"));
    }
}
