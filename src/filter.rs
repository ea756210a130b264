//! NIP-01 subscription filters.

use std::collections::BTreeMap;

use serde_json::Value;

/// Filter parameters attached to a `REQ` subscription.
///
/// Tag filters are keyed by their single-letter name (`p`, `e`, `t`, ...);
/// the `#` prefix is added when serializing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Restrict to event kinds.
    pub kinds: Option<Vec<u32>>,
    /// Restrict to specific authors (hex pubkeys).
    pub authors: Option<Vec<String>>,
    /// Tag filters, e.g. `p` -> pubkeys that must appear in a `p` tag.
    pub tags: BTreeMap<String, Vec<String>>,
    /// Lower bound for `created_at`.
    pub since: Option<u64>,
    /// Upper bound for `created_at`.
    pub until: Option<u64>,
    /// Maximum number of stored events requested per relay.
    pub limit: Option<u32>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds<I: IntoIterator<Item = u32>>(mut self, kinds: I) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
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

    pub fn tag<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn since(mut self, ts: u64) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn until(mut self, ts: u64) -> Self {
        self.until = Some(ts);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Serialize into the NIP-01 filter object. Empty lists are omitted
    /// entirely rather than sent as `[]`.
    pub fn to_json(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        if let Some(kinds) = &self.kinds {
            if !kinds.is_empty() {
                map.insert(
                    "kinds".into(),
                    Value::Array(kinds.iter().map(|k| Value::Number((*k).into())).collect()),
                );
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.is_empty() {
                map.insert(
                    "authors".into(),
                    Value::Array(authors.iter().cloned().map(Value::String).collect()),
                );
            }
        }
        for (tag, values) in &self.tags {
            if values.is_empty() {
                continue;
            }
            let key = if tag.starts_with('#') {
                tag.clone()
            } else {
                format!("#{tag}")
            };
            map.insert(
                key,
                Value::Array(values.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(since) = self.since {
            map.insert("since".into(), Value::Number(since.into()));
        }
        if let Some(until) = self.until {
            map.insert("until".into(), Value::Number(until.into()));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".into(), Value::Number(limit.into()));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_json_includes_all_fields() {
        let filter = Filter::new()
            .kinds([0, 3])
            .authors(["a1", "a2"])
            .tag("p", ["k1"])
            .since(1)
            .until(2)
            .limit(3);
        let json = Value::Object(filter.to_json());
        assert_eq!(json["kinds"], serde_json::json!([0, 3]));
        assert_eq!(json["authors"], serde_json::json!(["a1", "a2"]));
        assert_eq!(json["#p"], serde_json::json!(["k1"]));
        assert_eq!(json["since"], 1);
        assert_eq!(json["until"], 2);
        assert_eq!(json["limit"], 3);
    }

    #[test]
    fn to_json_omits_empty_fields() {
        let json = Filter::new().to_json();
        assert!(json.is_empty());

        let json = Filter::new().kinds([]).authors(Vec::<String>::new()).to_json();
        assert!(json.is_empty());
    }

    #[test]
    fn tag_with_hash_prefix_not_doubled() {
        let json = Filter::new().tag("#t", ["topic"]).to_json();
        assert!(json.contains_key("#t"));
        assert!(!json.contains_key("##t"));
    }
}
