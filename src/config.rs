//! Runtime configuration from environment variables.
//!
//! Values come from the process environment, optionally seeded from a
//! `.env` file loaded in `main`. Unset variables fall back to defaults;
//! set-but-unparsable numeric variables also fall back rather than abort.

use std::env;
use std::time::Duration;

use tracing::warn;

/// Relays queried when `RELAYS` is unset or empty.
pub const DEFAULT_RELAYS: [&str; 4] = [
    "wss://relay.primal.net",
    "wss://relay.damus.io",
    "wss://relay.snort.social",
    "wss://nostr.wine",
];

/// One relay with its read/write policy.
///
/// A descriptor set is replaced wholesale when a fresh one is obtained,
/// never merged with a previous one. Queries go to read-enabled relays,
/// publishes to write-enabled ones.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayDescriptor {
    pub url: String,
    pub read: bool,
    pub write: bool,
}

impl RelayDescriptor {
    /// Relay used for both reads and writes.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            read: true,
            write: true,
        }
    }

    pub fn read_only(url: impl Into<String>) -> Self {
        Self {
            write: false,
            ..Self::new(url)
        }
    }

    pub fn write_only(url: impl Into<String>) -> Self {
        Self {
            read: false,
            ..Self::new(url)
        }
    }

    /// Parse one `RELAYS` entry: a URL optionally followed by `read` and/or
    /// `write`, whitespace separated. A URL with no marker gets both.
    /// Unknown markers are warned about and ignored.
    pub fn parse(entry: &str) -> Option<Self> {
        let mut parts = entry.split_whitespace();
        let url = parts.next()?.to_string();
        let mut read = false;
        let mut write = false;
        let mut marked = false;
        for flag in parts {
            match flag {
                "read" => {
                    read = true;
                    marked = true;
                }
                "write" => {
                    write = true;
                    marked = true;
                }
                other => warn!(url = %url, flag = other, "unknown relay marker, ignoring"),
            }
        }
        if !marked {
            read = true;
            write = true;
        }
        Some(Self { url, read, write })
    }
}

/// URLs of the read-enabled relays in `relays`.
pub fn read_urls(relays: &[RelayDescriptor]) -> Vec<String> {
    relays
        .iter()
        .filter(|r| r.read)
        .map(|r| r.url.clone())
        .collect()
}

/// URLs of the write-enabled relays in `relays`.
pub fn write_urls(relays: &[RelayDescriptor]) -> Vec<String> {
    relays
        .iter()
        .filter(|r| r.write)
        .map(|r| r.url.clone())
        .collect()
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Relay pool, from `RELAYS` (comma separated, optional read/write
    /// markers per entry).
    pub relays: Vec<RelayDescriptor>,
    /// Optional SOCKS5 proxy address, from `TOR_SOCKS`.
    pub tor_socks: Option<String>,
    /// Per-query deadline, from `TIMEOUT_MS`.
    pub timeout: Duration,
    /// Tighter deadline for single profile lookups, from `PROFILE_TIMEOUT_MS`.
    pub profile_timeout: Duration,
    /// In-flight cap for bulk profile resolution, from `PROFILE_CONCURRENCY`.
    pub profile_concurrency: usize,
    /// Retries for an empty follower scan, from `FOLLOWER_RETRIES`.
    pub follower_retries: u32,
    /// Whether feeds include the subject's own notes, from `INCLUDE_SELF`.
    pub include_self: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            relays: DEFAULT_RELAYS.iter().copied().map(RelayDescriptor::new).collect(),
            tor_socks: None,
            timeout: Duration::from_millis(10_000),
            profile_timeout: Duration::from_millis(2_000),
            profile_concurrency: 8,
            follower_retries: 3,
            include_self: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        let relays = match env::var("RELAYS") {
            Ok(raw) => {
                let list: Vec<RelayDescriptor> = csv_strings(&raw)
                    .iter()
                    .filter_map(|entry| RelayDescriptor::parse(entry))
                    .collect();
                if list.is_empty() {
                    defaults.relays.clone()
                } else {
                    list
                }
            }
            Err(_) => defaults.relays.clone(),
        };
        Settings {
            relays,
            tor_socks: env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty()),
            timeout: Duration::from_millis(parse_or("TIMEOUT_MS", 10_000)),
            profile_timeout: Duration::from_millis(parse_or("PROFILE_TIMEOUT_MS", 2_000)),
            profile_concurrency: parse_or("PROFILE_CONCURRENCY", 8),
            follower_retries: parse_or("FOLLOWER_RETRIES", 3),
            include_self: parse_or::<u8>("INCLUDE_SELF", 0) != 0,
        }
    }
}

/// Split a comma separated list, trimming whitespace and dropping empties.
pub fn csv_strings(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = raw.as_str(), "unparsable value, using default");
            default
        }),
        Err(_) => default,
    }
}
