//! Error taxonomy for the relay query engine.
//!
//! Transport and parse problems inside a running subscription are absorbed
//! locally and degrade results instead of surfacing here; timeouts on bounded
//! reads resolve with partial data. Only failures that require caller action
//! become an [`Error`].

use thiserror::Error;

/// Failure classes surfaced to callers.
#[derive(Error, Debug)]
pub enum Error {
    /// Send attempted on a connection that is not open. Nothing is queued;
    /// the caller may re-issue once the connection is open again.
    #[error("relay {0} is not ready")]
    NotReady(String),

    /// No relays were supplied for an operation that needs at least one.
    #[error("no relays configured")]
    NoRelays,

    /// A relay URL could not be used to establish a connection.
    #[error("invalid relay url {url}: {reason}")]
    BadRelayUrl { url: String, reason: String },

    /// The external signer rejected the event or failed. Terminal for the
    /// whole publish attempt.
    #[error("signing failed: {0}")]
    Signing(String),

    /// No targeted relay demonstrated support for tag-filtered queries, so
    /// the followers set cannot be computed. Distinct from "zero followers".
    #[error("followers unavailable: no relay answered the #p query")]
    FollowersUnavailable,

    #[error("websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("socks proxy error: {0}")]
    Proxy(#[from] tokio_socks::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
