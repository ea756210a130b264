//! Nostr relay query engine: multi-relay subscriptions with bounded
//! collection, profile resolution, social graph analysis, and signed
//! event publishing over NIP-01 websockets.

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod graph;
pub mod profile;
pub mod publish;
pub mod relay;
pub mod signer;

pub use client::{Collected, RelayClient, Subscription, SubscriptionUpdate};
pub use config::{RelayDescriptor, Settings};
pub use error::{Error, Result};
pub use event::{Event, ProfileMetadata, Tag, UnsignedEvent};
pub use filter::Filter;
pub use graph::RelationPartition;
pub use publish::{PublishReport, Signer};
pub use relay::{RelayConnection, RelayMessage};
pub use signer::KeySigner;
