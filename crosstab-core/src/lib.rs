//! Cross-server player list for a multi-backend game proxy.
//!
//! Every viewer's client list is extended with entries describing players on
//! the other backends: a header per server, its players (capped), and
//! overflow, empty-server and status markers. Synthetic entries carry
//! deterministic ids so successive updates can be diffed per viewer.

pub mod config;
pub mod delivery;
mod error;
pub mod generator;
pub mod identity;
pub mod merge;
mod models;
pub mod presence;
pub mod registry;
mod service;
pub mod tasks;
pub mod template;

#[cfg(test)]
mod testing;

pub use config::{DeliveryMode, TabConfig};
pub use delivery::{DeliveryStrategy, ListInterceptor, ViewerConnection};
pub use error::{CoreError, Result};
pub use identity::{IdentityGenerator, VirtualIdentity};
pub use merge::{KeywordDetector, ModEntryDetector};
pub use models::{
    EntryKind, ListAction, ListEntry, ListUpdate, Packet, PlayerName, PlayerPresence,
    PresenceSnapshot, ServerDescriptor, ServerRoster, SyntheticEntry, player_name,
};
pub use presence::PresenceCache;
pub use registry::{RegisteredServer, ServerRegistry};
pub use service::CrossTab;
