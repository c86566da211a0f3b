//! Getting synthetic entries onto a viewer's client.
//!
//! Two strategies sit behind [`DeliveryStrategy`]: rewriting list-update
//! messages in transit ([`interception`]) or driving the proxy's roster API
//! ([`reconciliation`]). Both share one [`Engine`] for generation and merge.

pub mod interception;
pub mod reconciliation;

use std::sync::Arc;

use uuid::Uuid;

use crate::config::{DeliveryMode, TabConfig};
use crate::error::Result;
use crate::generator::EntryGenerator;
use crate::identity::IdentityGenerator;
use crate::merge::{MergeEngine, MergePolicy, ModEntryDetector};
use crate::models::{ListUpdate, Packet, SyntheticEntry};
use crate::presence::PresenceCache;

pub use interception::InterceptionDelivery;
pub use reconciliation::ReconciliationDelivery;

/// Transform stage on a viewer connection's inbound (backend to client)
/// message path. Returns the messages to forward in place of `packet`.
pub trait ListInterceptor: Send + Sync {
    fn on_inbound(&self, packet: Packet) -> Vec<Packet>;
}

/// What the host proxy exposes for one connected viewer.
///
/// Every method must be a no-op once the connection is closed.
pub trait ViewerConnection: Send + Sync {
    fn viewer_id(&self) -> Uuid;

    fn username(&self) -> &str;

    fn latency(&self) -> i32 {
        0
    }

    fn game_mode(&self) -> i32 {
        0
    }

    /// Backend the viewer is currently routed to.
    fn current_backend(&self) -> Option<String>;

    fn is_active(&self) -> bool;

    /// Send a list-update message straight to the client.
    fn send_list_update(&self, update: ListUpdate);

    /// Install `interceptor` on the inbound path, replacing any previous
    /// one. Returns false if the connection cannot host it.
    fn attach_interceptor(&self, interceptor: Arc<dyn ListInterceptor>) -> bool;

    fn detach_interceptor(&self);

    /// Add or replace an entry in the client's list.
    fn roster_add(&self, entry: &SyntheticEntry);

    fn roster_remove(&self, id: Uuid);
}

/// Generation plus merge, shared by both strategies.
pub struct Engine {
    config: Arc<TabConfig>,
    presence: Arc<PresenceCache>,
    generator: EntryGenerator,
    merge: MergeEngine,
}

impl Engine {
    pub fn new(
        config: Arc<TabConfig>,
        presence: Arc<PresenceCache>,
        identities: Arc<IdentityGenerator>,
        detector: Arc<dyn ModEntryDetector>,
    ) -> Self {
        let merge = MergeEngine::new(
            MergePolicy::from(config.as_ref()),
            detector,
            Arc::clone(&identities),
        );
        Self {
            generator: EntryGenerator::new(Arc::clone(&config), identities),
            config,
            presence,
            merge,
        }
    }

    pub fn config(&self) -> &TabConfig {
        &self.config
    }

    pub fn presence(&self) -> &PresenceCache {
        &self.presence
    }

    pub fn merger(&self) -> &MergeEngine {
        &self.merge
    }

    /// Current synthetic entries for a viewer on `viewer_server`. Empty when
    /// the feature is switched off.
    pub fn entries_for(&self, viewer_server: Option<&str>) -> Result<Vec<SyntheticEntry>> {
        if !self.config.cross_server_enabled {
            return Ok(Vec::new());
        }
        let snapshot = self.presence.snapshot();
        self.generator
            .try_generate(viewer_server, &snapshot, self.config.max_players_per_server)
    }
}

/// Lifecycle hooks a delivery strategy reacts to. All calls are cheap and
/// non-blocking; slow work goes to the background pool.
pub trait DeliveryStrategy: Send + Sync {
    fn mode(&self) -> DeliveryMode;

    fn viewer_connected(&self, viewer: Arc<dyn ViewerConnection>);

    fn backend_changed(&self, viewer: Arc<dyn ViewerConnection>);

    /// Forget the viewer. Returns how many synthetic entries it had.
    fn viewer_disconnected(&self, viewer: &Uuid) -> usize;

    /// Full resend for one viewer, or every viewer when `None`.
    fn resync(&self, viewer: Option<&Uuid>);

    /// Periodic incremental update, run after each presence refresh.
    fn tick(&self);

    fn tracked(&self, viewer: &Uuid) -> Option<usize>;

    fn viewer_count(&self) -> usize;

    /// Take every synthetic entry off every client and forget all viewers.
    fn shutdown(&self);
}
