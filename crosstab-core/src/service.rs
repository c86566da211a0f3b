//! Top-level handle wiring presence, generation, merge and delivery together.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{DeliveryMode, TabConfig};
use crate::delivery::{
    DeliveryStrategy, Engine, InterceptionDelivery, ReconciliationDelivery, ViewerConnection,
};
use crate::error::Result;
use crate::identity::IdentityGenerator;
use crate::merge::{KeywordDetector, ModEntryDetector};
use crate::models::{PlayerPresence, player_name};
use crate::presence::PresenceCache;
use crate::registry::ServerRegistry;
use crate::tasks::Background;

/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct CrossTab {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<Engine>,
    presence: Arc<PresenceCache>,
    identities: Arc<IdentityGenerator>,
    delivery: Arc<dyn DeliveryStrategy>,
    tasks: Background,
}

impl CrossTab {
    pub fn new(config: TabConfig, registry: Arc<dyn ServerRegistry>) -> Self {
        Self::with_detector(config, registry, Arc::new(KeywordDetector::default()))
    }

    pub fn with_detector(
        config: TabConfig,
        registry: Arc<dyn ServerRegistry>,
        detector: Arc<dyn ModEntryDetector>,
    ) -> Self {
        let config = Arc::new(config);
        let presence = Arc::new(PresenceCache::new(registry, config.stale_after()));
        let identities = Arc::new(IdentityGenerator::new());
        let engine = Arc::new(Engine::new(
            Arc::clone(&config),
            Arc::clone(&presence),
            Arc::clone(&identities),
            detector,
        ));
        let tasks = Background::default();
        let delivery: Arc<dyn DeliveryStrategy> = match config.delivery {
            DeliveryMode::Interception => Arc::new(InterceptionDelivery::new(Arc::clone(&engine))),
            DeliveryMode::Reconciliation => Arc::new(ReconciliationDelivery::new(
                Arc::clone(&engine),
                tasks.clone(),
            )),
        };

        Self {
            inner: Arc::new(Inner {
                engine,
                presence,
                identities,
                delivery,
                tasks,
            }),
        }
    }

    pub fn config(&self) -> &TabConfig {
        self.inner.engine.config()
    }

    pub fn presence(&self) -> &PresenceCache {
        &self.inner.presence
    }

    pub fn identities(&self) -> &IdentityGenerator {
        &self.inner.identities
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.inner.delivery.mode()
    }

    /// Initial refresh, then a periodic refresh followed by a delivery pass.
    pub async fn start(&self) {
        if let Err(e) = self.refresh_all().await {
            warn!(error = %e, "initial presence refresh failed, will retry on next tick");
        }

        let this = self.clone();
        self.inner.tasks.spawn_periodic(
            "presence-refresh",
            self.config().refresh_interval(),
            move || {
                let this = this.clone();
                async move {
                    if let Err(e) = this.refresh_all().await {
                        error!(error = %e, "periodic presence refresh failed");
                    }
                    this.inner.delivery.tick();
                }
            },
        );

        info!(
            mode = ?self.delivery_mode(),
            interval_secs = self.config().refresh_interval().as_secs(),
            "cross-server list started"
        );
    }

    /// Stop timers, let in-flight work finish within the grace period, then
    /// drop every viewer. Returns false if work had to be abandoned.
    pub async fn shutdown(&self) -> bool {
        let clean = self.inner.tasks.shutdown(self.config().shutdown_grace()).await;
        self.inner.delivery.shutdown();
        info!(clean, "cross-server list stopped");
        clean
    }

    pub async fn refresh_all(&self) -> Result<usize> {
        self.inner.presence.refresh_all().await
    }

    pub async fn refresh_one(&self, server: &str) -> Result<()> {
        self.inner.presence.refresh_one(server).await
    }

    /// Queue a refresh of every server. Returns false after shutdown.
    pub fn request_refresh_all(&self) -> bool {
        let this = self.clone();
        self.inner.tasks.spawn("refresh-all", async move {
            if let Err(e) = this.refresh_all().await {
                error!(error = %e, "requested refresh failed");
            }
        })
    }

    pub fn request_refresh_one(&self, server: &str) -> bool {
        let this = self.clone();
        let server = server.to_string();
        self.inner.tasks.spawn("refresh-one", async move {
            if let Err(e) = this.refresh_one(&server).await {
                error!(server = %server, error = %e, "requested refresh failed");
            }
        })
    }

    /// Queue a refresh followed by a full resend, for one viewer or all.
    pub fn request_full_resync(&self, viewer: Option<Uuid>) -> bool {
        let this = self.clone();
        self.inner.tasks.spawn("full-resync", async move {
            this.full_resync(viewer).await;
        })
    }

    pub async fn full_resync(&self, viewer: Option<Uuid>) {
        if let Err(e) = self.refresh_all().await {
            warn!(error = %e, "refresh before resync failed, resending cached presence");
        }
        self.inner.delivery.resync(viewer.as_ref());
    }

    pub fn on_viewer_connected(&self, viewer: Arc<dyn ViewerConnection>) {
        self.record_presence(viewer.as_ref());
        debug!(viewer = %viewer.username(), "viewer connected");
        self.inner.delivery.viewer_connected(viewer);
    }

    pub fn on_viewer_backend_changed(&self, viewer: Arc<dyn ViewerConnection>) {
        self.record_presence(viewer.as_ref());
        debug!(
            viewer = %viewer.username(),
            backend = ?viewer.current_backend(),
            "viewer switched backend"
        );
        self.inner.delivery.backend_changed(viewer);
    }

    /// Returns how many synthetic entries the viewer had.
    pub fn on_viewer_disconnected(&self, viewer: &Uuid) -> usize {
        self.inner.presence.player_left(viewer);
        let removed = self.inner.delivery.viewer_disconnected(viewer);
        debug!(viewer = %viewer, removed, "viewer disconnected");
        removed
    }

    pub fn tracked_entries(&self, viewer: &Uuid) -> Option<usize> {
        self.inner.delivery.tracked(viewer)
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.delivery.viewer_count()
    }

    /// Reflect the viewer's own move in the presence cache right away, so
    /// other viewers' next pass does not wait for a refresh.
    fn record_presence(&self, viewer: &dyn ViewerConnection) {
        let Some(server) = viewer.current_backend() else {
            return;
        };
        let name = match player_name(viewer.username()) {
            Ok(name) => name,
            Err(e) => {
                warn!(viewer = %viewer.username(), error = %e, "not recording presence");
                return;
            }
        };
        let presence = PlayerPresence {
            id: viewer.viewer_id(),
            name,
            latency: viewer.latency(),
            game_mode: viewer.game_mode(),
            server,
        };
        if let Err(e) = self.inner.presence.player_joined(presence) {
            debug!(
                viewer = %viewer.username(),
                error = %e,
                "presence update deferred to next refresh"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeViewer, StaticRegistry};
    use std::time::Duration;

    fn crosstab(registry: &Arc<StaticRegistry>, config: TabConfig) -> CrossTab {
        CrossTab::new(config, registry.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewer_lifecycle() {
        // GIVEN a running service with two servers
        let registry = StaticRegistry::new();
        registry.set("lobby", &[]);
        registry.set("survival", &["alice", "bob"]);
        let crosstab = crosstab(&registry, TabConfig::default());
        crosstab.start().await;

        // WHEN a viewer logs in to lobby
        let viewer = FakeViewer::new("viewer", Some("lobby"));
        crosstab.on_viewer_connected(viewer.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;

        // THEN they see survival and are themselves listed on lobby
        assert_eq!(crosstab.tracked_entries(&viewer.viewer_id()), Some(3));
        assert_eq!(crosstab.presence().player_count("lobby"), Some(1));
        assert_eq!(crosstab.viewer_count(), 1);

        // AND disconnecting clears both
        assert_eq!(crosstab.on_viewer_disconnected(&viewer.viewer_id()), 3);
        assert_eq!(crosstab.presence().player_count("lobby"), Some(0));
        assert!(crosstab.shutdown().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_refresh_propagates() {
        let registry = StaticRegistry::new();
        registry.set("lobby", &[]);
        registry.set("survival", &["alice"]);
        let crosstab = crosstab(&registry, TabConfig::default());
        crosstab.start().await;
        let viewer = FakeViewer::new("viewer", Some("lobby"));
        crosstab.on_viewer_connected(viewer.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(viewer.displayed().len(), 2);

        registry.set("creative", &["carol", "dave"]);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(viewer.displayed().len(), 5);
        assert!(crosstab.shutdown().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_moves_viewer_between_rosters() {
        let registry = StaticRegistry::new();
        registry.set("lobby", &[]);
        registry.set("survival", &[]);
        let crosstab = crosstab(&registry, TabConfig::default());
        crosstab.start().await;
        let viewer = FakeViewer::new("viewer", Some("lobby"));
        crosstab.on_viewer_connected(viewer.clone());

        viewer.set_backend(Some("survival"));
        crosstab.on_viewer_backend_changed(viewer.clone());

        assert_eq!(crosstab.presence().player_count("lobby"), Some(0));
        assert_eq!(crosstab.presence().player_count("survival"), Some(1));
        assert!(crosstab.shutdown().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_resync_refreshes_first() {
        let registry = StaticRegistry::new();
        registry.set("lobby", &[]);
        let crosstab = crosstab(&registry, TabConfig::default());
        crosstab.start().await;
        let viewer = FakeViewer::new("viewer", Some("lobby"));
        crosstab.on_viewer_connected(viewer.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(viewer.displayed().is_empty());

        registry.set("survival", &["alice"]);
        crosstab.full_resync(None).await;

        assert_eq!(viewer.displayed().len(), 2);
        assert!(crosstab.shutdown().await);
    }

    #[tokio::test]
    async fn test_disabled_feature_shows_nothing() {
        let registry = StaticRegistry::new();
        registry.set("lobby", &[]);
        registry.set("survival", &["alice"]);
        let crosstab = crosstab(
            &registry,
            TabConfig {
                cross_server_enabled: false,
                ..TabConfig::default()
            },
        );
        crosstab.refresh_all().await.unwrap();
        let viewer = FakeViewer::new("viewer", Some("lobby"));
        crosstab.on_viewer_connected(viewer.clone());
        crosstab.full_resync(Some(viewer.viewer_id())).await;

        assert!(viewer.displayed().is_empty());
        assert_eq!(crosstab.tracked_entries(&viewer.viewer_id()), Some(0));
    }

    #[tokio::test]
    async fn test_interception_mode_is_selectable() {
        let registry = StaticRegistry::new();
        let crosstab = crosstab(
            &registry,
            TabConfig {
                delivery: DeliveryMode::Interception,
                ..TabConfig::default()
            },
        );
        assert_eq!(crosstab.delivery_mode(), DeliveryMode::Interception);

        let viewer = FakeViewer::new("viewer", Some("lobby"));
        crosstab.on_viewer_connected(viewer.clone());
        assert!(viewer.has_interceptor());
        crosstab.shutdown().await;
        assert!(!viewer.has_interceptor());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_no_synthetic_entries() {
        // GIVEN viewers in both delivery modes showing survival
        for delivery in [DeliveryMode::Interception, DeliveryMode::Reconciliation] {
            let registry = StaticRegistry::new();
            registry.set("lobby", &[]);
            registry.set("survival", &["alice", "bob"]);
            let crosstab = crosstab(
                &registry,
                TabConfig {
                    delivery,
                    ..TabConfig::default()
                },
            );
            let viewer = FakeViewer::new("viewer", Some("lobby"));
            crosstab.on_viewer_connected(viewer.clone());
            crosstab.full_resync(None).await;
            assert_eq!(viewer.displayed().len(), 3, "{delivery:?}");

            // WHEN the service shuts down while the proxy keeps running
            crosstab.shutdown().await;

            // THEN the client keeps none of them
            assert!(viewer.displayed().is_empty(), "{delivery:?}");
        }
    }

    #[tokio::test]
    async fn test_requests_refused_after_shutdown() {
        let registry = StaticRegistry::new();
        let crosstab = crosstab(&registry, TabConfig::default());
        assert!(crosstab.shutdown().await);
        assert!(!crosstab.request_refresh_all());
        assert!(!crosstab.request_refresh_one("lobby"));
        assert!(!crosstab.request_full_resync(None));
    }

    #[tokio::test]
    async fn test_registry_outage_keeps_last_snapshot() {
        let registry = StaticRegistry::new();
        registry.set("survival", &["alice"]);
        let crosstab = crosstab(&registry, TabConfig::default());
        crosstab.refresh_all().await.unwrap();

        registry.fail_next();
        assert!(crosstab.refresh_all().await.is_err());
        assert_eq!(crosstab.presence().player_count("survival"), Some(1));
    }
}
