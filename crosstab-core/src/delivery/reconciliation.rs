//! Delivery through the proxy's roster API.
//!
//! Each viewer gets a [`Reconciler`] that computes the delta between the
//! current synthetic set and what it last pushed, then issues removals
//! followed by additions. Passes for one viewer never overlap; a pass that
//! finds another one in flight is dropped, the next tick catches up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use scc::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DeliveryStrategy, Engine, ViewerConnection};
use crate::config::DeliveryMode;
use crate::merge::ViewerSyntheticState;
use crate::tasks::Background;

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reconciler {
    viewer: Arc<dyn ViewerConnection>,
    state: Mutex<ViewerSyntheticState>,
    in_flight: AtomicBool,
    closed: AtomicBool,
}

impl Reconciler {
    pub fn new(viewer: Arc<dyn ViewerConnection>) -> Self {
        Self {
            viewer,
            state: Mutex::new(ViewerSyntheticState::new()),
            in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn tracked(&self) -> usize {
        self.state().len()
    }

    /// Bring the viewer's roster in line with the current synthetic set.
    /// Returns the number of roster calls made, or `None` if the pass was
    /// skipped.
    pub fn reconcile(&self, engine: &Engine, full: bool) -> Option<usize> {
        if self.closed.load(Ordering::Acquire) || !self.viewer.is_active() {
            return None;
        }
        let Some(_guard) = InFlight::try_acquire(&self.in_flight) else {
            debug!(viewer = %self.viewer.viewer_id(), "reconcile already running, skipping");
            return None;
        };

        let backend = self.viewer.current_backend();
        let generated = match engine.entries_for(backend.as_deref()) {
            Ok(generated) => generated,
            Err(e) => {
                warn!(
                    viewer = %self.viewer.viewer_id(),
                    error = %e,
                    "skipping reconcile, generation failed"
                );
                return None;
            }
        };

        let mut state = self.state();
        // Disconnect may have won the race for the lock.
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        let mut calls = 0;
        if full {
            for id in state.take_known() {
                self.viewer.roster_remove(id);
                calls += 1;
            }
        }
        let out = engine.merger().merge(None, &generated, &mut state, full);
        for id in &out.removals {
            self.viewer.roster_remove(*id);
        }
        for entry in out.inserted.iter().chain(&out.refreshed) {
            self.viewer.roster_add(entry);
        }
        calls += out.removals.len() + out.inserted.len() + out.refreshed.len();

        if calls > 0 {
            debug!(
                viewer = %self.viewer.viewer_id(),
                added = out.inserted.len(),
                removed = out.removals.len(),
                refreshed = out.refreshed.len(),
                full,
                "reconciled synthetic entries"
            );
        }
        Some(calls)
    }

    /// Stop all future passes and hand back whatever is still tracked.
    pub fn close(&self) -> Vec<Uuid> {
        self.closed.store(true, Ordering::Release);
        self.state().take_known()
    }

    fn state(&self) -> MutexGuard<'_, ViewerSyntheticState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ReconciliationDelivery {
    engine: Arc<Engine>,
    tasks: Background,
    viewers: Arc<HashMap<Uuid, Arc<Reconciler>>>,
}

impl ReconciliationDelivery {
    pub fn new(engine: Arc<Engine>, tasks: Background) -> Self {
        Self {
            engine,
            tasks,
            viewers: Arc::new(HashMap::new()),
        }
    }

    /// Reconcile after the configured delay so the backend's own roster
    /// messages land first.
    fn schedule(&self, reconciler: Arc<Reconciler>, full: bool) {
        let engine = Arc::clone(&self.engine);
        let delay = engine.config().reconcile_delay();
        self.tasks.spawn("reconcile", async move {
            tokio::time::sleep(delay).await;
            reconciler.reconcile(&engine, full);
        });
    }

    /// Close `reconciler` and take its synthetic entries off the client.
    fn retire(reconciler: &Reconciler) -> usize {
        let stale = reconciler.close();
        for id in &stale {
            reconciler.viewer.roster_remove(*id);
        }
        stale.len()
    }

    fn reconcilers(&self) -> Vec<Arc<Reconciler>> {
        let mut all = Vec::with_capacity(self.viewers.len());
        self.viewers.iter_sync(|_, reconciler| {
            all.push(Arc::clone(reconciler));
            true
        });
        all
    }
}

impl DeliveryStrategy for ReconciliationDelivery {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Reconciliation
    }

    fn viewer_connected(&self, viewer: Arc<dyn ViewerConnection>) {
        let id = viewer.viewer_id();
        let reconciler = Arc::new(Reconciler::new(viewer));
        if let Some((_, previous)) = self.viewers.remove_sync(&id) {
            Self::retire(&previous);
        }
        let _ = self.viewers.insert_sync(id, Arc::clone(&reconciler));
        self.schedule(reconciler, true);
    }

    fn backend_changed(&self, viewer: Arc<dyn ViewerConnection>) {
        let existing = self
            .viewers
            .read_sync(&viewer.viewer_id(), |_, r| Arc::clone(r));
        match existing {
            // A switch rebuilds the whole list, the new backend resets the
            // client's roster.
            Some(reconciler) => self.schedule(reconciler, true),
            None => self.viewer_connected(viewer),
        }
    }

    fn viewer_disconnected(&self, viewer: &Uuid) -> usize {
        let Some((_, reconciler)) = self.viewers.remove_sync(viewer) else {
            return 0;
        };
        Self::retire(&reconciler)
    }

    fn resync(&self, viewer: Option<&Uuid>) {
        let targets = match viewer {
            Some(id) => self
                .viewers
                .read_sync(id, |_, r| Arc::clone(r))
                .into_iter()
                .collect(),
            None => self.reconcilers(),
        };
        for reconciler in targets {
            reconciler.reconcile(&self.engine, true);
        }
    }

    fn tick(&self) {
        for reconciler in self.reconcilers() {
            reconciler.reconcile(&self.engine, false);
        }
    }

    fn tracked(&self, viewer: &Uuid) -> Option<usize> {
        self.viewers.read_sync(viewer, |_, r| r.tracked())
    }

    fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    fn shutdown(&self) {
        let reconcilers = self.reconcilers();
        let removed: usize = reconcilers.iter().map(|r| Self::retire(r)).sum();
        self.viewers.clear_sync();
        info!(
            viewers = reconcilers.len(),
            removed,
            "stopped roster reconciliation"
        );
    }
}
