//! Delivery by rewriting list-update messages in transit.
//!
//! Each viewer routed to a backend gets one [`Interceptor`] bound to that
//! backend. Additions coming from the backend get synthetic entries merged
//! in; everything else is forwarded untouched. On a backend switch the old
//! interceptor is detached and its synthetic entries removed before a fresh
//! one is attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use scc::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DeliveryStrategy, Engine, ListInterceptor, ViewerConnection};
use crate::config::DeliveryMode;
use crate::merge::{Abstain, ViewerSyntheticState};
use crate::models::{ListUpdate, Packet};

pub struct Interceptor {
    engine: Arc<Engine>,
    viewer: Uuid,
    backend: String,
    state: Mutex<ViewerSyntheticState>,
    attached: AtomicBool,
}

impl Interceptor {
    pub fn new(engine: Arc<Engine>, viewer: Uuid, backend: impl Into<String>) -> Self {
        Self {
            engine,
            viewer,
            backend: backend.into(),
            state: Mutex::new(ViewerSyntheticState::new()),
            attached: AtomicBool::new(true),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn tracked(&self) -> usize {
        self.state().len()
    }

    /// Stop rewriting and hand back the synthetic ids the client still
    /// shows. A second call returns nothing.
    pub fn detach(&self) -> Vec<Uuid> {
        if !self.attached.swap(false, Ordering::AcqRel) {
            return Vec::new();
        }
        self.state().take_known()
    }

    /// Push the current synthetic set directly, outside of any backend
    /// message. `full` drops everything tracked and resends every entry.
    pub fn push(&self, viewer: &dyn ViewerConnection, full: bool) -> usize {
        if !self.is_attached() || !viewer.is_active() {
            return 0;
        }
        let generated = match self.engine.entries_for(Some(&self.backend)) {
            Ok(generated) => generated,
            Err(e) => {
                warn!(viewer = %self.viewer, error = %e, "skipping list push, generation failed");
                return 0;
            }
        };

        // Sent under the lock: a concurrent detach either sees nothing
        // attached here or takes these ids after they reached the client.
        let mut state = self.state();
        if !self.is_attached() {
            return 0;
        }
        let mut removals = if full { state.take_known() } else { Vec::new() };
        let out = self.engine.merger().merge(None, &generated, &mut state, full);
        removals.extend_from_slice(&out.removals);
        let changes = removals.len() + out.inserted.len() + out.refreshed.len();
        if !removals.is_empty() {
            viewer.send_list_update(ListUpdate::remove(removals));
        }
        if !out.entries.is_empty() {
            viewer.send_list_update(ListUpdate::add(out.entries));
        }
        changes
    }

    fn rewrite(&self, update: ListUpdate) -> Vec<Packet> {
        let generated = match self.engine.entries_for(Some(&self.backend)) {
            Ok(generated) => generated,
            Err(e) => {
                warn!(viewer = %self.viewer, error = %e, "forwarding list update unchanged");
                return vec![Packet::PlayerList(update)];
            }
        };

        let out = {
            let mut state = self.state();
            if !self.is_attached() {
                return vec![Packet::PlayerList(update)];
            }
            self.engine
                .merger()
                .merge(Some(&update), &generated, &mut state, false)
        };
        if let Some(reason) = out.abstained {
            if matches!(reason, Abstain::TooLarge { .. } | Abstain::Anomalous { .. }) {
                debug!(viewer = %self.viewer, ?reason, "left list update untouched");
            }
            return vec![Packet::PlayerList(update)];
        }

        let mut packets = Vec::with_capacity(2);
        if !out.removals.is_empty() {
            packets.push(Packet::PlayerList(ListUpdate::remove(out.removals)));
        }
        packets.push(Packet::PlayerList(ListUpdate {
            action: update.action,
            entries: out.entries,
        }));
        packets
    }

    fn state(&self) -> MutexGuard<'_, ViewerSyntheticState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ListInterceptor for Interceptor {
    fn on_inbound(&self, packet: Packet) -> Vec<Packet> {
        match packet {
            Packet::PlayerList(update) if self.is_attached() => self.rewrite(update),
            other => vec![other],
        }
    }
}

#[derive(Clone)]
struct Attachment {
    viewer: Arc<dyn ViewerConnection>,
    interceptor: Option<Arc<Interceptor>>,
}

pub struct InterceptionDelivery {
    engine: Arc<Engine>,
    viewers: HashMap<Uuid, Attachment>,
}

impl InterceptionDelivery {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            viewers: HashMap::new(),
        }
    }

    fn attach(&self, viewer: Arc<dyn ViewerConnection>) {
        let id = viewer.viewer_id();
        let interceptor = viewer.current_backend().and_then(|backend| {
            let interceptor = Arc::new(Interceptor::new(Arc::clone(&self.engine), id, backend));
            if viewer.attach_interceptor(interceptor.clone()) {
                debug!(viewer = %id, backend = %interceptor.backend(), "attached list interceptor");
                Some(interceptor)
            } else {
                warn!(viewer = %id, "connection refused list interceptor");
                None
            }
        });
        let _ = self.viewers.upsert_sync(id, Attachment { viewer, interceptor });
    }

    /// Detach the viewer's stage and remove its synthetic entries from the
    /// client. Returns how many were removed.
    fn release(attachment: &Attachment) -> usize {
        let Some(interceptor) = &attachment.interceptor else {
            return 0;
        };
        attachment.viewer.detach_interceptor();
        let stale = interceptor.detach();
        let count = stale.len();
        if count > 0 {
            attachment.viewer.send_list_update(ListUpdate::remove(stale));
        }
        count
    }

    fn attachments(&self) -> Vec<Attachment> {
        let mut all = Vec::with_capacity(self.viewers.len());
        self.viewers.iter_sync(|_, attachment| {
            all.push(attachment.clone());
            true
        });
        all
    }
}

impl DeliveryStrategy for InterceptionDelivery {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Interception
    }

    fn viewer_connected(&self, viewer: Arc<dyn ViewerConnection>) {
        self.attach(viewer);
    }

    fn backend_changed(&self, viewer: Arc<dyn ViewerConnection>) {
        if let Some((_, previous)) = self.viewers.remove_sync(&viewer.viewer_id()) {
            Self::release(&previous);
        }
        self.attach(viewer);
    }

    fn viewer_disconnected(&self, viewer: &Uuid) -> usize {
        let Some((_, attachment)) = self.viewers.remove_sync(viewer) else {
            return 0;
        };
        Self::release(&attachment)
    }

    fn resync(&self, viewer: Option<&Uuid>) {
        let targets = match viewer {
            Some(id) => self
                .viewers
                .read_sync(id, |_, attachment| attachment.clone())
                .into_iter()
                .collect(),
            None => self.attachments(),
        };
        for attachment in targets {
            if let Some(interceptor) = &attachment.interceptor {
                interceptor.push(attachment.viewer.as_ref(), true);
            }
        }
    }

    fn tick(&self) {
        for attachment in self.attachments() {
            if let Some(interceptor) = &attachment.interceptor {
                interceptor.push(attachment.viewer.as_ref(), false);
            }
        }
    }

    fn tracked(&self, viewer: &Uuid) -> Option<usize> {
        self.viewers.read_sync(viewer, |_, attachment| {
            attachment
                .interceptor
                .as_ref()
                .map(|i| i.tracked())
                .unwrap_or(0)
        })
    }

    fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    fn shutdown(&self) {
        let attachments = self.attachments();
        let removed: usize = attachments.iter().map(Self::release).sum();
        self.viewers.clear_sync();
        info!(
            viewers = attachments.len(),
            removed,
            "detached all list interceptors"
        );
    }
}
