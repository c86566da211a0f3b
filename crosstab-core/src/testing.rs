//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use uuid::Uuid;

use crate::delivery::{ListInterceptor, ViewerConnection};
use crate::error::{CoreError, Result};
use crate::identity::has_virtual_shape;
use crate::models::{
    ListAction, ListEntry, ListUpdate, Packet, PlayerName, PlayerPresence, PresenceSnapshot,
    ServerDescriptor, ServerRoster, SyntheticEntry,
};
use crate::registry::{RegisteredServer, ServerRegistry};

/// Stable account-style (v4) id for a test player name.
pub(crate) fn player_id(name: &str) -> Uuid {
    let digest = Sha256::digest(format!("player:{name}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

pub(crate) fn presence(name: &str, server: &str) -> PlayerPresence {
    PlayerPresence {
        id: player_id(name),
        name: PlayerName::from(name).unwrap(),
        latency: 20,
        game_mode: 0,
        server: server.to_string(),
    }
}

/// Entry as a vanilla backend would send it for `name`.
pub(crate) fn authentic(name: &str) -> ListEntry {
    ListEntry {
        id: Some(player_id(name)),
        name: Some(name.to_string()),
        display_name: None,
        latency: 20,
        game_mode: 0,
    }
}

pub(crate) fn authentic_update(names: &[&str]) -> ListUpdate {
    ListUpdate::add(names.iter().map(|n| authentic(n)).collect())
}

pub(crate) struct StaticRegistry {
    servers: Mutex<Vec<RegisteredServer>>,
    fail: AtomicBool,
}

impl StaticRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            servers: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    /// Register `name` (or replace its roster), keeping its original position.
    pub(crate) fn set(&self, name: &str, players: &[&str]) {
        let server = RegisteredServer {
            name: name.to_string(),
            address: "127.0.0.1:25565".to_string(),
            players: players.iter().map(|p| presence(p, name)).collect(),
        };
        let mut servers = self.servers.lock().unwrap();
        match servers.iter_mut().find(|s| s.name == name) {
            Some(existing) => *existing = server,
            None => servers.push(server),
        }
    }

    pub(crate) fn unset(&self, name: &str) {
        self.servers.lock().unwrap().retain(|s| s.name != name);
    }

    /// Make the next registry call fail.
    pub(crate) fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(CoreError::Registry("registry unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ServerRegistry for StaticRegistry {
    async fn servers(&self) -> Result<Vec<RegisteredServer>> {
        self.check()?;
        Ok(self.servers.lock().unwrap().clone())
    }

    async fn server(&self, name: &str) -> Result<Option<RegisteredServer>> {
        self.check()?;
        Ok(self
            .servers
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.name == name)
            .cloned())
    }
}

pub(crate) struct SnapshotBuilder {
    servers: Vec<ServerRoster>,
}

pub(crate) fn snapshot() -> SnapshotBuilder {
    SnapshotBuilder {
        servers: Vec::new(),
    }
}

impl SnapshotBuilder {
    pub(crate) fn server(mut self, name: &str, players: &[&str]) -> Self {
        self.servers.push(ServerRoster {
            descriptor: ServerDescriptor {
                name: name.to_string(),
                address: "127.0.0.1:25565".to_string(),
                last_seen: 0,
            },
            players: players.iter().map(|p| presence(p, name)).collect(),
            refreshed_at: Instant::now(),
            online: true,
        });
        self
    }

    pub(crate) fn build(self) -> PresenceSnapshot {
        PresenceSnapshot {
            servers: self.servers,
        }
    }
}

/// In-memory viewer connection. `displayed` mirrors the synthetic entries
/// the client would show, whichever path they arrived by.
pub(crate) struct FakeViewer {
    id: Uuid,
    name: String,
    backend: Mutex<Option<String>>,
    active: AtomicBool,
    accept_interceptor: AtomicBool,
    sent: Mutex<Vec<ListUpdate>>,
    displayed: Mutex<Vec<Uuid>>,
    adds: AtomicUsize,
    removes: AtomicUsize,
    interceptor: Mutex<Option<Arc<dyn ListInterceptor>>>,
}

impl FakeViewer {
    pub(crate) fn new(name: &str, backend: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            id: player_id(name),
            name: name.to_string(),
            backend: Mutex::new(backend.map(str::to_string)),
            active: AtomicBool::new(true),
            accept_interceptor: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            displayed: Mutex::new(Vec::new()),
            adds: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            interceptor: Mutex::new(None),
        })
    }

    pub(crate) fn set_backend(&self, backend: Option<&str>) {
        *self.backend.lock().unwrap() = backend.map(str::to_string);
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub(crate) fn refuse_interceptors(&self) {
        self.accept_interceptor.store(false, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<ListUpdate> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn displayed(&self) -> Vec<Uuid> {
        self.displayed.lock().unwrap().clone()
    }

    pub(crate) fn add_calls(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub(crate) fn remove_calls(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub(crate) fn has_interceptor(&self) -> bool {
        self.interceptor.lock().unwrap().is_some()
    }

    /// Push a backend message through the attached transform stage, if any.
    pub(crate) fn inbound(&self, packet: Packet) -> Vec<Packet> {
        let interceptor = self.interceptor.lock().unwrap().clone();
        let packets = match interceptor {
            Some(interceptor) => interceptor.on_inbound(packet),
            None => vec![packet],
        };
        for packet in &packets {
            if let Packet::PlayerList(update) = packet {
                self.display(update);
            }
        }
        packets
    }

    fn display(&self, update: &ListUpdate) {
        let mut displayed = self.displayed.lock().unwrap();
        for entry in &update.entries {
            let Some(id) = entry.id.filter(has_virtual_shape) else {
                continue;
            };
            match update.action {
                ListAction::AddPlayer if !displayed.contains(&id) => displayed.push(id),
                ListAction::RemovePlayer => displayed.retain(|d| *d != id),
                _ => {}
            }
        }
    }
}

impl ViewerConnection for FakeViewer {
    fn viewer_id(&self) -> Uuid {
        self.id
    }

    fn username(&self) -> &str {
        &self.name
    }

    fn current_backend(&self) -> Option<String> {
        self.backend.lock().unwrap().clone()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn send_list_update(&self, update: ListUpdate) {
        if !self.is_active() {
            return;
        }
        self.display(&update);
        self.sent.lock().unwrap().push(update);
    }

    fn attach_interceptor(&self, interceptor: Arc<dyn ListInterceptor>) -> bool {
        if !self.accept_interceptor.load(Ordering::SeqCst) {
            return false;
        }
        *self.interceptor.lock().unwrap() = Some(interceptor);
        true
    }

    fn detach_interceptor(&self) {
        self.interceptor.lock().unwrap().take();
    }

    fn roster_add(&self, entry: &SyntheticEntry) {
        if !self.is_active() {
            return;
        }
        self.adds.fetch_add(1, Ordering::SeqCst);
        let mut displayed = self.displayed.lock().unwrap();
        if !displayed.contains(&entry.id()) {
            displayed.push(entry.id());
        }
    }

    fn roster_remove(&self, id: Uuid) {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.displayed.lock().unwrap().retain(|d| *d != id);
    }
}
