//! Cross-server presence cache.
//!
//! Holds, per backend server, its descriptor and player roster. Each server's
//! slot is replaced wholesale on refresh, so readers never see a torn roster.
//! The last writer for a server wins.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use scc::HashMap;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::models::{PlayerPresence, PresenceSnapshot, ServerDescriptor, ServerRoster};
use crate::registry::{RegisteredServer, ServerRegistry};

#[derive(Debug, Clone)]
struct ServerState {
    descriptor: ServerDescriptor,
    players: Vec<PlayerPresence>,
    refreshed_at: Instant,
    /// Position in registry order
    rank: usize,
}

pub struct PresenceCache {
    registry: Arc<dyn ServerRegistry>,
    servers: HashMap<String, ServerState>,
    stale_after: Duration,
}

impl PresenceCache {
    pub fn new(registry: Arc<dyn ServerRegistry>, stale_after: Duration) -> Self {
        Self {
            registry,
            servers: HashMap::new(),
            stale_after,
        }
    }

    /// Replace every registered server's slot and drop servers that left the
    /// registry. Returns the number of servers refreshed.
    pub async fn refresh_all(&self) -> Result<usize> {
        let registered = self.registry.servers().await?;
        let names: HashSet<String> = registered.iter().map(|s| s.name.clone()).collect();
        let count = registered.len();

        for (rank, server) in registered.into_iter().enumerate() {
            self.store(server, rank).await;
        }
        self.servers.retain_sync(|name, _| names.contains(name));

        debug!(servers = count, "refreshed presence for all servers");
        Ok(count)
    }

    /// Refresh a single server without touching the others.
    pub async fn refresh_one(&self, name: &str) -> Result<()> {
        let server = self
            .registry
            .server(name)
            .await?
            .ok_or_else(|| CoreError::ServerNotFound(name.to_string()))?;
        let rank = self
            .servers
            .read_async(name, |_, state| state.rank)
            .await
            .unwrap_or_else(|| self.servers.len());
        self.store(server, rank).await;

        debug!(server = %name, "refreshed presence for server");
        Ok(())
    }

    async fn store(&self, server: RegisteredServer, rank: usize) {
        let state = ServerState {
            descriptor: ServerDescriptor {
                name: server.name.clone(),
                address: server.address,
                last_seen: unix_now(),
            },
            players: server.players,
            refreshed_at: Instant::now(),
            rank,
        };
        let _ = self.servers.upsert_async(server.name, state).await;
    }

    /// Copy of the whole cache in registry order. Holds no lock once returned.
    pub fn snapshot(&self) -> PresenceSnapshot {
        let now = Instant::now();
        let mut ranked = Vec::with_capacity(self.servers.len());
        self.servers.iter_sync(|_, state| {
            ranked.push((
                state.rank,
                ServerRoster {
                    descriptor: state.descriptor.clone(),
                    players: state.players.clone(),
                    refreshed_at: state.refreshed_at,
                    online: now.saturating_duration_since(state.refreshed_at) <= self.stale_after,
                },
            ));
            true
        });
        ranked.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.descriptor.name.cmp(&b.1.descriptor.name))
        });

        PresenceSnapshot {
            servers: ranked.into_iter().map(|(_, roster)| roster).collect(),
        }
    }

    /// True iff the server is known and its last refresh is within twice the
    /// refresh interval.
    pub fn is_online(&self, name: &str) -> bool {
        self.servers
            .read_sync(name, |_, state| {
                state.refreshed_at.elapsed() <= self.stale_after
            })
            .unwrap_or(false)
    }

    pub fn player_count(&self, name: &str) -> Option<usize> {
        self.servers.read_sync(name, |_, state| state.players.len())
    }

    /// Apply a player's move to `server` right away, without waiting for the
    /// next refresh. The player is removed from every other roster.
    pub fn player_joined(&self, presence: PlayerPresence) -> Result<()> {
        let id = presence.id;
        let server = presence.server.clone();
        self.servers.retain_sync(|name, state| {
            if *name != server {
                state.players.retain(|p| p.id != id);
            }
            true
        });

        self.servers
            .update_sync(&server, |_, state| {
                match state.players.iter_mut().find(|p| p.id == id) {
                    Some(existing) => *existing = presence,
                    None => state.players.push(presence),
                }
            })
            .ok_or(CoreError::ServerNotFound(server))
    }

    /// Remove a player from every roster.
    pub fn player_left(&self, id: &Uuid) {
        self.servers.retain_sync(|_, state| {
            state.players.retain(|p| p.id != *id);
            true
        });
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
