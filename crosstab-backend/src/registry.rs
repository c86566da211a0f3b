use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use crosstab_core::{
    CoreError, PlayerPresence, RegisteredServer, Result, ServerRegistry, player_name,
};
use scc::HashMap;
use uuid::Uuid;

struct ServerState {
    address: String,
    players: Vec<PlayerPresence>,
    /// Registration order, used to keep the server list stable
    rank: u64,
}

/// Player reported by a backend server.
#[derive(Debug, Clone)]
pub struct PlayerReport {
    pub id: Uuid,
    pub name: String,
    pub latency: i32,
    pub game_mode: i32,
}

impl PlayerReport {
    fn into_presence(self, server: &str) -> Result<PlayerPresence> {
        Ok(PlayerPresence {
            id: self.id,
            name: player_name(&self.name)?,
            latency: self.latency,
            game_mode: self.game_mode,
            server: server.to_string(),
        })
    }
}

/// In-memory registry fed by backend servers' roster reports.
pub struct MemoryRegistry {
    servers: HashMap<String, ServerState>,
    next_rank: AtomicU64,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            servers: HashMap::new(),
            next_rank: AtomicU64::new(0),
        }
    }

    /// Register a server, or update its address if already known.
    /// Returns true if the server is new.
    pub async fn register_server(&self, name: &str, address: &str) -> bool {
        let updated = self
            .servers
            .update_async(name, |_, state| state.address = address.to_string())
            .await
            .is_some();
        if updated {
            return false;
        }
        let rank = self.next_rank.fetch_add(1, Ordering::Relaxed);
        self.servers
            .insert_async(
                name.to_string(),
                ServerState {
                    address: address.to_string(),
                    players: Vec::new(),
                    rank,
                },
            )
            .await
            .is_ok()
    }

    pub async fn unregister_server(&self, name: &str) -> bool {
        self.servers.remove_async(name).await.is_some()
    }

    /// Record a player joining `server`. A player is on one server at a
    /// time, so any other roster entry for the same id is dropped.
    pub async fn player_join(&self, server: &str, player: PlayerReport) -> Result<()> {
        let presence = player.into_presence(server)?;
        if !self.servers.contains_async(server).await {
            return Err(CoreError::ServerNotFound(server.to_string()));
        }

        let id = presence.id;
        self.servers
            .retain_async(|name, state| {
                if name != server {
                    state.players.retain(|p| p.id != id);
                }
                true
            })
            .await;

        self.servers
            .update_async(server, |_, state| {
                match state.players.iter_mut().find(|p| p.id == id) {
                    Some(existing) => *existing = presence,
                    None => state.players.push(presence),
                }
            })
            .await
            .ok_or_else(|| CoreError::ServerNotFound(server.to_string()))
    }

    /// Record a player leaving. Uses swap_remove for O(1).
    pub async fn player_leave(&self, server: &str, id: &Uuid) -> Result<()> {
        self.servers
            .update_async(server, |_, state| {
                if let Some(idx) = state.players.iter().position(|p| p.id == *id) {
                    state.players.swap_remove(idx);
                }
            })
            .await
            .ok_or_else(|| CoreError::ServerNotFound(server.to_string()))
    }

    /// Replace a server's roster. Reports with unusable names are skipped.
    pub async fn sync_players(&self, server: &str, players: Vec<PlayerReport>) -> Result<usize> {
        let roster: Vec<PlayerPresence> = players
            .into_iter()
            .filter_map(|p| p.into_presence(server).ok())
            .collect();
        let count = roster.len();

        self.servers
            .update_async(server, |_, state| state.players = roster)
            .await
            .ok_or_else(|| CoreError::ServerNotFound(server.to_string()))?;
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    fn to_registered(name: &str, state: &ServerState) -> RegisteredServer {
        RegisteredServer {
            name: name.to_string(),
            address: state.address.clone(),
            players: state.players.clone(),
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerRegistry for MemoryRegistry {
    async fn servers(&self) -> Result<Vec<RegisteredServer>> {
        let mut ranked = Vec::with_capacity(self.servers.len());
        self.servers
            .iter_async(|name, state| {
                ranked.push((state.rank, Self::to_registered(name, state)));
                true
            })
            .await;
        ranked.sort_by_key(|(rank, _)| *rank);
        Ok(ranked.into_iter().map(|(_, server)| server).collect())
    }

    async fn server(&self, name: &str) -> Result<Option<RegisteredServer>> {
        Ok(self
            .servers
            .read_async(name, |name, state| Self::to_registered(name, state))
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, n: u128) -> PlayerReport {
        PlayerReport {
            id: Uuid::from_u128(n),
            name: name.to_string(),
            latency: 30,
            game_mode: 0,
        }
    }

    #[tokio::test]
    async fn test_servers_keep_registration_order() {
        let registry = MemoryRegistry::new();
        assert!(registry.register_server("survival", "10.0.0.2:25565").await);
        assert!(registry.register_server("lobby", "10.0.0.1:25565").await);
        assert!(!registry.register_server("survival", "10.0.0.9:25565").await);

        let servers = registry.servers().await.unwrap();
        let names: Vec<_> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["survival", "lobby"]);
        assert_eq!(servers[0].address, "10.0.0.9:25565");
    }

    #[tokio::test]
    async fn test_join_moves_player() {
        let registry = MemoryRegistry::new();
        registry.register_server("lobby", "a").await;
        registry.register_server("survival", "b").await;

        registry.player_join("lobby", report("Steve", 1)).await.unwrap();
        registry.player_join("survival", report("Steve", 1)).await.unwrap();

        let lobby = registry.server("lobby").await.unwrap().unwrap();
        let survival = registry.server("survival").await.unwrap().unwrap();
        assert!(lobby.players.is_empty());
        assert_eq!(survival.players.len(), 1);
        assert_eq!(survival.players[0].server, "survival");
    }

    #[tokio::test]
    async fn test_join_errors() {
        let registry = MemoryRegistry::new();
        assert_eq!(
            registry.player_join("nowhere", report("Steve", 1)).await,
            Err(CoreError::ServerNotFound("nowhere".to_string()))
        );
        registry.register_server("lobby", "a").await;
        assert_eq!(
            registry
                .player_join("lobby", report("ThisNameIsWayTooLong", 1))
                .await,
            Err(CoreError::PlayerNameTooLong)
        );
    }

    #[tokio::test]
    async fn test_leave_and_sync() {
        let registry = MemoryRegistry::new();
        registry.register_server("lobby", "a").await;
        registry.player_join("lobby", report("Steve", 1)).await.unwrap();
        registry.player_leave("lobby", &Uuid::from_u128(1)).await.unwrap();
        assert!(registry.server("lobby").await.unwrap().unwrap().players.is_empty());

        let synced = registry
            .sync_players(
                "lobby",
                vec![report("Alex", 2), report("ThisNameIsWayTooLong", 3)],
            )
            .await
            .unwrap();
        assert_eq!(synced, 1);
        assert!(registry.sync_players("nowhere", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = MemoryRegistry::new();
        registry.register_server("lobby", "a").await;
        assert!(registry.unregister_server("lobby").await);
        assert!(!registry.unregister_server("lobby").await);
        assert!(registry.is_empty());
    }
}
