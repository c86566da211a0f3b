use arrayvec::ArrayString;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::identity::VirtualIdentity;

/// Minecraft player name - max 16 characters, stored inline (no heap allocation).
pub type PlayerName = ArrayString<16>;

/// Parse a raw player name, rejecting anything the client could not display.
pub fn player_name(raw: &str) -> Result<PlayerName> {
    PlayerName::try_from(raw).map_err(|_| CoreError::PlayerNameTooLong)
}

/// A backend server as last seen by the presence cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    /// Unique server name (registry key)
    pub name: String,
    /// Network address the proxy forwards to (e.g. "10.0.0.4:25565")
    pub address: String,
    /// Unix timestamp of the refresh that produced this descriptor
    pub last_seen: i64,
}

/// A player connected to some backend server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerPresence {
    pub id: Uuid,
    pub name: PlayerName,
    /// Round trip in milliseconds
    pub latency: i32,
    /// Protocol game mode id (0 survival .. 3 spectator)
    pub game_mode: i32,
    /// Name of the server the player is on
    pub server: String,
}

/// One server's slice of a [`PresenceSnapshot`].
#[derive(Debug, Clone)]
pub struct ServerRoster {
    pub descriptor: ServerDescriptor,
    pub players: Vec<PlayerPresence>,
    pub refreshed_at: Instant,
    /// Whether the last refresh was within twice the refresh interval when
    /// the snapshot was taken.
    pub online: bool,
}

/// Read-consistent copy of the presence cache, in registry order.
#[derive(Debug, Clone, Default)]
pub struct PresenceSnapshot {
    pub servers: Vec<ServerRoster>,
}

impl PresenceSnapshot {
    pub fn server(&self, name: &str) -> Option<&ServerRoster> {
        self.servers.iter().find(|s| s.descriptor.name == name)
    }

    pub fn players(&self, name: &str) -> &[PlayerPresence] {
        self.server(name).map(|s| s.players.as_slice()).unwrap_or(&[])
    }

    pub fn last_refresh(&self, name: &str) -> Option<Instant> {
        self.server(name).map(|s| s.refreshed_at)
    }

    pub fn total_players(&self) -> usize {
        self.servers.iter().map(|s| s.players.len()).sum()
    }
}

/// What a synthetic entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Separator,
    ServerHeader,
    CrossServerPlayer,
    OverflowMarker,
    EmptyServerMarker,
    Status,
}

/// A list entry fabricated for the viewer. Never mutated, only replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticEntry {
    pub kind: EntryKind,
    pub identity: VirtualIdentity,
    /// Profile name carried on the wire (empty for markers)
    pub profile_name: String,
    pub display: String,
    pub latency: i32,
    pub game_mode: i32,
}

impl SyntheticEntry {
    pub fn id(&self) -> Uuid {
        self.identity.id
    }

    pub fn to_list_entry(&self) -> ListEntry {
        ListEntry {
            id: Some(self.identity.id),
            name: Some(self.profile_name.clone()),
            display_name: Some(self.display.clone()),
            latency: self.latency,
            game_mode: self.game_mode,
        }
    }
}

/// Player list action carried by a list-update message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListAction {
    AddPlayer,
    UpdateGameMode,
    UpdateLatency,
    UpdateDisplayName,
    RemovePlayer,
    Unknown(i32),
}

impl ListAction {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ListAction::AddPlayer,
            1 => ListAction::UpdateGameMode,
            2 => ListAction::UpdateLatency,
            3 => ListAction::UpdateDisplayName,
            4 => ListAction::RemovePlayer,
            other => ListAction::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ListAction::AddPlayer => 0,
            ListAction::UpdateGameMode => 1,
            ListAction::UpdateLatency => 2,
            ListAction::UpdateDisplayName => 3,
            ListAction::RemovePlayer => 4,
            ListAction::Unknown(code) => code,
        }
    }
}

/// One entry of a list-update message as the host protocol shapes it.
/// Every field may be absent or out of range when a backend (or a mod on it)
/// sends something unusual.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListEntry {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub latency: i32,
    pub game_mode: i32,
}

impl ListEntry {
    pub fn removal(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }
}

/// A list-update message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListUpdate {
    pub action: ListAction,
    pub entries: Vec<ListEntry>,
}

impl ListUpdate {
    pub fn add(entries: Vec<ListEntry>) -> Self {
        Self {
            action: ListAction::AddPlayer,
            entries,
        }
    }

    pub fn remove(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            action: ListAction::RemovePlayer,
            entries: ids.into_iter().map(ListEntry::removal).collect(),
        }
    }
}

/// Inbound message from a backend, as seen by a transform stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    PlayerList(ListUpdate),
    /// Any other message; forwarded as-is.
    Other { id: i32, payload: Vec<u8> },
}
