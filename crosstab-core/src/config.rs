use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How synthetic entries reach a viewer's client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Rewrite list-update messages in transit on the viewer's connection.
    Interception,
    /// Push add/remove calls through the proxy's roster API.
    Reconciliation,
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interception" => Ok(DeliveryMode::Interception),
            "reconciliation" => Ok(DeliveryMode::Reconciliation),
            other => Err(format!("unknown delivery mode: {other}")),
        }
    }
}

/// Read-only settings handed to the core at construction.
///
/// Text templates take positional `%s` / `%d` placeholders, see
/// [`crate::template`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TabConfig {
    pub cross_server_enabled: bool,
    pub max_players_per_server: usize,
    pub max_list_size: usize,
    pub refresh_interval_seconds: u64,
    pub enable_incremental: bool,
    pub preserve_mod_entries: bool,
    /// Emit a status entry under the header of a server whose presence is stale
    pub show_server_status: bool,

    /// `%s` server name, `%d` player count
    pub server_header_format: String,
    /// `%s` player name, `%s` server name
    pub player_format: String,
    /// Leading separator; empty disables it
    pub separator_text: String,
    /// Trailing end-marker; empty disables it
    pub end_marker_text: String,
    /// `%d` players not shown
    pub more_players_format: String,
    pub empty_server_text: String,
    /// `%s` status word
    pub status_format: String,

    pub delivery: DeliveryMode,
    /// Delay before reconciling after login or a backend switch, so the
    /// backend's own roster messages land first
    pub reconcile_delay_ms: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for TabConfig {
    fn default() -> Self {
        Self {
            cross_server_enabled: true,
            max_players_per_server: 10,
            max_list_size: 100,
            refresh_interval_seconds: 30,
            enable_incremental: true,
            preserve_mod_entries: true,
            show_server_status: true,
            server_header_format: "§e§l%s §7(%d online)".to_string(),
            player_format: "§7%s §8[%s]".to_string(),
            separator_text: String::new(),
            end_marker_text: String::new(),
            more_players_format: "§8├ ... %d more".to_string(),
            empty_server_text: "§8├ (no players online)".to_string(),
            status_format: "§7├ status: %s".to_string(),
            delivery: DeliveryMode::Reconciliation,
            reconcile_delay_ms: 500,
            shutdown_grace_secs: 5,
        }
    }
}

impl TabConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds.max(1))
    }

    /// A server whose last refresh is older than this is reported offline.
    pub fn stale_after(&self) -> Duration {
        self.refresh_interval() * 2
    }

    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TabConfig::default();
        assert!(config.cross_server_enabled);
        assert_eq!(config.max_players_per_server, 10);
        assert_eq!(config.max_list_size, 100);
        assert_eq!(config.refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.stale_after(), Duration::from_secs(60));
        assert!(config.separator_text.is_empty());
        assert_eq!(config.delivery, DeliveryMode::Reconciliation);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = TabConfig {
            refresh_interval_seconds: 0,
            ..TabConfig::default()
        };
        assert_eq!(config.refresh_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_delivery_mode_parse() {
        assert_eq!(
            "Interception".parse::<DeliveryMode>(),
            Ok(DeliveryMode::Interception)
        );
        assert_eq!(
            "reconciliation".parse::<DeliveryMode>(),
            Ok(DeliveryMode::Reconciliation)
        );
        assert!("wire".parse::<DeliveryMode>().is_err());
    }
}
