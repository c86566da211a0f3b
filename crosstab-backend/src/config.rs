use std::env::var;
use std::str::FromStr;
use std::time::Duration;

use crosstab_core::{DeliveryMode, TabConfig};
use dotenvy::dotenv;

use crate::helpers::hash_api_key;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 1048576 = 1MB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// SHA-256 of the shared secret backends present as a bearer token.
    /// Env: API_KEY (optional; unset disables auth)
    pub api_key_hash: Option<String>,

    /// Servers registered at startup, as `name=host:port` pairs
    /// Env: SERVERS (comma separated, default: none)
    pub servers: Vec<(String, String)>,

    /// Rate limit for roster reports: /join, /leave, /sync (requests per second)
    /// Env: RATE_LIMIT_REPORT_PER_SEC (default: 50)
    /// This is lenient to handle many players joining/leaving at once
    pub rate_limit_report_per_sec: u64,

    /// Burst size for roster reports
    /// Env: RATE_LIMIT_REPORT_BURST (default: 100)
    pub rate_limit_report_burst: u32,

    /// Rate limit for control endpoints (requests per second)
    /// Env: RATE_LIMIT_CONTROL_PER_SEC (default: 10)
    pub rate_limit_control_per_sec: u64,

    /// Burst size for control endpoints
    /// Env: RATE_LIMIT_CONTROL_BURST (default: 20)
    pub rate_limit_control_burst: u32,

    /// Cross-server list settings
    pub tab: TabConfig,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        let defaults = TabConfig::default();
        Self {
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", 1024 * 1024),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            port: env_or_default("PORT", 3000),
            api_key_hash: var("API_KEY")
                .ok()
                .filter(|key| !key.is_empty())
                .map(|key| hash_api_key(&key)),
            servers: parse_servers(&env_or_default_string("SERVERS", "")),
            rate_limit_report_per_sec: env_or_default("RATE_LIMIT_REPORT_PER_SEC", 50),
            rate_limit_report_burst: env_or_default("RATE_LIMIT_REPORT_BURST", 100),
            rate_limit_control_per_sec: env_or_default("RATE_LIMIT_CONTROL_PER_SEC", 10),
            rate_limit_control_burst: env_or_default("RATE_LIMIT_CONTROL_BURST", 20),
            tab: TabConfig {
                cross_server_enabled: env_or_default(
                    "CROSS_SERVER_ENABLED",
                    defaults.cross_server_enabled,
                ),
                max_players_per_server: env_or_default(
                    "MAX_PLAYERS_PER_SERVER",
                    defaults.max_players_per_server,
                ),
                max_list_size: env_or_default("MAX_LIST_SIZE", defaults.max_list_size),
                refresh_interval_seconds: env_or_default(
                    "REFRESH_INTERVAL_SECS",
                    defaults.refresh_interval_seconds,
                ),
                enable_incremental: env_or_default(
                    "ENABLE_INCREMENTAL",
                    defaults.enable_incremental,
                ),
                preserve_mod_entries: env_or_default(
                    "PRESERVE_MOD_ENTRIES",
                    defaults.preserve_mod_entries,
                ),
                show_server_status: env_or_default(
                    "SHOW_SERVER_STATUS",
                    defaults.show_server_status,
                ),
                server_header_format: env_or_default_string(
                    "SERVER_HEADER_FORMAT",
                    &defaults.server_header_format,
                ),
                player_format: env_or_default_string("PLAYER_FORMAT", &defaults.player_format),
                separator_text: env_or_default_string("SEPARATOR_TEXT", &defaults.separator_text),
                end_marker_text: env_or_default_string(
                    "END_MARKER_TEXT",
                    &defaults.end_marker_text,
                ),
                more_players_format: env_or_default_string(
                    "MORE_PLAYERS_FORMAT",
                    &defaults.more_players_format,
                ),
                empty_server_text: env_or_default_string(
                    "EMPTY_SERVER_TEXT",
                    &defaults.empty_server_text,
                ),
                status_format: env_or_default_string("STATUS_FORMAT", &defaults.status_format),
                delivery: env_or_default::<DeliveryMode>("DELIVERY_MODE", defaults.delivery),
                reconcile_delay_ms: env_or_default(
                    "RECONCILE_DELAY_MS",
                    defaults.reconcile_delay_ms,
                ),
                shutdown_grace_secs: env_or_default(
                    "SHUTDOWN_GRACE_SECS",
                    defaults.shutdown_grace_secs,
                ),
            },
        }
    }

    /// Create configuration with all default values
    pub fn default() -> Self {
        Self {
            request_body_limit: 1024 * 1024, // 1 MB
            request_timeout: Duration::from_secs(30),
            port: 3000,
            api_key_hash: None,
            servers: Vec::new(),
            rate_limit_report_per_sec: 50,
            rate_limit_report_burst: 100,
            rate_limit_control_per_sec: 10,
            rate_limit_control_burst: 20,
            tab: TabConfig::default(),
        }
    }
}

/// Parse `name=address` pairs separated by commas. Malformed pairs are
/// skipped.
pub fn parse_servers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, address) = pair.split_once('=')?;
            let (name, address) = (name.trim(), address.trim());
            if name.is_empty() || address.is_empty() {
                tracing::warn!(entry = %pair, "ignoring malformed SERVERS entry");
                return None;
            }
            Some((name.to_string(), address.to_string()))
        })
        .collect()
}

/// Parse environment variable or return default value
fn env_or_default<T: FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
