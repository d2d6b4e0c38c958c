//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to initialize and customize the canvas server behavior.

use crate::session::ReadinessPolicy;
use crate::types::{Balance, Color};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// How the board cache is populated at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SeedMode {
    /// Start with every cell at the background color.
    Cold,
    /// Replay the latest placement of every cell over the whole history.
    Full,
    /// Only consider placements newer than `hours` ago.
    Window { hours: u64 },
}

impl SeedMode {
    /// Lower time bound for the seeding query, `None` for unbounded.
    ///
    /// Returns `None` for [`SeedMode::Cold`] as well; callers skip the query entirely in that mode.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            // A window too large to represent degrades to the full history.
            SeedMode::Window { hours } => i64::try_from(*hours)
                .ok()
                .and_then(ChronoDuration::try_hours)
                .and_then(|window| now.checked_sub_signed(window)),
            SeedMode::Cold | SeedMode::Full => None,
        }
    }
}

impl Default for SeedMode {
    fn default() -> Self {
        SeedMode::Window { hours: 24 }
    }
}

/// Settings for the unauthenticated balance top-up endpoint.
#[derive(Debug, Clone)]
pub struct AdminSettings {
    pub enabled: bool,
    /// Route the endpoint is mounted at.
    pub path: String,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/admin/grant".to_string(),
        }
    }
}

/// Configuration structure for the canvas server.
///
/// Contains all necessary parameters to configure server behavior including
/// network settings, board geometry, ledger policy and session resolution.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address the WebSocket listener binds to
    pub bind_address: SocketAddr,

    /// Address of the HTTP query/admin surface; `None` disables it
    pub http_address: Option<SocketAddr>,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// How long one outbound frame may wait on a client that stopped reading
    pub send_timeout: Duration,

    /// Width and height of the square grid
    pub grid_size: u32,

    /// Color of cells that have never been placed
    pub background_color: Color,

    /// How the board is seeded at startup
    pub seed: SeedMode,

    /// Balance of a freshly created account
    pub starting_balance: Balance,

    /// Append-only journal backing the store; `None` keeps everything in memory
    pub journal_path: Option<PathBuf>,

    /// Deadline for a single debit-and-persist transaction
    pub transaction_timeout: Duration,

    /// Polling policy for a session resolver that is not ready yet
    pub readiness: ReadinessPolicy,

    /// Balance top-up endpoint
    pub admin: AdminSettings,

    /// Upper bound on placements returned by one time-lapse page
    pub timelapse_page_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            http_address: Some(SocketAddr::from(([127, 0, 0, 1], 8081))),
            max_connections: 1000,
            send_timeout: Duration::from_secs(10),
            grid_size: 32,
            background_color: Color::white(),
            seed: SeedMode::default(),
            starting_balance: 0,
            journal_path: None,
            transaction_timeout: Duration::from_secs(5),
            readiness: ReadinessPolicy::default(),
            admin: AdminSettings::default(),
            timelapse_page_limit: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.grid_size, 32);
        assert_eq!(config.background_color.as_str(), "#FFFFFF");
        assert_eq!(config.seed, SeedMode::Window { hours: 24 });
        assert_eq!(config.transaction_timeout, Duration::from_secs(5));
        assert!(!config.admin.enabled);
        assert!(config.journal_path.is_none());
    }

    #[test]
    fn test_seed_mode_since() {
        let now = Utc::now();
        assert_eq!(SeedMode::Full.since(now), None);
        assert_eq!(SeedMode::Cold.since(now), None);
        assert_eq!(
            SeedMode::Window { hours: 24 }.since(now),
            Some(now - ChronoDuration::hours(24))
        );
    }

    #[test]
    fn test_seed_mode_toml_shape() {
        let mode: SeedMode = serde_json::from_str(r#"{"mode":"window","hours":6}"#).unwrap();
        assert_eq!(mode, SeedMode::Window { hours: 6 });
        let mode: SeedMode = serde_json::from_str(r#"{"mode":"cold"}"#).unwrap();
        assert_eq!(mode, SeedMode::Cold);
    }
}
