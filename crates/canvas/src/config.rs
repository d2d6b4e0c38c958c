//! Configuration management for the canvas server.
//!
//! This module handles loading, validation, and conversion of server configuration
//! from TOML files and command-line arguments.

use anyhow::{bail, Context, Result};
use canvas_server::config::{AdminSettings, SeedMode, ServerConfig};
use canvas_server::session::ReadinessPolicy;
use canvas_server::types::{Color, Identity};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub board: BoardSettings,
    pub ledger: LedgerSettings,
    pub session: SessionSettings,
    pub admin: AdminSection,
    pub timelapse: TimelapseSettings,
    pub logging: LoggingSettings,
}

/// Network settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// WebSocket listener address (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// HTTP query/admin listener; omit to disable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_address: Option<String>,
    /// Maximum number of concurrent client connections
    pub max_connections: usize,
    /// Drop a client whose socket accepts no frame for this long
    pub send_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            http_address: Some("127.0.0.1:8081".to_string()),
            max_connections: 1000,
            send_timeout_ms: 10_000,
        }
    }
}

/// Board geometry and startup seeding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    pub grid_size: u32,
    pub background_color: String,
    pub seed: SeedMode,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            grid_size: 32,
            background_color: "#FFFFFF".to_string(),
            seed: SeedMode::default(),
        }
    }
}

/// Balances and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Balance of a newly created account
    pub starting_balance: i64,
    /// Journal file; omit to keep everything in memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,
    /// Deadline of one debit-and-persist transaction
    pub transaction_timeout_ms: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            starting_balance: 0,
            journal_path: Some(PathBuf::from("data/canvas.journal")),
            transaction_timeout_ms: 5000,
        }
    }
}

/// Where identities come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionProvider {
    /// Forward handshake headers to `endpoint`
    Http,
    /// Bearer tokens listed in `tokens`
    Static,
    /// Everyone is anonymous
    Disabled,
}

/// One entry of the static token table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
}

impl TokenEntry {
    pub fn identity(&self) -> Identity {
        Identity {
            email: self.email.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub provider: SessionProvider,
    /// Session endpoint of the `http` provider
    pub endpoint: String,
    pub request_timeout_ms: u64,
    /// How often a connection checks for the resolver while it is not ready
    pub poll_interval_ms: u64,
    /// Checks before a connection gives up and stays anonymous
    pub max_attempts: u32,
    /// Delay between readiness probes of the session endpoint at startup
    pub probe_retry_ms: u64,
    pub tokens: Vec<TokenEntry>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            provider: SessionProvider::Http,
            endpoint: "http://127.0.0.1:3000/api/auth/session".to_string(),
            request_timeout_ms: 5000,
            poll_interval_ms: 1000,
            max_attempts: 100,
            probe_retry_ms: 1000,
            tokens: Vec::new(),
        }
    }
}

/// Balance top-up endpoint. Unauthenticated; keep it off on public hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSection {
    pub enabled: bool,
    pub path: String,
}

impl Default for AdminSection {
    fn default() -> Self {
        let defaults = AdminSettings::default();
        Self {
            enabled: defaults.enabled,
            path: defaults.path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelapseSettings {
    /// Most placements returned by one page
    pub page_limit: usize,
}

impl Default for TimelapseSettings {
    fn default() -> Self {
        Self { page_limit: 1000 }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Checks addresses, colors, limits and the session provider settings.
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            bail!("Invalid bind address: {}", self.server.bind_address);
        }
        if let Some(http_address) = &self.server.http_address {
            if http_address.parse::<SocketAddr>().is_err() {
                bail!("Invalid HTTP address: {}", http_address);
            }
        }
        if self.server.max_connections == 0 {
            bail!("max_connections must be positive");
        }
        if self.server.send_timeout_ms == 0 {
            bail!("send_timeout_ms must be positive");
        }

        if self.board.grid_size == 0 {
            bail!("grid_size must be positive");
        }
        if let Err(e) = Color::parse(&self.board.background_color) {
            bail!("Invalid background color: {}", e);
        }

        if self.ledger.starting_balance < 0 {
            bail!("starting_balance cannot be negative");
        }
        if self.ledger.transaction_timeout_ms == 0 {
            bail!("transaction_timeout_ms must be positive");
        }

        match self.session.provider {
            SessionProvider::Http if self.session.endpoint.is_empty() => {
                bail!("The http session provider needs an endpoint");
            }
            SessionProvider::Static if self.session.tokens.is_empty() => {
                bail!("The static session provider needs at least one token");
            }
            _ => {}
        }
        if self.session.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be positive");
        }

        if self.admin.enabled && !self.admin.path.starts_with('/') {
            bail!("Admin path must start with '/': {}", self.admin.path);
        }
        if self.timelapse.page_limit == 0 {
            bail!("page_limit must be positive");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                self.logging.level
            );
        }

        Ok(())
    }

    /// Converts to the library's [`ServerConfig`].
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            http_address: self
                .server
                .http_address
                .as_deref()
                .map(str::parse)
                .transpose()?,
            max_connections: self.server.max_connections,
            send_timeout: Duration::from_millis(self.server.send_timeout_ms),
            grid_size: self.board.grid_size,
            background_color: Color::parse(&self.board.background_color)?,
            seed: self.board.seed.clone(),
            starting_balance: self.ledger.starting_balance,
            journal_path: self.ledger.journal_path.clone(),
            transaction_timeout: Duration::from_millis(self.ledger.transaction_timeout_ms),
            readiness: ReadinessPolicy {
                poll_interval: Duration::from_millis(self.session.poll_interval_ms),
                max_attempts: self.session.max_attempts,
            },
            admin: AdminSettings {
                enabled: self.admin.enabled,
                path: self.admin.path.clone(),
            },
            timelapse_page_limit: self.timelapse.page_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert_eq!(config.board.grid_size, 32);
        assert_eq!(config.board.seed, SeedMode::Window { hours: 24 });
        assert_eq!(config.session.provider, SessionProvider::Http);
        assert!(!config.admin.enabled);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("canvas.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // The written file round-trips.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r##"
[server]
bind_address = "0.0.0.0:3000"
max_connections = 20

[board]
grid_size = 64
background_color = "#000000"
seed = { mode = "full" }

[ledger]
starting_balance = 10
transaction_timeout_ms = 250

[session]
provider = "static"

[[session.tokens]]
token = "dev-token"
email = "ada@example.com"
name = "ada"

[admin]
enabled = true
path = "/grant"

[logging]
level = "debug"
json_format = true
"##;
        let dir = tempdir().unwrap();
        let path = dir.path().join("canvas.toml");
        tokio::fs::write(&path, toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.http_address, None);
        assert_eq!(config.ledger.journal_path, None);
        assert_eq!(config.session.tokens[0].identity().email, "ada@example.com");
        assert_eq!(config.timelapse.page_limit, 1000);

        let server = config.to_server_config().unwrap();
        assert_eq!(server.bind_address, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(server.http_address, None);
        assert_eq!(server.grid_size, 64);
        assert_eq!(server.background_color.as_str(), "#000000");
        assert_eq!(server.seed, SeedMode::Full);
        assert_eq!(server.starting_balance, 10);
        assert_eq!(server.transaction_timeout, Duration::from_millis(250));
        assert!(server.admin.enabled);
        assert_eq!(server.admin.path, "/grant");
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.bind_address = "not an address".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.board.background_color = "white".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.provider = SessionProvider::Static;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.admin.enabled = true;
        config.admin.path = "grant".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.send_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }
}
