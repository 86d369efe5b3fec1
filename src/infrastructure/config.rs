//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional `config/default` file, an optional `config/{env}` file, and
//! finally `INVENTORY_SYNC__*` environment variables (`__` separates
//! sections, e.g. `INVENTORY_SYNC__DATABASE__URL`).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::application::sync_scheduler::RetryPolicy;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "INVENTORY_SYNC";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub feed: FeedConfig,
    pub logging: LoggingConfig,
}

/// Store connection and pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL (`sqlite:` or `postgres://`). Takes precedence
    /// over the discrete host/user fields below.
    pub url: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// Append `sslmode=require` to a composed PostgreSQL URL
    pub require_ssl: bool,
    pub max_connections: u32,
    pub idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

/// Which relational backend a URL points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

/// Workflow and scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub interval_minutes: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Run a single tick and exit instead of looping
    pub run_once: bool,
}

/// Google Sheets feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub spreadsheet_id: String,
    /// A1 range; the default skips the header row
    pub range: String,
    pub api_base: String,
    /// Service account identity; takes precedence over the static credentials below
    pub service_account_email: String,
    /// PEM private key of the service account (literal `\n` escapes accepted)
    pub service_account_private_key: String,
    /// OAuth token endpoint the service account assertion is exchanged at
    pub token_uri: String,
    /// Static OAuth bearer token; preferred over `api_key` when both are set
    pub access_token: String,
    pub api_key: String,
    /// Treat the first returned row as a header and verify it
    pub header_row: bool,
    pub layout_version: u32,
    pub timeout_seconds: u64,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to `logs/` next to the executable
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
}

pub mod defaults {
    /// Default records per upsert statement
    pub const BATCH_SIZE: usize = 100;

    /// Default scheduler cadence in minutes
    pub const INTERVAL_MINUTES: u64 = 15;

    /// Default whole-workflow attempts per tick
    pub const MAX_ATTEMPTS: u32 = 3;

    pub const RETRY_BASE_DELAY_MS: u64 = 1_000;
    pub const RETRY_MAX_DELAY_MS: u64 = 60_000;

    pub const DB_PORT: u16 = 5432;
    pub const DB_MAX_CONNECTIONS: u32 = 20;
    pub const DB_IDLE_TIMEOUT_SECS: u64 = 30;
    pub const DB_CONNECT_TIMEOUT_SECS: u64 = 2;

    pub const SHEET_RANGE: &str = "Sheet1!A2:H1000";
    pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
    pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
    pub const FEED_TIMEOUT_SECONDS: u64 = 30;
    pub const FEED_LAYOUT_VERSION: u32 = 1;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "inventory-sync.log";
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            host: String::new(),
            port: defaults::DB_PORT,
            user: String::new(),
            password: String::new(),
            name: String::new(),
            require_ssl: false,
            max_connections: defaults::DB_MAX_CONNECTIONS,
            idle_timeout_secs: defaults::DB_IDLE_TIMEOUT_SECS,
            connect_timeout_secs: defaults::DB_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            interval_minutes: defaults::INTERVAL_MINUTES,
            max_attempts: defaults::MAX_ATTEMPTS,
            retry_base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            run_once: false,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            range: defaults::SHEET_RANGE.to_string(),
            api_base: defaults::SHEETS_API_BASE.to_string(),
            service_account_email: String::new(),
            service_account_private_key: String::new(),
            token_uri: defaults::GOOGLE_TOKEN_URI.to_string(),
            access_token: String::new(),
            api_key: String::new(),
            header_row: false,
            layout_version: defaults::FEED_LAYOUT_VERSION,
            timeout_seconds: defaults::FEED_TIMEOUT_SECONDS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Connection URL, composing a PostgreSQL DSN from parts when `url` is empty.
    ///
    /// User, password and database name are percent-encoded into the DSN.
    /// Falls back to a SQLite file under the user's local data directory when
    /// neither is configured.
    pub fn connection_url(&self) -> Result<String, ConfigError> {
        if !self.url.trim().is_empty() {
            return Ok(self.url.trim().to_string());
        }

        if !self.host.trim().is_empty() {
            return self.compose_postgres_url().map(String::from);
        }

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("inventory-sync");
        Ok(format!("sqlite:{}", data_dir.join("inventory.db").display()))
    }

    fn compose_postgres_url(&self) -> Result<Url, ConfigError> {
        let invalid = |what: &str| ConfigError::Validation {
            message: format!("database.{what} cannot be used in a connection url"),
        };

        let mut url = Url::parse("postgres://localhost").map_err(|_| invalid("host"))?;
        url.set_host(Some(self.host.trim())).map_err(|_| invalid("host"))?;
        url.set_port(Some(self.port)).map_err(|()| invalid("port"))?;
        if !self.user.is_empty() {
            url.set_username(&self.user).map_err(|()| invalid("user"))?;
        }
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|()| invalid("password"))?;
        }
        url.path_segments_mut()
            .map_err(|()| invalid("name"))?
            .clear()
            .push(&self.name);
        if self.require_ssl {
            url.query_pairs_mut().append_pair("sslmode", "require");
        }
        Ok(url)
    }

    pub fn backend(&self) -> Result<DatabaseBackend, ConfigError> {
        backend_for_url(&self.connection_url()?)
    }

    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Pick the backend from a connection URL scheme
pub fn backend_for_url(url: &str) -> Result<DatabaseBackend, ConfigError> {
    if url.starts_with("sqlite:") {
        Ok(DatabaseBackend::Sqlite)
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(DatabaseBackend::Postgres)
    } else {
        Err(ConfigError::Validation {
            message: format!("unsupported database url scheme: {url}"),
        })
    }
}

impl SyncConfig {
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
        }
    }
}

impl FeedConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl AppConfig {
    /// Load from defaults, optional config files and the environment.
    ///
    /// `env` selects `config/{env}` on top of `config/default`.
    pub fn load(env: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Some(env) = env {
            let env_file = format!("config/{env}");
            builder = builder.add_source(config::File::with_name(&env_file).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a single file, still honoring environment overrides
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the workflow misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Validation {
                message: message.to_string(),
            })
        };

        self.database.backend()?;

        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be greater than 0");
        }
        if self.sync.batch_size == 0 {
            return invalid("sync.batch_size must be greater than 0");
        }
        if self.sync.max_attempts == 0 {
            return invalid("sync.max_attempts must be greater than 0");
        }
        if self.sync.interval_minutes == 0 {
            return invalid("sync.interval_minutes must be greater than 0");
        }
        if self.sync.retry_base_delay_ms > self.sync.retry_max_delay_ms {
            return invalid("sync.retry_base_delay_ms cannot be greater than sync.retry_max_delay_ms");
        }
        if self.feed.spreadsheet_id.trim().is_empty() {
            return invalid("feed.spreadsheet_id is required");
        }
        if self.feed.range.trim().is_empty() {
            return invalid("feed.range is required");
        }
        let has_email = !self.feed.service_account_email.trim().is_empty();
        let has_key = !self.feed.service_account_private_key.trim().is_empty();
        if has_email != has_key {
            return invalid("feed.service_account_email and feed.service_account_private_key must be set together");
        }
        if has_email && self.feed.token_uri.trim().is_empty() {
            return invalid("feed.token_uri is required for a service account");
        }
        if self.feed.timeout_seconds == 0 {
            return invalid("feed.timeout_seconds must be greater than 0");
        }
        if !self.logging.console_output && !self.logging.file_output {
            return invalid("logging needs console_output or file_output");
        }

        Ok(())
    }
}
