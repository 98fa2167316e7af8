//! Configuration loading and typed config structures for the presence service.
//!
//! The configuration lives in `presence-config.yaml` in the working directory,
//! or wherever `PRESENCE_CONFIG` points. Every field has a default, so a
//! partial file is valid, and so is a missing default file. A path named
//! by `PRESENCE_CONFIG` must exist.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "presence-config.yaml";

/// How much sooner than the ledger deadline the server-side
/// `statement_timeout` fires, so `PostgreSQL` aborts a statement before the
/// caller stops waiting for it.
pub const STATEMENT_TIMEOUT_MARGIN_MS: u64 = 250;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is not usable.
    #[error("invalid config value for {key}: {message}")]
    Invalid {
        /// The offending setting.
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level service configuration.
///
/// Mirrors the structure of `presence-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PresenceConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Session store backend and limits.
    #[serde(default)]
    pub store: StoreSection,

    /// Log level and output format.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Entities to register in the in-memory directory.
    #[serde(default)]
    pub directory: DirectorySection,
}

impl PresenceConfig {
    /// Load configuration from `PRESENCE_CONFIG` or [`DEFAULT_CONFIG_PATH`],
    /// then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, if an
    /// override is invalid, or if the result fails [`Self::validate`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// [`Self::load`] with environment variables read through `lookup`.
    ///
    /// Only the default path may be absent, in which case every setting
    /// takes its default. A missing file named by `PRESENCE_CONFIG` is an
    /// error.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load`].
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("PRESENCE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Override settings from `lookup`, which maps variable names to values.
    ///
    /// Recognised variables: `DATABASE_URL`, `PRESENCE_HOST`, `PRESENCE_PORT`,
    /// `PRESENCE_STORE_BACKEND`. `RUST_LOG` is read by the log filter
    /// directly.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a port or backend value does not
    /// parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.store.postgres_url = url;
        }
        if let Some(host) = lookup("PRESENCE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PRESENCE_PORT") {
            self.server.port = port.trim().parse().map_err(|e| ConfigError::Invalid {
                key: "PRESENCE_PORT",
                message: format!("{port:?}: {e}"),
            })?;
        }
        if let Some(backend) = lookup("PRESENCE_STORE_BACKEND") {
            self.store.backend = backend.parse()?;
        }
        Ok(())
    }

    /// Reject combinations that cannot start.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the `postgres` backend has no URL,
    /// if the operation timeout is zero, or if the `postgres` backend's
    /// operation timeout leaves no room for [`STATEMENT_TIMEOUT_MARGIN_MS`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let postgres = self.store.backend == StoreBackend::Postgres;
        if postgres && self.store.postgres_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "store.postgres_url",
                message: String::from("required for the postgres backend (or set DATABASE_URL)"),
            });
        }
        if self.store.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "store.operation_timeout_ms",
                message: String::from("must be greater than zero"),
            });
        }
        if postgres && self.store.statement_timeout().is_none() {
            return Err(ConfigError::Invalid {
                key: "store.operation_timeout_ms",
                message: format!(
                    "must exceed {STATEMENT_TIMEOUT_MARGIN_MS}ms for the postgres backend"
                ),
            });
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which session store implementation to run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Durable `PostgreSQL` store.
    Postgres,
    /// Process-local store, lost on restart.
    #[default]
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Invalid {
                key: "store.backend",
                message: format!("unknown backend {other:?}, expected postgres or memory"),
            }),
        }
    }
}

/// Session store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreSection {
    /// Backend selection.
    #[serde(default)]
    pub backend: StoreBackend,

    /// `PostgreSQL` connection string. Empty unless configured.
    #[serde(default)]
    pub postgres_url: String,

    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long to wait for a pooled connection.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle connection lifetime.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Upper bound on any single store operation.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Apply pending migrations at startup.
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

impl StoreSection {
    /// Deadline for one store operation as seen by the ledger.
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Server-side `statement_timeout`, strictly shorter than
    /// [`Self::operation_timeout`]. `None` when the operation timeout is too
    /// short to leave the margin.
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms
            .checked_sub(STATEMENT_TIMEOUT_MARGIN_MS)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            postgres_url: String::new(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            run_migrations: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingSection {
    /// Filter used when `RUST_LOG` is unset (e.g. `info`, `presence_db=debug`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Entities for the in-memory directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DirectorySection {
    /// Entities registered at startup.
    #[serde(default)]
    pub seed: Vec<SeedEntity>,
}

/// One entity to register.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedEntity {
    /// Badge identifier.
    pub badge_id: String,
    /// Display name.
    pub name: String,
    /// Department, if any.
    #[serde(default)]
    pub department: Option<String>,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    8080
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_connect_timeout_ms() -> u64 {
    5_000
}

const fn default_idle_timeout_ms() -> u64 {
    300_000
}

const fn default_operation_timeout_ms() -> u64 {
    5_000
}

const fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = PresenceConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.operation_timeout_ms, 5_000);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000

store:
  backend: postgres
  postgres_url: "postgresql://presence@db:5432/presence"
  max_connections: 4
  connect_timeout_ms: 1000
  idle_timeout_ms: 60000
  operation_timeout_ms: 2500
  run_migrations: false

logging:
  level: "debug"
  format: json

directory:
  seed:
    - badge_id: "S-100"
      name: "Ada Lovelace"
      department: "Mathematics"
    - badge_id: "S-200"
      name: "Alan Turing"
"#;
        let config = PresenceConfig::parse(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(config.store.max_connections, 4);
        assert_eq!(config.store.operation_timeout_ms, 2_500);
        assert!(!config.store.run_migrations);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.directory.seed.len(), 2);
        assert_eq!(config.directory.seed[1].department, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = PresenceConfig::parse("server:\n  port: 7000\n").unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.store, StoreSection::default());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(PresenceConfig::parse("store:\n  backend: sqlite\n").is_err());
        assert!(matches!(
            "sqlite".parse::<StoreBackend>(),
            Err(ConfigError::Invalid { key: "store.backend", .. })
        ));
    }

    #[test]
    fn env_overrides_yaml() {
        let mut config = PresenceConfig::default();
        config
            .apply_overrides(env(&[
                ("DATABASE_URL", "postgresql://elsewhere/presence"),
                ("PRESENCE_HOST", "10.0.0.1"),
                ("PRESENCE_PORT", "9090"),
                ("PRESENCE_STORE_BACKEND", "Postgres"),
            ]))
            .unwrap();

        assert_eq!(config.store.postgres_url, "postgresql://elsewhere/presence");
        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let mut config = PresenceConfig::default();
        let result = config.apply_overrides(env(&[("PRESENCE_PORT", "eighty")]));
        assert!(matches!(result, Err(ConfigError::Invalid { key: "PRESENCE_PORT", .. })));
    }

    #[test]
    fn postgres_without_url_is_invalid() {
        let config = PresenceConfig::parse("store:\n  backend: postgres\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "store.postgres_url", .. })
        ));
    }

    #[test]
    fn statement_timeout_fires_before_operation_deadline() {
        let store = StoreSection::default();
        let statement = store.statement_timeout().unwrap();
        assert!(statement < store.operation_timeout());
        assert_eq!(statement, Duration::from_millis(4_750));
    }

    #[test]
    fn postgres_timeout_without_margin_is_invalid() {
        let yaml = r#"
store:
  backend: postgres
  postgres_url: "postgresql://db/presence"
  operation_timeout_ms: 250
"#;
        let config = PresenceConfig::parse(yaml).unwrap();
        assert!(config.store.statement_timeout().is_none());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "store.operation_timeout_ms", .. })
        ));

        let memory = PresenceConfig::parse("store:\n  operation_timeout_ms: 250\n").unwrap();
        assert!(memory.validate().is_ok());
    }

    #[test]
    fn explicit_config_path_must_exist() {
        let missing = std::env::temp_dir().join("presence-config-does-not-exist.yaml");
        let path = missing.to_string_lossy().into_owned();
        let result = PresenceConfig::load_with(env(&[("PRESENCE_CONFIG", path.as_str())]));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn explicit_config_path_is_read() {
        let file =
            std::env::temp_dir().join(format!("presence-config-{}.yaml", std::process::id()));
        std::fs::write(&file, "server:\n  port: 7100\n").unwrap();
        let path = file.to_string_lossy().into_owned();

        let result = PresenceConfig::load_with(env(&[("PRESENCE_CONFIG", path.as_str())]));
        std::fs::remove_file(&file).unwrap();
        assert_eq!(result.unwrap().server.port, 7100);
    }

    #[test]
    fn missing_default_path_uses_defaults() {
        // Tests run from the crate directory, which has no config file.
        let config = PresenceConfig::load_with(env(&[])).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let config = PresenceConfig::parse("store:\n  operation_timeout_ms: 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
