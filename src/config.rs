//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::error::{Result, TurnstileError};

/// Prefix for environment overrides, e.g. `TURNSTILE__LIMITS__DEFAULT_LIMIT=20`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Default quota applied to identities without overrides
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Request header carrying the API token
    #[serde(default = "default_token_header")]
    pub token_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            token_header: default_token_header(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_token_header() -> String {
    "API_KEY".to_string()
}

/// Which counter store backs the rate limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    #[default]
    Redis,
    /// Process-local map, for single-instance deployments and local testing
    Memory,
}

/// Counter store connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis `host:port`
    #[serde(default = "default_store_addr")]
    pub addr: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Redis logical database index
    #[serde(default)]
    pub db: i64,

    /// Upper bound for a single store round trip, in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            addr: default_store_addr(),
            password: None,
            db: 0,
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

fn default_store_addr() -> String {
    "localhost:6379".to_string()
}

fn default_op_timeout_ms() -> u64 {
    1000
}

/// Process-wide default quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests admitted per window
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_window_secs: default_window_secs(),
        }
    }
}

fn default_limit() -> u64 {
    10
}

fn default_window_secs() -> u64 {
    60
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from the process environment and an optional YAML file.
    ///
    /// Later sources win: built-in defaults, the file, `TURNSTILE__*` variables,
    /// then `REDIS_ADDR` / `REDIS_PASSWORD`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    fn load_with<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("store.addr", env("REDIS_ADDR").filter(|v| !v.is_empty()))
            .map_err(config_error)?
            .set_override_option(
                "store.password",
                env("REDIS_PASSWORD").filter(|v| !v.is_empty()),
            )
            .map_err(config_error)?;

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Config(e.to_string()))
    }

    /// Render the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| TurnstileError::Config(e.to_string()))
    }
}

fn config_error(err: config::ConfigError) -> TurnstileError {
    TurnstileError::Config(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::load_with(None, no_env).unwrap();

        assert_eq!(config, TurnstileConfig::default());
        assert_eq!(config.server.http_addr.port(), 8080);
        assert_eq!(config.server.token_header, "API_KEY");
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.addr, "localhost:6379");
        assert_eq!(config.limits.default_limit, 10);
        assert_eq!(config.limits.default_window_secs, 60);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
limits:
  default_limit: 5
store:
  backend: memory
logging:
  format: json
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.limits.default_limit, 5);
        assert_eq!(config.limits.default_window_secs, 60);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.addr, "localhost:6379");
    }

    #[test]
    fn test_from_yaml_invalid() {
        let result = TurnstileConfig::from_yaml("limits: [1, 2");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_yaml_roundtrip_of_effective_config() {
        let mut config = TurnstileConfig::default();
        config.store.password = Some("secret".to_string());

        let yaml = config.to_yaml().unwrap();
        assert_eq!(TurnstileConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_load_file_and_legacy_redis_env() {
        let path = std::env::temp_dir().join(format!("turnstile-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "store:\n  addr: file-host:6379\n  db: 2\nlimits:\n  default_window_secs: 2"
        )
        .unwrap();

        let env: HashMap<&str, &str> =
            HashMap::from([("REDIS_ADDR", "env-host:6380"), ("REDIS_PASSWORD", "pw")]);
        let config =
            TurnstileConfig::load_with(Some(&path), |k| env.get(k).map(|v| v.to_string()))
                .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.store.addr, "env-host:6380");
        assert_eq!(config.store.password.as_deref(), Some("pw"));
        assert_eq!(config.store.db, 2);
        assert_eq!(config.limits.default_window_secs, 2);
        assert_eq!(config.limits.default_limit, 10);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = TurnstileConfig::load_with(Some(Path::new("/nonexistent/turnstile.yaml")), no_env);
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }
}
