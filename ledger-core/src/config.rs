//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Which backend to open
    pub backend: Backend,

    /// Durable backend configuration
    pub storage: StorageConfig,

    /// In-memory backend configuration
    pub memory: MemoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "ledger-core".to_string(),
            backend: Backend::Memory,
            storage: StorageConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

/// Storage backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Concurrent in-process maps, lost on restart
    Memory,
    /// SQLite database through sqlx
    Sql,
}

impl Backend {
    /// Config / label name
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Sql => "sql",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "sql" | "sqlite" => Ok(Backend::Sql),
            other => Err(crate::Error::Config(format!("Unknown backend: {}", other))),
        }
    }
}

/// Durable backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite connection string, e.g. `sqlite://data/ledger.db`
    pub database_url: String,

    /// Time budget for one operation, including waiting for locks (milliseconds)
    pub operation_timeout_ms: u64,

    /// Connection pool size
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/ledger.db".to_string(),
            operation_timeout_ms: 10_000,
            max_connections: 5,
        }
    }
}

impl StorageConfig {
    /// Operation timeout as a `Duration`
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// In-memory backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Upper bound on waiting for account locks (milliseconds); unbounded if unset
    pub lock_timeout_ms: Option<u64>,
}

impl MemoryConfig {
    /// Lock timeout as a `Duration`
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(backend) = std::env::var("LEDGER_BACKEND") {
            config.backend = backend.parse()?;
        }

        if let Ok(url) = std::env::var("LEDGER_DATABASE_URL") {
            config.storage.database_url = url;
        }

        if let Ok(timeout) = std::env::var("LEDGER_OPERATION_TIMEOUT_MS") {
            config.storage.operation_timeout_ms = parse_env("LEDGER_OPERATION_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(size) = std::env::var("LEDGER_MAX_CONNECTIONS") {
            config.storage.max_connections = parse_env("LEDGER_MAX_CONNECTIONS", &size)?;
        }

        if let Ok(timeout) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            config.memory.lock_timeout_ms = Some(parse_env("LEDGER_LOCK_TIMEOUT_MS", &timeout)?);
        }

        Ok(config)
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| crate::Error::Config(format!("Invalid value for {}: {}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "ledger-core");
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.storage.operation_timeout(), Duration::from_secs(10));
        assert!(config.memory.lock_timeout().is_none());
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            backend = "sql"

            [storage]
            database_url = "sqlite:///tmp/ledger.db"
            operation_timeout_ms = 2500

            [memory]
            lock_timeout_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, Backend::Sql);
        assert_eq!(config.storage.database_url, "sqlite:///tmp/ledger.db");
        assert_eq!(config.storage.operation_timeout(), Duration::from_millis(2500));
        // Unset fields fall back to defaults
        assert_eq!(config.storage.max_connections, 5);
        assert_eq!(config.memory.lock_timeout(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "service_name = \"ledger-test\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.service_name, "ledger-test");
        assert_eq!(config.backend, Backend::Memory);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "backend = \"oracle\"\n").unwrap();

        assert!(matches!(
            Config::from_file(&path),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("SQLite".parse::<Backend>().unwrap(), Backend::Sql);
        assert_eq!("memory".parse::<Backend>().unwrap(), Backend::Memory);
        assert!("redis".parse::<Backend>().is_err());
    }
}
