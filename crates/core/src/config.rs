//! Storage configuration.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::{BackendKind, PreservedKeys, INTERNAL_KEY_PREFIX};

/// Name of the config file inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error reading {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Malformed config file
    #[error("invalid config {path}: {source}")]
    Json {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },
}

/// Top-level storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for every on-disk medium
    pub data_dir: PathBuf,

    /// Backend used when no preference has been persisted yet
    pub default_backend: BackendKind,

    /// Cookie medium settings
    pub cookie: CookieConfig,

    /// Local medium settings
    pub local: LocalConfig,

    /// Cloud medium settings
    pub cloud: CloudConfig,

    /// Keys preserved in addition to the built-in preference keys
    pub extra_preserved_keys: Vec<String>,

    /// Prefix of keys never migrated
    pub internal_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: ".clipdo".into(),
            default_backend: BackendKind::Local,
            cookie: CookieConfig::default(),
            local: LocalConfig::default(),
            cloud: CloudConfig::default(),
            extra_preserved_keys: Vec::new(),
            internal_prefix: INTERNAL_KEY_PREFIX.to_string(),
        }
    }
}

impl StorageConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load `<data_dir>/config.json`, falling back to defaults when it is missing.
    ///
    /// The loaded config always keeps `data_dir` as given.
    pub fn load(data_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data_dir = data_dir.as_ref();
        let path = data_dir.join(CONFIG_FILE);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str::<StorageConfig>(&json)
                .map_err(|source| ConfigError::Json { path: path.clone(), source })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StorageConfig::default(),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    /// The preserved key set described by this config.
    pub fn preserved_keys(&self) -> PreservedKeys {
        self.extra_preserved_keys
            .iter()
            .fold(PreservedKeys::default(), |keys, k| keys.with_key(k.clone()))
            .with_internal_prefix(self.internal_prefix.clone())
    }

    /// Cookie jar file.
    pub fn cookie_path(&self) -> PathBuf {
        self.data_dir.join(&self.cookie.file)
    }

    /// Local medium directory.
    pub fn local_dir(&self) -> PathBuf {
        self.data_dir.join(&self.local.dir)
    }
}

/// Cookie medium settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Jar file, relative to the data directory
    pub file: PathBuf,
    /// Expiration window for every write
    pub ttl_days: i64,
    /// Ceiling for one `name=value` pair
    pub max_bytes: usize,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            file: "cookies.txt".into(),
            ttl_days: 3,
            max_bytes: 4096,
        }
    }
}

/// Local medium settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory, relative to the data directory
    pub dir: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self { dir: "local".into() }
    }
}

/// Cloud medium settings.
///
/// With `url` set, rows go to a PostgREST-compatible endpoint. Otherwise, with
/// `sqlite_path` set, rows go to a SQLite database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Base URL of the REST endpoint
    pub url: Option<String>,
    /// Public API key sent as `apikey`
    pub api_key: Option<String>,
    /// Table holding the rows (defaults to `storage`)
    pub table: Option<String>,
    /// SQLite database file
    pub sqlite_path: Option<PathBuf>,
    /// Request timeout in seconds (defaults to 30)
    pub timeout_secs: Option<u64>,
}

impl CloudConfig {
    /// Table name.
    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or("storage")
    }

    /// Request timeout.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.unwrap_or(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::load(dir.path()).unwrap();
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.cookie.ttl_days, 3);
        assert_eq!(config.cookie.max_bytes, 4096);
        assert_eq!(config.default_backend, BackendKind::Local);
        assert_eq!(config.cloud.table(), "storage");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"default_backend": "cookie", "cookie": {"ttl_days": 7}, "extra_preserved_keys": ["lang"]}"#,
        )
        .unwrap();

        let config = StorageConfig::load(dir.path()).unwrap();
        assert_eq!(config.default_backend, BackendKind::Cookie);
        assert_eq!(config.cookie.ttl_days, 7);
        assert_eq!(config.cookie.max_bytes, 4096);
        assert!(config.preserved_keys().contains("lang"));
        assert!(config.preserved_keys().contains(crate::STORAGE_PREFERENCE_KEY));
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{oops").unwrap();
        assert!(matches!(StorageConfig::load(dir.path()), Err(ConfigError::Json { .. })));
    }
}
