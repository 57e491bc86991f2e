//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::Duration;

/// Byte store configuration.
///
/// Blobs are placed in one or more named locations. New content is written to
/// the first preferred location; reads try every location a blob is placed in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Locations new content is written to, in order of preference.
    #[serde(default = "default_preferred_locations")]
    pub preferred_locations: Vec<String>,
    /// Backend for each named location.
    #[serde(default = "default_storage_locations")]
    pub locations: BTreeMap<String, BackendConfig>,
}

/// Backend for a single storage location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

fn default_preferred_locations() -> Vec<String> {
    vec!["local_us".to_string()]
}

fn default_storage_locations() -> BTreeMap<String, BackendConfig> {
    let mut locations = BTreeMap::new();
    locations.insert(
        "local_us".to_string(),
        BackendConfig::Filesystem {
            path: PathBuf::from("./data/storage"),
        },
    );
    locations
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            preferred_locations: default_preferred_locations(),
            locations: default_storage_locations(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.locations.is_empty() {
            return Err("storage.locations must configure at least one location".to_string());
        }
        if self.preferred_locations.is_empty() {
            return Err("storage.preferred_locations cannot be empty".to_string());
        }
        for name in &self.preferred_locations {
            if !self.locations.contains_key(name) {
                return Err(format!(
                    "storage.preferred_locations names unknown location '{name}'"
                ));
            }
        }
        Ok(())
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Garbage collection configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GcConfig {
    /// Run the periodic collection worker (default: true).
    #[serde(default = "default_worker_enabled")]
    pub worker_enabled: bool,
    /// Seconds between worker passes (default: 30).
    #[serde(default = "default_worker_interval_secs")]
    pub worker_interval_secs: u64,
    /// Extra age, beyond the namespace retention window, a tag must have
    /// before the scanner reports its repository (default: 0).
    #[serde(default)]
    pub min_garbage_age_secs: u64,
    /// Upper bound on repositories collected in one worker pass (default: 100).
    #[serde(default = "default_max_repositories_per_pass")]
    pub max_repositories_per_pass: u32,
    /// Expired upload links reaped per batch (default: 1000).
    #[serde(default = "default_uploaded_blob_batch_size")]
    pub uploaded_blob_batch_size: u32,
}

fn default_worker_enabled() -> bool {
    true
}

fn default_worker_interval_secs() -> u64 {
    30
}

fn default_max_repositories_per_pass() -> u32 {
    100
}

fn default_uploaded_blob_batch_size() -> u32 {
    1000
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            worker_enabled: default_worker_enabled(),
            worker_interval_secs: default_worker_interval_secs(),
            min_garbage_age_secs: 0,
            max_repositories_per_pass: default_max_repositories_per_pass(),
            uploaded_blob_batch_size: default_uploaded_blob_batch_size(),
        }
    }
}

impl GcConfig {
    /// Get the worker interval as a std::time::Duration.
    pub fn worker_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.worker_interval_secs)
    }

    /// Get the minimum garbage age as a Duration.
    pub fn min_garbage_age(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.min_garbage_age_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Validate GC configuration for dangerous settings.
    pub fn validate(&self) -> Result<(), String> {
        // tokio::time::interval panics on a zero period
        if self.worker_enabled && self.worker_interval_secs == 0 {
            return Err("gc.worker_interval_secs cannot be 0 when the worker is enabled".to_string());
        }
        if self.min_garbage_age_secs > i64::MAX as u64 {
            return Err(format!(
                "gc.min_garbage_age_secs {} exceeds maximum value {}",
                self.min_garbage_age_secs,
                i64::MAX
            ));
        }
        if self.uploaded_blob_batch_size == 0 {
            return Err("gc.uploaded_blob_batch_size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Byte store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Garbage collection configuration.
    #[serde(default)]
    pub gc: GcConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> crate::Result<()> {
        self.storage.validate().map_err(crate::Error::InvalidConfig)?;
        self.gc.validate().map_err(crate::Error::InvalidConfig)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gc_config_defaults() {
        let config = GcConfig::default();
        assert!(config.worker_enabled);
        assert_eq!(config.worker_interval_secs, 30);
        assert_eq!(config.min_garbage_age_secs, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gc_config_deserialize_partial() {
        let json = r#"{"worker_interval_secs": 5}"#;
        let config: GcConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.worker_interval_secs, 5);
        assert_eq!(config.max_repositories_per_pass, 100);
    }

    #[test]
    fn test_gc_config_rejects_zero_interval() {
        let config = GcConfig {
            worker_interval_secs: 0,
            ..GcConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_config_rejects_unknown_preferred_location() {
        let config = StorageConfig {
            preferred_locations: vec!["elsewhere".to_string()],
            ..StorageConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("elsewhere"));
    }

    #[test]
    fn test_storage_config_roundtrip() {
        let config = StorageConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: StorageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.preferred_locations, vec!["local_us".to_string()]);
        match decoded.locations.get("local_us") {
            Some(BackendConfig::Filesystem { path }) => {
                assert_eq!(path, &PathBuf::from("./data/storage"))
            }
            None => panic!("missing default location"),
        }
    }

    #[test]
    fn test_metadata_config_tagged() {
        let json = r#"{"type": "sqlite", "path": "/tmp/meta.db"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        let MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } = config;
        assert_eq!(path, PathBuf::from("/tmp/meta.db"));
        assert_eq!(query_timeout_secs, Some(600));
    }
}
