//! Configuration loading and resolution.
//!
//! Supports TOML config files, environment variables, and CLI overrides
//! with a defined priority order (CLI > env > TOML > defaults).

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Result, StowageError};

/// Helper macro to apply an optional owned value directly to a target field.
macro_rules! apply_option {
    ($opt:expr => $target:expr) => {
        if let Some(v) = $opt {
            $target = v;
        }
    };
}

/// Default chunk size for streaming Push/Pull transfers: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Top-level configuration for a Stowage node.
#[derive(Debug, Clone)]
pub struct StowageConfig {
    /// Root directory under which `collections/<ns>/<name>.db` and
    /// `files/<ns>/<name>/...` live.
    pub data_dir: PathBuf,
    /// Root directory for the backup catalogue
    /// (`metadata.db` plus backup artifacts).
    pub backup_dir: PathBuf,
    /// Advisory endpoint advertised by `Route` when a Collection has no
    /// `server_endpoint` of its own.
    pub default_server_endpoint: Option<String>,
    /// Default `Search`/`List` page size when the caller passes zero.
    pub default_search_limit: u32,
    /// Maximum bytes per streaming chunk frame in Push/Pull.
    pub chunk_size: usize,
}

impl Default for StowageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            backup_dir: PathBuf::from("./backups"),
            default_server_endpoint: None,
            default_search_limit: 100,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Deserialize, Default)]
struct TomlConfig {
    data_dir: Option<String>,
    backup_dir: Option<String>,
    default_server_endpoint: Option<String>,
    default_search_limit: Option<u32>,
    chunk_size: Option<usize>,
}

/// CLI overrides that take highest priority.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override the data directory.
    pub data_dir: Option<PathBuf>,
    /// Override the backup directory.
    pub backup_dir: Option<PathBuf>,
    /// Override the advertised default server endpoint.
    pub default_server_endpoint: Option<String>,
}

impl StowageConfig {
    /// Load configuration with the following priority (highest wins):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. TOML config file
    /// 4. Built-in defaults
    pub fn load(config_path: Option<&str>, overrides: &CliOverrides) -> Result<Self> {
        let mut config = StowageConfig::default();

        let toml_path = config_path.unwrap_or("stowage.toml");
        if let Ok(content) = std::fs::read_to_string(toml_path) {
            let toml_config: TomlConfig = toml::from_str(&content).map_err(|e| {
                StowageError::InvalidArgument(format!(
                    "failed to parse config file '{}': {}",
                    toml_path, e
                ))
            })?;
            config.apply_toml(toml_config);
        } else if config_path.is_some() {
            return Err(StowageError::InvalidArgument(format!(
                "config file '{}' not found",
                toml_path
            )));
        }

        config.apply_env();
        config.apply_cli(overrides);

        if config.chunk_size == 0 {
            return Err(StowageError::InvalidArgument(
                "chunk_size must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    fn apply_toml(&mut self, toml: TomlConfig) {
        if let Some(v) = toml.data_dir {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = toml.backup_dir {
            self.backup_dir = PathBuf::from(v);
        }
        if toml.default_server_endpoint.is_some() {
            self.default_server_endpoint = toml.default_server_endpoint;
        }
        apply_option!(toml.default_search_limit => self.default_search_limit);
        apply_option!(toml.chunk_size => self.chunk_size);
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("STOWAGE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STOWAGE_BACKUP_DIR") {
            self.backup_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STOWAGE_DEFAULT_ENDPOINT") {
            self.default_server_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("STOWAGE_DEFAULT_SEARCH_LIMIT") {
            if let Ok(n) = v.parse::<u32>() {
                self.default_search_limit = n;
            } else {
                log::warn!("ignoring invalid STOWAGE_DEFAULT_SEARCH_LIMIT value: {}", v);
            }
        }
        if let Ok(v) = std::env::var("STOWAGE_CHUNK_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                self.chunk_size = n;
            } else {
                log::warn!("ignoring invalid STOWAGE_CHUNK_SIZE value: {}", v);
            }
        }
    }

    fn apply_cli(&mut self, overrides: &CliOverrides) {
        if let Some(ref v) = overrides.data_dir {
            self.data_dir = v.clone();
        }
        if let Some(ref v) = overrides.backup_dir {
            self.backup_dir = v.clone();
        }
        if overrides.default_server_endpoint.is_some() {
            self.default_server_endpoint = overrides.default_server_endpoint.clone();
        }
    }

    /// Path of a Collection's Store artifact under `data_dir`.
    pub fn collection_db_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.data_dir
            .join("collections")
            .join(namespace)
            .join(format!("{}.db", name))
    }

    /// Root directory of a Collection's attachment FileSystem under `data_dir`.
    pub fn collection_files_root(&self, namespace: &str, name: &str) -> PathBuf {
        self.data_dir.join("files").join(namespace).join(name)
    }
}
