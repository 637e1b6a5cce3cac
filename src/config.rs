use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::diagnosis::DEFAULT_RESCUE_LIMIT;
use crate::model::FlowWeightSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize weights: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid set name \"{0}\"")]
    InvalidSetName(String),
}

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Track library JSON used when `--library` isn't given.
    pub library_path: Option<PathBuf>,
    /// Weights for sets that carry none of their own.
    pub weights: FlowWeightSettings,
    /// Rescue suggestions kept per stress point.
    pub rescue_limit: usize,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Where per-set weights are stored (overrides XDG default).
    pub weights_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            weights: FlowWeightSettings::default(),
            rescue_limit: DEFAULT_RESCUE_LIMIT,
            workers: 0,
            weights_dir: None,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/setdoctor/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                log::warn!("{e}. Using defaults.");
                Self::default()
            }),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str::<AppConfig>(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Weights directory: config override, else XDG data dir.
    pub fn resolve_weights_dir(&self) -> PathBuf {
        self.weights_dir.clone().unwrap_or_else(default_weights_dir)
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default weights directory using XDG data directory.
pub fn default_weights_dir() -> PathBuf {
    match ProjectDirs::from("", "", crate::APP_NAME) {
        Some(dirs) => dirs.data_dir().join("weights"),
        // Fallback: current directory
        None => PathBuf::from("weights"),
    }
}

/// Opaque persistence for a set's flow weights.
pub trait WeightsStore {
    fn load(&self, set_name: &str) -> Result<Option<FlowWeightSettings>, ConfigError>;
    fn save(&self, set_name: &str, weights: &FlowWeightSettings) -> Result<(), ConfigError>;
}

/// One `<set>.toml` per set in a directory.
#[derive(Debug, Clone)]
pub struct TomlWeightsStore {
    dir: PathBuf,
}

impl TomlWeightsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, set_name: &str) -> Result<PathBuf, ConfigError> {
        let valid = !set_name.is_empty()
            && set_name
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' ' | '.'))
            && !set_name.starts_with('.');
        if !valid {
            return Err(ConfigError::InvalidSetName(set_name.to_string()));
        }
        Ok(self.dir.join(format!("{set_name}.toml")))
    }
}

impl WeightsStore for TomlWeightsStore {
    fn load(&self, set_name: &str) -> Result<Option<FlowWeightSettings>, ConfigError> {
        let path = self.path_for(set_name)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let weights = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        log::debug!("Loaded weights for \"{set_name}\" from {}", path.display());
        Ok(Some(weights))
    }

    fn save(&self, set_name: &str, weights: &FlowWeightSettings) -> Result<(), ConfigError> {
        let path = self.path_for(set_name)?;
        std::fs::create_dir_all(&self.dir).map_err(|source| ConfigError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let contents = toml::to_string_pretty(weights)?;
        std::fs::write(&path, contents).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        log::info!("Saved weights for \"{set_name}\" to {}", path.display());
        Ok(())
    }
}
