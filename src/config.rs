//! Engine configuration.
//!
//! Every field has a default; a TOML file only needs to name what it changes.
//! [`EngineConfig::load`] looks for an explicit path first, then
//! `<config dir>/neurotrace/config.toml`, then falls back to defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::path::PathOptions;

/// Operator session settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Client tag embedded in every allocated id.
    pub client_id: u16,
    /// Maximum undo depth.
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: 1,
            history_limit: 256,
        }
    }
}

/// Picking and spatial index settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpatialConfig {
    /// Grid cell edge length.
    pub cell_size: f64,
    /// Distance within which a pick snaps to an existing node or edge.
    pub snap_radius: f64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            cell_size: 8.0,
            snap_radius: 2.0,
        }
    }
}

/// Review cursor settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReviewConfig {
    /// Edge length of the cubes visited by "skip cube".
    pub cube_size: f64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self { cube_size: 64.0 }
    }
}

/// Graph store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Radius given to nodes when no estimate is available.
    pub default_radius: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_radius: 1.0,
        }
    }
}

/// Complete engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Session settings.
    pub session: SessionConfig,
    /// Picking settings.
    pub spatial: SpatialConfig,
    /// Path finder settings.
    pub path: PathOptions,
    /// Review settings.
    pub review: ReviewConfig,
    /// Store settings.
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Loads configuration from `explicit`, the default location, or defaults.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(&path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reads and validates a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized =
            toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })?;
        fs::write(path, serialized).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a positive number, got {value}"),
                })
            }
        }
        positive("spatial.cell_size", self.spatial.cell_size)?;
        positive("spatial.snap_radius", self.spatial.snap_radius)?;
        positive("review.cube_size", self.review.cube_size)?;
        positive("store.default_radius", self.store.default_radius)?;
        positive("path.straight_step", self.path.straight_step)?;
        positive("path.radius_limit", self.path.radius_limit)?;
        positive("path.intensity_offset", self.path.intensity_offset)?;
        if self.path.gradient_weight < 0.0 {
            return Err(ConfigError::Invalid {
                field: "path.gradient_weight",
                reason: "must not be negative".into(),
            });
        }
        if self.path.max_expansions == 0 {
            return Err(ConfigError::Invalid {
                field: "path.max_expansions",
                reason: "must be at least 1".into(),
            });
        }
        if self.path.cancel_check_interval == 0 {
            return Err(ConfigError::Invalid {
                field: "path.cancel_check_interval",
                reason: "must be at least 1".into(),
            });
        }
        if self.session.history_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "session.history_limit",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Errors raised while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// The configuration could not be encoded.
    #[error("failed to serialize config: {source}")]
    Serialize {
        /// Underlying error.
        source: toml::ser::Error,
    },
    /// The file could not be written.
    #[error("failed to write config {path}: {source}")]
    Write {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The parent directory could not be created.
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("neurotrace").join("config.toml"))
}
