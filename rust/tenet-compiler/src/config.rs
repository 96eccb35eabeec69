//! Configuration file parsing for `tenet.toml`.
//!
//! Searches the given directory then its ancestors; the first file found
//! wins and its directory becomes the project root. Without a file every
//! setting takes its default.
//!
//! ```toml
//! [verification]
//! enabled = true
//! cache = true
//! cache_dir = "build/verification-cache"
//! max_cache_bytes = 67108864
//! solver_timeout_ms = 10000
//!
//! [effects]
//! unknown_calls = "strict"
//! catalog = "effects.toml"
//! ```

use crate::compiler::effects::inference::UnknownCallPolicy;
use crate::compiler::verification::cache::DEFAULT_MAX_CACHE_BYTES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "tenet.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml in '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct TenetConfig {
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub effects: EffectsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct VerificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Use the persistent result cache.
    #[serde(default = "default_true")]
    pub cache: bool,
    /// Explicit cache root; relative paths resolve against the project root.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,
    /// Solver runs longer than this are reported as skipped.
    #[serde(default)]
    pub solver_timeout_ms: Option<u64>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache: true,
            cache_dir: None,
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            solver_timeout_ms: None,
        }
    }
}

impl VerificationConfig {
    pub fn solver_timeout(&self) -> Option<Duration> {
        self.solver_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct EffectsConfig {
    #[serde(default)]
    pub unknown_calls: UnknownCallPolicy,
    /// Project effect catalog override file.
    #[serde(default)]
    pub catalog: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_max_cache_bytes() -> u64 {
    DEFAULT_MAX_CACHE_BYTES
}

impl TenetConfig {
    /// Load config from `tenet.toml` in `start` or its ancestors.
    /// Returns `Default` when no file is found.
    pub fn load(start: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load_with_path(start)?
            .map(|(_path, cfg)| cfg)
            .unwrap_or_default())
    }

    /// Load config and return the path of the file that was used.
    pub fn load_with_path(start: &Path) -> Result<Option<(PathBuf, Self)>, ConfigError> {
        match Self::find(start) {
            Some(path) => {
                let cfg = Self::load_from(&path)?;
                log::debug!("loaded configuration from {}", path.display());
                Ok(Some((path, cfg)))
            }
            None => Ok(None),
        }
    }

    /// Nearest `tenet.toml` at or above `start`.
    pub fn find(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a TOML string directly.
    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Catalog override path resolved against `project_root`.
    pub fn catalog_path(&self, project_root: Option<&Path>) -> Option<PathBuf> {
        let path = self.effects.catalog.as_ref()?;
        Some(match project_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.clone(),
        })
    }
}
