// SPDX-License-Identifier: MIT OR Apache-2.0
//! Player settings, loaded from RON.

use fabric_graph::ResourceCacheConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Current config format version
pub const CONFIG_FORMAT_VERSION: u32 = 1;

/// Config loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File access failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Text is not a valid config
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialize(#[from] ron::Error),

    /// Written by a newer version
    #[error("Config version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version found in the file
        found: u32,
        /// Newest version this build reads
        supported: u32,
    },
}

/// Result type for config operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Headless player settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Format version
    pub version: u32,
    /// Passes to run before exiting
    pub frames: u64,
    /// Frames per second of the simulated clock
    pub frame_rate: f64,
    /// Graph document to play; the built-in demo graph when unset
    pub graph: Option<PathBuf>,
    /// Where to write the played graph after the last frame
    pub save_document: Option<PathBuf>,
    /// Simulated GPU latency before a command buffer completes
    pub completion_latency_ms: u64,
    /// Resource pool settings
    pub resource_cache: ResourceCacheConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_FORMAT_VERSION,
            frames: 120,
            frame_rate: 60.0,
            graph: None,
            save_document: None,
            completion_latency_ms: 2,
            resource_cache: ResourceCacheConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
    }

    /// Parse settings from RON text
    pub fn from_ron(s: &str) -> Result<Self> {
        let config: PlayerConfig = ron::from_str(s)?;
        if config.version > CONFIG_FORMAT_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
                supported: CONFIG_FORMAT_VERSION,
            });
        }
        Ok(config)
    }

    /// Serialize to RON text
    pub fn to_ron(&self) -> Result<String> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Simulated time of a frame, in seconds
    pub fn frame_time(&self, frame: u64) -> f64 {
        if self.frame_rate > 0.0 {
            frame as f64 / self.frame_rate
        } else {
            0.0
        }
    }

    /// Simulated GPU latency
    pub fn completion_latency(&self) -> Duration {
        Duration::from_millis(self.completion_latency_ms)
    }
}
