//! Store configuration, read from `.trellis/config.yaml`.

use crate::storage::TRELLIS_DIR;
use eyre::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration file name within the .trellis directory.
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// How entity names and aliases are matched
    #[serde(default)]
    pub mode: SearchMode,
}

/// Matching policy for entity search. Always case-insensitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Substring,
    Prefix,
}

impl SearchMode {
    pub fn matches(&self, candidate: &str, pattern: &str) -> bool {
        let candidate = candidate.to_lowercase();
        let pattern = pattern.to_lowercase();
        match self {
            SearchMode::Substring => candidate.contains(&pattern),
            SearchMode::Prefix => candidate.starts_with(&pattern),
        }
    }
}

impl Config {
    /// Path of the config file for a store rooted at `root`.
    pub fn path(root: &Path) -> PathBuf {
        root.join(TRELLIS_DIR).join(CONFIG_FILE)
    }

    /// Load the config for a store, falling back to defaults when the file
    /// does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write the config for a store rooted at `root`.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
