//! Runtime configuration

use crate::error::{BundleError, BundleResult};
use serde::{Deserialize, Serialize};

/// How assets are located
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadMode {
    /// Read unpacked assets straight from the editor source, no packages
    Develop,
    /// Load packages as they are, skipping the update check
    #[default]
    Local,
    /// Load packages after the version/update flow has run
    Build,
}

impl LoadMode {
    /// Whether this mode goes through packages and load handles
    pub fn is_packaged(&self) -> bool {
        !matches!(self, Self::Develop)
    }
}

/// Asset runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Package used when a call does not name one
    pub default_package: String,
    /// Load mode
    pub load_mode: LoadMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_package: "main".to_string(),
            load_mode: LoadMode::Local,
        }
    }
}

impl RuntimeConfig {
    /// Packaged configuration with the given default package
    pub fn packaged(default_package: impl Into<String>) -> Self {
        Self {
            default_package: default_package.into(),
            load_mode: LoadMode::Local,
        }
    }

    /// Develop-mode configuration with the given default package
    pub fn develop(default_package: impl Into<String>) -> Self {
        Self {
            default_package: default_package.into(),
            load_mode: LoadMode::Develop,
        }
    }

    /// Set the load mode
    pub fn with_load_mode(mut self, load_mode: LoadMode) -> Self {
        self.load_mode = load_mode;
        self
    }

    /// Parse from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> BundleResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BundleError::Config(e.to_string()))?;
        if config.default_package.is_empty() {
            return Err(BundleError::Config("default_package must not be empty".into()));
        }
        Ok(config)
    }
}
