use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

/// repository configuration stored in config.toml
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// refuse all writes when set
    pub readonly: bool,
    /// default static delta tuning, overridable per invocation
    pub delta: DeltaTuning,
}

impl Config {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }
}

/// static delta generation tuning, sizes in megabytes
///
/// these are the repository defaults; generate flags and params override
/// them per invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaTuning {
    /// objects at or above this size travel as fallback entries
    pub min_fallback_size: u64,
    /// objects at or above this size are never bsdiff-patched
    pub max_bsdiff_size: u64,
    /// inline payload chunk size limit
    pub max_chunk_size: u64,
    /// allow the bsdiff patch encoding at all
    pub bsdiff_enabled: bool,
}

impl Default for DeltaTuning {
    fn default() -> Self {
        Self {
            min_fallback_size: 4,
            max_bsdiff_size: 128,
            max_chunk_size: 32,
            bsdiff_enabled: true,
        }
    }
}
