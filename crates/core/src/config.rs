//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Process-wide symbol lookup settings
    pub lookup: LookupConfig,
    /// Diagnostics reporting settings
    pub diagnostics: DiagnosticsConfig,
}

/// Process-wide lookup settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Decoration prepended to C names before searching (`_` on Darwin)
    pub symbol_prefix: String,
    /// Dynamic-linker images whose path contains one of these are skipped
    pub simulator_shims: Vec<String>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            symbol_prefix: "_".to_string(),
            simulator_shims: vec!["dyld_sim".to_string()],
        }
    }
}

/// Diagnostics settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Echo every recorded error through `tracing` as it happens
    pub verbose: bool,
    /// Tag prepended to echoed errors
    pub prefix: Option<String>,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| crate::Error::parse(e.to_string()))?;
        config.validate()?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the lookup cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.lookup.simulator_shims.iter().any(|s| s.is_empty()) {
            return Err(crate::Error::config("empty simulator shim name matches every path"));
        }
        if self.lookup.symbol_prefix.contains('\0') {
            return Err(crate::Error::config("symbol prefix contains NUL"));
        }
        Ok(())
    }
}
