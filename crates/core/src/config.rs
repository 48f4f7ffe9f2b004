//! Sandbox configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoyConfig {
    /// Interception behaviour
    pub interception: InterceptionConfig,

    /// Virtual clock limits
    pub clock: ClockConfig,

    /// Retrying assertion cadence used by runners
    pub polling: PollingConfig,
}

/// What stubbing an absent member does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingMember {
    /// Fail with `NotCallable`
    #[default]
    Reject,
    /// Install the stub anyway; restoring removes the member again
    Create,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptionConfig {
    pub missing_member: MissingMember,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Maximum timers fired by a single `run_all`
    pub loop_limit: usize,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { loop_limit: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between attempts
    pub interval_ms: u64,

    /// Give up after this long
    pub timeout_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 50,
            timeout_ms: 4000,
        }
    }
}

impl DecoyConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}
