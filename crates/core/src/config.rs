use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// WebSocket endpoint of the remote tool bridge. None disables it.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            call_timeout_secs: default_call_timeout_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Explicit browser binary; auto-detected when unset.
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default)]
    pub headed: bool,
    /// Budget for an element to appear before selector-not-found.
    #[serde(default = "default_selector_timeout_ms")]
    pub selector_timeout_ms: u64,
    /// Budget for a navigation to settle. Expiry is logged, not fatal.
    #[serde(default = "default_navigate_timeout_ms")]
    pub navigate_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            binary: None,
            headed: false,
            selector_timeout_ms: default_selector_timeout_ms(),
            navigate_timeout_ms: default_navigate_timeout_ms(),
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_reconnect_delay_secs() -> u64 {
    2
}

fn default_selector_timeout_ms() -> u64 {
    10_000
}

fn default_navigate_timeout_ms() -> u64 {
    15_000
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("parse {}: {}", path.display(), e)))
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let path = paths.config_file();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}
