//! Chat relay: drive a web chat UI from the terminal
//!
//! Injects messages into a page's chat input, watches the page for bot replies,
//! decides when each reply has finished streaming and relays its text back to a
//! control panel. Pages are reached over CDP via chromiumoxide.

pub mod agent;
mod browser;
pub mod browser_setup;
pub mod bus;
pub mod dom;
mod manager;
pub mod panel;
pub mod protocol;
pub mod sites;
mod utils;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

pub use utils::constants;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Browser security and launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Disable web security features (Same-Origin Policy, etc.)
    /// WARNING: Only enable for trusted content
    #[serde(default)]
    pub disable_security: bool,

    /// Reuse a persistent profile so site logins survive restarts
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,

    /// Window dimensions
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

/// Reply-stream container polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Reply completion deadline; `timeout_ms: null` waits forever
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_timeout_ms")]
    pub timeout_ms: Option<u64>,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

/// Where site configurations and chat history live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub sites_path: Option<PathBuf>,

    #[serde(default)]
    pub history_path: Option<PathBuf>,
}

fn default_headless() -> bool {
    false // chat sites usually need a logged-in, visible session
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    900
}

fn default_poll_interval_ms() -> u64 {
    constants::DEFAULT_POLL_INTERVAL_MS
}

fn default_max_attempts() -> u32 {
    constants::DEFAULT_MAX_ATTEMPTS
}

fn default_completion_timeout_ms() -> Option<u64> {
    Some(constants::DEFAULT_COMPLETION_TIMEOUT_MS)
}

fn default_sweep_interval_ms() -> u64 {
    constants::DEFAULT_SWEEP_INTERVAL_MS
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            disable_security: false,
            profile_dir: None,
            window: WindowConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_completion_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl StorageConfig {
    pub fn sites_path(&self) -> PathBuf {
        self.sites_path
            .clone()
            .unwrap_or_else(|| data_dir().join("sites.json"))
    }

    pub fn history_path(&self) -> PathBuf {
        self.history_path
            .clone()
            .unwrap_or_else(|| data_dir().join("history.json"))
    }
}

/// Per-user data directory for persisted state
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(constants::APP_DIR_NAME)
}

/// Default location of `config.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(constants::APP_DIR_NAME)
        .join("config.yaml")
}

/// Load config from a YAML file, falling back to defaults when it is absent
pub fn load_yaml_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = path.map_or_else(default_config_path, Path::to_path_buf);

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid config in {}", config_path.display()))?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

pub use agent::{AgentError, AgentSettings, PageAgent};
pub use browser::{BrowserError, BrowserResult, BrowserWrapper, launch_browser};
pub use bus::{AgentHandle, BusError, Envelope, EventStream, Outbox, event_channel, request_channel};
pub use manager::BrowserManager;
pub use panel::{ChatMessage, ControlPanel, HistoryStore, Sender};
pub use protocol::{Ack, BridgeMessage};
pub use sites::{SiteConfig, SiteConfigError, SiteConfigStore, SiteSelectors, SubmitMode};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "discovery:\n  max_attempts: 3\ncompletion:\n  timeout_ms: null\n",
        )
        .unwrap();
        assert_eq!(config.discovery.max_attempts, 3);
        assert_eq!(config.discovery.poll_interval_ms, constants::DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.completion.timeout(), None);
        assert!(!config.browser.headless);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_yaml_config(Some(&dir.path().join("absent.yaml"))).unwrap();
        assert_eq!(
            config.completion.timeout(),
            Some(Duration::from_millis(constants::DEFAULT_COMPLETION_TIMEOUT_MS))
        );
    }
}
