//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: server
//! endpoints, connection tuning, where the session is kept, and the views
//! the sync controller keeps fresh.
//!
//! Configuration is stored at `~/.config/fieldsync/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::{DASHBOARD_PATH, OPEN_ALERTS_PATH, STATS_PATH};
use crate::api::transport::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::api::RequestSpec;
use crate::realtime::channel::{DEFAULT_PING_INTERVAL_SECS, DEFAULT_PONG_TIMEOUT_SECS};
use crate::realtime::{ChannelConfig, ReconnectPolicy};
use crate::sync::ViewSpec;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "fieldsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    File,
    Keyring,
}

/// A named view: which endpoint to fetch and which topics invalidate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl ViewConfig {
    fn new(name: &str, path: &str, topics: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn to_spec(&self) -> ViewSpec {
        ViewSpec::new(&self.name, RequestSpec::get(&self.path), &self.topics)
    }
}

fn default_views() -> Vec<ViewConfig> {
    vec![
        ViewConfig::new("dashboard", DASHBOARD_PATH, &["alerts", "production"]),
        ViewConfig::new("open_alerts", OPEN_ALERTS_PATH, &["alerts"]),
        ViewConfig::new("stats", STATS_PATH, &["alerts", "production"]),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    /// Realtime endpoint; derived from `api_base_url` when unset.
    pub ws_url: Option<String>,
    pub request_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub reconnect: ReconnectPolicy,
    pub session_backend: SessionBackend,
    pub last_username: Option<String>,
    pub views: Vec<ViewConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            pong_timeout_secs: DEFAULT_PONG_TIMEOUT_SECS,
            reconnect: ReconnectPolicy::default(),
            session_backend: SessionBackend::default(),
            last_username: None,
            views: default_views(),
        }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Realtime URL: explicit `ws_url`, or `<api_base_url>/ws` with the scheme swapped.
    pub fn websocket_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }
        let base = self.api_base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws", base)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            url: self.websocket_url(),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
            reconnect: self.reconnect.clone(),
        }
    }

    pub fn view(&self, name: &str) -> Option<&ViewConfig> {
        self.views.iter().find(|v| v.name == name)
    }

    pub fn view_specs(&self) -> Vec<ViewSpec> {
        self.views.iter().map(ViewConfig::to_spec).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
