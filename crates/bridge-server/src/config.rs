//! TOML configuration with env and CLI overrides.
//!
//! Precedence, lowest to highest: file defaults, `BRIDGE_*`
//! environment variables, command-line flags. Secrets (the venue API
//! key) should come from the environment rather than the file.

use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::inject::ScriptStep;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub venue: VenueConfig,
    pub reconciler: ReconcilerConfig,
    pub journal: JournalConfig,
    pub clients: ClientsConfig,
    pub injection: InjectionConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VenueConfig {
    pub base_url: String,
    pub username: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    /// Minimum seconds between venue polls for one account.
    pub refresh_secs: u64,
    /// Sleep between worker poll attempts.
    pub poll_interval_secs: u64,
    /// Account directory cache lifetime.
    pub account_cache_secs: u64,
    pub only_active_accounts: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JournalConfig {
    pub enabled: bool,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientsConfig {
    /// A client is "online" if it posted a snapshot within this window.
    pub online_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InjectionConfig {
    pub enabled: bool,
    pub steps: Vec<ScriptStep>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            venue: VenueConfig::default(),
            reconciler: ReconcilerConfig::default(),
            journal: JournalConfig::default(),
            clients: ClientsConfig::default(),
            injection: InjectionConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.topstepx.com".to_string(),
            username: String::new(),
            api_key: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_secs: 10,
            poll_interval_secs: 10,
            account_cache_secs: 300,
            only_active_accounts: true,
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "journal/positions.jsonl".to_string(),
        }
    }
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            online_timeout_secs: 60,
        }
    }
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            steps: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Fold in `BRIDGE_*` environment variables where set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BRIDGE_VENUE_USERNAME") {
            self.venue.username = v;
        }
        if let Ok(v) = std::env::var("BRIDGE_VENUE_API_KEY") {
            self.venue.api_key = v;
        }
        if let Ok(v) = std::env::var("BRIDGE_VENUE_URL") {
            self.venue.base_url = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            bail!("server.host must not be empty");
        }
        if self.reconciler.enabled {
            if self.venue.username.is_empty() {
                bail!("venue.username is required when the reconciler is enabled");
            }
            if self.venue.api_key.is_empty() {
                bail!("venue.api_key is required when the reconciler is enabled");
            }
            if self.reconciler.refresh_secs == 0 {
                bail!("reconciler.refresh_secs must be positive");
            }
            if self.reconciler.poll_interval_secs == 0 {
                bail!("reconciler.poll_interval_secs must be positive");
            }
        }
        if self.injection.enabled && self.injection.steps.is_empty() {
            bail!("injection.enabled is set but injection.steps is empty");
        }
        Ok(())
    }
}
