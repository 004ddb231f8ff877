//! Declarative watcher configuration.
//!
//! Configuration is read from a TOML file and may be overridden by
//! `PHAROS_`-prefixed environment variables, nested keys separated by `__`
//! (`PHAROS_SERVER__LISTEN=0.0.0.0:8888`).
//!
//! ```toml
//! page_tag = "Watching so you don't have to"
//!
//! [server]
//! listen = "127.0.0.1:8888"
//!
//! [[sets]]
//! name = "Watch Set 1"
//!
//! [[sets.watchers]]
//! name = "Is True?"
//! command = "true"
//!
//! [[sets.watchers]]
//! name = "Is Google Up"
//! url = "http://www.google.com/"
//! thresholds = [0.001, 0.100, 1.0]
//! ```
//!
//! Watcher ids are derived from names and are not checked for uniqueness;
//! two watchers with the same name shadow each other when looked up by id.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::debug;

use crate::classify::Thresholds;
use crate::error::ConfigError;
use crate::supervisor::{ShellSpawner, DEFAULT_SHELL};
use crate::watcher::{Dashboard, Watcher, WatcherBuilder, WatcherSet};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "PHAROS";

/// Page title used when none is configured.
pub const DEFAULT_PAGE_TAG: &str = "Pharos";

/// Listen address used when none is configured.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8888";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PharosConfig {
    #[serde(default = "default_page_tag")]
    pub page_tag: String,
    /// Shell used to run probe commands.
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sets: Vec<SetConfig>,
}

/// Status server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// One `[[sets]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct SetConfig {
    pub name: String,
    #[serde(default)]
    pub watchers: Vec<WatcherEntry>,
}

/// One `[[sets.watchers]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherEntry {
    pub name: String,
    /// Shell command whose exit code decides the status.
    pub command: Option<String>,
    /// Page to time with an HTTP GET.
    pub url: Option<String>,
    /// Run the probe on this host over ssh.
    pub ssh_host: Option<String>,
    pub interval_ms: Option<u64>,
    /// `[min, warn, crit]` in seconds.
    pub thresholds: Option<Thresholds>,
    pub timeout_ms: Option<u64>,
}

fn default_page_tag() -> String {
    DEFAULT_PAGE_TAG.to_string()
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8888))
}

impl PharosConfig {
    /// Load from a file, applying environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading configuration");
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(env_source())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parse TOML text, without environment overrides.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Spawner running probes through the configured shell.
    pub fn spawner(&self) -> ShellSpawner {
        ShellSpawner::new(self.shell.clone())
    }

    /// Build the watchers this configuration describes.
    pub fn to_dashboard(&self) -> Result<Dashboard, ConfigError> {
        let sets = self
            .sets
            .iter()
            .map(|set| {
                let watchers = set
                    .watchers
                    .iter()
                    .map(WatcherEntry::to_watcher)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(WatcherSet::new(set.name.clone(), watchers))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Dashboard::new(self.page_tag.clone(), sets))
    }
}

impl WatcherEntry {
    pub fn to_watcher(&self) -> Result<Watcher, ConfigError> {
        let mut builder: WatcherBuilder = match (&self.command, &self.url) {
            (Some(command), None) => Watcher::builder(self.name.clone(), command.clone()),
            (None, Some(url)) => Watcher::page_get(self.name.clone(), url),
            _ => {
                return Err(ConfigError::ProbeKind {
                    name: self.name.clone(),
                })
            }
        };

        if let Some(host) = &self.ssh_host {
            builder = builder.ssh_host(host);
        }
        if let Some(ms) = self.interval_ms {
            if ms == 0 {
                return Err(ConfigError::ZeroInterval {
                    name: self.name.clone(),
                });
            }
            builder = builder.interval(Duration::from_millis(ms));
        }
        if let Some(thresholds) = self.thresholds {
            builder = builder.thresholds(thresholds);
        }
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        Ok(builder.build())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
