//! User configuration for bladeplan
//!
//! Read from `config.toml` in the config directory. Every field has a default,
//! so a missing file or an empty one is valid.
//!
//! # Config directory
//!
//! 1. `BLADEPLAN_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/bladeplan` (if set)
//! 3. `~/.config/bladeplan`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "BLADEPLAN_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Get the bladeplan config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("bladeplan");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("bladeplan"))
}

/// Expand ~ and environment variables in a path string
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Blades provisioned in parallel
    pub jobs: usize,
    /// Attempts per command for transient failures
    pub retries: u32,
    /// Wait before retrying an unreachable blade; doubles each attempt
    pub retry_delay_secs: u64,
    /// Wait before retrying while the dpkg lock is held; doubles each attempt
    pub lock_wait_secs: u64,
    /// Interpreter used to create blade venvs
    pub python: String,
    /// Run `apt-get upgrade` while preparing each blade
    pub upgrade: bool,
    pub ssh: SshConfig,
    /// Overlays applied before any given on the command line
    pub overlays: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs: 4,
            retries: 4,
            retry_delay_secs: 10,
            lock_wait_secs: 20,
            python: "python3".to_string(),
            upgrade: false,
            ssh: SshConfig::default(),
            overlays: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub identity_file: Option<String>,
    pub port: Option<u16>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            identity_file: None,
            port: None,
        }
    }
}

impl Config {
    /// Load from an explicit path, or the default location
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        let path = config_dir()?.join(CONFIG_FILE);
        if path.exists() {
            Self::load_from(&path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Default overlays with `~` and variables expanded
    pub fn overlay_paths(&self) -> Vec<PathBuf> {
        self.overlays.iter().map(|o| expand(o)).collect()
    }

    pub fn identity_path(&self) -> Option<PathBuf> {
        self.ssh.identity_file.as_deref().map(expand)
    }

    pub fn retry_config(&self) -> debkit::RetryConfig {
        debkit::RetryConfig {
            max_attempts: self.retries,
            connect_delay: Duration::from_secs(self.retry_delay_secs),
            lock_delay: Duration::from_secs(self.lock_wait_secs),
            ..Default::default()
        }
    }

    pub fn backend_options(&self) -> debkit::BackendOptions {
        debkit::BackendOptions {
            python: self.python.clone(),
            upgrade: self.upgrade,
        }
    }
}
