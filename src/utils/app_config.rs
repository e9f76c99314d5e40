/// Application configuration management
/// Stores user defaults in ~/.config/astra-monitor/config.toml

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::core::profiler::MAX_HISTORY;
use crate::core::{ProfilerConfig, RunnerOptions};

pub const DEFAULT_INTERVAL_MS: u64 = 500;
pub const DEFAULT_WINDOW_S: u64 = 10;
pub const DEFAULT_PORT: u16 = 8050;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_TIMEOUT_S: u64 = 5;
pub const DEFAULT_KEEP_ALIVE_S: u64 = 10;

/// On-disk configuration; every field is optional and overridden by flags
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub board_address: Option<String>,
    pub interval_ms: Option<u64>,
    pub window_s: Option<u64>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub timeout_s: Option<u64>,
    pub keep_alive_s: Option<u64>,
    pub adb_path: Option<String>,
    pub cors: Option<bool>,
}

impl AppConfig {
    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine the user configuration directory")?
            .join("astra-monitor");

        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing default file yields an empty config; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::config_path()?, false),
        };

        if !path.exists() {
            if explicit {
                bail!("Config file {} does not exist", path.display());
            }
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to `path`, creating its directory if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;

        Ok(())
    }
}

/// Effective settings after merging flags over the config file over defaults
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub board_address: Option<String>,
    pub interval: Duration,
    pub window: Duration,
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub keep_alive: Duration,
    pub adb_path: String,
    pub cors: bool,
}

impl Settings {
    pub fn resolve(cli: &Cli, file: AppConfig) -> Result<Self> {
        let interval_ms = cli.interval.or(file.interval_ms).unwrap_or(DEFAULT_INTERVAL_MS);
        let window_s = cli.window.or(file.window_s).unwrap_or(DEFAULT_WINDOW_S);
        let timeout_s = cli.timeout.or(file.timeout_s).unwrap_or(DEFAULT_TIMEOUT_S);
        let keep_alive_s = file.keep_alive_s.unwrap_or(DEFAULT_KEEP_ALIVE_S);

        if interval_ms == 0 {
            bail!("Polling interval must be greater than 0 ms");
        }
        if window_s == 0 {
            bail!("Statistics window must be greater than 0 s");
        }
        if timeout_s == 0 {
            bail!("Command timeout must be greater than 0 s");
        }
        let samples_per_window = (u128::from(window_s) * 1000).div_ceil(u128::from(interval_ms)) + 1;
        if samples_per_window > MAX_HISTORY as u128 {
            bail!(
                "Statistics window of {} s at a {} ms interval needs {} samples (limit {}); raise the interval or shorten the window",
                window_s,
                interval_ms,
                samples_per_window,
                MAX_HISTORY
            );
        }

        Ok(Self {
            board_address: cli.board_address.clone().or(file.board_address),
            interval: Duration::from_millis(interval_ms),
            window: Duration::from_secs(window_s),
            host: cli
                .host
                .clone()
                .or(file.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
            timeout: Duration::from_secs(timeout_s),
            keep_alive: Duration::from_secs(keep_alive_s),
            adb_path: file.adb_path.unwrap_or_else(|| "adb".to_string()),
            cors: cli.cors || file.cors.unwrap_or(false),
        })
    }

    pub fn profiler_config(&self) -> ProfilerConfig {
        ProfilerConfig {
            interval: self.interval,
            window: self.window,
        }
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            timeout: self.timeout,
            keep_alive: self.keep_alive,
            adb_program: self.adb_path.clone(),
        }
    }

    /// Fully populated config reflecting these settings
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            board_address: self.board_address.clone(),
            interval_ms: Some(self.interval.as_millis() as u64),
            window_s: Some(self.window.as_secs()),
            port: Some(self.port),
            host: Some(self.host.clone()),
            timeout_s: Some(self.timeout.as_secs()),
            keep_alive_s: Some(self.keep_alive.as_secs()),
            adb_path: Some(self.adb_path.clone()),
            cors: Some(self.cors),
        }
    }
}
