use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub thread_name: String,
    pub shutdown_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name: "hostbridge-runtime".to_string(),
            shutdown_grace_ms: 500,
        }
    }
}

impl RuntimeConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub tick_ms: u64,
    /// Most units of work accepted from a single callback; `0` disables
    /// the limit
    pub max_batch: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            max_batch: 64,
        }
    }
}

impl HostConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: Option<String>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub jobs_ms: Vec<u64>,
    pub fail_job: bool,
    pub tick_ms: u64,
    pub max_ticks: Option<u64>,
    pub heartbeat_toggle_every: u64,
    pub fatal_after: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            jobs_ms: vec![1500, 200, 700],
            fail_job: true,
            tick_ms: 1000,
            max_ticks: None,
            heartbeat_toggle_every: 5,
            fatal_after: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub demo: DemoConfig,
}

/// Load the config from the default location, falling back to defaults.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        return Config::default();
    };
    if !path.exists() {
        return Config::default();
    }
    load_from(&path).unwrap_or_default()
}

pub fn load_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str::<Config>(&content).with_context(|| format!("parsing config {}", path.display()))
}

pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("HOSTBRIDGE_CONFIG").map(PathBuf::from) {
        return Some(path);
    }
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from) {
        return Some(xdg.join("hostbridge").join("config.toml"));
    }
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        return Some(home.join(".config").join("hostbridge").join("config.toml"));
    }

    directories::ProjectDirs::from("io", "hostbridge", "hostbridge")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

pub fn data_dir() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME").map(PathBuf::from) {
        return Some(xdg.join("hostbridge"));
    }
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        return Some(home.join(".local").join("share").join("hostbridge"));
    }
    directories::ProjectDirs::from("io", "hostbridge", "hostbridge")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

pub fn log_file_path(config: &LogConfig) -> Option<PathBuf> {
    config
        .file
        .clone()
        .or_else(|| data_dir().map(|dir| dir.join("hostbridge.log")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.host.max_batch, 64);
        assert_eq!(config.host.tick(), Duration::from_millis(50));
        assert_eq!(config.runtime.shutdown_grace(), Duration::from_millis(500));
        assert_eq!(config.demo.jobs_ms, vec![1500, 200, 700]);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[host]\ntick_ms = 10\n\n[runtime]\nthread_name = \"bg\"\n\n[demo]\nmax_ticks = 3"
        )
        .unwrap();

        let config = load_from(file.path()).unwrap();
        assert_eq!(config.host.tick_ms, 10);
        assert_eq!(config.host.max_batch, 64);
        assert_eq!(config.runtime.thread_name, "bg");
        assert_eq!(config.runtime.shutdown_grace_ms, 500);
        assert_eq!(config.demo.max_ticks, Some(3));
        assert!(config.log.filter.is_none());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[host]\ntick_ms = \"fast\"").unwrap();
        let err = load_from(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parsing config"));
    }

    #[test]
    fn test_zero_tick_is_clamped() {
        let host = HostConfig {
            tick_ms: 0,
            max_batch: 1,
        };
        assert_eq!(host.tick(), Duration::from_millis(1));
    }
}
