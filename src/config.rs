//! Configuration loading for Coalescer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the Coalescer home directory (~/.coalescer).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".coalescer"))
}

/// Get the default settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from an explicit path, or ~/.coalescer/settings.json.
///
/// A missing file is not an error: every section has defaults.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => get_settings_path()?,
    };

    let settings = if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        tracing::debug!("Loaded settings from {}", path.display());
        settings
    } else {
        tracing::info!("No settings at {}, using defaults", path.display());
        Settings::default()
    };

    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<()> {
    let queue = &settings.queue;
    if queue.workers == 0 {
        return Err(Error::Config("queue.workers must be at least 1".to_string()));
    }
    if !(queue.poll_interval_secs.is_finite() && queue.poll_interval_secs > 0.0) {
        return Err(Error::Config(format!(
            "queue.poll_interval_secs must be positive, got {}",
            queue.poll_interval_secs
        )));
    }

    for (name, value) in [
        ("queue.debounce_window_secs", queue.debounce_window_secs),
        ("guard.cooldown_secs", settings.guard.cooldown_secs),
        ("guard.echo_tolerance_secs", settings.guard.echo_tolerance_secs),
    ] {
        if !(value.is_finite() && value >= 0.0) {
            return Err(Error::Config(format!(
                "{} must be a non-negative number, got {}",
                name, value
            )));
        }
    }

    if let Some(url) = settings.backend.url.as_deref() {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "backend.url '{}' must be an http(s) URL",
                url
            )));
        }
    }
    Ok(())
}

/// Queue and consumer loop configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QueueSettings {
    #[serde(default = "default_debounce_window_secs")]
    pub debounce_window_secs: f64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_debounce_window_secs() -> f64 {
    60.0
}

fn default_workers() -> usize {
    10
}

fn default_poll_interval_secs() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    3
}

impl QueueSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            debounce_window_secs: default_debounce_window_secs(),
            workers: default_workers(),
            poll_interval_secs: default_poll_interval_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Cooldown and echo suppression configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GuardSettings {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    #[serde(default = "default_echo_tolerance_secs")]
    pub echo_tolerance_secs: f64,
    #[serde(default = "default_advisory_message")]
    pub advisory_message: String,
}

fn default_cooldown_secs() -> f64 {
    300.0
}

fn default_echo_tolerance_secs() -> f64 {
    20.0
}

fn default_advisory_message() -> String {
    "A human agent is handling this conversation. Automated replies are paused for 5 minutes after the last human reply.".to_string()
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            echo_tolerance_secs: default_echo_tolerance_secs(),
            advisory_message: default_advisory_message(),
        }
    }
}

/// Event store configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoreSettings {
    pub path: Option<PathBuf>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default)]
    pub audit_evictions: bool,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl StoreSettings {
    /// Resolve the database path, falling back to ~/.coalescer/queue.db.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(p) => Ok(p.clone()),
            None => Ok(get_home_dir()?.join("queue.db")),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            audit_evictions: false,
        }
    }
}

/// Web ingestion server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WebSettings {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    3333
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

/// Downstream chat backend configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BackendSettings {
    pub url: Option<String>,
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend_timeout_secs() -> u64 {
    120
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

/// Coalescer settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub guard: GuardSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub web: WebSettings,

    #[serde(default)]
    pub backend: BackendSettings,
}
