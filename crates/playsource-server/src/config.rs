//! Configuration loading and parsing.
//!
//! Defines the server config schema and resolves defaults and
//! command-line overrides into [`Settings`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::queue_song::QueueSettings;

const DEFAULT_BIND: &str = "127.0.0.1:50052";
const DEFAULT_MOPIDY_URL: &str = "http://localhost:6680/mopidy/rpc";
const DEFAULT_MAX_QUEUE_SIZE: usize = 200;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_SONG_LENGTH_SECS: u64 = 120;

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Mopidy JSON-RPC endpoint.
    pub mopidy_url: Option<String>,
    /// Songs admitted but not yet finished per session.
    pub max_queue_size: Option<usize>,
    /// History poll interval in seconds.
    pub poll_interval_secs: Option<u64>,
    /// History poll interval in milliseconds; wins over `poll_interval_secs`.
    pub poll_interval_ms: Option<u64>,
    /// Serve from the in-process emulator instead of Mopidy.
    pub test: Option<bool>,
    /// Wait for the backend and notify the service manager before serving.
    pub service_mode: Option<bool>,
    /// Emulator settings (test mode only).
    pub emulator: Option<EmulatorConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmulatorConfig {
    /// Playing time before an emulated track ends.
    pub song_length_secs: Option<u64>,
    /// Chance in `0.0..=1.0` that a search finds nothing.
    pub not_found_probability: Option<f64>,
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub mopidy_url: Option<String>,
    pub max_queue_size: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub test: bool,
    pub service_mode: bool,
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: SocketAddr,
    pub mopidy_url: String,
    pub queue: QueueSettings,
    pub test: bool,
    pub service_mode: bool,
    pub song_length: Duration,
    pub not_found_probability: f64,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<ServerConfig>(raw)?)
    }
}

/// Load the config named on the command line, else `config.toml` beside the
/// executable, else built-in defaults.
pub fn load_config(path: Option<&PathBuf>) -> Result<ServerConfig> {
    if let Some(path) = path {
        return ServerConfig::load(path);
    }
    let auto_path = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
    match auto_path {
        Some(path) if path.exists() => {
            tracing::info!(path = %path.display(), "using config beside executable");
            ServerConfig::load(&path)
        }
        _ => Ok(ServerConfig::default()),
    }
}

/// Parse an optional bind address from config.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<Option<SocketAddr>> {
    let Some(bind) = cfg.bind.as_deref() else {
        return Ok(None);
    };
    let addr = bind.parse().with_context(|| format!("parse bind {bind}"))?;
    Ok(Some(addr))
}

fn poll_interval(cfg: &ServerConfig, overrides: &Overrides) -> Result<Duration> {
    if let Some(secs) = overrides.poll_interval_secs {
        if secs == 0 {
            return Err(anyhow!("poll interval must be at least 1 second"));
        }
        return Ok(Duration::from_secs(secs));
    }
    if let Some(ms) = cfg.poll_interval_ms {
        if ms == 0 {
            return Err(anyhow!("poll_interval_ms must be at least 1"));
        }
        return Ok(Duration::from_millis(ms));
    }
    let secs = cfg.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    if secs == 0 {
        return Err(anyhow!("poll_interval_secs must be at least 1"));
    }
    Ok(Duration::from_secs(secs))
}

/// Merge config file values, command-line overrides and defaults.
pub fn resolve(cfg: &ServerConfig, overrides: &Overrides) -> Result<Settings> {
    let bind = match overrides.bind {
        Some(addr) => addr,
        None => match bind_from_config(cfg)? {
            Some(addr) => addr,
            None => DEFAULT_BIND.parse().context("parse default bind")?,
        },
    };

    let mopidy_url = overrides
        .mopidy_url
        .clone()
        .or_else(|| cfg.mopidy_url.clone())
        .unwrap_or_else(|| DEFAULT_MOPIDY_URL.to_string());
    reqwest::Url::parse(&mopidy_url).with_context(|| format!("parse mopidy_url {mopidy_url}"))?;

    let max_queue_size = overrides
        .max_queue_size
        .or(cfg.max_queue_size)
        .unwrap_or(DEFAULT_MAX_QUEUE_SIZE);
    if max_queue_size == 0 {
        return Err(anyhow!("max_queue_size must be at least 1"));
    }

    let song_length_secs = cfg
        .emulator
        .as_ref()
        .and_then(|e| e.song_length_secs)
        .unwrap_or(DEFAULT_SONG_LENGTH_SECS);
    if song_length_secs == 0 {
        return Err(anyhow!("emulator.song_length_secs must be at least 1"));
    }

    let not_found_probability = cfg
        .emulator
        .as_ref()
        .and_then(|e| e.not_found_probability)
        .unwrap_or(0.0);
    if !(0.0..=1.0).contains(&not_found_probability) {
        return Err(anyhow!(
            "emulator.not_found_probability must be between 0 and 1, got {not_found_probability}"
        ));
    }

    Ok(Settings {
        bind,
        mopidy_url,
        queue: QueueSettings {
            max_queue_size,
            poll_interval: poll_interval(cfg, overrides)?,
        },
        test: overrides.test || cfg.test.unwrap_or(false),
        service_mode: overrides.service_mode || cfg.service_mode.unwrap_or(false),
        song_length: Duration::from_secs(song_length_secs),
        not_found_probability,
    })
}
