// Process-level settings, read once from the environment at start-up

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CAPTURE_LIMIT_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_MAX_QUEUED: usize = 32;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_PROFILES_PATH: &str = "config/profiles.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Wall-clock limit for one sandbox run
    pub timeout_secs: u64,
    /// Per-stream cap on captured stdout/stderr
    pub capture_limit_bytes: usize,
    /// Sandboxes allowed to run at the same time
    pub max_concurrent: usize,
    /// Requests allowed to wait for a free slot before being rejected
    pub max_queued: usize,
    pub bind_addr: String,
    pub profiles_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            capture_limit_bytes: DEFAULT_CAPTURE_LIMIT_BYTES,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_queued: DEFAULT_MAX_QUEUED,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            profiles_path: PathBuf::from(DEFAULT_PROFILES_PATH),
        }
    }
}

impl Config {
    /// Load from `EXAMBOX_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            timeout_secs: parse_var(&lookup, "EXAMBOX_TIMEOUT_SECS", defaults.timeout_secs)?,
            capture_limit_bytes: parse_var(
                &lookup,
                "EXAMBOX_CAPTURE_LIMIT_BYTES",
                defaults.capture_limit_bytes,
            )?,
            max_concurrent: parse_var(&lookup, "EXAMBOX_MAX_CONCURRENT", defaults.max_concurrent)?,
            max_queued: parse_var(&lookup, "EXAMBOX_MAX_QUEUED", defaults.max_queued)?,
            bind_addr: lookup("EXAMBOX_BIND_ADDR").unwrap_or(defaults.bind_addr),
            profiles_path: lookup("EXAMBOX_PROFILES")
                .map(PathBuf::from)
                .unwrap_or(defaults.profiles_path),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            bail!("EXAMBOX_TIMEOUT_SECS must be greater than zero");
        }
        if self.capture_limit_bytes == 0 {
            bail!("EXAMBOX_CAPTURE_LIMIT_BYTES must be greater than zero");
        }
        if self.max_concurrent == 0 {
            bail!("EXAMBOX_MAX_CONCURRENT must be greater than zero");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
