use std::path::PathBuf;
use std::time::Duration;

/// Process configuration, loaded once at startup from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for persisted state (accounts, settings).
    pub data_dir: PathBuf,
    /// Directory holding cache entry files. Must be a well-known location the
    /// widget process can also reach, so it defaults to a subdirectory of the
    /// shared data dir rather than a per-process temp dir.
    pub cache_dir: PathBuf,
    /// Directory for the encrypted cross-process projection and its key file.
    pub shared_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub scheduler_tick_seconds: u64,
}

fn default_base_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sitepulse")
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let base = std::env::var("SITEPULSE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_base_dir());
        Ok(Self {
            cache_dir: std::env::var("SITEPULSE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| base.join("cache")),
            shared_dir: std::env::var("SITEPULSE_SHARED_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| base.join("shared")),
            request_timeout_secs: std::env::var("SITEPULSE_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|e| format!("invalid request timeout: {e}"))?,
            scheduler_tick_seconds: std::env::var("SITEPULSE_SCHEDULER_TICK_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|v| v.clamp(10, 3600))
                .unwrap_or(60),
            data_dir: base,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
