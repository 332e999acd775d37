//! Configuration management with serde serialization/deserialization
//!
//! Settings are layered: built-in defaults, then an optional JSON file, then
//! environment variables (a `.env` file is honored by the binary), then
//! command-line flags.

use crate::{EngineCapabilities, RenderError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Desktop Chrome user agent sent by every engine unless overridden
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_2) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/70.0.3538.110 Safari/537.36";

/// Main configuration structure for the render pool
///
/// # Examples
///
/// ```rust
/// use render_pool::Config;
///
/// let config = Config {
///     pool_size: 4,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of engine instances kept in the pool, which is also the number
    /// of jobs dispatched concurrently (default: 10)
    pub pool_size: usize,

    /// Engine window size; captures keep the width and grow the height to
    /// the document (default: 1024x768)
    pub viewport: Viewport,

    /// User agent every engine presents
    pub user_agent: String,

    /// Deadline for a job's page to settle when the job sets none
    /// (default: 5000 ms)
    #[serde(with = "millis")]
    pub job_timeout: Duration,

    /// Process-wide proxy rule, used by jobs that do not set their own
    pub proxy_rules: Option<String>,

    /// Capabilities engines are created with when a job asks for nothing
    /// specific
    pub default_capabilities: EngineCapabilities,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Run engines without a visible window (default: true)
    pub headless: bool,

    /// Request layer settings
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 10,
            viewport: Viewport::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            job_timeout: Duration::from_millis(5000),
            proxy_rules: None,
            default_capabilities: EngineCapabilities::default(),
            chrome_path: None,
            headless: true,
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load a JSON configuration file; missing fields keep their defaults.
    pub async fn from_file(path: &std::path::Path) -> Result<Self, RenderError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), RenderError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Recognized variables: `CONCURRENCY`, `WINDOW_WIDTH`, `WINDOW_HEIGHT`,
    /// `USER_AGENT`, `TIMEOUT` (ms), `PROXY_RULES`, `CHROME_PATH`,
    /// `DEVELOPMENT`, `HOSTNAME`, `PORT`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), RenderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = var("CONCURRENCY") {
            self.pool_size = parse_var("CONCURRENCY", &value)?;
        }
        if let Some(value) = var("WINDOW_WIDTH") {
            self.viewport.width = parse_var("WINDOW_WIDTH", &value)?;
        }
        if let Some(value) = var("WINDOW_HEIGHT") {
            self.viewport.height = parse_var("WINDOW_HEIGHT", &value)?;
        }
        if let Some(value) = var("USER_AGENT") {
            self.user_agent = value;
        }
        if let Some(value) = var("TIMEOUT") {
            self.job_timeout = Duration::from_millis(parse_var("TIMEOUT", &value)?);
        }
        if let Some(value) = var("PROXY_RULES") {
            self.proxy_rules = Some(value);
        }
        if let Some(value) = var("CHROME_PATH") {
            self.chrome_path = Some(value);
        }
        if let Some(value) = var("DEVELOPMENT") {
            self.headless = !matches!(value.as_str(), "1" | "true" | "yes");
        }
        if let Some(value) = var("HOSTNAME") {
            self.server.host = value;
        }
        if let Some(value) = var("PORT") {
            self.server.port = parse_var("PORT", &value)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.pool_size == 0 {
            return Err(RenderError::Configuration(
                "Pool size must be greater than 0".to_string(),
            ));
        }

        if self.job_timeout.is_zero() {
            return Err(RenderError::Configuration(
                "Job timeout must be greater than 0".to_string(),
            ));
        }

        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(RenderError::Configuration(
                "Viewport dimensions must be greater than 0".to_string(),
            ));
        }

        if self.user_agent.trim().is_empty() {
            return Err(RenderError::Configuration(
                "User agent must not be empty".to_string(),
            ));
        }

        let cores = num_cpus::get();
        if self.pool_size > cores * 4 {
            warn!(
                "Pool size {} is large for {} CPU cores; engines may starve each other",
                self.pool_size, cores
            );
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, RenderError> {
    value
        .trim()
        .parse()
        .map_err(|_| RenderError::Configuration(format!("{key} has an invalid value: {value}")))
}

/// Engine window size in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Serve Prometheus metrics on `/metrics`
    pub metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            metrics: true,
        }
    }
}

/// Durations as integer milliseconds on the wire
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
