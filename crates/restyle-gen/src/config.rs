use anyhow::{Context, Result};
use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for restyle.
///
/// Configuration is loaded from multiple sources with the following priority:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (RESTYLE_* prefix)
/// 3. Config file (~/.config/restyle/config.toml)
/// 4. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Replicate API token.
    ///
    /// Can be set via:
    /// - ENV: RESTYLE_REPLICATE_API_TOKEN
    /// - Config: replicate_api_token = "..."
    #[serde(default)]
    pub replicate_api_token: Option<String>,

    /// Base URL of the Replicate API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model used for style transfer, as `owner/name`.
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-request HTTP timeout in seconds. Generous because creation
    /// requests ask the provider to hold the connection until done.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub throttle: ThrottleConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub generation: GenerationParams,
}

/// Pacing of outbound calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum gap between two dispatches, in milliseconds.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Backoff after a 429 that carried no retry hint, in milliseconds.
    #[serde(default = "default_retry_after_ms")]
    pub default_retry_after_ms: u64,

    /// Give up on a call after this many rate-limit retries. Unset means
    /// retry for as long as the provider keeps answering 429.
    #[serde(default)]
    pub max_rate_limit_retries: Option<u32>,
}

impl ThrottleConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_millis(self.default_retry_after_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            default_retry_after_ms: default_retry_after_ms(),
            max_rate_limit_retries: None,
        }
    }
}

/// Cadence and budget for awaiting a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_poll_attempts(),
        }
    }
}

/// Model inputs sent alongside the image and prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default = "default_inference_steps")]
    pub num_inference_steps: u32,
    #[serde(default = "default_guidance")]
    pub guidance: f64,
    #[serde(default = "default_control_strength")]
    pub control_strength: f64,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_output_quality")]
    pub output_quality: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            num_inference_steps: default_inference_steps(),
            guidance: default_guidance(),
            control_strength: default_control_strength(),
            output_format: default_output_format(),
            output_quality: default_output_quality(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            replicate_api_token: None,
            api_base: default_api_base(),
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
            throttle: ThrottleConfig::default(),
            poll: PollConfig::default(),
            generation: GenerationParams::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Searches for config file at: ~/.config/restyle/config.toml
    /// Reads environment variables with RESTYLE_ prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        let mut builder = Confygery::new().context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("restyle");
        builder
            .add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder.build().context("Failed to build configuration")?;

        Ok(config)
    }

    /// Load configuration and override the API token.
    ///
    /// This is used when the --token CLI flag is provided.
    pub fn load_with_token(token: String) -> Result<Self> {
        let mut config = Self::load()?;
        config.replicate_api_token = Some(token);
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_base() -> String {
    "https://api.replicate.com".to_string()
}

fn default_model() -> String {
    "black-forest-labs/flux-depth-dev".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    120
}

const fn default_min_interval_ms() -> u64 {
    10_000
}

const fn default_retry_after_ms() -> u64 {
    10_000
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_poll_attempts() -> u32 {
    60
}

const fn default_inference_steps() -> u32 {
    24
}

const fn default_guidance() -> f64 {
    12.0
}

const fn default_control_strength() -> f64 {
    0.8
}

fn default_output_format() -> String {
    "jpg".to_string()
}

const fn default_output_quality() -> u32 {
    90
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/restyle/config.toml
/// - macOS: ~/Library/Application Support/restyle/config.toml
/// - Windows: %APPDATA%\restyle\config.toml
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("restyle")
        .join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# Restyle Configuration File
#
# Configuration is loaded from multiple sources with the following priority:
# 1. CLI arguments (highest priority)
# 2. Environment variables (RESTYLE_* prefix)
# 3. This config file
# 4. Built-in defaults (lowest priority)

# Replicate API token
#
# Create one at: https://replicate.com/account/api-tokens
#
# Can also be set via:
# - Environment: RESTYLE_REPLICATE_API_TOKEN=r8_...
# - Environment (CLI only): REPLICATE_API_TOKEN=r8_...
# - CLI: restyle --token r8_... transfer ...
#replicate_api_token = "r8_your-token-here"

# Model used for style transfer
#model = "black-forest-labs/flux-depth-dev"

# Seconds to wait for a single HTTP request
#request_timeout_secs = 120

[throttle]
# The provider allows 6 predictions per minute on low-credit accounts,
# so dispatches are spaced at least this far apart.
min_interval_ms = 10000
# Backoff after a 429 response that carries no retry_after hint
default_retry_after_ms = 10000
# Uncomment to give up after this many 429 responses for one call
#max_rate_limit_retries = 5

[poll]
interval_ms = 1000
max_attempts = 60

[generation]
num_inference_steps = 24
guidance = 12.0
control_strength = 0.8
output_format = "jpg"
output_quality = 90
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    let config_path = config_file_path();

    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    std::fs::write(&config_path, example_config()).context("Failed to write config file")?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.replicate_api_token.is_none());
        assert_eq!(config.model, "black-forest-labs/flux-depth-dev");
        assert_eq!(config.throttle.min_interval(), Duration::from_secs(10));
        assert_eq!(config.throttle.default_retry_after(), Duration::from_secs(10));
        assert!(config.throttle.max_rate_limit_retries.is_none());
        assert_eq!(config.poll.interval(), Duration::from_secs(1));
        assert_eq!(config.poll.max_attempts, 60);
    }

    #[test]
    fn test_default_generation_params() {
        let params = GenerationParams::default();
        assert_eq!(params.num_inference_steps, 24);
        assert!((params.guidance - 12.0).abs() < f64::EPSILON);
        assert!((params.control_strength - 0.8).abs() < f64::EPSILON);
        assert_eq!(params.output_format, "jpg");
        assert_eq!(params.output_quality, 90);
    }

    #[test]
    fn test_config_load() {
        // Should not fail even if config file doesn't exist
        let result = Config::load();
        assert!(result.is_ok());
    }

    #[test]
    fn test_config_with_token() {
        let config = Config::load_with_token("r8_test".to_string()).unwrap();
        assert_eq!(config.replicate_api_token.as_deref(), Some("r8_test"));
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"throttle": {"min_interval_ms": 2500}, "poll": {"max_attempts": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.throttle.min_interval_ms, 2500);
        assert_eq!(config.throttle.default_retry_after_ms, 10_000);
        assert_eq!(config.poll.max_attempts, 5);
        assert_eq!(config.poll.interval_ms, 1_000);
        assert_eq!(config.api_base, "https://api.replicate.com");
    }
}
