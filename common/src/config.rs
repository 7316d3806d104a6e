use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub differ: DifferConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Frame source URL: an MJPEG stream or a single-frame endpoint.
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

/// Adaptive capture pacing. The delay is clamped to [min, max] and adjusted
/// by one step after every frame evaluation: down on change, up on stasis.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_delay_step_ms")]
    pub delay_step_ms: u64,
    /// Hard session cap in seconds; 0 means run until stopped.
    #[serde(default)]
    pub max_duration_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_size_threshold")]
    pub size_threshold: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DifferConfig {
    #[serde(default = "default_hash_size")]
    pub hash_size: u32,
    /// Hamming distance above which two visual fingerprints count as
    /// different. 0 means any differing bit is a change.
    #[serde(default)]
    pub distance_threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Falls back to the OPENAI_API_KEY environment variable when empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_describe_prompt")]
    pub describe_prompt: String,
    #[serde(default = "default_summarize_prompt")]
    pub summarize_prompt: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            delay_step_ms: default_delay_step_ms(),
            max_duration_secs: 0,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size_threshold: default_size_threshold(),
            flush_interval_ms: default_flush_interval_ms(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for DifferConfig {
    fn default() -> Self {
        Self {
            hash_size: default_hash_size(),
            distance_threshold: 0,
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            model: default_model(),
            describe_prompt: default_describe_prompt(),
            summarize_prompt: default_summarize_prompt(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_min_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    2000
}
fn default_delay_step_ms() -> u64 {
    100
}
fn default_size_threshold() -> usize {
    5
}
fn default_flush_interval_ms() -> u64 {
    5000
}
fn default_concurrency() -> usize {
    3
}
fn default_hash_size() -> u32 {
    8
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_describe_prompt() -> String {
    "Describe what is visible in this screen capture in two or three \
     sentences. Focus on application content and visible activity."
        .into()
}
fn default_summarize_prompt() -> String {
    "The following are chronological descriptions of screen captures from \
     one session. Write a short coherent summary of what happened."
        .into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}
