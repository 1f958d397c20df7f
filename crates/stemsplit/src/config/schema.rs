use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 200 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_jobs_directory")]
    pub jobs_directory: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub separation: SeparationConfig,
}

fn default_bind_address() -> String {
    "127.0.0.1:5000".to_string()
}

/// `<data_local_dir>/stemsplit/jobs`, or `./jobs` when the platform has no
/// data directory.
pub fn default_jobs_directory() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("stemsplit").join("jobs"))
        .unwrap_or_else(|| PathBuf::from("jobs"))
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            bind_address: default_bind_address(),
            jobs_directory: default_jobs_directory(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            logging: LoggingConfig::default(),
            retention: RetentionConfig::default(),
            normalizer: NormalizerConfig::default(),
            separation: SeparationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl RetentionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Decoder used when the built-in decoders cannot open a file.
    /// `null` disables the fallback.
    #[serde(default = "default_external_decoder")]
    pub external_decoder: Option<String>,
}

fn default_external_decoder() -> Option<String> {
    Some("ffmpeg".to_string())
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            external_decoder: default_external_decoder(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_program_args")]
    pub program_args: Vec<String>,
    #[serde(default = "default_env")]
    pub env: HashMap<String, String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Wall-clock limit for one run; `0` disables it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default)]
    pub keep_intermediates: bool,
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_program_args() -> Vec<String> {
    vec!["-m".to_string(), "demucs.separate".to_string()]
}

fn default_env() -> HashMap<String, String> {
    HashMap::from([("TORCHAUDIO_BACKEND".to_string(), "soundfile".to_string())])
}

fn default_max_concurrent() -> usize {
    num_cpus::get()
}

fn default_timeout_secs() -> u64 {
    2 * 60 * 60
}

fn default_grace_period_ms() -> u64 {
    3000
}

fn default_progress_interval_ms() -> u64 {
    1000
}

impl SeparationConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            program_args: default_program_args(),
            env: default_env(),
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
            grace_period_ms: default_grace_period_ms(),
            progress_interval_ms: default_progress_interval_ms(),
            keep_intermediates: false,
        }
    }
}
