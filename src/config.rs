use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub polling: PollingConfig,
    pub output: OutputConfig,
    pub emulator: EmulatorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub interval_secs: u64,
    /// No deadline when unset
    pub timeout_secs: Option<u64>,
    pub backoff: BackoffMode,
    pub max_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffMode {
    Fixed,
    Exponential,
}

impl FromStr for BackoffMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffMode::Fixed),
            "exponential" => Ok(BackoffMode::Exponential),
            other => anyhow::bail!("unknown backoff mode {:?} (expected fixed or exponential)", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub result_dir: PathBuf,
}

/// Parameters shared by every emulated request.
#[derive(Debug, Clone, Deserialize)]
pub struct EmulatorConfig {
    pub image_path: PathBuf,
    pub model_name: String,
    pub quantization: String,
    pub base_user_id: u64,
    pub requests: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            server: ServerConfig {
                base_url: var("CIANNA_SERVER_URL", "http://127.0.0.1:3000")
                    .trim_end_matches('/')
                    .to_string(),
                request_timeout_secs: var("REQUEST_TIMEOUT_SECS", "300")
                    .parse()
                    .context("REQUEST_TIMEOUT_SECS must be an integer")?,
            },
            polling: PollingConfig {
                interval_secs: var("POLL_INTERVAL_SECS", "5")
                    .parse()
                    .context("POLL_INTERVAL_SECS must be an integer")?,
                timeout_secs: lookup("POLL_TIMEOUT_SECS")
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| v.trim().parse::<u64>())
                    .transpose()
                    .context("POLL_TIMEOUT_SECS must be an integer")?,
                backoff: var("POLL_BACKOFF", "fixed").parse()?,
                max_interval_secs: var("POLL_MAX_INTERVAL_SECS", "60")
                    .parse()
                    .context("POLL_MAX_INTERVAL_SECS must be an integer")?,
            },
            output: OutputConfig {
                result_dir: PathBuf::from(var("RESULT_DIR", ".")),
            },
            emulator: EmulatorConfig {
                image_path: PathBuf::from(var("IMAGE_PATH", "images/RACS-DR1_0000+12A.fits")),
                model_name: var("YOLO_MODEL", "net0_s1800.dat"),
                quantization: var("QUANTIZATION", "FP32C_FP32A"),
                base_user_id: var("BASE_USER_ID", "2443423")
                    .parse()
                    .context("BASE_USER_ID must be an integer")?,
                requests: var("NB_REQUESTS", "1")
                    .parse()
                    .context("NB_REQUESTS must be an integer")?,
            },
            logging: LoggingConfig {
                log_dir: lookup("LOG_DIR").filter(|v| !v.is_empty()).map(PathBuf::from),
            },
        })
    }
}
