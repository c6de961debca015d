//! Configuration management for the classification service

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location of the optional configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable that points at an alternate configuration file
pub const CONFIG_PATH_ENV: &str = "THAI_FOOD_CONFIG";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub detection: DetectionConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Listen port (overridden by `PORT`)
    pub port: u16,
    /// Maximum accepted request body in bytes
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            body_limit_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Model artifact configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory that relative paths below are resolved against
    pub base_dir: String,
    /// Primary ONNX artifact
    pub model_path: String,
    /// Directory holding the alternate export (`model.onnx`)
    pub exported_dir: String,
    /// JSON array of class names, ordered by output index
    pub labels_path: String,
    /// Square input edge expected by the network
    pub input_size: u32,
    /// Number of intra-op threads for ONNX Runtime
    pub onnx_threads: usize,
    /// Error fragments that mark a primary load failure as a legacy-format problem
    pub legacy_markers: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_dir: ".".to_string(),
            model_path: "thai_food_model.onnx".to_string(),
            exported_dir: "exported/savedmodel".to_string(),
            labels_path: "exported/labels.json".to_string(),
            input_size: 128,
            onnx_threads: 1,
            legacy_markers: default_legacy_markers(),
        }
    }
}

fn default_legacy_markers() -> Vec<String> {
    ["Unrecognized keyword arguments", "batch_shape", "IR version", "opset"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl ModelConfig {
    /// Resolve a configured path against `base_dir` unless it is absolute
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.base_dir).join(path)
        }
    }

    pub fn model_file(&self) -> PathBuf {
        self.resolve(&self.model_path)
    }

    pub fn exported_dir(&self) -> PathBuf {
        self.resolve(&self.exported_dir)
    }

    pub fn labels_file(&self) -> PathBuf {
        self.resolve(&self.labels_path)
    }
}

/// Detection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum top confidence for a prediction to count as known
    pub threshold: f32,
    /// Number of ranked classes returned to the caller
    pub top_k: usize,
    /// Message attached to responses below the threshold
    pub not_found_message: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            top_k: 5,
            not_found_message: "ไม่พบอาหารนี้ในฐานความรู้".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between summary log lines, 0 disables the reporter
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file (if present) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path, layered with environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("THAI_FOOD")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option("server.port", std::env::var("PORT").ok())
            .context("Failed to apply PORT override")?
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            bail!(
                "detection.threshold must be within [0, 1], got {}",
                self.detection.threshold
            );
        }
        if self.detection.top_k == 0 {
            bail!("detection.top_k must be at least 1");
        }
        if self.model.input_size == 0 {
            bail!("model.input_size must be at least 1");
        }
        if self.model.onnx_threads == 0 {
            bail!("model.onnx_threads must be at least 1");
        }
        Ok(())
    }
}
