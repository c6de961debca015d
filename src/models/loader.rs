//! ONNX model and label loader

use crate::config::ModelConfig;
use anyhow::{anyhow, Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// File name of the alternate export inside the exported directory
pub const EXPORTED_MODEL_FILE: &str = "model.onnx";

/// Named ways of producing a session, tried in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Primary artifact, fully optimized
    Primary,
    /// Primary artifact with graph optimizations disabled
    Compat,
    /// Alternate export next to the primary artifact
    Exported,
}

impl LoadStrategy {
    pub const ALL: [LoadStrategy; 3] = [Self::Primary, Self::Compat, Self::Exported];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Compat => "compat",
            Self::Exported => "exported",
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A strategy that was tried and failed
#[derive(Debug, Clone)]
pub struct LoadAttempt {
    pub strategy: LoadStrategy,
    pub error: String,
}

fn describe_attempts(attempts: &[LoadAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.strategy, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Fatal startup errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model load via `{strategy}` failed: {message}")]
    Unrecognized {
        strategy: LoadStrategy,
        message: String,
    },

    #[error("all model load strategies failed ({})", describe_attempts(.attempts))]
    Exhausted { attempts: Vec<LoadAttempt> },

    #[error("label list has {labels} entries but the model outputs {outputs} classes")]
    LabelMismatch { labels: usize, outputs: usize },
}

/// Loaded ONNX model with metadata
pub struct LoadedModel {
    /// Strategy that produced the session
    pub strategy: LoadStrategy,
    /// File the session was built from
    pub path: PathBuf,
    /// ONNX Runtime session
    pub session: Session,
    /// Input name for the model
    pub input_name: String,
    /// Output name for probabilities
    pub output_name: String,
    /// Declared input shape, `-1` for dynamic axes
    pub input_shape: Option<Vec<i64>>,
    /// Declared output shape, `-1` for dynamic axes
    pub output_shape: Option<Vec<i64>>,
}

impl LoadedModel {
    /// Number of classes, if the model declares a static width
    pub fn output_width(&self) -> Option<usize> {
        static_width(self.output_shape.as_deref())
    }
}

pub(crate) fn static_width(shape: Option<&[i64]>) -> Option<usize> {
    shape
        .and_then(|dims| dims.last().copied())
        .filter(|&d| d > 0)
        .map(|d| d as usize)
}

/// Loader for the classifier artifact
pub struct ModelLoader {
    model_path: PathBuf,
    exported_dir: PathBuf,
    /// Number of threads for ONNX inference
    onnx_threads: usize,
    legacy_markers: Vec<String>,
}

impl ModelLoader {
    /// Create a loader from model configuration
    pub fn new(config: &ModelConfig) -> Result<Self> {
        ort::init().commit()?;
        info!(onnx_threads = config.onnx_threads, "ONNX Runtime initialized");
        Ok(Self::without_runtime(config))
    }

    fn without_runtime(config: &ModelConfig) -> Self {
        Self {
            model_path: config.model_file(),
            exported_dir: config.exported_dir(),
            onnx_threads: config.onnx_threads,
            legacy_markers: config.legacy_markers.clone(),
        }
    }

    /// Whether a primary load failure looks like a serialization-format mismatch
    pub fn is_legacy_format_error(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.legacy_markers
            .iter()
            .any(|marker| message.contains(&marker.to_lowercase()))
    }

    /// Load the classifier, falling back through the compatibility strategies
    pub fn load_model(&self) -> Result<LoadedModel, LoadError> {
        let model = self.run_strategies(|strategy| self.try_strategy(strategy))?;

        info!(
            strategy = %model.strategy,
            path = %model.path.display(),
            input = %model.input_name,
            output = %model.output_name,
            input_shape = ?model.input_shape,
            output_shape = ?model.output_shape,
            "Model loaded successfully"
        );

        Ok(model)
    }

    /// Drive the strategy chain with `attempt`.
    ///
    /// Only a primary failure recognized as a legacy-format error enables the
    /// fallbacks; anything else is returned immediately.
    fn run_strategies<T>(
        &self,
        mut attempt: impl FnMut(LoadStrategy) -> Result<T>,
    ) -> Result<T, LoadError> {
        let mut attempts = Vec::new();

        for strategy in LoadStrategy::ALL {
            match attempt(strategy) {
                Ok(loaded) => return Ok(loaded),
                Err(e) => {
                    let message = format!("{:#}", e);
                    if strategy == LoadStrategy::Primary {
                        if !self.is_legacy_format_error(&message) {
                            return Err(LoadError::Unrecognized { strategy, message });
                        }
                        warn!(error = %message, "Detected legacy model format, trying compatibility strategies");
                    } else {
                        warn!(strategy = %strategy, error = %message, "Model load strategy failed");
                    }
                    attempts.push(LoadAttempt {
                        strategy,
                        error: message,
                    });
                }
            }
        }

        Err(LoadError::Exhausted { attempts })
    }

    fn try_strategy(&self, strategy: LoadStrategy) -> Result<LoadedModel> {
        match strategy {
            LoadStrategy::Primary => {
                self.build(strategy, &self.model_path, GraphOptimizationLevel::Level3)
            }
            LoadStrategy::Compat => {
                self.build(strategy, &self.model_path, GraphOptimizationLevel::Disable)
            }
            LoadStrategy::Exported => {
                if !self.exported_dir.is_dir() {
                    return Err(anyhow!(
                        "exported model directory {} not found",
                        self.exported_dir.display()
                    ));
                }
                let path = self.exported_dir.join(EXPORTED_MODEL_FILE);
                info!(path = %path.display(), "Trying exported model");
                self.build(strategy, &path, GraphOptimizationLevel::Level3)
            }
        }
    }

    fn build(
        &self,
        strategy: LoadStrategy,
        path: &Path,
        level: GraphOptimizationLevel,
    ) -> Result<LoadedModel> {
        info!(strategy = %strategy, path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(level)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| anyhow!("model declares no inputs"))?;
        let input_name = input.name.clone();
        let input_shape = input
            .input_type
            .tensor_shape()
            .map(|s| s.iter().copied().collect());

        let output = session
            .outputs
            .first()
            .ok_or_else(|| anyhow!("model declares no outputs"))?;
        let output_name = output.name.clone();
        let output_shape = output
            .output_type
            .tensor_shape()
            .map(|s| s.iter().copied().collect());

        Ok(LoadedModel {
            strategy,
            path: path.to_path_buf(),
            session,
            input_name,
            output_name,
            input_shape,
            output_shape,
        })
    }
}

/// Load the ordered class names from a JSON array file
pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels from {}", path.display()))?;
    let labels: Vec<String> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse labels in {}", path.display()))?;

    if labels.is_empty() {
        anyhow::bail!("Label list {} is empty", path.display());
    }

    info!(count = labels.len(), path = %path.display(), "Labels loaded");
    Ok(labels)
}

/// Fail fast when the label count and the model's class count disagree
pub fn check_label_width(labels: usize, outputs: Option<usize>) -> Result<(), LoadError> {
    match outputs {
        Some(outputs) if outputs != labels => Err(LoadError::LabelMismatch { labels, outputs }),
        Some(_) => Ok(()),
        None => {
            warn!(labels, "Model output width is dynamic, label count checked per request");
            Ok(())
        }
    }
}
