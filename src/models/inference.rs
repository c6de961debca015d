//! Image classification inference engine

use crate::config::{AppConfig, DetectionConfig};
use crate::models::loader::{self, LoadedModel, ModelLoader};
use crate::preprocess::{ImagePreprocessor, ImageTensor};
use crate::types::prediction::{ClassScore, Prediction};
use anyhow::{anyhow, bail, Context, Result};
use image::ImageError;
use ort::value::Tensor;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

/// Anything that maps a preprocessed frame to a probability vector
pub trait Classifier: Send + Sync {
    /// Run one forward pass and return the class probabilities
    fn classify(&self, input: &ImageTensor) -> Result<Vec<f32>>;

    /// Number of classes, if known before the first inference
    fn output_width(&self) -> Option<usize>;
}

/// ONNX Runtime backed classifier
pub struct OnnxClassifier {
    /// `Session::run` needs exclusive access
    model: Mutex<LoadedModel>,
    output_width: Option<usize>,
}

impl OnnxClassifier {
    pub fn new(model: LoadedModel) -> Self {
        let output_width = model.output_width();
        Self {
            model: Mutex::new(model),
            output_width,
        }
    }
}

impl Classifier for OnnxClassifier {
    fn classify(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let shape = input.batch_shape().to_vec();
        let input_tensor = Tensor::from_array((shape, input.data.clone()))
            .context("Failed to create input tensor")?;

        let mut model = self
            .model
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        let model = &mut *model;

        let outputs = model
            .session
            .run(ort::inputs![model.input_name.as_str() => input_tensor])?;

        let output = outputs
            .get(model.output_name.as_str())
            .ok_or_else(|| anyhow!("Model produced no `{}` output", model.output_name))?;
        let (_, probabilities) = output
            .try_extract_tensor::<f32>()
            .context("Model output is not an f32 tensor")?;

        Ok(probabilities.to_vec())
    }

    fn output_width(&self) -> Option<usize> {
        self.output_width
    }
}

/// Why a single prediction failed
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] ImageError),

    #[error(transparent)]
    Inference(#[from] anyhow::Error),
}

/// Classifies uploaded images and applies the unknown-input gate
pub struct InferenceEngine {
    classifier: Arc<dyn Classifier>,
    labels: Vec<String>,
    preprocessor: ImagePreprocessor,
    detection: DetectionConfig,
}

impl InferenceEngine {
    /// Load the model and labels described by the configuration
    pub fn new(config: &AppConfig) -> Result<Self> {
        let loader = ModelLoader::new(&config.model)?;
        let model = loader.load_model()?;
        let labels = loader::load_labels(config.model.labels_file())?;

        Self::with_classifier(
            Arc::new(OnnxClassifier::new(model)),
            labels,
            ImagePreprocessor::new(config.model.input_size),
            config.detection.clone(),
        )
    }

    /// Assemble an engine around an already loaded classifier
    pub fn with_classifier(
        classifier: Arc<dyn Classifier>,
        labels: Vec<String>,
        preprocessor: ImagePreprocessor,
        detection: DetectionConfig,
    ) -> Result<Self> {
        loader::check_label_width(labels.len(), classifier.output_width())?;

        info!(
            classes = labels.len(),
            input_size = preprocessor.input_size(),
            threshold = detection.threshold,
            top_k = detection.top_k,
            "Inference engine initialized"
        );

        Ok(Self {
            classifier,
            labels,
            preprocessor,
            detection,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Decode, preprocess, classify and rank one uploaded image
    pub fn predict(&self, image_bytes: &[u8]) -> Result<Prediction, PredictError> {
        let input = self.preprocessor.process(image_bytes)?;
        let probabilities = self.classifier.classify(&input)?;
        Ok(self.rank(&probabilities)?)
    }

    /// Turn a probability vector into the thresholded, ranked response
    pub fn rank(&self, probabilities: &[f32]) -> Result<Prediction> {
        if probabilities.len() != self.labels.len() {
            bail!(
                "model returned {} probabilities for {} labels",
                probabilities.len(),
                self.labels.len()
            );
        }

        let (best_index, best) = argmax(probabilities)
            .ok_or_else(|| anyhow!("model returned an empty probability vector"))?;

        debug!(
            probabilities = ?probabilities,
            predicted_index = best_index,
            predicted_probability = best,
            "Raw model output"
        );

        let mut ranked: Vec<ClassScore> = self
            .labels
            .iter()
            .zip(probabilities)
            .map(|(label, &p)| ClassScore {
                label: label.clone(),
                confidence: p as f64,
            })
            .collect();
        // Stable sort, equal confidences keep class-index order
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        ranked.truncate(self.detection.top_k);

        if best < self.detection.threshold {
            return Ok(Prediction::unknown(
                best as f64,
                ranked,
                self.detection.not_found_message.clone(),
            ));
        }

        Ok(Prediction::known(
            self.labels[best_index].clone(),
            best as f64,
            ranked,
        ))
    }
}

/// Index and value of the first maximum
fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
}
