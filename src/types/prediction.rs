//! Prediction response data structures

use serde::Serialize;

/// One class and its probability
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassScore {
    /// Class label
    #[serde(rename = "class")]
    pub label: String,

    /// Probability assigned by the model (0.0 - 1.0)
    pub confidence: f64,
}

/// Ranked, thresholded result of classifying one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Winning label, `None` when the image is outside the knowledge base
    pub prediction: Option<String>,

    /// Highest probability in the output vector
    pub confidence: f64,

    /// True when `confidence` fell below the detection threshold
    pub not_in_database: bool,

    /// Best-ranked classes, highest confidence first
    pub all_predictions: Vec<ClassScore>,

    /// Human-readable note, only set for unknown inputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Prediction {
    /// A confident prediction of `label`
    pub fn known(label: String, confidence: f64, ranked: Vec<ClassScore>) -> Self {
        Self {
            prediction: Some(label),
            confidence,
            not_in_database: false,
            all_predictions: ranked,
            message: None,
        }
    }

    /// An input whose best class did not clear the threshold
    pub fn unknown(confidence: f64, ranked: Vec<ClassScore>, message: String) -> Self {
        Self {
            prediction: None,
            confidence,
            not_in_database: true,
            all_predictions: ranked,
            message: Some(message),
        }
    }
}
