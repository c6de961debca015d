//! Thai Food Classifier Library
//!
//! Serves a single pre-trained image classifier over HTTP: uploaded images are
//! decoded, resized, normalized and ranked, with a confidence gate that marks
//! inputs outside the known dishes.

pub mod config;
pub mod metrics;
pub mod models;
pub mod preprocess;
pub mod server;
pub mod types;

pub use config::AppConfig;
pub use models::inference::{Classifier, InferenceEngine};
pub use preprocess::ImagePreprocessor;
pub use server::{router, AppState};
pub use types::prediction::{ClassScore, Prediction};
