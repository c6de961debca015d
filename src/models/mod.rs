//! Model loading and inference components

pub mod inference;
pub mod loader;

pub use inference::{Classifier, InferenceEngine, OnnxClassifier};
pub use loader::ModelLoader;
