pub mod baseline;
pub mod comparison;
pub mod features;
pub mod learned;
pub mod orchestrator;
pub mod sequence;
pub mod types;

pub use baseline::{compute_baseline, BaselineOutcome, BaselinePredictor};
pub use comparison::{ComparisonOptions, ComparisonReport};
pub use features::{Clock, FeatureExtractor, FeatureVector, FEATURE_DIM};
pub use learned::{FileModelLoader, LearnedPredictor, ModelLoader, ModelRef, ModelRegistry};
pub use orchestrator::{AlgorithmOrchestrator, Resolution};
pub use sequence::ItemSequence;
pub use types::*;
