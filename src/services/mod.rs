pub mod review;
pub mod store;

pub use review::{ReviewProcessor, SubmitOutcome};
pub use store::{JsonFileStore, LearnerStore, MemoryStore};
