pub mod config;
pub mod error;
pub mod logging;
pub mod scheduling;
pub mod services;

pub use config::{BaselineParams, SchedulerConfig};
pub use error::{SchedulerError, SchedulerResult};
pub use services::{ReviewProcessor, SubmitOutcome};
