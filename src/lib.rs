pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod progress;
pub mod refiner;
pub mod report;
pub mod scanner;
pub mod signature;
pub mod storage;

pub use config::AppConfig;
pub use engine::{DedupeEngine, RunSummary};
pub use error::{Error, LoadError};
pub use progress::{ProgressReporter, SilentReporter};
