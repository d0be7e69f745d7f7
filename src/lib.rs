pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{lambda::LambdaConfig, PipelineConfig};

#[cfg(feature = "dynamodb")]
pub use adapters::DynamoStore;
pub use adapters::{LocalTableStore, MemoryStore};

pub use core::{etl::EtlEngine, transform::DataEntryTransformer, RunOutcome, RunSummary};
pub use utils::error::{EtlError, Result};
