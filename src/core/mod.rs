pub mod batcher;
pub mod dispatcher;
pub mod etl;
pub mod pagination;
pub mod transform;
pub mod writer;

pub use crate::domain::model::{
    Batch, BatchError, BatchErrorKind, BatchFailure, BatchLog, BatchWriteOutcome,
    ContinuationToken, Item, ItemFailure, KeySchema, Page, Record, RunOutcome, RunSummary,
    WriteResult,
};
pub use crate::domain::ports::{DestinationStore, SourceStore, Transformer};
pub use crate::utils::error::Result;
