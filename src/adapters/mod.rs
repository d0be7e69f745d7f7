// Adapters layer: concrete store implementations behind the domain ports.

pub mod dynamodb;
pub mod local;
pub mod memory;

#[cfg(feature = "dynamodb")]
pub use dynamodb::DynamoStore;
pub use local::LocalTableStore;
pub use memory::MemoryStore;
