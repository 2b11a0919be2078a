#[macro_use]
extern crate lazy_static;

mod base;
mod metrics;

// Category for logging
pub const DATABASE: &str = "database";

pub use crate::base::{
    BaseDbManager, CommitSummary, IndexerDbManager, PendingResolution, ReaderDbManager,
    ReferenceKind,
};

pub mod memory;
pub use crate::memory::MemoryDbManager;

#[cfg(feature = "postgres_db")]
pub mod postgres;
#[cfg(feature = "postgres_db")]
pub use crate::postgres::PostgresDBManager;

pub async fn prepare_db_manager<T>(config: &configuration::DatabaseConfig) -> anyhow::Result<T>
where
    T: BaseDbManager + Send + Sync + 'static,
{
    Ok(*T::new(config).await?)
}
