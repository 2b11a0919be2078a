pub mod indexer;
pub use crate::base::indexer::{CommitSummary, IndexerDbManager, PendingResolution, ReferenceKind};
pub mod reader;
pub use crate::base::reader::ReaderDbManager;

#[async_trait::async_trait]
pub trait BaseDbManager {
    async fn new(config: &configuration::DatabaseConfig) -> anyhow::Result<Box<Self>>;
}
