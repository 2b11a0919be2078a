#[macro_use]
extern crate lazy_static;

pub use block_indexer::{BlockIndexer, IndexError, IndexOptions, IndexOutcome};
pub use chain_client::{ChainError, ChainReader, GrpcGatewayClient};
pub use retry_ledger::RedriveSummary;
pub use scheduler::{Scheduler, SchedulerState, TickMode, TickSummary};

mod block_indexer;
mod chain_client;
mod enrichment;
pub mod extractors;
pub mod metrics;
pub mod msg_types;
mod processor;
mod retry_ledger;
mod scheduler;
#[cfg(test)]
mod test_support;

// Targets for tracing logs
pub const INDEXER: &str = "block_indexer";
pub const CHAIN_CLIENT: &str = "chain_client";
