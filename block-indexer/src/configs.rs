pub use clap::{Parser, Subcommand};

/// Provenance block and transaction indexer for the explorer
/// Walks the chain through the gRPC-gateway and keeps the explorer database up to date
#[derive(Parser, Debug)]
#[clap(version, author, about, disable_help_subcommand = true, propagate_version = true, next_line_help = true)]
pub(crate) struct Opts {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Serve metrics and tick until the process is stopped
    Run,
    /// Run a single tick and exit
    Tick,
    /// Re-index one block even if it is already stored. The watermark is not moved.
    ForceRerun {
        height: u64,
        /// Take the transactions from the stored responses instead of the chain node
        #[clap(long)]
        from_db: bool,
    },
    /// One pass over the retry ledger
    RedriveRetries {
        #[clap(long, default_value = "50")]
        limit: u64,
    },
    /// Print the watermark and the head of the retry queue
    Status {
        #[clap(long, default_value = "20")]
        limit: u64,
    },
}
