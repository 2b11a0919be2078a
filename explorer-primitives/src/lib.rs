pub mod chain;
mod msg_type;
pub mod records;

pub use chain::{BlockHeight, BlockView, Coin, Event, TxResponse, ValidatorSetEntry};
pub use records::*;
