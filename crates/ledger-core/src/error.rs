use crate::constants::HASH_HEX_SIZE;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("transaction cannot be empty")]
    EmptyTransaction,
    #[error("no pending transactions to put in a block")]
    EmptyPool,
    #[error("missing search query")]
    EmptyQuery,
    /// The block was built against a tip or pool that has since moved on.
    #[error("block {index} no longer extends the chain tip")]
    StaleBlock { index: u64 },
    #[error("block {index} failed validation: {reason}")]
    InvalidBlock { index: u64, reason: &'static str },
    #[error("mining was cancelled")]
    Cancelled,
    #[error("nonce space exhausted for block {index}")]
    NonceExhausted { index: u64 },
    /// No hash has more leading zero digits than it has hex digits.
    #[error("difficulty {difficulty} exceeds the {} hex digits of a block hash", HASH_HEX_SIZE)]
    InvalidDifficulty { difficulty: u32 },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
