pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const DEFAULT_DIFFICULTY: u32 = 3;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const DEFAULT_LEDGER_NAME: &str = "ledger-node";
pub const DEFAULT_GENESIS_IDENTITY: &str = "GENESIS";
/// Nonces handed to the parallel miner per round.
pub const MINE_BATCH_SIZE: u64 = 1 << 14;
