use crate::{
    chain::{Ledger, LedgerConfig, SearchHit},
    mine::{CancelToken, MiningStrategy},
    Block, LedgerError, Result,
};
use parking_lot::Mutex;
use std::{sync::Arc, time::Instant};
use tracing::{debug, info};

/// Cloneable handle to one ledger. Every operation takes the same exclusive
/// lock, so callers on different threads see a single serial history.
#[derive(Clone, Debug)]
pub struct SharedLedger {
    inner: Arc<Mutex<Ledger>>,
    strategy: MiningStrategy,
}

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
            strategy: MiningStrategy::default(),
        }
    }

    pub fn from_config(config: LedgerConfig) -> Result<Self> {
        Ok(Self::new(Ledger::new(config)?))
    }

    /// Miner used by [`SharedLedger::mine_optimistic`].
    pub fn with_strategy(mut self, strategy: MiningStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> MiningStrategy {
        self.strategy
    }

    /// Runs `f` against the ledger while holding the lock.
    pub fn read<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Adds a transaction and returns the pool as it stands afterwards.
    pub fn add_transaction(&self, tx: &str) -> Result<Vec<String>> {
        let mut ledger = self.inner.lock();
        ledger.add_transaction(tx)?;
        Ok(ledger.pending_transactions().to_vec())
    }

    pub fn chain(&self) -> Vec<Block> {
        self.read(|l| l.chain().to_vec())
    }

    pub fn pending_transactions(&self) -> Vec<String> {
        self.read(|l| l.pending_transactions().to_vec())
    }

    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.read(|l| l.search(query))
    }

    pub fn difficulty(&self) -> u32 {
        self.read(Ledger::difficulty)
    }

    /// Copy of the full ledger state.
    pub fn snapshot(&self) -> Ledger {
        self.read(Ledger::clone)
    }

    /// Mines the next block with the lock held for the whole search. Other
    /// callers, readers included, wait until the block is appended.
    pub fn mine_next_block(&self) -> Result<Block> {
        self.inner.lock().mine_next_block()
    }

    /// Mines without holding the lock. The candidate is built under a short
    /// lock, searched for unlocked, then committed under the lock again. If
    /// another block landed in the meantime the candidate is rebuilt from the
    /// new tip and pool and the search starts over.
    ///
    /// On cancellation nothing is committed and the pool is left as it was.
    pub fn mine_optimistic(&self, cancel: &CancelToken) -> Result<Block> {
        loop {
            let (candidate, difficulty) = {
                let ledger = self.inner.lock();
                (ledger.build_next_block()?, ledger.difficulty())
            };
            let index = candidate.index();
            let start = Instant::now();
            let mined = self.strategy.run(candidate, difficulty, cancel).into_result()?;

            let mut ledger = self.inner.lock();
            match ledger.commit(mined) {
                Ok(block) => {
                    info!(
                        "Mined block {} with difficulty {difficulty} in {:?}, nonce {} hash {}",
                        block.index(),
                        start.elapsed(),
                        block.nonce(),
                        block.hash()
                    );
                    return Ok(block.clone());
                }
                Err(LedgerError::StaleBlock { .. }) => {
                    debug!("block {index} went stale while mining, rebuilding");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl From<Ledger> for SharedLedger {
    fn from(ledger: Ledger) -> Self {
        Self::new(ledger)
    }
}
