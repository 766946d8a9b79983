use crate::{
    constants::{
        DEFAULT_DIFFICULTY, DEFAULT_GENESIS_IDENTITY, DEFAULT_LEDGER_NAME, GENESIS_PREVIOUS_HASH,
        HASH_HEX_SIZE,
    },
    pow::{self, has_leading_zeros},
    Block, CandidateBlock, LedgerError, Result,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Label reported alongside the chain.
    pub name: String,
    /// Sole transaction of the genesis block.
    pub identity: String,
    /// Leading zero hex digits required of every block hash. `0` selects the default.
    pub difficulty: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_LEDGER_NAME.to_string(),
            identity: DEFAULT_GENESIS_IDENTITY.to_string(),
            difficulty: DEFAULT_DIFFICULTY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub block_index: u64,
    pub transaction: String,
}

/// In-memory chain plus the pool of transactions waiting for a block.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    name: String,
    chain: Vec<Block>,
    pending_transactions: Vec<String>,
    difficulty: u32,
}

impl Ledger {
    /// Creates the ledger and mines its genesis block. Fails without mining
    /// when the difficulty asks for more zeros than a hash has digits.
    pub fn new(config: LedgerConfig) -> Result<Self> {
        let difficulty = match config.difficulty {
            0 => DEFAULT_DIFFICULTY,
            d if d as usize > HASH_HEX_SIZE => {
                return Err(LedgerError::InvalidDifficulty { difficulty: d })
            }
            d => d,
        };
        let genesis = genesis_block(&config.identity, difficulty);
        info!(
            "ledger '{}' created, genesis hash {} (difficulty {difficulty})",
            config.name,
            genesis.hash()
        );
        Ok(Self {
            name: config.name,
            chain: vec![genesis],
            pending_transactions: Vec::new(),
            difficulty,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn pending_transactions(&self) -> &[String] {
        &self.pending_transactions
    }

    /// Last sealed block. The chain always holds at least the genesis block.
    pub fn tip(&self) -> &Block {
        &self.chain[self.chain.len() - 1]
    }

    /// Index of the tip block.
    pub fn height(&self) -> u64 {
        self.tip().index()
    }

    pub fn add_transaction(&mut self, tx: &str) -> Result<()> {
        let tx = tx.trim();
        if tx.is_empty() {
            return Err(LedgerError::EmptyTransaction);
        }
        self.pending_transactions.push(tx.to_string());
        debug!(
            "transaction accepted, {} pending",
            self.pending_transactions.len()
        );
        Ok(())
    }

    /// Assembles the next block from a copy of the whole pending pool. The
    /// ledger itself is left untouched.
    pub fn build_next_block(&self) -> Result<CandidateBlock> {
        if self.pending_transactions.is_empty() {
            return Err(LedgerError::EmptyPool);
        }
        let prev = self.tip();
        Ok(CandidateBlock::new(
            prev.index() + 1,
            prev.hash(),
            self.pending_transactions.clone(),
        ))
    }

    /// Builds, mines and appends the next block. The pool is only drained
    /// once the block is sealed.
    pub fn mine_next_block(&mut self) -> Result<Block> {
        let candidate = self.build_next_block()?;
        let start = Instant::now();
        let mined = pow::mine(candidate, self.difficulty);
        info!(
            "Mined block {} with difficulty {} in {:?}, nonce {} hash {}",
            mined.index(),
            self.difficulty,
            start.elapsed(),
            mined.nonce(),
            mined.hash()
        );
        self.commit(mined).cloned()
    }

    /// Appends a sealed block built elsewhere, provided it still extends the
    /// tip and its transactions are still at the front of the pool. Those
    /// transactions are removed from the pool; anything submitted after the
    /// block was built stays pending.
    pub fn commit(&mut self, block: Block) -> Result<&Block> {
        let tip = self.tip();
        let index = block.index();
        if index != tip.index() + 1 || block.previous_hash() != tip.hash() {
            return Err(LedgerError::StaleBlock { index });
        }
        if !self.pending_transactions.starts_with(block.transactions()) {
            return Err(LedgerError::StaleBlock { index });
        }
        if !block.is_consistent() {
            return Err(LedgerError::InvalidBlock {
                index,
                reason: "hash or merkle root does not match contents",
            });
        }
        if !has_leading_zeros(block.hash(), self.difficulty) {
            return Err(LedgerError::InvalidBlock {
                index,
                reason: "hash does not meet difficulty",
            });
        }

        self.pending_transactions.drain(..block.transactions().len());
        self.chain.push(block);
        Ok(self.tip())
    }

    /// Case-insensitive substring search over every transaction in the chain,
    /// in chain order then block order.
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LedgerError::EmptyQuery);
        }
        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        for block in &self.chain {
            for tx in block.transactions() {
                if tx.to_lowercase().contains(&needle) {
                    hits.push(SearchHit {
                        block_index: block.index(),
                        transaction: tx.clone(),
                    });
                }
            }
        }
        Ok(hits)
    }

    /// Re-checks linkage, contents and proof-of-work for the whole chain.
    pub fn is_valid(&self) -> bool {
        let genesis = &self.chain[0];
        if genesis.index() != 0 || genesis.previous_hash() != GENESIS_PREVIOUS_HASH {
            return false;
        }
        let blocks_ok = self
            .chain
            .iter()
            .all(|b| b.is_consistent() && has_leading_zeros(b.hash(), self.difficulty));
        let links_ok = self.chain.windows(2).all(|pair| {
            pair[1].index() == pair[0].index() + 1 && pair[1].previous_hash() == pair[0].hash()
        });
        blocks_ok && links_ok
    }
}

/// Genesis block holding the identity token, mined at the ledger difficulty.
pub fn genesis_block(identity: &str, difficulty: u32) -> Block {
    let candidate = CandidateBlock::new(0, GENESIS_PREVIOUS_HASH, vec![identity.to_string()]);
    pow::mine(candidate, difficulty)
}
