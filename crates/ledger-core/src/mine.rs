use crate::{
    constants::MINE_BATCH_SIZE, pow::has_leading_zeros, Block, CandidateBlock, LedgerError,
    Result,
};
use rayon::prelude::*;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, warn};

/// Shared flag that asks an in-flight search to stop. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns a guard that cancels this token when dropped, e.g. when the
    /// request that started a search goes away.
    pub fn drop_guard(&self) -> CancelGuard {
        CancelGuard {
            token: Some(self.clone()),
        }
    }
}

#[derive(Debug)]
pub struct CancelGuard {
    token: Option<CancelToken>,
}

impl CancelGuard {
    /// Let the search run on without tying it to this guard.
    pub fn disarm(mut self) {
        self.token = None;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

#[derive(Debug)]
pub enum MineOutcome {
    Sealed(Block),
    Cancelled,
    /// Every nonce from the starting point up to `u64::MAX` was tried.
    Exhausted { index: u64 },
}

impl MineOutcome {
    pub fn into_result(self) -> Result<Block> {
        match self {
            MineOutcome::Sealed(block) => Ok(block),
            MineOutcome::Cancelled => Err(LedgerError::Cancelled),
            MineOutcome::Exhausted { index } => Err(LedgerError::NonceExhausted { index }),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MiningStrategy {
    #[default]
    Sequential,
    Parallel,
}

impl MiningStrategy {
    pub fn run(self, candidate: CandidateBlock, difficulty: u32, cancel: &CancelToken) -> MineOutcome {
        match self {
            MiningStrategy::Sequential => mine_cancellable(candidate, difficulty, cancel),
            MiningStrategy::Parallel => mine_parallel(candidate, difficulty, cancel),
        }
    }
}

/// Single-threaded nonce search that checks `cancel` before every attempt.
pub fn mine_cancellable(
    mut candidate: CandidateBlock,
    difficulty: u32,
    cancel: &CancelToken,
) -> MineOutcome {
    loop {
        if cancel.is_cancelled() {
            warn!("mining of block {} cancelled at nonce {}", candidate.index(), candidate.nonce());
            return MineOutcome::Cancelled;
        }
        if has_leading_zeros(candidate.hash(), difficulty) {
            return MineOutcome::Sealed(candidate.seal());
        }
        match candidate.nonce().checked_add(1) {
            Some(next) => candidate.set_nonce(next),
            None => {
                return MineOutcome::Exhausted {
                    index: candidate.index(),
                }
            }
        }
    }
}

/// Searches nonces in parallel, one batch at a time. Within a batch rayon's
/// `find_first` keeps the lowest matching nonce, and batches are walked in
/// increasing order, so the result is the same block the sequential search
/// would seal.
pub fn mine_parallel(
    mut candidate: CandidateBlock,
    difficulty: u32,
    cancel: &CancelToken,
) -> MineOutcome {
    let mut lo = candidate.nonce();
    loop {
        if cancel.is_cancelled() {
            warn!("parallel mining of block {} cancelled near nonce {lo}", candidate.index());
            return MineOutcome::Cancelled;
        }
        let hi = lo.saturating_add(MINE_BATCH_SIZE);
        if lo == hi {
            return MineOutcome::Exhausted {
                index: candidate.index(),
            };
        }

        let template = &candidate;
        let found = (lo..hi).into_par_iter().find_first(|nonce| {
            !cancel.is_cancelled()
                && has_leading_zeros(&template.hash_with_nonce(*nonce), difficulty)
        });

        if let Some(nonce) = found {
            debug!("block {} solved in batch {lo}..{hi}", candidate.index());
            candidate.set_nonce(nonce);
            return MineOutcome::Sealed(candidate.seal());
        }
        lo = hi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow;

    fn candidate(txs: &[&str]) -> CandidateBlock {
        CandidateBlock::with_timestamp(
            4,
            "00abc",
            "2024-03-01T10:00:00Z",
            txs.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn cancellable_matches_plain_search() {
        let c = candidate(&["a", "b"]);
        let plain = pow::mine(c.clone(), 3);
        let outcome = mine_cancellable(c, 3, &CancelToken::new());
        match outcome {
            MineOutcome::Sealed(block) => assert_eq!(block, plain),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn parallel_finds_the_canonical_nonce() {
        let c = candidate(&["Alice -> Bob : 5", "Bob -> Carol : 2", "Carol -> Dan : 1"]);
        let plain = pow::mine(c.clone(), 3);
        let block = mine_parallel(c, 3, &CancelToken::new()).into_result().unwrap();
        assert_eq!(block.nonce(), plain.nonce());
        assert_eq!(block.hash(), plain.hash());
    }

    #[test]
    fn pre_cancelled_token_stops_both_strategies() {
        let token = CancelToken::new();
        token.cancel();
        for strategy in [MiningStrategy::Sequential, MiningStrategy::Parallel] {
            let outcome = strategy.run(candidate(&["a"]), 64, &token);
            assert!(matches!(outcome, MineOutcome::Cancelled));
        }
    }

    #[test]
    fn cancel_from_another_thread_interrupts_search() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = std::thread::spawn(move || mine_cancellable(candidate(&["a"]), 64, &remote));
        std::thread::sleep(std::time::Duration::from_millis(50));
        token.cancel();
        let outcome = handle.join().unwrap();
        assert_eq!(outcome.into_result().unwrap_err(), LedgerError::Cancelled);
    }

    #[test]
    fn exhausted_nonce_space_is_reported() {
        let mut c = candidate(&["a"]);
        c.set_nonce(u64::MAX);
        let outcome = mine_cancellable(c, 64, &CancelToken::new());
        assert_eq!(
            outcome.into_result().unwrap_err(),
            LedgerError::NonceExhausted { index: 4 }
        );
    }

    #[test]
    fn drop_guard_cancels_unless_disarmed() {
        let token = CancelToken::new();
        drop(token.drop_guard());
        assert!(token.is_cancelled());

        let token = CancelToken::new();
        token.drop_guard().disarm();
        assert!(!token.is_cancelled());
    }
}
