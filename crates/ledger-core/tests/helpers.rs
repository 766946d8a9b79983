#![allow(dead_code)]

use ledger_core::{Ledger, LedgerConfig, SharedLedger};
use rand::{distributions::Alphanumeric, Rng};

pub const IDENTITY: &str = "22L-6679";

pub fn config(difficulty: u32) -> LedgerConfig {
    LedgerConfig {
        name: "integration".to_string(),
        identity: IDENTITY.to_string(),
        difficulty,
    }
}

pub fn new_ledger(difficulty: u32) -> Ledger {
    Ledger::new(config(difficulty)).expect("valid difficulty")
}

pub fn new_shared(difficulty: u32) -> SharedLedger {
    SharedLedger::from_config(config(difficulty)).expect("valid difficulty")
}

/// `count` transactions of the form `<from> -> <to> : <amount>`.
pub fn random_transactions(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let from: String = (&mut rng).sample_iter(&Alphanumeric).take(6).map(char::from).collect();
            let to: String = (&mut rng).sample_iter(&Alphanumeric).take(6).map(char::from).collect();
            format!("{from} -> {to} : {}", rng.gen_range(1..1000))
        })
        .collect()
}
