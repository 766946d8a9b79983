use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod chain;
pub mod constants;
mod error;
pub mod mine;
pub mod shared;

pub use chain::{Ledger, LedgerConfig, SearchHit};
pub use error::{LedgerError, Result};
pub use mine::{CancelToken, MineOutcome, MiningStrategy};
pub use shared::SharedLedger;

pub type Hash = [u8; 32];

/// SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

/// SHA-256 of `bytes` rendered as 64 lowercase hex characters.
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(digest(bytes))
}

/// Hash of the sealed header fields. The preimage is the `|`-joined textual
/// form of the fields, so the same header always hashes the same way no matter
/// which process renders it.
pub fn header_hash(
    index: u64,
    timestamp: &str,
    merkle_root: &str,
    previous_hash: &str,
    nonce: u64,
) -> String {
    let record = format!("{index}|{timestamp}|{merkle_root}|{previous_hash}|{nonce}");
    digest_hex(record.as_bytes())
}

/// Merkle root over an ordered list of transactions.
///
/// Leaves are the digests of the raw transaction strings, parents are the
/// digest of `left || right`, and an odd level pairs its last node with
/// itself. An empty list yields the digest of the empty byte string.
pub fn merkle_root<S: AsRef<str>>(txs: &[S]) -> String {
    if txs.is_empty() {
        return digest_hex(&[]);
    }
    let mut level: Vec<Hash> = txs.iter().map(|t| digest(t.as_ref().as_bytes())).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let (a, b) = if pair.len() == 2 {
                (pair[0], pair[1])
            } else {
                (pair[0], pair[0])
            };
            let mut joined = [0u8; 64];
            joined[..32].copy_from_slice(&a);
            joined[32..].copy_from_slice(&b);
            next.push(digest(&joined));
        }
        level = next;
    }
    hex::encode(level[0])
}

/// Current UTC time, second precision, RFC 3339 (`2024-05-01T12:00:00Z`).
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A block that has been assembled but not yet sealed by proof-of-work.
/// Only the nonce (and with it the hash) may change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateBlock {
    index: u64,
    timestamp: String,
    transactions: Vec<String>,
    merkle_root: String,
    previous_hash: String,
    nonce: u64,
    hash: String,
}

impl CandidateBlock {
    pub fn new(index: u64, previous_hash: impl Into<String>, transactions: Vec<String>) -> Self {
        Self::with_timestamp(index, previous_hash, now_timestamp(), transactions)
    }

    /// Like [`CandidateBlock::new`] with a caller-supplied timestamp.
    pub fn with_timestamp(
        index: u64,
        previous_hash: impl Into<String>,
        timestamp: impl Into<String>,
        transactions: Vec<String>,
    ) -> Self {
        let merkle_root = merkle_root(&transactions);
        let mut block = Self {
            index,
            timestamp: timestamp.into(),
            transactions,
            merkle_root,
            previous_hash: previous_hash.into(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn transactions(&self) -> &[String] {
        &self.transactions
    }

    pub fn merkle_root(&self) -> &str {
        &self.merkle_root
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Provisional hash for the current nonce.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.hash = self.compute_hash();
    }

    pub fn compute_hash(&self) -> String {
        self.hash_with_nonce(self.nonce)
    }

    pub(crate) fn hash_with_nonce(&self, nonce: u64) -> String {
        header_hash(
            self.index,
            &self.timestamp,
            &self.merkle_root,
            &self.previous_hash,
            nonce,
        )
    }

    /// Freeze the candidate. Only the miners call this, after the hash has
    /// met the difficulty they were asked for.
    pub(crate) fn seal(self) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions,
            merkle_root: self.merkle_root,
            previous_hash: self.previous_hash,
            hash: self.hash,
            nonce: self.nonce,
        }
    }
}

/// A sealed block. Fields are read-only once mined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    index: u64,
    timestamp: String,
    transactions: Vec<String>,
    merkle_root: String,
    previous_hash: String,
    hash: String,
    nonce: u64,
}

impl Block {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn transactions(&self) -> &[String] {
        &self.transactions
    }

    pub fn merkle_root(&self) -> &str {
        &self.merkle_root
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Recompute the header hash from the stored fields.
    pub fn compute_hash(&self) -> String {
        header_hash(
            self.index,
            &self.timestamp,
            &self.merkle_root,
            &self.previous_hash,
            self.nonce,
        )
    }

    /// True when the stored hash and Merkle root both match the contents.
    pub fn is_consistent(&self) -> bool {
        self.hash == self.compute_hash() && self.merkle_root == merkle_root(&self.transactions)
    }
}

pub mod pow {
    use super::{Block, CandidateBlock};

    /// Mine the candidate by incrementing the nonce until the hex hash starts
    /// with at least `difficulty` zero characters. The first satisfying nonce
    /// counting up from the candidate's current one is returned.
    pub fn mine(mut block: CandidateBlock, difficulty: u32) -> Block {
        loop {
            if has_leading_zeros(block.hash(), difficulty) {
                return block.seal();
            }
            block.set_nonce(block.nonce().wrapping_add(1));
        }
    }

    pub fn has_leading_zeros(hash: &str, difficulty: u32) -> bool {
        count_leading_zero_digits(hash) >= difficulty
    }

    pub fn count_leading_zero_digits(hash: &str) -> u32 {
        hash.bytes().take_while(|b| *b == b'0').count() as u32
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;

    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn txs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn digest_hex_of_empty_input() {
        assert_eq!(digest_hex(b""), EMPTY_SHA256);
        assert_eq!(digest_hex(b"").len(), constants::HASH_HEX_SIZE);
    }

    #[test]
    fn leading_zero_digits_examples() {
        assert_eq!(pow::count_leading_zero_digits("000abc"), 3);
        assert_eq!(pow::count_leading_zero_digits("a000"), 0);
        assert_eq!(pow::count_leading_zero_digits(""), 0);
        assert!(pow::has_leading_zeros("00f1", 2));
        assert!(!pow::has_leading_zeros("00f1", 3));
        assert!(pow::has_leading_zeros("ffff", 0));
    }

    #[test]
    fn merkle_root_empty_txs() {
        let empty: Vec<String> = vec![];
        assert_eq!(merkle_root(&empty), EMPTY_SHA256);
    }

    #[test]
    fn merkle_root_single_tx() {
        assert_eq!(merkle_root(&["a"]), digest_hex(b"a"));
    }

    #[test]
    fn merkle_root_two_txs() {
        let mut joined = Vec::new();
        joined.extend_from_slice(&digest(b"a"));
        joined.extend_from_slice(&digest(b"b"));
        assert_eq!(merkle_root(&["a", "b"]), digest_hex(&joined));
    }

    #[test]
    fn merkle_root_three_txs_duplicates_last_leaf() {
        let (a, b, c) = (digest(b"a"), digest(b"b"), digest(b"c"));
        let ab = digest(&[a, b].concat());
        let cc = digest(&[c, c].concat());
        let expected = digest_hex(&[ab, cc].concat());
        assert_eq!(merkle_root(&["a", "b", "c"]), expected);
    }

    #[test]
    fn merkle_root_three_txs() {
        assert_eq!(
            merkle_root(&["a", "b", "c"]),
            "d31a37ef6ac14a2db1470c4316beb5592e6afd4465022339adafda76a18ffabe"
        );
    }

    #[test]
    fn merkle_root_is_order_sensitive() {
        assert_ne!(merkle_root(&["a", "b"]), merkle_root(&["b", "a"]));
        assert_ne!(merkle_root(&["a", "b", "c"]), merkle_root(&["a", "b", "d"]));
    }

    #[test]
    fn merkle_root_tolerates_duplicates() {
        let root = merkle_root(&["x", "x"]);
        assert_eq!(root, merkle_root(&["x", "x"]));
        assert_ne!(root, merkle_root(&["x"]));
    }

    #[test]
    fn merkle_root_one_thousand_txs_is_stable() {
        let many: Vec<String> = (0..1000).map(|i| format!("User{i} -> User{} : {i}", i + 1)).collect();
        let root = merkle_root(&many);
        assert_eq!(root.len(), constants::HASH_HEX_SIZE);
        assert_eq!(root, merkle_root(&many));
    }

    #[test]
    fn header_hash_uses_pipe_joined_fields() {
        let expected = digest_hex(b"1|2024-01-01T00:00:00Z|abc|0|7");
        assert_eq!(header_hash(1, "2024-01-01T00:00:00Z", "abc", "0", 7), expected);
    }

    #[test]
    fn candidate_hash_changes_with_nonce() {
        let mut block = CandidateBlock::with_timestamp(1, "0", "2024-01-01T00:00:00Z", txs(&["a"]));
        let hash1 = block.hash().to_string();
        assert_eq!(block.nonce(), 0);
        block.set_nonce(1);
        assert_ne!(hash1, block.hash());
        assert_eq!(block.hash(), block.compute_hash());
    }

    #[test]
    fn candidate_computes_merkle_root_once() {
        let block = CandidateBlock::with_timestamp(3, "ff", "2024-01-01T00:00:00Z", txs(&["a", "b"]));
        assert_eq!(block.merkle_root(), merkle_root(&["a", "b"]));
        assert_eq!(block.index(), 3);
        assert_eq!(block.previous_hash(), "ff");
    }

    #[test]
    fn mine_block_example() {
        let candidate =
            CandidateBlock::with_timestamp(1, "0", "2024-01-01T00:00:00Z", txs(&["Alice -> Bob : 5"]));
        let mined = pow::mine(candidate, 2);
        assert!(pow::has_leading_zeros(mined.hash(), 2));
        assert!(mined.is_consistent());
    }

    #[test]
    fn mine_returns_first_satisfying_nonce() {
        let candidate =
            CandidateBlock::with_timestamp(1, "0", "2024-01-01T00:00:00Z", txs(&["x", "y"]));
        let mined = pow::mine(candidate.clone(), 2);
        for nonce in 0..mined.nonce() {
            assert!(!pow::has_leading_zeros(&candidate.hash_with_nonce(nonce), 2));
        }
    }

    #[test]
    fn mine_with_zero_difficulty_keeps_nonce_zero() {
        let candidate = CandidateBlock::with_timestamp(1, "0", "2024-01-01T00:00:00Z", txs(&["a"]));
        let mined = pow::mine(candidate, 0);
        assert_eq!(mined.nonce(), 0);
    }

    #[test]
    fn block_serialization_field_order() {
        let candidate = CandidateBlock::with_timestamp(1, "0", "2024-01-01T00:00:00Z", txs(&["a"]));
        let block = pow::mine(candidate, 0);
        let json = serde_json::to_string(&block).unwrap();
        let expected = format!(
            r#"{{"index":1,"timestamp":"2024-01-01T00:00:00Z","transactions":["a"],"merkleRoot":"{}","previousHash":"0","hash":"{}","nonce":0}}"#,
            block.merkle_root(),
            block.hash()
        );
        assert_eq!(json, expected);
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn tampered_block_is_inconsistent() {
        let candidate = CandidateBlock::with_timestamp(1, "0", "2024-01-01T00:00:00Z", txs(&["a"]));
        let json = serde_json::to_value(pow::mine(candidate, 1)).unwrap();
        let mut tampered = json.clone();
        tampered["transactions"] = serde_json::json!(["b"]);
        let block: Block = serde_json::from_value(tampered).unwrap();
        assert!(!block.is_consistent());
    }

    #[test]
    fn now_timestamp_is_rfc3339_utc() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn candidates_built_a_second_apart_differ() {
        // Timestamps have second resolution.
        let a = CandidateBlock::new(1, "0", txs(&["a"]));
        sleep(std::time::Duration::from_millis(1100));
        let b = CandidateBlock::new(1, "0", txs(&["a"]));
        assert_ne!(a.hash(), b.hash());
    }
}
