//! Hash functions the trie can be built with.
//!
//! Every digest in the trie (interior nodes, shortcut leaves and the proof
//! folds) goes through a single [`HashFn`], so a trie and its verifier must
//! agree on it.

use ethereum_types::H256;
use sha2::Sha256;
use sha3::{Digest, Keccak256};

/// Hashes the concatenation of `data`.
pub type HashFn = fn(&[&[u8]]) -> H256;

/// SHA-256, the hash used by the map server.
pub fn sha256(data: &[&[u8]]) -> H256 {
    let mut hasher = Sha256::new();
    for chunk in data {
        hasher.update(chunk);
    }
    H256::from_slice(hasher.finalize().as_slice())
}

/// Keccak-256.
pub fn keccak256(data: &[&[u8]]) -> H256 {
    let mut hasher = Keccak256::new();
    for chunk in data {
        hasher.update(chunk);
    }
    H256::from_slice(hasher.finalize().as_slice())
}

/// Hash of a shortcut leaf. The height is truncated to one byte, so the root
/// position (256) hashes as 0.
pub(crate) fn leaf_hash(hash: HashFn, key: &H256, value: &H256, height: usize) -> H256 {
    hash(&[key.as_bytes(), value.as_bytes(), &[height as u8]])
}
