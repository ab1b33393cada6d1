use ethereum_types::H256;
use rand::{Rng, thread_rng};

use crate::{DEFAULT_LEAF, InMemoryTrieDB, Trie};

/// `n` distinct random keys in ascending order.
pub fn random_keys(n: usize) -> Vec<H256> {
    let mut rng = thread_rng();
    let mut keys: Vec<H256> = (0..n).map(|_| H256(rng.r#gen())).collect();
    keys.sort();
    keys.dedup();
    keys
}

/// `n` random values, none of them the deleting [`DEFAULT_LEAF`].
pub fn random_values(n: usize) -> Vec<H256> {
    let mut rng = thread_rng();
    (0..n)
        .map(|_| H256(rng.r#gen()))
        .filter(|value| *value != *DEFAULT_LEAF)
        .collect()
}

/// A trie and a handle on its in-memory store.
pub fn temp_trie() -> (Trie, InMemoryTrieDB) {
    let db = InMemoryTrieDB::new_empty();
    (Trie::new(Box::new(db.clone())), db)
}

/// Key whose bits are all clear except `bits`, counted from the most significant.
pub fn key_with_bits(bits: &[usize]) -> H256 {
    let mut key = H256::zero();
    for bit in bits {
        crate::bits::set_bit(key.as_bytes_mut(), *bit);
    }
    key
}
