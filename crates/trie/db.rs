use crate::error::TrieError;
use ethereum_types::H256;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

/// Backing store for encoded batches, keyed by the digest of their root node.
pub trait TrieDB: Send + Sync {
    fn get(&self, key: H256) -> Result<Option<Vec<u8>>, TrieError>;
    fn put_batch(&self, key_values: Vec<(H256, Vec<u8>)>) -> Result<(), TrieError>;
    fn delete_batch(&self, keys: Vec<H256>) -> Result<(), TrieError>;
    fn put(&self, key: H256, value: Vec<u8>) -> Result<(), TrieError> {
        self.put_batch(vec![(key, value)])
    }
}

/// InMemory implementation for the TrieDB trait, with get, put and delete operations.
#[derive(Clone, Default)]
pub struct InMemoryTrieDB {
    inner: Arc<Mutex<BTreeMap<H256, Vec<u8>>>>,
}

impl InMemoryTrieDB {
    pub const fn new(map: Arc<Mutex<BTreeMap<H256, Vec<u8>>>>) -> Self {
        Self { inner: map }
    }

    pub fn new_empty() -> Self {
        Self {
            inner: Default::default(),
        }
    }

    /// Number of stored batches.
    pub fn len(&self) -> Result<usize, TrieError> {
        Ok(self.inner.lock().map_err(|_| TrieError::LockError)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, TrieError> {
        Ok(self.len()? == 0)
    }
}

impl TrieDB for InMemoryTrieDB {
    fn get(&self, key: H256) -> Result<Option<Vec<u8>>, TrieError> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| TrieError::LockError)?
            .get(&key)
            .cloned())
    }

    fn put_batch(&self, key_values: Vec<(H256, Vec<u8>)>) -> Result<(), TrieError> {
        let mut db = self.inner.lock().map_err(|_| TrieError::LockError)?;

        for (key, value) in key_values {
            db.insert(key, value);
        }

        Ok(())
    }

    fn delete_batch(&self, keys: Vec<H256>) -> Result<(), TrieError> {
        let mut db = self.inner.lock().map_err(|_| TrieError::LockError)?;

        for key in keys {
            db.remove(&key);
        }

        Ok(())
    }
}
