use std::{
    sync::{
        Mutex, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use ethereum_types::H256;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::{batch::Batch, context::TrieContext, db::TrieDB, error::TrieError};

/// Counters for the batch loads of the last update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Batches read from the backing store.
    pub db_loads: usize,
    /// Batches served from the hot cache or the pending writes.
    pub cache_hits: usize,
}

/// Sits between the trie and its backing store.
///
/// Holds the batches written since the last commit, the hot batches near the
/// root that survive commits, and the digests whose batches must be removed
/// from the store on the next commit. Each set has its own lock because the
/// concurrent branches of an update stage and discard batches independently.
pub struct CacheStore {
    db: Box<dyn TrieDB>,
    hot: RwLock<FxHashMap<H256, Batch>>,
    pending_writes: RwLock<FxHashMap<H256, Batch>>,
    pending_deletes: Mutex<FxHashSet<H256>>,
    cache_height_limit: usize,
    db_loads: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl CacheStore {
    pub fn new(db: Box<dyn TrieDB>, cache_height_limit: usize) -> Self {
        Self {
            db,
            hot: Default::default(),
            pending_writes: Default::default(),
            pending_deletes: Default::default(),
            cache_height_limit,
            db_loads: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
        }
    }

    /// Whether batches rooted at `height` belong in the hot cache.
    pub fn is_hot(&self, height: usize) -> bool {
        height >= self.cache_height_limit
    }

    /// Returns a copy of the batch stored under `node`, looking at the hot
    /// cache, then the pending writes, then the backing store. Store reads of
    /// hot heights are kept in the hot cache.
    pub fn load_batch(
        &self,
        ctx: &TrieContext,
        node: H256,
        height: usize,
    ) -> Result<Batch, TrieError> {
        self.read_batch(ctx, node, self.is_hot(height))
    }

    /// Like [`CacheStore::load_batch`] but never fills the hot cache, for
    /// batches that may not belong to the current root.
    pub fn peek_batch(&self, ctx: &TrieContext, node: H256) -> Result<Batch, TrieError> {
        self.read_batch(ctx, node, false)
    }

    fn read_batch(
        &self,
        ctx: &TrieContext,
        node: H256,
        keep_hot: bool,
    ) -> Result<Batch, TrieError> {
        ctx.check()?;
        if let Some(batch) = self
            .hot
            .read()
            .map_err(|_| TrieError::LockError)?
            .get(&node)
        {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(batch.clone());
        }
        // Updates that were not committed yet are only reachable through here
        if let Some(batch) = self
            .pending_writes
            .read()
            .map_err(|_| TrieError::LockError)?
            .get(&node)
        {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(batch.clone());
        }

        let batch = self.fetch_batch(ctx, node)?;
        self.db_loads.fetch_add(1, Ordering::Relaxed);
        if keep_hot {
            self.hot
                .write()
                .map_err(|_| TrieError::LockError)?
                .insert(node, batch.clone());
        }
        Ok(batch)
    }

    /// Reads and decodes a batch straight from the backing store.
    pub fn fetch_batch(&self, ctx: &TrieContext, node: H256) -> Result<Batch, TrieError> {
        ctx.check()?;
        let encoded = self
            .db
            .get(node)
            .map_err(|err| match err {
                TrieError::DbError(err) => {
                    TrieError::DbError(err.context(format!("loading batch {node:#x}")))
                }
                other => other,
            })?
            .ok_or(TrieError::BatchNotFound(node))?;
        Batch::decode(&encoded)
    }

    /// Records a new batch to be written on the next commit.
    pub fn stage(&self, node: H256, batch: Batch, height: usize) -> Result<(), TrieError> {
        // The digest may come back after being replaced, it must not be deleted then
        self.pending_deletes
            .lock()
            .map_err(|_| TrieError::LockError)?
            .remove(&node);
        if self.is_hot(height) {
            self.hot
                .write()
                .map_err(|_| TrieError::LockError)?
                .insert(node, batch.clone());
        }
        self.pending_writes
            .write()
            .map_err(|_| TrieError::LockError)?
            .insert(node, batch);
        Ok(())
    }

    /// Forgets a batch that is no longer part of the current trie.
    ///
    /// With `remove` the batch also leaves the pending writes and is deleted
    /// from the store on the next commit; without it the batch stays
    /// reachable for roots produced by earlier atomic updates.
    pub fn discard(&self, node: H256, height: usize, remove: bool) -> Result<(), TrieError> {
        if remove {
            self.pending_writes
                .write()
                .map_err(|_| TrieError::LockError)?
                .remove(&node);
            self.pending_deletes
                .lock()
                .map_err(|_| TrieError::LockError)?
                .insert(node);
        }
        if self.is_hot(height) {
            self.hot
                .write()
                .map_err(|_| TrieError::LockError)?
                .remove(&node);
        }
        Ok(())
    }

    pub fn clear_hot(&self) -> Result<(), TrieError> {
        self.hot.write().map_err(|_| TrieError::LockError)?.clear();
        Ok(())
    }

    /// Writes every pending batch in one call to the store, then deletes the
    /// replaced ones in another. Nothing is cleared unless both succeed.
    pub fn commit(&self, ctx: &TrieContext) -> Result<(), TrieError> {
        let mut pending_writes = self
            .pending_writes
            .write()
            .map_err(|_| TrieError::LockError)?;
        let mut pending_deletes = self
            .pending_deletes
            .lock()
            .map_err(|_| TrieError::LockError)?;

        let updates = pending_writes
            .iter()
            .map(|(node, batch)| Ok((*node, batch.encode()?)))
            .collect::<Result<Vec<_>, TrieError>>()?;
        let deletes: Vec<H256> = pending_deletes
            .iter()
            .filter(|node| !pending_writes.contains_key(node))
            .copied()
            .collect();
        let (writes, removals) = (updates.len(), deletes.len());

        ctx.check()?;
        let start = Instant::now();
        if !updates.is_empty() {
            self.db.put_batch(updates).inspect_err(|err| {
                warn!(%err, writes, "Failed to write trie batches");
            })?;
        }
        let written = Instant::now();
        if !deletes.is_empty() {
            ctx.check()?;
            self.db.delete_batch(deletes).inspect_err(|err| {
                warn!(%err, removals, "Failed to delete trie batches");
            })?;
        }
        debug!(
            writes,
            removals,
            write_time = ?written.duration_since(start),
            delete_time = ?written.elapsed(),
            "Committed trie batches"
        );

        pending_writes.clear();
        pending_deletes.clear();
        Ok(())
    }

    pub fn hot_len(&self) -> Result<usize, TrieError> {
        Ok(self.hot.read().map_err(|_| TrieError::LockError)?.len())
    }

    pub fn pending_writes_len(&self) -> Result<usize, TrieError> {
        Ok(self
            .pending_writes
            .read()
            .map_err(|_| TrieError::LockError)?
            .len())
    }

    pub fn pending_deletes_len(&self) -> Result<usize, TrieError> {
        Ok(self
            .pending_deletes
            .lock()
            .map_err(|_| TrieError::LockError)?
            .len())
    }

    pub fn contains_pending(&self, node: &H256) -> Result<bool, TrieError> {
        Ok(self
            .pending_writes
            .read()
            .map_err(|_| TrieError::LockError)?
            .contains_key(node))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            db_loads: self.db_loads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.db_loads.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
    }
}
