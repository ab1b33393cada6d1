pub mod batch;
pub mod bits;
pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod hasher;
pub mod node_hash;
pub mod proof;
#[cfg(test)]
mod test_utils;
mod update;

use std::{
    collections::VecDeque,
    sync::{Mutex, OnceLock, RwLock, RwLockReadGuard},
    time::Instant,
};

use ethereum_types::H256;
use lazy_static::lazy_static;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

pub use self::batch::Batch;
pub use self::cache::{CacheStats, CacheStore};
pub use self::config::{ConfigError, TrieConfig};
pub use self::context::TrieContext;
pub use self::db::{InMemoryTrieDB, TrieDB};
pub use self::error::TrieError;
pub use self::hasher::{HashFn, keccak256, sha256};
pub use self::node_hash::{NodeHash, NodeKind};
pub use self::proof::{
    CompressedMerkleProof, MerkleProof, ProofVerifier, verify_inclusion, verify_non_inclusion,
};

use self::{
    batch::is_batch_root,
    context::fork_join,
    update::Updater,
};

/// Length in bytes of keys, values and digests.
pub const HASH_LENGTH: usize = 32;
/// Number of levels between the root and the leaves.
pub const TRIE_HEIGHT: usize = 8 * HASH_LENGTH;

lazy_static! {
    // Value of an empty subtree, and the value that deletes a key, equal to sha256(0x00)
    pub static ref DEFAULT_LEAF: H256 = sha256(&[&[0]]);
}

/// Sparse Merkle trie over 256-bit keys, stored as 4-level batches.
///
/// Updates are applied in sorted batches and only reach the backing store on
/// [`Trie::commit`]. Reads and proofs may run concurrently with each other but
/// not with an update.
pub struct Trie {
    /// Digest of the root, `None` for an empty trie
    root: RwLock<Option<H256>>,
    pub(crate) hash: HashFn,
    pub(crate) cache: CacheStore,
    config: TrieConfig,
    /// Roots produced by atomic updates, oldest first
    past_roots: Mutex<VecDeque<Option<H256>>>,
    /// Workers for updates and cache loads, built on first use
    pool: OnceLock<ThreadPool>,
}

impl Trie {
    /// Creates an empty trie hashed with SHA-256
    pub fn new(db: Box<dyn TrieDB>) -> Self {
        Self::open(db, None)
    }

    /// Opens the trie stored in `db` under `root`
    pub fn open(db: Box<dyn TrieDB>, root: Option<H256>) -> Self {
        Self::with_hasher(db, root, sha256)
    }

    pub fn with_hasher(db: Box<dyn TrieDB>, root: Option<H256>, hash: HashFn) -> Self {
        Self::with_config(db, root, hash, TrieConfig::default())
    }

    pub fn with_config(
        db: Box<dyn TrieDB>,
        root: Option<H256>,
        hash: HashFn,
        config: TrieConfig,
    ) -> Self {
        Self {
            root: RwLock::new(root),
            hash,
            cache: CacheStore::new(db, config.cache_height_limit),
            past_roots: Mutex::new(VecDeque::with_capacity(config.max_past_roots)),
            pool: OnceLock::new(),
            config,
        }
    }

    /// Creates a new Trie based on a temporary InMemory DB
    pub fn new_temp() -> Self {
        Self::new(Box::new(InMemoryTrieDB::new_empty()))
    }

    pub fn root(&self) -> Result<Option<H256>, TrieError> {
        Ok(*self.root_lock_read()?)
    }

    pub fn config(&self) -> &TrieConfig {
        &self.config
    }

    /// Writes `values` under `keys` and returns the new root. Writing
    /// [`DEFAULT_LEAF`] deletes a key.
    ///
    /// Keys must be strictly ascending. Batches replaced by the update are
    /// deleted from the store on the next commit.
    pub fn update(
        &self,
        ctx: &TrieContext,
        keys: &[H256],
        values: &[H256],
    ) -> Result<Option<H256>, TrieError> {
        self.apply(ctx, keys, values, false)
    }

    /// Like [`Trie::update`], but the batches of the previous root are kept so
    /// it can still be read, see [`Trie::past_roots`].
    pub fn atomic_update(
        &self,
        ctx: &TrieContext,
        keys: &[H256],
        values: &[H256],
    ) -> Result<Option<H256>, TrieError> {
        self.apply(ctx, keys, values, true)
    }

    fn apply(
        &self,
        ctx: &TrieContext,
        keys: &[H256],
        values: &[H256],
        atomic: bool,
    ) -> Result<Option<H256>, TrieError> {
        validate_input(keys, values)?;
        let mut root = self.root.write().map_err(|_| TrieError::LockError)?;
        if keys.is_empty() {
            return Ok(*root);
        }
        let start = Instant::now();
        self.cache.reset_stats();
        let updater = Updater {
            hash: self.hash,
            cache: &self.cache,
            atomic,
        };
        let current = *root;
        let new_root = self
            .pool()?
            .install(|| updater.update_root(ctx, current, keys, values))?;
        *root = new_root;

        if atomic {
            let mut past_roots = self.past_roots.lock().map_err(|_| TrieError::LockError)?;
            if self.config.max_past_roots > 0 {
                if past_roots.len() == self.config.max_past_roots {
                    past_roots.pop_front();
                }
                past_roots.push_back(new_root);
            }
        }
        let stats = self.cache.stats();
        debug!(
            keys = keys.len(),
            atomic,
            root = ?new_root,
            db_loads = stats.db_loads,
            cache_hits = stats.cache_hits,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Updated trie"
        );
        Ok(new_root)
    }

    /// Value stored for `key` in the current trie
    pub fn get(&self, ctx: &TrieContext, key: &H256) -> Result<Option<H256>, TrieError> {
        let root = self.root_lock_read()?;
        self.get_from(ctx, *root, key, true)
    }

    /// Value stored for `key` under a root that is still available
    pub fn get_at(
        &self,
        ctx: &TrieContext,
        root: Option<H256>,
        key: &H256,
    ) -> Result<Option<H256>, TrieError> {
        let current = self.root_lock_read()?;
        self.get_from(ctx, root, key, root == *current)
    }

    /// Persists every batch written since the last commit and deletes the
    /// replaced ones. Hot batches stay cached.
    pub fn commit(&self, ctx: &TrieContext) -> Result<(), TrieError> {
        let _guard = self.root.write().map_err(|_| TrieError::LockError)?;
        self.cache.commit(ctx)
    }

    /// Loads every batch at or above the cache height limit under `root` into
    /// the hot cache, then makes `root` the current root.
    pub fn load_cache(&self, ctx: &TrieContext, root: Option<H256>) -> Result<(), TrieError> {
        let mut current = self.root.write().map_err(|_| TrieError::LockError)?;
        let start = Instant::now();
        self.cache.clear_hot()?;
        self.pool()?.install(|| {
            self.load_cache_node(ctx, root.map(NodeHash::interior), None, 0, TRIE_HEIGHT)
        })?;
        *current = root;
        debug!(
            root = ?root,
            batches = self.cache.hot_len()?,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded trie cache"
        );
        Ok(())
    }

    fn load_cache_node(
        &self,
        ctx: &TrieContext,
        node: Option<NodeHash>,
        batch: Option<&Batch>,
        i_batch: usize,
        height: usize,
    ) -> Result<(), TrieError> {
        let Some(node) = node else {
            return Ok(());
        };
        if !self.cache.is_hot(height) {
            return Ok(());
        }
        if is_batch_root(height) {
            let batch = self.cache.load_batch(ctx, node.hash, height)?;
            if batch.is_shortcut() {
                return Ok(());
            }
            return self.load_cache_children(ctx, &batch, 0, height);
        }
        let batch = batch.ok_or(TrieError::InconsistentTree)?;
        if batch.is_shortcut_at(i_batch) {
            return Ok(());
        }
        self.load_cache_children(ctx, batch, i_batch, height)
    }

    fn load_cache_children(
        &self,
        ctx: &TrieContext,
        batch: &Batch,
        i_batch: usize,
        height: usize,
    ) -> Result<(), TrieError> {
        let (left, right) = batch.children(i_batch);
        fork_join(
            ctx,
            |ctx| self.load_cache_node(ctx, left, Some(batch), 2 * i_batch + 1, height - 1),
            |ctx| self.load_cache_node(ctx, right, Some(batch), 2 * i_batch + 2, height - 1),
        )?;
        Ok(())
    }

    /// Roots produced by the latest atomic updates, oldest first
    pub fn past_roots(&self) -> Result<Vec<Option<H256>>, TrieError> {
        Ok(self
            .past_roots
            .lock()
            .map_err(|_| TrieError::LockError)?
            .iter()
            .copied()
            .collect())
    }

    /// Store loads and cache hits of the last update
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn hot_cache_len(&self) -> Result<usize, TrieError> {
        self.cache.hot_len()
    }

    pub fn pending_writes_len(&self) -> Result<usize, TrieError> {
        self.cache.pending_writes_len()
    }

    pub fn pending_deletes_len(&self) -> Result<usize, TrieError> {
        self.cache.pending_deletes_len()
    }

    /// Drops the hot cache, the next reads go to the pending writes or the store
    pub fn reset_hot_cache(&self) -> Result<(), TrieError> {
        let _guard = self.root.write().map_err(|_| TrieError::LockError)?;
        self.cache.clear_hot()
    }

    fn pool(&self) -> Result<&ThreadPool, TrieError> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.worker_threads)
            .stack_size(self.config.worker_stack_size)
            .thread_name(|i| format!("trie-worker-{i}"))
            .build()
            .map_err(|err| TrieError::ThreadPool(err.to_string()))?;
        Ok(self.pool.get_or_init(|| pool))
    }

    pub(crate) fn root_lock_read(&self) -> Result<RwLockReadGuard<'_, Option<H256>>, TrieError> {
        self.root.read().map_err(|_| TrieError::LockError)
    }
}

fn validate_input(keys: &[H256], values: &[H256]) -> Result<(), TrieError> {
    if keys.len() != values.len() {
        return Err(TrieError::InvalidInput(format!(
            "{} keys for {} values",
            keys.len(),
            values.len()
        )));
    }
    if let Some(i) = keys.windows(2).position(|pair| pair[0] >= pair[1]) {
        return Err(TrieError::InvalidInput(format!(
            "keys must be strictly ascending, key {} is not",
            i + 1
        )));
    }
    Ok(())
}
