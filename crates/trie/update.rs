use std::sync::{Mutex, MutexGuard};

use ethereum_types::H256;

use crate::{
    DEFAULT_LEAF, TRIE_HEIGHT,
    batch::{Batch, is_batch_root},
    bits::bit_is_set,
    cache::CacheStore,
    context::{TrieContext, fork_join},
    error::TrieError,
    hasher::{HashFn, leaf_hash},
    node_hash::NodeHash,
};

/// Outcome of updating one subtree.
#[derive(Debug, Clone, Copy, Default)]
struct UpdateResult {
    node: Option<NodeHash>,
    /// Something below was deleted, so a shortcut may have to move up.
    deleted: bool,
}

impl UpdateResult {
    const fn node(node: Option<NodeHash>) -> Self {
        Self {
            node,
            deleted: false,
        }
    }

    const fn deleted() -> Self {
        Self {
            node: None,
            deleted: true,
        }
    }
}

fn lock(batch: &Mutex<Batch>) -> Result<MutexGuard<'_, Batch>, TrieError> {
    batch.lock().map_err(|_| TrieError::LockError)
}

/// Rewrites the trie for a sorted set of key/value changes.
///
/// Each node whose keys fall on both sides updates its two children
/// concurrently. Children living in the same batch write to disjoint slots of
/// the batch shared through a mutex; a child starting a new batch owns it.
pub(crate) struct Updater<'a> {
    pub(crate) hash: HashFn,
    pub(crate) cache: &'a CacheStore,
    /// Keep replaced batches around so every intermediate root stays readable.
    pub(crate) atomic: bool,
}

impl Updater<'_> {
    pub(crate) fn update_root(
        &self,
        ctx: &TrieContext,
        root: Option<H256>,
        keys: &[H256],
        values: &[H256],
    ) -> Result<Option<H256>, TrieError> {
        let result = self.update(
            ctx,
            root.map(NodeHash::interior),
            keys,
            values,
            None,
            0,
            TRIE_HEIGHT,
        )?;
        Ok(result.node.map(|node| node.hash))
    }

    #[allow(clippy::too_many_arguments)]
    fn update(
        &self,
        ctx: &TrieContext,
        root: Option<NodeHash>,
        keys: &[H256],
        values: &[H256],
        parent: Option<&Mutex<Batch>>,
        i_batch: usize,
        height: usize,
    ) -> Result<UpdateResult, TrieError> {
        if keys.is_empty() {
            return Ok(UpdateResult::node(root));
        }

        if height == 0 {
            if values[0] == *DEFAULT_LEAF {
                if let Some(root) = root {
                    self.discard(root.hash, height, false)?;
                }
                return Ok(UpdateResult::deleted());
            }
            // A value at the bottom is still stored as a shortcut batch so it can move up later
            let batch = Mutex::new(Batch::new());
            let node = self.leaf_hash(&keys[0], &values[0], root, &batch, 0, height)?;
            return Ok(UpdateResult::node(Some(node)));
        }

        let loaded;
        let (batch, i_batch) = if is_batch_root(height) {
            loaded = Mutex::new(self.load_or_new(ctx, root, height)?);
            (&loaded, 0)
        } else {
            (parent.ok_or(TrieError::InconsistentTree)?, i_batch)
        };
        let (mut left, mut right, is_shortcut) = {
            let batch = lock(batch)?;
            let (left, right) = batch.children(i_batch);
            (left, right, batch.is_shortcut_at(i_batch))
        };

        let merged;
        let (mut keys, mut values) = (keys, values);
        if is_shortcut {
            // Push the shortcut back into the update as an ordinary key
            let (Some(key), Some(value)) = (left, right) else {
                return Err(TrieError::InconsistentTree);
            };
            merged = merge_shortcut(keys, values, key.hash, value.hash);
            (keys, values) = (merged.0.as_slice(), merged.1.as_slice());
            (left, right) = (None, None);
            lock(batch)?.clear_children(i_batch);
            if keys.is_empty() {
                if let Some(root) = root.filter(|_| i_batch == 0) {
                    self.discard(root.hash, height, false)?;
                }
                return Ok(UpdateResult::deleted());
            }
        }

        if left.is_none() && right.is_none() && keys.len() == 1 {
            if values[0] == *DEFAULT_LEAF {
                if let Some(root) = root.filter(|_| i_batch == 0) {
                    self.discard(root.hash, height, false)?;
                }
                return Ok(UpdateResult::deleted());
            }
            let node = self.leaf_hash(&keys[0], &values[0], root, batch, i_batch, height)?;
            return Ok(UpdateResult::node(Some(node)));
        }

        let split = split_keys(keys, TRIE_HEIGHT - height);
        let (l_keys, r_keys) = keys.split_at(split);
        let (l_values, r_values) = values.split_at(split);
        let (l_index, r_index) = (2 * i_batch + 1, 2 * i_batch + 2);

        let (l_result, r_result) = match (l_keys.is_empty(), r_keys.is_empty()) {
            (false, true) => (
                self.update(ctx, left, l_keys, l_values, Some(batch), l_index, height - 1)?,
                UpdateResult::node(right),
            ),
            (true, false) => (
                UpdateResult::node(left),
                self.update(ctx, right, r_keys, r_values, Some(batch), r_index, height - 1)?,
            ),
            _ => fork_join(
                ctx,
                |ctx| self.update(ctx, left, l_keys, l_values, Some(batch), l_index, height - 1),
                |ctx| self.update(ctx, right, r_keys, r_values, Some(batch), r_index, height - 1),
            )?,
        };

        if (l_result.deleted || r_result.deleted)
            && let Some(result) = self.maybe_move_up_shortcut(
                ctx,
                l_result.node,
                r_result.node,
                root,
                batch,
                i_batch,
                height,
            )?
        {
            return Ok(result);
        }
        let node = self.interior_hash(l_result.node, r_result.node, root, batch, i_batch, height)?;
        Ok(UpdateResult::node(Some(node)))
    }

    fn load_or_new(
        &self,
        ctx: &TrieContext,
        root: Option<NodeHash>,
        height: usize,
    ) -> Result<Batch, TrieError> {
        match root {
            Some(root) => self.cache.load_batch(ctx, root.hash, height),
            None => Ok(Batch::new()),
        }
    }

    /// Moves a shortcut one level up when its sibling became empty.
    #[allow(clippy::too_many_arguments)]
    fn maybe_move_up_shortcut(
        &self,
        ctx: &TrieContext,
        left: Option<NodeHash>,
        right: Option<NodeHash>,
        root: Option<NodeHash>,
        batch: &Mutex<Batch>,
        i_batch: usize,
        height: usize,
    ) -> Result<Option<UpdateResult>, TrieError> {
        match (left, right) {
            (None, None) => {
                if i_batch == 0 {
                    if let Some(root) = root {
                        self.discard(root.hash, height, true)?;
                    }
                } else {
                    lock(batch)?.clear_children(i_batch);
                }
                Ok(Some(UpdateResult::deleted()))
            }
            (None, Some(right)) if right.is_shortcut() => self
                .move_up_shortcut(ctx, right, root, batch, i_batch, 2 * i_batch + 2, height)
                .map(Some),
            (Some(left), None) if left.is_shortcut() => self
                .move_up_shortcut(ctx, left, root, batch, i_batch, 2 * i_batch + 1, height)
                .map(Some),
            _ => Ok(None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn move_up_shortcut(
        &self,
        ctx: &TrieContext,
        shortcut: NodeHash,
        root: Option<NodeHash>,
        batch: &Mutex<Batch>,
        i_batch: usize,
        i_shortcut: usize,
        height: usize,
    ) -> Result<UpdateResult, TrieError> {
        let shortcut_height = height - 1;
        let (key, value) = if is_batch_root(shortcut_height) {
            self.cache
                .load_batch(ctx, shortcut.hash, shortcut_height)?
                .children(0)
        } else {
            lock(batch)?.children(i_shortcut)
        };
        let (Some(key), Some(value)) = (key, value) else {
            return Err(TrieError::InconsistentTree);
        };
        // One level higher, so the hash changes
        let node = NodeHash::shortcut(leaf_hash(self.hash, &key.hash, &value.hash, height));

        if i_batch == 0 {
            let snapshot = {
                let mut batch = lock(batch)?;
                batch.set_shortcut(true);
                batch.set_children(0, Some(key), Some(value));
                batch.clear_children(i_shortcut);
                batch.clone()
            };
            self.store_node(snapshot, node, root, height)?;
        } else if is_batch_root(shortcut_height) {
            lock(batch)?.set_children(i_batch, Some(key), Some(value));
            self.discard(shortcut.hash, shortcut_height, true)?;
        } else {
            let mut batch = lock(batch)?;
            batch.set_children(i_batch, Some(key), Some(value));
            batch.clear_children(i_shortcut);
        }
        Ok(UpdateResult {
            node: Some(node),
            deleted: true,
        })
    }

    /// Stores a key/value pair as the shortcut leaf of the node at `i_batch`.
    fn leaf_hash(
        &self,
        key: &H256,
        value: &H256,
        old_root: Option<NodeHash>,
        batch: &Mutex<Batch>,
        i_batch: usize,
        height: usize,
    ) -> Result<NodeHash, TrieError> {
        let node = NodeHash::shortcut(leaf_hash(self.hash, key, value, height));
        let snapshot = {
            let mut batch = lock(batch)?;
            batch.set_children(i_batch, Some(NodeHash::raw(*key)), Some(NodeHash::raw(*value)));
            is_batch_root(height).then(|| {
                batch.set_shortcut(true);
                batch.clone()
            })
        };
        if let Some(snapshot) = snapshot {
            self.store_node(snapshot, node, old_root, height)?;
        }
        Ok(node)
    }

    /// Hashes two children into the node at `i_batch`. An empty child hashes as [`DEFAULT_LEAF`].
    fn interior_hash(
        &self,
        left: Option<NodeHash>,
        right: Option<NodeHash>,
        old_root: Option<NodeHash>,
        batch: &Mutex<Batch>,
        i_batch: usize,
        height: usize,
    ) -> Result<NodeHash, TrieError> {
        let l = left.map_or(*DEFAULT_LEAF, |node| node.hash);
        let r = right.map_or(*DEFAULT_LEAF, |node| node.hash);
        let node = NodeHash::interior((self.hash)(&[l.as_bytes(), r.as_bytes()]));
        let snapshot = {
            let mut batch = lock(batch)?;
            batch.set_children(i_batch, left, right);
            is_batch_root(height).then(|| {
                batch.set_shortcut(false);
                batch.clone()
            })
        };
        if let Some(snapshot) = snapshot {
            self.store_node(snapshot, node, old_root, height)?;
        }
        Ok(node)
    }

    /// Records the batch under its new digest and drops the one it replaces.
    fn store_node(
        &self,
        batch: Batch,
        node: NodeHash,
        old_root: Option<NodeHash>,
        height: usize,
    ) -> Result<(), TrieError> {
        if old_root.is_some_and(|old| old.hash == node.hash) {
            return Ok(());
        }
        self.cache.stage(node.hash, batch, height)?;
        if let Some(old) = old_root {
            self.discard(old.hash, height, false)?;
        }
        Ok(())
    }

    /// Atomic updates keep replaced batches, except the ones left behind by a
    /// shortcut moving up.
    fn discard(&self, node: H256, height: usize, moving_up: bool) -> Result<(), TrieError> {
        self.cache
            .discard(node, height, !self.atomic || moving_up)
    }
}

/// Index of the first key going right at `bit`. Keys must be sorted and share
/// every bit before `bit`.
pub(crate) fn split_keys(keys: &[H256], bit: usize) -> usize {
    keys.partition_point(|key| !bit_is_set(key.as_bytes(), bit))
}

/// Adds the pair of a demoted shortcut to the sorted update, unless the update
/// already writes that key. An update deleting the key removes both.
pub(crate) fn merge_shortcut(
    keys: &[H256],
    values: &[H256],
    key: H256,
    value: H256,
) -> (Vec<H256>, Vec<H256>) {
    let mut keys = keys.to_vec();
    let mut values = values.to_vec();
    match keys.binary_search(&key) {
        Ok(i) if values[i] == *DEFAULT_LEAF => {
            keys.remove(i);
            values.remove(i);
        }
        Ok(_) => {}
        Err(i) => {
            keys.insert(i, key);
            values.insert(i, value);
        }
    }
    (keys, values)
}
