use serde::{Deserialize, Serialize};

use crate::TRIE_HEIGHT;

pub const TRIE_CONFIG_PREFIX: &str = "TRIE_";

/// Number of past roots kept by default by atomic updates.
pub const DEFAULT_MAX_PAST_ROOTS: usize = 300;

/// Stack size of the update workers. A descent can recurse through all 256
/// levels on a single worker.
pub const DEFAULT_WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Error deserializing config from env: {err}. From config: {from:?}")]
    ConfigDeserializationError { err: envy::Error, from: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrieConfig {
    /// Batches at or above this height stay in the hot cache across commits.
    /// Lower values keep more of the tree near the root in memory.
    pub cache_height_limit: usize,
    /// How many roots produced by atomic updates are remembered.
    pub max_past_roots: usize,
    /// Stack size in bytes of the threads running updates and cache loads.
    pub worker_stack_size: usize,
    /// Number of those threads, `0` lets rayon pick one per CPU.
    pub worker_threads: usize,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            // Disables the hot cache.
            cache_height_limit: TRIE_HEIGHT + 1,
            max_past_roots: DEFAULT_MAX_PAST_ROOTS,
            worker_stack_size: DEFAULT_WORKER_STACK_SIZE,
            worker_threads: 0,
        }
    }
}

impl TrieConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        envy::prefixed(TRIE_CONFIG_PREFIX)
            .from_env::<Self>()
            .map_err(|e| ConfigError::ConfigDeserializationError {
                err: e,
                from: "TrieConfig".to_string(),
            })
    }

    pub fn with_cache_height_limit(mut self, cache_height_limit: usize) -> Self {
        self.cache_height_limit = cache_height_limit;
        self
    }

    pub fn to_env(&self) -> String {
        format!(
            "
{TRIE_CONFIG_PREFIX}CACHE_HEIGHT_LIMIT={}
{TRIE_CONFIG_PREFIX}MAX_PAST_ROOTS={}
{TRIE_CONFIG_PREFIX}WORKER_STACK_SIZE={}
{TRIE_CONFIG_PREFIX}WORKER_THREADS={}
",
            self.cache_height_limit,
            self.max_past_roots,
            self.worker_stack_size,
            self.worker_threads,
        )
    }
}
