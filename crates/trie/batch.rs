//! The batch: four trie levels persisted together under the digest of their top node.
//!
//! Nodes inside a batch are addressed as an implicit binary heap. The node at
//! offset `i` (0..15) has its children at slots `2i + 1` and `2i + 2`; offset 0
//! is the batch root, whose own digest is the batch key in the store and is
//! therefore not kept in a slot.
//!
//! Encoded form: a 4-byte bitmap followed by the present 33-byte slots in
//! ascending order. Bit `i - 1` flags slot `i`; bit 31 marks a shortcut batch,
//! whose payload is exactly the key slot and the value slot.

use crate::{
    bits::{bit_is_set, set_bit},
    error::TrieError,
    node_hash::{NODE_HASH_LENGTH, NodeHash},
};

/// Number of trie levels covered by one batch.
pub const BATCH_HEIGHT: usize = 4;
/// Slot 0 stands for the shortcut flag, slots 1..=30 hold digests.
pub const BATCH_SLOTS: usize = 31;

const BITMAP_LENGTH: usize = 4;
const SHORTCUT_BIT: usize = 31;

/// Whether a node at `height` is the root of a batch.
#[inline]
pub const fn is_batch_root(height: usize) -> bool {
    height % BATCH_HEIGHT == 0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    shortcut: bool,
    slots: [Option<NodeHash>; BATCH_SLOTS],
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub const fn new() -> Self {
        Self {
            shortcut: false,
            slots: [None; BATCH_SLOTS],
        }
    }

    pub fn is_shortcut(&self) -> bool {
        self.shortcut
    }

    pub fn set_shortcut(&mut self, shortcut: bool) {
        self.shortcut = shortcut;
    }

    /// Whether the node at offset `i` is a shortcut leaf.
    pub fn is_shortcut_at(&self, i: usize) -> bool {
        if i == 0 {
            self.shortcut
        } else {
            self.slots[i].is_some_and(|node| node.is_shortcut())
        }
    }

    /// Left and right children of the node at offset `i`. For a shortcut these
    /// are its key and value.
    pub fn children(&self, i: usize) -> (Option<NodeHash>, Option<NodeHash>) {
        (self.slots[2 * i + 1], self.slots[2 * i + 2])
    }

    pub fn set_children(&mut self, i: usize, left: Option<NodeHash>, right: Option<NodeHash>) {
        self.slots[2 * i + 1] = left;
        self.slots[2 * i + 2] = right;
    }

    pub fn clear_children(&mut self, i: usize) {
        self.set_children(i, None, None);
    }

    pub fn encode(&self) -> Result<Vec<u8>, TrieError> {
        let mut encoded = vec![0u8; BITMAP_LENGTH];
        if self.shortcut {
            let (Some(key), Some(value)) = self.children(0) else {
                return Err(TrieError::InconsistentTree);
            };
            encoded.reserve(2 * NODE_HASH_LENGTH);
            set_bit(&mut encoded[..BITMAP_LENGTH], SHORTCUT_BIT);
            set_bit(&mut encoded[..BITMAP_LENGTH], 0);
            set_bit(&mut encoded[..BITMAP_LENGTH], 1);
            encoded.extend_from_slice(&key.to_bytes());
            encoded.extend_from_slice(&value.to_bytes());
            return Ok(encoded);
        }
        for (i, slot) in self.slots.iter().enumerate().skip(1) {
            if let Some(node) = slot {
                set_bit(&mut encoded[..BITMAP_LENGTH], i - 1);
                encoded.extend_from_slice(&node.to_bytes());
            }
        }
        Ok(encoded)
    }

    pub fn decode(encoded: &[u8]) -> Result<Self, TrieError> {
        if encoded.len() < BITMAP_LENGTH || (encoded.len() - BITMAP_LENGTH) % NODE_HASH_LENGTH != 0
        {
            return Err(TrieError::MalformedBatch(format!(
                "length {} is not 4 + 33k",
                encoded.len()
            )));
        }
        let (bitmap, payload) = encoded.split_at(BITMAP_LENGTH);
        let mut slots = payload.chunks_exact(NODE_HASH_LENGTH);
        let mut batch = Batch::new();

        if bit_is_set(bitmap, SHORTCUT_BIT) {
            if payload.len() != 2 * NODE_HASH_LENGTH {
                return Err(TrieError::MalformedBatch(format!(
                    "shortcut batch carries {} bytes of payload",
                    payload.len()
                )));
            }
            batch.shortcut = true;
            for i in 1..=2 {
                let slot = slots.next().ok_or(TrieError::InconsistentTree)?;
                batch.slots[i] = Some(NodeHash::from_slice(slot)?);
            }
            return Ok(batch);
        }

        for i in 1..BATCH_SLOTS {
            if !bit_is_set(bitmap, i - 1) {
                continue;
            }
            let slot = slots.next().ok_or_else(|| {
                TrieError::MalformedBatch(format!("bitmap flags slot {i} but payload ended"))
            })?;
            batch.slots[i] = Some(NodeHash::from_slice(slot)?);
        }
        if slots.next().is_some() {
            return Err(TrieError::MalformedBatch(
                "payload holds more slots than the bitmap flags".to_string(),
            ));
        }
        Ok(batch)
    }
}
