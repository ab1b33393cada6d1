use ethereum_types::H256;

use crate::{HASH_LENGTH, error::TrieError};

/// Size in bytes of a digest as stored inside a batch: the hash plus its kind tag.
pub const NODE_HASH_LENGTH: usize = HASH_LENGTH + 1;

/// What a digest stored in a batch slot points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    /// Hash of an interior node.
    Interior = 0,
    /// Hash of a shortcut leaf, `H(key || value || height)`.
    Shortcut = 1,
    /// Raw key or value of the shortcut leaf stored just above it.
    Raw = 2,
}

impl TryFrom<u8> for NodeKind {
    type Error = TrieError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(NodeKind::Interior),
            1 => Ok(NodeKind::Shortcut),
            2 => Ok(NodeKind::Raw),
            other => Err(TrieError::MalformedBatch(format!(
                "unknown node kind tag {other}"
            ))),
        }
    }
}

/// A tagged 32-byte digest, the node pointer held by batch slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHash {
    pub hash: H256,
    pub kind: NodeKind,
}

impl NodeHash {
    pub const fn interior(hash: H256) -> Self {
        Self {
            hash,
            kind: NodeKind::Interior,
        }
    }

    pub const fn shortcut(hash: H256) -> Self {
        Self {
            hash,
            kind: NodeKind::Shortcut,
        }
    }

    pub const fn raw(hash: H256) -> Self {
        Self {
            hash,
            kind: NodeKind::Raw,
        }
    }

    pub fn is_shortcut(&self) -> bool {
        self.kind == NodeKind::Shortcut
    }

    pub fn to_bytes(&self) -> [u8; NODE_HASH_LENGTH] {
        let mut buffer = [0u8; NODE_HASH_LENGTH];
        buffer[..HASH_LENGTH].copy_from_slice(self.hash.as_bytes());
        buffer[HASH_LENGTH] = self.kind as u8;
        buffer
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TrieError> {
        if bytes.len() != NODE_HASH_LENGTH {
            return Err(TrieError::MalformedBatch(format!(
                "expected a {NODE_HASH_LENGTH} byte slot, got {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            hash: H256::from_slice(&bytes[..HASH_LENGTH]),
            kind: NodeKind::try_from(bytes[HASH_LENGTH])?,
        })
    }
}
