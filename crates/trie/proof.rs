//! Merkle proofs of inclusion and non-inclusion.
//!
//! An audit path lists sibling digests from the leaf up to the root. A proof
//! of non-inclusion either ends on an empty subtree (no witness) or on a
//! shortcut leaf holding another key, the witness, that shares the key's path
//! down to that height.

use std::fmt;

use ethereum_types::H256;

use crate::{
    DEFAULT_LEAF, TRIE_HEIGHT, Trie,
    batch::{Batch, is_batch_root},
    bits::{bit_is_set, set_bit},
    context::TrieContext,
    error::TrieError,
    hasher::{HashFn, leaf_hash, sha256},
    node_hash::NodeHash,
};

/// Proof for a key, as produced by [`Trie::merkle_proof`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MerkleProof {
    /// Sibling digests, leaf-adjacent first.
    pub audit_path: Vec<H256>,
    pub included: bool,
    /// Key of the shortcut leaf found in place of the requested key, if any.
    pub proof_key: Option<H256>,
    /// Value of the requested key when included, of the witness otherwise.
    pub proof_value: Option<H256>,
}

/// A [`MerkleProof`] where every [`DEFAULT_LEAF`] sibling is left out of the
/// audit path and marked as a clear bit in `bitmap`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressedMerkleProof {
    /// Bit `i` is set when the `i`-th sibling is in `audit_path`.
    pub bitmap: Vec<u8>,
    pub audit_path: Vec<H256>,
    /// Number of siblings in the full audit path.
    pub length: usize,
    pub included: bool,
    pub proof_key: Option<H256>,
    pub proof_value: Option<H256>,
}

impl MerkleProof {
    pub fn compress(&self) -> CompressedMerkleProof {
        let length = self.audit_path.len();
        let mut bitmap = vec![0u8; length / 8 + 1];
        let mut audit_path = Vec::new();
        for (i, sibling) in self.audit_path.iter().enumerate() {
            if *sibling != *DEFAULT_LEAF {
                set_bit(&mut bitmap, i);
                audit_path.push(*sibling);
            }
        }
        CompressedMerkleProof {
            bitmap,
            audit_path,
            length,
            included: self.included,
            proof_key: self.proof_key,
            proof_value: self.proof_value,
        }
    }
}

impl CompressedMerkleProof {
    /// Expands back into a full proof, or `None` if the bitmap does not match the audit path.
    pub fn decompress(&self) -> Option<MerkleProof> {
        let audit_path = decompress_path(&self.bitmap, &self.audit_path, self.length)?;
        Some(MerkleProof {
            audit_path,
            included: self.included,
            proof_key: self.proof_key,
            proof_value: self.proof_value,
        })
    }
}

fn decompress_path(bitmap: &[u8], audit_path: &[H256], length: usize) -> Option<Vec<H256>> {
    if length > TRIE_HEIGHT || length > bitmap.len() * 8 {
        return None;
    }
    let mut siblings = audit_path.iter();
    let full = (0..length)
        .map(|i| {
            if bit_is_set(bitmap, i) {
                siblings.next().copied()
            } else {
                Some(*DEFAULT_LEAF)
            }
        })
        .collect::<Option<Vec<_>>>()?;
    // Every compressed sibling must be consumed
    siblings.next().is_none().then_some(full)
}

/// Where a proof walk stopped.
#[derive(Debug, Clone, Copy, Default)]
struct Witness {
    included: bool,
    key: Option<H256>,
    value: Option<H256>,
}

impl Trie {
    /// Proof for `key` under the current root.
    pub fn merkle_proof(&self, ctx: &TrieContext, key: &H256) -> Result<MerkleProof, TrieError> {
        let root = self.root_lock_read()?;
        self.proof_from(ctx, *root, key, true)
    }

    /// Proof for `key` under `root`, which must still have all its batches
    /// available (for instance a root kept by [`Trie::atomic_update`]).
    pub fn merkle_proof_at(
        &self,
        ctx: &TrieContext,
        root: Option<H256>,
        key: &H256,
    ) -> Result<MerkleProof, TrieError> {
        let current = self.root_lock_read()?;
        self.proof_from(ctx, root, key, root == *current)
    }

    pub fn merkle_proof_compressed(
        &self,
        ctx: &TrieContext,
        key: &H256,
    ) -> Result<CompressedMerkleProof, TrieError> {
        Ok(self.merkle_proof(ctx, key)?.compress())
    }

    pub fn merkle_proof_compressed_at(
        &self,
        ctx: &TrieContext,
        root: Option<H256>,
        key: &H256,
    ) -> Result<CompressedMerkleProof, TrieError> {
        Ok(self.merkle_proof_at(ctx, root, key)?.compress())
    }

    /// Verifier using the same hash function as this trie.
    pub fn verifier(&self) -> ProofVerifier {
        ProofVerifier::new(self.hash)
    }

    fn proof_from(
        &self,
        ctx: &TrieContext,
        root: Option<H256>,
        key: &H256,
        keep_hot: bool,
    ) -> Result<MerkleProof, TrieError> {
        let mut audit_path = Vec::new();
        let witness = self.proof_node(
            ctx,
            &mut audit_path,
            root.map(NodeHash::interior),
            key,
            None,
            0,
            TRIE_HEIGHT,
            keep_hot,
        )?;
        Ok(MerkleProof {
            audit_path,
            included: witness.included,
            proof_key: witness.key,
            proof_value: witness.value,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn proof_node(
        &self,
        ctx: &TrieContext,
        audit_path: &mut Vec<H256>,
        node: Option<NodeHash>,
        key: &H256,
        batch: Option<&Batch>,
        i_batch: usize,
        height: usize,
        keep_hot: bool,
    ) -> Result<Witness, TrieError> {
        let Some(node) = node else {
            return Ok(Witness::default());
        };
        if is_batch_root(height) {
            // Batches of older roots are read without being cached
            let batch = if keep_hot {
                self.cache.load_batch(ctx, node.hash, height)?
            } else {
                self.cache.peek_batch(ctx, node.hash)?
            };
            return self.proof_in_batch(ctx, audit_path, key, &batch, 0, height, keep_hot);
        }
        let batch = batch.ok_or(TrieError::InconsistentTree)?;
        self.proof_in_batch(ctx, audit_path, key, batch, i_batch, height, keep_hot)
    }

    #[allow(clippy::too_many_arguments)]
    fn proof_in_batch(
        &self,
        ctx: &TrieContext,
        audit_path: &mut Vec<H256>,
        key: &H256,
        batch: &Batch,
        i_batch: usize,
        height: usize,
        keep_hot: bool,
    ) -> Result<Witness, TrieError> {
        let (left, right) = batch.children(i_batch);
        if batch.is_shortcut_at(i_batch) || height == 0 {
            let (Some(leaf_key), Some(leaf_value)) = (left, right) else {
                return Err(TrieError::InconsistentTree);
            };
            if leaf_key.hash == *key {
                return Ok(Witness {
                    included: true,
                    key: None,
                    value: Some(leaf_value.hash),
                });
            }
            return Ok(Witness {
                included: false,
                key: Some(leaf_key.hash),
                value: Some(leaf_value.hash),
            });
        }
        let (next, sibling, i_next) = if bit_is_set(key.as_bytes(), TRIE_HEIGHT - height) {
            (right, left, 2 * i_batch + 2)
        } else {
            (left, right, 2 * i_batch + 1)
        };
        let witness = self.proof_node(
            ctx,
            audit_path,
            next,
            key,
            Some(batch),
            i_next,
            height - 1,
            keep_hot,
        )?;
        audit_path.push(sibling.map_or(*DEFAULT_LEAF, |sibling| sibling.hash));
        Ok(witness)
    }

    /// Value stored for `key` under `root`, walking the batches the same way a proof does.
    pub(crate) fn get_from(
        &self,
        ctx: &TrieContext,
        root: Option<H256>,
        key: &H256,
        keep_hot: bool,
    ) -> Result<Option<H256>, TrieError> {
        let mut audit_path = Vec::new();
        let witness = self.proof_node(
            ctx,
            &mut audit_path,
            root.map(NodeHash::interior),
            key,
            None,
            0,
            TRIE_HEIGHT,
            keep_hot,
        )?;
        Ok(witness.value.filter(|_| witness.included))
    }
}

/// Checks proofs against a root without access to the trie.
#[derive(Clone, Copy)]
pub struct ProofVerifier {
    hash: HashFn,
}

impl fmt::Debug for ProofVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofVerifier").finish_non_exhaustive()
    }
}

impl Default for ProofVerifier {
    fn default() -> Self {
        Self::new(sha256)
    }
}

impl ProofVerifier {
    pub const fn new(hash: HashFn) -> Self {
        Self { hash }
    }

    /// Whether `key` maps to `value` in the trie rooted at `root`.
    pub fn verify_inclusion(
        &self,
        root: &H256,
        audit_path: &[H256],
        key: &H256,
        value: &H256,
    ) -> bool {
        if audit_path.len() > TRIE_HEIGHT {
            return false;
        }
        let leaf = leaf_hash(self.hash, key, value, TRIE_HEIGHT - audit_path.len());
        self.fold(key, leaf, audit_path) == *root
    }

    /// Whether `key` is absent from the trie rooted at `root`.
    ///
    /// Without `proof_key` the path must lead to an empty subtree. With it the
    /// witness must be included, differ from `key` and share its path.
    pub fn verify_non_inclusion(
        &self,
        root: Option<&H256>,
        audit_path: &[H256],
        key: &H256,
        value: Option<&H256>,
        proof_key: Option<&H256>,
    ) -> bool {
        let Some(root) = root else {
            // Nothing is included in an empty trie
            return audit_path.is_empty() && proof_key.is_none();
        };
        if audit_path.len() > TRIE_HEIGHT {
            return false;
        }
        match (proof_key, value) {
            (None, _) => {
                !audit_path.is_empty() && self.fold(key, *DEFAULT_LEAF, audit_path) == *root
            }
            (Some(proof_key), Some(value)) => {
                proof_key != key
                    && (0..audit_path.len()).all(|bit| {
                        bit_is_set(key.as_bytes(), bit) == bit_is_set(proof_key.as_bytes(), bit)
                    })
                    && self.verify_inclusion(root, audit_path, proof_key, value)
            }
            (Some(_), None) => false,
        }
    }

    pub fn verify_inclusion_compressed(
        &self,
        root: &H256,
        bitmap: &[u8],
        audit_path: &[H256],
        length: usize,
        key: &H256,
        value: &H256,
    ) -> bool {
        decompress_path(bitmap, audit_path, length)
            .is_some_and(|audit_path| self.verify_inclusion(root, &audit_path, key, value))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn verify_non_inclusion_compressed(
        &self,
        root: Option<&H256>,
        bitmap: &[u8],
        audit_path: &[H256],
        length: usize,
        key: &H256,
        value: Option<&H256>,
        proof_key: Option<&H256>,
    ) -> bool {
        decompress_path(bitmap, audit_path, length).is_some_and(|audit_path| {
            self.verify_non_inclusion(root, &audit_path, key, value, proof_key)
        })
    }

    /// Checks a whole [`MerkleProof`] for `key`, whichever kind it is.
    pub fn verify(&self, root: Option<&H256>, key: &H256, proof: &MerkleProof) -> bool {
        match (proof.included, root, proof.proof_value.as_ref()) {
            (true, Some(root), Some(value)) => {
                self.verify_inclusion(root, &proof.audit_path, key, value)
            }
            (true, _, _) => false,
            (false, root, value) => self.verify_non_inclusion(
                root,
                &proof.audit_path,
                key,
                value,
                proof.proof_key.as_ref(),
            ),
        }
    }

    /// Folds the audit path into a root, starting from `leaf`. The `i`-th
    /// sibling sits at depth `len - i`, so the key bit at that depth picks the side.
    fn fold(&self, key: &H256, leaf: H256, audit_path: &[H256]) -> H256 {
        let depth = audit_path.len();
        audit_path
            .iter()
            .enumerate()
            .fold(leaf, |current, (i, sibling)| {
                if bit_is_set(key.as_bytes(), depth - 1 - i) {
                    (self.hash)(&[sibling.as_bytes(), current.as_bytes()])
                } else {
                    (self.hash)(&[current.as_bytes(), sibling.as_bytes()])
                }
            })
    }
}

/// [`ProofVerifier::verify_inclusion`] with SHA-256.
pub fn verify_inclusion(root: &H256, audit_path: &[H256], key: &H256, value: &H256) -> bool {
    ProofVerifier::default().verify_inclusion(root, audit_path, key, value)
}

/// [`ProofVerifier::verify_non_inclusion`] with SHA-256.
pub fn verify_non_inclusion(
    root: Option<&H256>,
    audit_path: &[H256],
    key: &H256,
    value: Option<&H256>,
    proof_key: Option<&H256>,
) -> bool {
    ProofVerifier::default().verify_non_inclusion(root, audit_path, key, value, proof_key)
}
