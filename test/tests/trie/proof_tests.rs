use ethereum_types::H256;
use mapserver_test::{key_with_bits, random_pairs};
use mapserver_trie::{
    CompressedMerkleProof, DEFAULT_LEAF, InMemoryTrieDB, ProofVerifier, Trie, TrieContext, keccak256,
    verify_inclusion, verify_non_inclusion,
};
use proptest::collection::btree_set;
use proptest::prelude::*;

#[test]
fn proof_of_empty_trie() {
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    let key = H256::repeat_byte(9);
    let proof = trie.merkle_proof(&ctx, &key).unwrap();
    assert!(!proof.included);
    assert!(proof.audit_path.is_empty());
    assert_eq!(proof.proof_key, None);
    assert!(verify_non_inclusion(None, &proof.audit_path, &key, None, None));
}

#[test]
fn shortcut_witness_proof() {
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    let left = H256::zero();
    let right = key_with_bits(&[0]);
    let root = trie
        .update(&ctx, &[left, right], &[H256::repeat_byte(1), H256::repeat_byte(2)])
        .unwrap()
        .unwrap();

    // Goes left at the root, where the shortcut of `left` stands in for it
    let absent = key_with_bits(&[1]);
    let proof = trie.merkle_proof(&ctx, &absent).unwrap();
    assert!(!proof.included);
    assert_eq!(proof.proof_key, Some(left));
    assert_eq!(proof.audit_path.len(), 1);
    assert!(verify_non_inclusion(
        Some(&root),
        &proof.audit_path,
        &absent,
        proof.proof_value.as_ref(),
        proof.proof_key.as_ref(),
    ));
}

#[test]
fn proof_reaches_empty_branch() {
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    // Two keys both under the left half, so the right half of the root is empty
    let a = H256::zero();
    let b = key_with_bits(&[1]);
    let root = trie
        .update(&ctx, &[a, b], &[H256::repeat_byte(1), H256::repeat_byte(2)])
        .unwrap()
        .unwrap();

    let absent = key_with_bits(&[0]);
    let proof = trie.merkle_proof(&ctx, &absent).unwrap();
    assert!(!proof.included);
    assert_eq!(proof.proof_key, None);
    assert_eq!(proof.proof_value, None);
    assert_eq!(proof.audit_path.len(), 1);
    assert_ne!(proof.audit_path[0], *DEFAULT_LEAF);
    assert!(verify_non_inclusion(Some(&root), &proof.audit_path, &absent, None, None));
    // The same path does not prove a key on the occupied side is absent
    assert!(!verify_non_inclusion(Some(&root), &proof.audit_path, &a, None, None));
}

#[test]
fn tampered_proofs_fail() {
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    let (keys, values) = random_pairs(300);
    let root = trie.update(&ctx, &keys, &values).unwrap().unwrap();

    let proof = trie.merkle_proof(&ctx, &keys[42]).unwrap();
    assert!(verify_inclusion(&root, &proof.audit_path, &keys[42], &values[42]));

    let mut path = proof.audit_path.clone();
    path[0] = H256::repeat_byte(0xee);
    assert!(!verify_inclusion(&root, &path, &keys[42], &values[42]));

    let mut truncated = proof.audit_path.clone();
    truncated.pop();
    assert!(!verify_inclusion(&root, &truncated, &keys[42], &values[42]));

    assert!(!verify_inclusion(&root, &proof.audit_path, &keys[43], &values[42]));
}

#[test]
fn compressed_proof_verifies_like_full_proof() {
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    let (keys, values) = random_pairs(1_000);
    let root = trie.update(&ctx, &keys, &values).unwrap().unwrap();
    let verifier = ProofVerifier::default();

    for (key, value) in keys.iter().zip(values.iter()).step_by(37) {
        let proof = trie.merkle_proof(&ctx, key).unwrap();
        let compressed = trie.merkle_proof_compressed(&ctx, key).unwrap();
        assert_eq!(compressed.length, proof.audit_path.len());
        assert_eq!(compressed.bitmap.len(), proof.audit_path.len() / 8 + 1);
        assert!(compressed.audit_path.iter().all(|sibling| *sibling != *DEFAULT_LEAF));
        assert!(verifier.verify_inclusion_compressed(
            &root,
            &compressed.bitmap,
            &compressed.audit_path,
            compressed.length,
            key,
            value,
        ));
    }
}

#[test]
fn malformed_compressed_proof_rejected() {
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    let (keys, values) = random_pairs(200);
    let root = trie.update(&ctx, &keys, &values).unwrap().unwrap();
    let compressed = trie.merkle_proof_compressed(&ctx, &keys[0]).unwrap();

    let short = CompressedMerkleProof {
        bitmap: vec![],
        ..compressed
    };
    assert!(short.decompress().is_none());
    assert!(!ProofVerifier::default().verify_inclusion_compressed(
        &root,
        &short.bitmap,
        &short.audit_path,
        short.length,
        &keys[0],
        &values[0],
    ));
}

#[test]
fn verifier_follows_trie_hash() {
    let ctx = TrieContext::new();
    let trie = Trie::with_hasher(Box::new(InMemoryTrieDB::new_empty()), None, keccak256);
    let (keys, values) = random_pairs(50);
    let root = trie.update(&ctx, &keys, &values).unwrap();
    let proof = trie.merkle_proof(&ctx, &keys[5]).unwrap();
    assert!(trie.verifier().verify(root.as_ref(), &keys[5], &proof));
    assert!(ProofVerifier::new(keccak256).verify(root.as_ref(), &keys[5], &proof));
    assert!(!ProofVerifier::default().verify(root.as_ref(), &keys[5], &proof));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn proptest_non_inclusion(
        present in btree_set(any::<[u8; 32]>(), 1..100),
        absent in btree_set(any::<[u8; 32]>(), 1..20),
    ) {
        let ctx = TrieContext::new();
        let keys: Vec<H256> = present.iter().copied().map(H256).collect();
        let values: Vec<H256> = keys.iter().map(|key| mapserver_trie::sha256(&[key.as_bytes(), b"v"])).collect();
        let trie = Trie::new_temp();
        let root = trie.update(&ctx, &keys, &values).unwrap();

        for key in absent.iter().copied().map(H256) {
            if present.contains(&key.0) {
                continue;
            }
            let proof = trie.merkle_proof(&ctx, &key).unwrap();
            prop_assert!(!proof.included);
            prop_assert!(trie.verifier().verify(root.as_ref(), &key, &proof));
            if let Some(proof_key) = proof.proof_key {
                // The witness can never prove an included key absent
                prop_assert!(!verify_non_inclusion(
                    root.as_ref(),
                    &proof.audit_path,
                    &proof_key,
                    proof.proof_value.as_ref(),
                    Some(&proof_key),
                ));
            }
        }
    }
}
