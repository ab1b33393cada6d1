use ethereum_types::H256;
use hex_literal::hex;
use mapserver_test::{init_tracing, key_with_bits, random_pairs};
use mapserver_trie::{
    DEFAULT_LEAF, InMemoryTrieDB, TRIE_HEIGHT, Trie, TrieConfig, TrieContext, TrieDB, TrieError,
    sha256,
};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;

#[test]
fn two_leaves_under_root() {
    init_tracing();
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    let (k0, v0) = (H256::zero(), H256::repeat_byte(1));
    let (k1, v1) = (key_with_bits(&[0]), H256::repeat_byte(2));

    let root = trie.update(&ctx, &[k0], &[v0]).unwrap().unwrap();
    assert_eq!(root, sha256(&[k0.as_bytes(), v0.as_bytes(), &[0]]));

    let root = trie.update(&ctx, &[k1], &[v1]).unwrap().unwrap();
    let left = sha256(&[k0.as_bytes(), v0.as_bytes(), &[255]]);
    let right = sha256(&[k1.as_bytes(), v1.as_bytes(), &[255]]);
    assert_eq!(root, sha256(&[left.as_bytes(), right.as_bytes()]));
    assert_eq!(
        root.as_bytes(),
        hex!("e6e05b6445e50ccacb270fb1dab4e26a228cbb3a47f22734fb6dfe48066c73a1")
    );
}

#[test]
fn sibling_of_empty_subtree_hashes_default_leaf() {
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    // Both keys go left at the root, then split on the second bit
    let (k0, v0) = (H256::zero(), H256::repeat_byte(1));
    let (k1, v1) = (key_with_bits(&[1]), H256::repeat_byte(2));
    let root = trie.update(&ctx, &[k0, k1], &[v0, v1]).unwrap().unwrap();

    let left = sha256(&[k0.as_bytes(), v0.as_bytes(), &[254]]);
    let right = sha256(&[k1.as_bytes(), v1.as_bytes(), &[254]]);
    let inner = sha256(&[left.as_bytes(), right.as_bytes()]);
    assert_eq!(root, sha256(&[inner.as_bytes(), DEFAULT_LEAF.as_bytes()]));
}

#[test]
fn many_updates_then_restart() {
    init_tracing();
    let ctx = TrieContext::new();
    let db = InMemoryTrieDB::new_empty();
    let trie = Trie::new(Box::new(db.clone()));
    let (keys, values) = random_pairs(5_000);
    for (keys, values) in keys.chunks(1_000).zip(values.chunks(1_000)) {
        trie.update(&ctx, keys, values).unwrap();
        trie.commit(&ctx).unwrap();
    }
    let root = trie.root().unwrap();

    let reopened = Trie::open(Box::new(db), root);
    for (key, value) in keys.iter().zip(values.iter()) {
        assert_eq!(reopened.get(&ctx, key).unwrap(), Some(*value));
    }
}

#[test]
fn overwritten_values_replace_old_ones() {
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    let (keys, first) = random_pairs(500);
    let (_, second) = random_pairs(keys.len());
    let n = first.len().min(second.len());
    trie.update(&ctx, &keys[..n], &first[..n]).unwrap();
    trie.update(&ctx, &keys[..n], &second[..n]).unwrap();
    for i in (0..n).step_by(13) {
        assert_eq!(trie.get(&ctx, &keys[i]).unwrap(), Some(second[i]));
    }

    let fresh = Trie::new_temp();
    assert_eq!(
        fresh.update(&ctx, &keys[..n], &second[..n]).unwrap(),
        trie.root().unwrap()
    );
}

#[test]
fn committed_store_holds_only_live_batches() {
    let ctx = TrieContext::new();
    let churned = InMemoryTrieDB::new_empty();
    let trie = Trie::new(Box::new(churned.clone()));
    let (keys, values) = random_pairs(2_000);
    trie.update(&ctx, &keys, &values).unwrap();
    trie.commit(&ctx).unwrap();
    let deleted: Vec<_> = keys.iter().step_by(3).copied().collect();
    trie.update(&ctx, &deleted, &vec![*DEFAULT_LEAF; deleted.len()])
        .unwrap();
    trie.commit(&ctx).unwrap();

    let (kept_keys, kept_values): (Vec<_>, Vec<_>) = keys
        .iter()
        .zip(values.iter())
        .filter(|(key, _)| deleted.binary_search(*key).is_err())
        .map(|(k, v)| (*k, *v))
        .unzip();
    let direct = InMemoryTrieDB::new_empty();
    let reference = Trie::new(Box::new(direct.clone()));
    reference.update(&ctx, &kept_keys, &kept_values).unwrap();
    reference.commit(&ctx).unwrap();

    assert_eq!(trie.root().unwrap(), reference.root().unwrap());
    assert_eq!(churned.len().unwrap(), direct.len().unwrap());
}

#[test]
fn missing_batch_is_reported() {
    let ctx = TrieContext::new();
    let db = InMemoryTrieDB::new_empty();
    let trie = Trie::new(Box::new(db.clone()));
    let (keys, values) = random_pairs(100);
    let root = trie.update(&ctx, &keys, &values).unwrap().unwrap();
    trie.commit(&ctx).unwrap();

    db.delete_batch(vec![root]).unwrap();
    let reopened = Trie::open(Box::new(db), Some(root));
    let err = reopened.get(&ctx, &keys[0]).unwrap_err();
    assert!(matches!(err, TrieError::BatchNotFound(node) if node == root));
}

#[test]
fn deadline_exceeded() {
    let ctx = TrieContext::new();
    let db = InMemoryTrieDB::new_empty();
    let trie = Trie::new(Box::new(db.clone()));
    let (keys, values) = random_pairs(100);
    let root = trie.update(&ctx, &keys, &values).unwrap();
    trie.commit(&ctx).unwrap();

    let reopened = Trie::open(Box::new(db), root);
    let expired = TrieContext::with_deadline(std::time::Instant::now());
    assert!(matches!(
        reopened.update(&expired, &keys[..1], &values[1..2]),
        Err(TrieError::DeadlineExceeded)
    ));
}

#[test]
fn height_wraps_at_root() {
    // A lone key at the root hashes its height as 0, the same as a leaf at the bottom
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    let (key, value) = (H256::repeat_byte(3), H256::repeat_byte(4));
    let root = trie.update(&ctx, &[key], &[value]).unwrap().unwrap();
    assert_eq!(
        root,
        sha256(&[key.as_bytes(), value.as_bytes(), &[(TRIE_HEIGHT % 256) as u8]])
    );
}

#[test]
fn deep_pairs_on_a_single_worker() {
    init_tracing();
    let ctx = TrieContext::new();
    let db = InMemoryTrieDB::new_empty();
    let config = TrieConfig {
        worker_threads: 1,
        ..TrieConfig::default()
    };
    let trie = Trie::with_config(Box::new(db.clone()), None, sha256, config.clone());
    // Two pairs split at the root, each pair shares every other bit
    let keys = [
        H256::zero(),
        key_with_bits(&[TRIE_HEIGHT - 1]),
        key_with_bits(&[0]),
        key_with_bits(&[0, TRIE_HEIGHT - 1]),
    ];
    let values: Vec<H256> = (1..=4u8).map(H256::repeat_byte).collect();
    let root = trie.atomic_update(&ctx, &keys, &values).unwrap();
    trie.commit(&ctx).unwrap();
    for (key, value) in keys.iter().zip(values.iter()) {
        assert_eq!(trie.get(&ctx, key).unwrap(), Some(*value));
    }

    let reopened = Trie::with_config(Box::new(db.clone()), root, sha256, config);
    let updated = reopened
        .update(&ctx, &keys[2..], &[H256::repeat_byte(5), *DEFAULT_LEAF])
        .unwrap();
    let reference = Trie::new_temp();
    let expected = reference
        .update(
            &ctx,
            &keys[..3],
            &[values[0], values[1], H256::repeat_byte(5)],
        )
        .unwrap();
    assert_eq!(updated, expected);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn proptest_batches_match_single_update(
        data in btree_map(any::<[u8; 32]>(), any::<[u8; 32]>(), 1..150),
        cuts in vec(any::<prop::sample::Index>(), 0..4),
    ) {
        let ctx = TrieContext::new();
        let keys: Vec<H256> = data.keys().copied().map(H256).collect();
        let values: Vec<H256> = data.values().copied().map(H256).collect();
        prop_assume!(!values.contains(&*DEFAULT_LEAF));

        let whole = Trie::new_temp();
        let expected = whole.update(&ctx, &keys, &values).unwrap();

        let mut cuts: Vec<usize> = cuts.iter().map(|cut| cut.index(keys.len())).collect();
        cuts.push(0);
        cuts.push(keys.len());
        cuts.sort();
        cuts.dedup();
        let chunked = Trie::new_temp();
        for window in cuts.windows(2).rev() {
            chunked.update(&ctx, &keys[window[0]..window[1]], &values[window[0]..window[1]]).unwrap();
        }
        prop_assert_eq!(chunked.root().unwrap(), expected);
    }
}
