use std::thread;

use mapserver_test::random_pairs;
use mapserver_trie::{Trie, TrieContext, verify_inclusion};
use tokio_util::sync::CancellationToken;

#[test]
fn concurrent_proofs() {
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    let (keys, values) = random_pairs(2_000);
    let root = trie.update(&ctx, &keys, &values).unwrap().unwrap();

    thread::scope(|s| {
        for chunk in 0..4 {
            let (trie, keys, values, ctx) = (&trie, &keys, &values, &ctx);
            s.spawn(move || {
                for i in (chunk..keys.len()).step_by(4 * 25) {
                    let proof = trie.merkle_proof(ctx, &keys[i]).unwrap();
                    assert!(verify_inclusion(&root, &proof.audit_path, &keys[i], &values[i]));
                }
            });
        }
    });
}

#[test]
fn reads_see_whole_updates() {
    let ctx = TrieContext::new();
    let trie = Trie::new_temp();
    let (keys, first) = random_pairs(500);
    let (_, second) = random_pairs(keys.len());
    let n = first.len().min(second.len());
    let (keys, first, second) = (&keys[..n], &first[..n], &second[..n]);
    let before = trie.update(&ctx, keys, first).unwrap().unwrap();

    let reference = Trie::new_temp();
    let after = reference.update(&ctx, keys, second).unwrap().unwrap();

    thread::scope(|s| {
        s.spawn(|| trie.update(&ctx, keys, second).unwrap());
        s.spawn(|| {
            for _ in 0..20 {
                let proof = trie.merkle_proof(&ctx, &keys[0]).unwrap();
                let value = proof.proof_value.unwrap();
                // Either the old or the new trie, never a mix
                assert!(
                    verify_inclusion(&before, &proof.audit_path, &keys[0], &first[0]) && value == first[0]
                        || verify_inclusion(&after, &proof.audit_path, &keys[0], &second[0]) && value == second[0]
                );
            }
        });
    });
    assert_eq!(trie.root().unwrap(), Some(after));
}

#[test]
fn external_token_cancels_update() {
    let token = CancellationToken::new();
    let ctx = TrieContext::new().with_token(token.clone());
    let trie = Trie::new_temp();
    let (keys, values) = random_pairs(100);
    trie.update(&TrieContext::new(), &keys, &values).unwrap();
    token.cancel();
    assert!(trie.update(&ctx, &keys, &values).unwrap_err().is_cancellation());
}
