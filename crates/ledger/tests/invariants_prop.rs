use proptest::prelude::*;

use veil_ledger::hash::hash_bytes;
use veil_ledger::{
    candidate_shard_id, merkle, reward_amount, swap_validator, ChainParams, CommitteeError,
};

fn unique_names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

proptest! {
    #[test]
    fn swap_keeps_queues_disjoint_and_bounded(
        pending_len in 0usize..8,
        committee_len in 0usize..8,
        max_size in 1usize..10,
        offset in 1usize..10,
    ) {
        let pending = unique_names("p", pending_len);
        let committee = unique_names("c", committee_len.min(max_size));
        match swap_validator(&pending, &committee, max_size, offset) {
            Ok(out) => {
                prop_assert!(out.committee.len() <= max_size);
                for member in &out.committee {
                    prop_assert!(!out.pending.contains(member));
                }
                // Conservation: pending splits into incoming + remaining.
                let mut recombined = out.incoming.clone();
                recombined.extend(out.pending.iter().cloned());
                prop_assert_eq!(recombined, pending.clone());
                // Evicted members come off the committee head, in order.
                prop_assert_eq!(
                    out.evicted.as_slice(),
                    &committee[..out.evicted.len()]
                );
            }
            Err(CommitteeError::SwapZeroOffset)
            | Err(CommitteeError::NoPendingValidators)
            | Err(CommitteeError::SwapOffsetTooLarge { .. })
            | Err(CommitteeError::CommitteeOversized { .. }) => {}
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }

    #[test]
    fn merkle_paths_verify_for_every_leaf(leaf_count in 1usize..33, seed in any::<u8>()) {
        let leaves: Vec<_> = (0..leaf_count)
            .map(|i| hash_bytes(&[seed, i as u8]))
            .collect();
        let root = merkle::root(&leaves);
        for (i, leaf) in leaves.iter().enumerate() {
            let path = merkle::path_for_leaf(&leaves, i);
            prop_assert!(merkle::verify_path(leaf, &path, &root, i));
            // A different leaf on the same path fails.
            let other = hash_bytes(&[seed ^ 0xff, i as u8, 1]);
            prop_assert!(!merkle::verify_path(&other, &path, &root, i));
        }
    }

    #[test]
    fn shard_assignment_is_deterministic_and_in_range(
        candidate in "[a-zA-Z0-9]{4,40}",
        rand in any::<i64>(),
        shards in 1usize..16,
    ) {
        let first = candidate_shard_id(&candidate, rand, shards);
        prop_assert!((first as usize) < shards);
        prop_assert_eq!(first, candidate_shard_id(&candidate, rand, shards));
    }

    #[test]
    fn block_reward_never_increases_with_height(a in 0u64..10_000_000, b in 0u64..10_000_000) {
        let params = ChainParams::testnet();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(reward_amount(&params, low) >= reward_amount(&params, high));
    }
}
