mod support;

use std::collections::BTreeMap;
use support::{boot, key_string, next_beacon_block, next_shard_block};
use veil_ledger::instruction::{
    build_assign_instruction, build_random_instruction, build_stake_instruction,
    build_swap_instruction,
};
use veil_ledger::{candidate_shard_id, StakeRole};

#[test]
fn stake_random_assign_swap_rotates_a_shard_committee() {
    let h = boot(2);
    let ctx = &h.ctx;
    let candidate = key_string(0x90, 1);

    // Stake registers the candidate; random seeds the assignment.
    let stake = build_stake_instruction(
        &[candidate.clone()],
        StakeRole::Shard,
        &["stake-tx".to_string()],
    );
    let random = build_random_instruction(42, "nonce", 1_533_081_700);
    let block2 = next_beacon_block(ctx, vec![stake, random], BTreeMap::new());
    ctx.insert_beacon_block(&block2).unwrap();
    let best = ctx.beacon_best();
    assert!(best.candidate_shard_waiting.contains(&candidate));
    assert_eq!(best.current_random_number, 42);

    // Assign to the randomness-derived shard.
    let dest = candidate_shard_id(&candidate, 42, ctx.params.active_shards);
    let assign = build_assign_instruction(&[candidate.clone()], StakeRole::Shard, dest);
    let block3 = next_beacon_block(ctx, vec![assign], BTreeMap::new());
    ctx.insert_beacon_block(&block3).unwrap();
    let best = ctx.beacon_best();
    assert!(!best.candidate_shard_waiting.contains(&candidate));
    assert_eq!(best.shard_pending_validator[&dest].last(), Some(&candidate));

    // The shard picks up the pending validator when it advances past the
    // assigning beacon block, then a swap activates it.
    let shard_block = next_shard_block(ctx, dest, Vec::new(), BTreeMap::new(), Vec::new(), 3);
    ctx.insert_shard_block(&shard_block).unwrap();
    let best = ctx.shard_best(dest).unwrap();
    assert_eq!(best.shard_pending_validator, vec![candidate.clone()]);
    assert_eq!(best.shard_committee.len(), 4);

    let swap = build_swap_instruction(&[candidate.clone()], &[], StakeRole::Shard, dest);
    let swap_block = next_shard_block(ctx, dest, Vec::new(), BTreeMap::new(), vec![swap], 3);
    ctx.insert_shard_block(&swap_block).unwrap();
    let best = ctx.shard_best(dest).unwrap();
    assert!(best.shard_pending_validator.is_empty());
    assert_eq!(best.shard_committee.len(), 5);
    assert_eq!(best.shard_committee.last(), Some(&candidate));
}

#[test]
fn beacon_swap_evicts_the_queue_head_when_full() {
    let h = boot(2);
    let ctx = &h.ctx;
    let newcomer = key_string(0x91, 0);
    let head = ctx.beacon_best().beacon_committee[0].clone();

    let stake = build_stake_instruction(&[newcomer.clone()], StakeRole::Beacon, &["tx".to_string()]);
    let assign = build_assign_instruction(&[newcomer.clone()], StakeRole::Beacon, 0);
    let block2 = next_beacon_block(ctx, vec![stake, assign], BTreeMap::new());
    ctx.insert_beacon_block(&block2).unwrap();
    assert_eq!(ctx.beacon_best().beacon_pending_validator, vec![newcomer.clone()]);

    // Committee is at capacity (4 of 4): the head is evicted.
    let swap = build_swap_instruction(&[newcomer.clone()], &[head.clone()], StakeRole::Beacon, 0);
    let block3 = next_beacon_block(ctx, vec![swap], BTreeMap::new());
    ctx.insert_beacon_block(&block3).unwrap();

    let best = ctx.beacon_best();
    assert_eq!(best.beacon_committee.len(), 4);
    assert!(!best.beacon_committee.contains(&head));
    assert_eq!(best.beacon_committee.last(), Some(&newcomer));
    assert!(best.beacon_pending_validator.is_empty());
}

#[test]
fn assignment_formula_is_stable_across_runs() {
    let first = candidate_shard_id("PUBKEY_X", 0, 8);
    for _ in 0..10 {
        assert_eq!(candidate_shard_id("PUBKEY_X", 0, 8), first);
    }
}
