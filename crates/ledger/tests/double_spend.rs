mod support;

use std::collections::BTreeMap;
use support::{boot, coin_for_shard, next_shard_block, transfer_tx};
use veil_ledger::{ChainError, UtxoError};

#[test]
fn second_spend_of_same_serial_is_rejected_and_state_unchanged() {
    let h = boot(2);
    let ctx = &h.ctx;
    let serial = vec![7u8; 16];

    let spend = transfer_tx(&[serial.clone()], vec![coin_for_shard(0, 1, 10)], 2);
    let block = next_shard_block(ctx, 0, vec![spend], BTreeMap::new(), Vec::new(), 1);
    ctx.insert_shard_block(&block).unwrap();

    let respend = transfer_tx(&[serial.clone()], vec![coin_for_shard(0, 2, 5)], 1);
    let bad = next_shard_block(ctx, 0, vec![respend], BTreeMap::new(), Vec::new(), 1);

    let before = ctx.shard_best(0).unwrap();
    let err = ctx.insert_shard_block(&bad).unwrap_err();
    assert!(
        matches!(err, ChainError::Utxo(UtxoError::DoubleSpend(_))),
        "unexpected error: {err}"
    );
    let after = ctx.shard_best(0).unwrap();
    assert_eq!(*before, *after, "best state moved on a rejected block");
}

#[test]
fn duplicate_serial_within_one_block_is_rejected() {
    let h = boot(2);
    let ctx = &h.ctx;
    let serial = vec![9u8; 16];
    let tx_a = transfer_tx(&[serial.clone()], vec![coin_for_shard(0, 1, 10)], 0);
    let tx_b = transfer_tx(&[serial.clone()], vec![coin_for_shard(0, 2, 10)], 0);
    let bad = next_shard_block(ctx, 0, vec![tx_a, tx_b], BTreeMap::new(), Vec::new(), 1);
    let err = ctx.insert_shard_block(&bad).unwrap_err();
    assert!(matches!(err, ChainError::Utxo(UtxoError::DoubleSpend(_))));
}
