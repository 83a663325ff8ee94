mod support;

use std::collections::BTreeMap;
use support::{boot, coin_for_shard, next_shard_block, transfer_tx};
use veil_ledger::utxo;
use veil_ledger::{
    create_all_cross_shard_blocks, verify_cross_shard_block, CrossShardError, CrossTransaction,
    NATIVE_TOKEN_ID,
};

#[test]
fn source_packages_and_destination_verifies() {
    let h = boot(4);
    let ctx = &h.ctx;

    // Shard 0 produces three outputs: one to shard 1, two to shard 2.
    let tx = transfer_tx(
        &[vec![1u8; 16]],
        vec![
            coin_for_shard(1, 0xa1, 10),
            coin_for_shard(2, 0xa2, 20),
            coin_for_shard(2, 0xa3, 30),
        ],
        0,
    );
    let block = next_shard_block(ctx, 0, vec![tx], BTreeMap::new(), Vec::new(), 1);
    assert_eq!(block.header.cross_shard_bitmap, vec![1, 2]);
    ctx.insert_shard_block(&block).unwrap();

    let all = create_all_cross_shard_blocks(&block, ctx.params.active_shards);
    assert_eq!(all.len(), 2);
    assert_eq!(all[&1].cross_output_coins.len(), 1);
    assert_eq!(all[&2].cross_output_coins.len(), 2);

    for cross in all.values() {
        verify_cross_shard_block(cross).unwrap();
    }

    // Injecting a fourth output on the destination breaks the Merkle check.
    let mut tampered = all[&2].clone();
    tampered.cross_output_coins.push(coin_for_shard(2, 0xa4, 99));
    assert_eq!(
        verify_cross_shard_block(&tampered),
        Err(CrossShardError::MerklePathInvalid)
    );
}

#[test]
fn destination_ingests_cross_outputs_into_its_index() {
    let h = boot(4);
    let ctx = &h.ctx;

    let receiver = coin_for_shard(1, 0xb7, 50);
    let tx = transfer_tx(&[vec![2u8; 16]], vec![receiver.clone()], 0);
    let source_block = next_shard_block(ctx, 0, vec![tx], BTreeMap::new(), Vec::new(), 1);
    ctx.insert_shard_block(&source_block).unwrap();

    let all = create_all_cross_shard_blocks(&source_block, ctx.params.active_shards);
    let cross = &all[&1];
    verify_cross_shard_block(cross).unwrap();

    let mut cross_transactions = BTreeMap::new();
    cross_transactions.insert(
        0u8,
        vec![CrossTransaction {
            block_hash: cross.hash(),
            block_height: cross.header.height,
            output_coins: cross.cross_output_coins.clone(),
            token_privacy_data: cross.cross_privacy_token_data.clone(),
        }],
    );
    let dest_block = next_shard_block(ctx, 1, Vec::new(), cross_transactions, Vec::new(), 1);
    ctx.insert_shard_block(&dest_block).unwrap();

    // The receiver's coin is now addressable on shard 1.
    let coins =
        utxo::output_coins_by_pubkey(&ctx.db, &NATIVE_TOKEN_ID, 1, &receiver.public_key).unwrap();
    assert_eq!(coins.len(), 1);
    assert!(utxo::has_commitment(&ctx.db, &NATIVE_TOKEN_ID, 1, &receiver.commitment).unwrap());
    assert!(
        ctx.has_incoming_cross_shard(1, 0, &cross.hash()).unwrap(),
        "incoming record missing"
    );
}
