mod support;

use std::collections::BTreeMap;
use support::{boot, coin_for_shard, key_string, next_beacon_block, next_shard_block, raw_key, transfer_tx};
use veil_ledger::instruction::{
    build_accepted_block_reward_instruction, build_beacon_reward_instruction, AcceptedBlockRewardInfo,
    BeaconRewardInfo,
};
use veil_ledger::tx::{Metadata, Tx, TxBase, TxProof};
use veil_ledger::{reward, ChainError, NATIVE_TOKEN_ID};

fn beacon_reward_line(shard_id: u8, pay_to: &str, amount: u64) -> Vec<String> {
    let mut beacon_reward = BTreeMap::new();
    beacon_reward.insert(NATIVE_TOKEN_ID, amount);
    build_beacon_reward_instruction(
        shard_id,
        &BeaconRewardInfo {
            pay_to_public_key: pay_to.to_string(),
            beacon_reward,
        },
    )
}

#[test]
fn beacon_reward_credit_survives_revert_and_reapply() {
    let h = boot(2);
    let ctx = &h.ctx;
    let payee_raw = raw_key(0xee, 0);
    let payee = key_string(0xee, 0);

    let beacon_block = next_beacon_block(ctx, vec![beacon_reward_line(0, &payee, 100)], BTreeMap::new());
    ctx.insert_beacon_block(&beacon_block).unwrap();

    // The shard chain credits the ledger when it advances past the beacon
    // block carrying the instruction.
    let shard_block = next_shard_block(ctx, 0, Vec::new(), BTreeMap::new(), Vec::new(), 2);
    ctx.insert_shard_block(&shard_block).unwrap();
    assert_eq!(reward::committee_reward(&ctx.db, &payee_raw, &NATIVE_TOKEN_ID).unwrap(), 100);

    ctx.revert_shard_state(0).unwrap();
    assert_eq!(reward::committee_reward(&ctx.db, &payee_raw, &NATIVE_TOKEN_ID).unwrap(), 0);

    ctx.insert_shard_block(&shard_block).unwrap();
    assert_eq!(reward::committee_reward(&ctx.db, &payee_raw, &NATIVE_TOKEN_ID).unwrap(), 100);
}

#[test]
fn accepted_block_reward_is_augmented_by_the_minted_reward() {
    let h = boot(2);
    let ctx = &h.ctx;

    let mut txs_fee = BTreeMap::new();
    txs_fee.insert(NATIVE_TOKEN_ID, 5u64);
    let info = AcceptedBlockRewardInfo {
        shard_id: 0,
        shard_block_height: 2,
        txs_fee,
    };
    let line = build_accepted_block_reward_instruction(0, &info);
    let block = next_beacon_block(ctx, vec![line], BTreeMap::new());
    ctx.insert_beacon_block(&block).unwrap();

    let minted = reward::reward_amount(&ctx.params, 2);
    let pending = reward::shard_reward_request(&ctx.db, block.header.epoch, 0, &NATIVE_TOKEN_ID).unwrap();
    assert_eq!(pending, 5 + minted);

    ctx.revert_beacon_state().unwrap();
    let restored =
        reward::shard_reward_request(&ctx.db, block.header.epoch, 0, &NATIVE_TOKEN_ID).unwrap();
    assert_eq!(restored, 0);
}

fn withdraw_request(payee_raw: &[u8]) -> Tx {
    Tx::Normal(TxBase {
        metadata: Some(Metadata::WithdrawRewardRequest {
            payment_address: payee_raw.to_vec(),
            token_id: NATIVE_TOKEN_ID,
        }),
        ..TxBase::default()
    })
}

fn withdraw_response(payee_raw: &[u8], amount: u64, request: &Tx) -> Tx {
    let mut coin = coin_for_shard(payee_raw[32], 0x77, amount);
    coin.public_key = payee_raw.to_vec();
    Tx::Reward(TxBase {
        metadata: Some(Metadata::WithdrawRewardResponse { request_tx: request.hash() }),
        proof: TxProof {
            input_coins: Vec::new(),
            output_coins: vec![coin],
        },
        ..TxBase::default()
    })
}

#[test]
fn withdraw_response_drains_the_ledger_balance() {
    let h = boot(2);
    let ctx = &h.ctx;
    let payee_raw = raw_key(0x71, 0);
    reward::add_committee_reward(&ctx.db, &payee_raw, &NATIVE_TOKEN_ID, 40).unwrap();

    let request = withdraw_request(&payee_raw);
    let response = withdraw_response(&payee_raw, 40, &request);
    let block = next_shard_block(ctx, 0, vec![request, response], BTreeMap::new(), Vec::new(), 1);
    ctx.insert_shard_block(&block).unwrap();
    assert_eq!(reward::committee_reward(&ctx.db, &payee_raw, &NATIVE_TOKEN_ID).unwrap(), 0);
}

#[test]
fn withdraw_response_with_wrong_amount_is_rejected() {
    let h = boot(2);
    let ctx = &h.ctx;
    let payee_raw = raw_key(0x72, 0);
    reward::add_committee_reward(&ctx.db, &payee_raw, &NATIVE_TOKEN_ID, 40).unwrap();

    let request = withdraw_request(&payee_raw);
    let response = withdraw_response(&payee_raw, 39, &request);
    let block = next_shard_block(ctx, 0, vec![request, response], BTreeMap::new(), Vec::new(), 1);
    let err = ctx.insert_shard_block(&block).unwrap_err();
    assert!(matches!(err, ChainError::WithdrawResponse(_)), "got {err}");
    assert_eq!(reward::committee_reward(&ctx.db, &payee_raw, &NATIVE_TOKEN_ID).unwrap(), 40);
}

#[test]
fn request_without_response_is_rejected() {
    let h = boot(2);
    let ctx = &h.ctx;
    let payee_raw = raw_key(0x73, 0);
    reward::add_committee_reward(&ctx.db, &payee_raw, &NATIVE_TOKEN_ID, 10).unwrap();

    let request = withdraw_request(&payee_raw);
    let block = next_shard_block(ctx, 0, vec![request], BTreeMap::new(), Vec::new(), 1);
    let err = ctx.insert_shard_block(&block).unwrap_err();
    assert!(matches!(err, ChainError::WithdrawResponse(_)));
}

#[test]
fn transfer_fees_land_in_the_header_total() {
    let h = boot(2);
    let ctx = &h.ctx;
    let tx = transfer_tx(&[vec![6u8; 16]], vec![coin_for_shard(0, 0x61, 10)], 7);
    let block = next_shard_block(ctx, 0, vec![tx], BTreeMap::new(), Vec::new(), 1);
    assert_eq!(block.header.total_txs_fee.get(&NATIVE_TOKEN_ID), Some(&7));
    ctx.insert_shard_block(&block).unwrap();
}
