//! Shared harness for pipeline tests: a temp-store chain context with a
//! deterministic committee, plus builders that assemble blocks whose header
//! commitments the pipeline will accept.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use veil_ledger::block::{BeaconBody, BeaconHeader, ShardBody, ShardHeader, ShardStateEntry};
use veil_ledger::hash::hash_of;
use veil_ledger::instruction::{instruction_merkle_root, instructions_hash, Instruction};
use veil_ledger::key::decode_public_key;
use veil_ledger::tx::total_txs_fee;
use veil_ledger::{
    crossshard, AcceptAllVerifier, BeaconBlock, ChainContext, ChainDb, ChainParams, CrossTransaction,
    InputCoin, OutputCoin, ProducerAddress, ShardBlock, StoreCfg, Tx, TxBase, TxProof,
};

/// A 33-byte key whose last byte pins the owner to a shard.
pub fn raw_key(tag: u8, last_byte: u8) -> Vec<u8> {
    let mut pk = vec![tag; 33];
    pk[32] = last_byte;
    pk
}

pub fn key_string(tag: u8, last_byte: u8) -> String {
    veil_ledger::encode_public_key(&raw_key(tag, last_byte))
}

/// Test params: K shards, committees of four, preselected keys `0x10 + i`.
pub fn test_params(active_shards: usize) -> ChainParams {
    let mut params = ChainParams::testnet();
    params.active_shards = active_shards;
    params.preselect_beacon_keys = (0..4).map(|i| key_string(0x10 + i, i)).collect();
    params.preselect_shard_keys = (0..(active_shards * 4))
        .map(|i| key_string(0x40 + i as u8, (i % active_shards) as u8))
        .collect();
    params.dev_reward_address = key_string(0xdd, 0);
    params
}

pub struct Harness {
    pub ctx: ChainContext,
    _dir: tempfile::TempDir,
}

pub fn boot(active_shards: usize) -> Harness {
    boot_with_params(test_params(active_shards))
}

pub fn boot_with_params(params: ChainParams) -> Harness {
    boot_custom(params, Arc::new(AcceptAllVerifier))
}

pub fn boot_custom(
    params: ChainParams,
    verifier: Arc<dyn veil_ledger::SigVerifier>,
) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(ChainDb::open(&StoreCfg::new(dir.path())).expect("open store"));
    let ctx = ChainContext::new(db, params, verifier);
    ctx.init_chain_state().expect("genesis");
    Harness { ctx, _dir: dir }
}

fn producer_address_for(key: &str) -> ProducerAddress {
    let public_key = decode_public_key(key).expect("committee keys decode");
    ProducerAddress::new(public_key, vec![0u8; 33])
}

/// A spend of `serials` minting `outputs`, with an optional fee.
pub fn transfer_tx(serials: &[Vec<u8>], outputs: Vec<OutputCoin>, fee: u64) -> Tx {
    Tx::Normal(TxBase {
        fee,
        proof: TxProof {
            input_coins: serials
                .iter()
                .map(|sn| InputCoin { serial_number: sn.clone() })
                .collect(),
            output_coins: outputs,
        },
        ..TxBase::default()
    })
}

pub fn coin_for_shard(last_byte: u8, tag: u8, value: u64) -> OutputCoin {
    OutputCoin {
        public_key: raw_key(tag, last_byte),
        commitment: vec![tag; 32],
        snd: vec![tag ^ 0xff; 32],
        value,
    }
}

/// Assemble the next shard block for `shard_id` with header commitments the
/// pipeline recomputes, mirroring what an honest producer would emit.
pub fn next_shard_block(
    ctx: &ChainContext,
    shard_id: u8,
    txs: Vec<Tx>,
    cross_transactions: BTreeMap<u8, Vec<CrossTransaction>>,
    instructions: Vec<Vec<String>>,
    beacon_height: u64,
) -> ShardBlock {
    let best = ctx.shard_best(shard_id).expect("active shard");
    let active_shards = ctx.params.active_shards;

    // Replicate the pipeline's post-instruction state to derive roots.
    let mut new_state = (*best).clone();
    let beacon_blocks = ctx
        .fetch_beacon_blocks_in_range(best.beacon_height + 1, beacon_height)
        .expect("beacon blocks");
    for block in &beacon_blocks {
        for line in &block.body.instructions {
            if let Ok(Instruction::Assign {
                candidates,
                role: veil_ledger::StakeRole::Shard,
                shard_id: target,
            }) = Instruction::parse(line)
            {
                if target == shard_id {
                    new_state.add_pending_validators(&candidates);
                }
            }
        }
    }
    new_state.apply_instructions(&instructions).expect("instructions apply");

    let producer = best
        .shard_producer(1)
        .cloned()
        .expect("committee is non-empty");
    let beacon_hash = ctx
        .get_beacon_block_hash_by_height(beacon_height)
        .expect("beacon hash");

    let header = ShardHeader {
        version: veil_ledger::SHARD_BLOCK_VERSION,
        height: best.shard_height + 1,
        round: 1,
        epoch: best.epoch.max(1),
        timestamp: ctx.params.genesis_timestamp + best.shard_height as i64 + 1,
        shard_id,
        previous_block_hash: best.best_block_hash,
        producer_address: producer_address_for(&producer),
        tx_root: veil_ledger::transactions_root(&txs),
        shard_tx_root: crossshard::shard_tx_root(&txs, active_shards),
        cross_transaction_root: veil_ledger::cross_transaction_root(&cross_transactions),
        instructions_root: instructions_hash(&instructions),
        committee_root: new_state.committee_root(),
        pending_validator_root: new_state.pending_validator_root(),
        instruction_merkle_root: instruction_merkle_root(&instructions),
        cross_shard_bitmap: crossshard::cross_shard_bitmap(&txs, shard_id, active_shards),
        beacon_height,
        beacon_hash,
        total_txs: txs.len() as u64,
        total_txs_fee: total_txs_fee(&txs),
    };
    ShardBlock {
        header,
        body: ShardBody {
            instructions,
            cross_transactions,
            transactions: txs,
        },
        producer_sig: vec![0u8; 64],
        aggregated_sig: vec![0u8; 64],
    }
}

/// Assemble the next beacon block with post-instruction committee roots.
pub fn next_beacon_block(
    ctx: &ChainContext,
    instructions: Vec<Vec<String>>,
    shard_state: BTreeMap<u8, Vec<ShardStateEntry>>,
) -> BeaconBlock {
    let best = ctx.beacon_best();
    let mut new_state = (*best).clone();
    new_state.apply_instructions(&instructions).expect("instructions apply");

    let producer = best
        .beacon_producer(1)
        .cloned()
        .expect("beacon committee is non-empty");

    let header = BeaconHeader {
        version: veil_ledger::BEACON_BLOCK_VERSION,
        height: best.beacon_height + 1,
        round: 1,
        epoch: best.epoch.max(1),
        timestamp: ctx.params.genesis_timestamp + best.beacon_height as i64 + 1,
        previous_block_hash: best.best_block_hash,
        producer_address: producer_address_for(&producer),
        shard_state_hash: hash_of(&shard_state),
        instruction_hash: instructions_hash(&instructions),
        instruction_merkle_root: instruction_merkle_root(&instructions),
        shard_candidate_root: new_state.shard_candidate_root(),
        beacon_candidate_root: new_state.beacon_candidate_root(),
        shard_committee_root: new_state.shard_committee_root(),
        beacon_committee_root: new_state.beacon_committee_root(),
    };
    BeaconBlock {
        header,
        body: BeaconBody { shard_state, instructions },
        producer_sig: vec![0u8; 64],
        aggregated_sig: vec![0u8; 64],
    }
}
