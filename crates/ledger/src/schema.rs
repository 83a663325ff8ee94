//! Persisted key layout.
//!
//! The prefix strings below are part of the on-disk format: changing any of
//! them orphans existing databases. Every key is a fixed ASCII prefix
//! followed by raw field bytes joined with `-`.

use crate::hash::Hash32;
use crate::tx::TokenId;

pub const BEACON_BLOCK: &[u8] = b"beacon-block-";
pub const BEACON_BLOCK_INDEX: &[u8] = b"beacon-block-index-";
pub const BEACON_BLOCK_HEIGHT: &[u8] = b"beacon-block-height-";
pub const SHARD_BLOCK: &[u8] = b"shard-block-";
pub const SHARD_BLOCK_INDEX: &[u8] = b"shard-block-index-";
pub const TRANSACTION: &[u8] = b"tx-";
pub const COMMITMENTS: &[u8] = b"commitments-";
pub const SERIAL_NUMBERS: &[u8] = b"serialnumbers-";
pub const OUTPUT_COINS: &[u8] = b"outcoins-";
pub const SND: &[u8] = b"snd-";
pub const TOKEN_INIT: &[u8] = b"tokeninit-";
pub const PRIVACY_TOKEN_INIT: &[u8] = b"ptokeninit-";
pub const PRIVACY_TOKEN_CROSS_SHARD: &[u8] = b"ptoken-crossshard-";
pub const COMMITTEE_BY_HEIGHT: &[u8] = b"committee-shard-";
pub const INCOMING_CROSS_SHARD: &[u8] = b"crossshard-";
pub const CROSS_SHARD_NEXT_HEIGHT: &[u8] = b"crossshardnext-";
pub const BEACON_BEST_STATE: &[u8] = b"beststate-beacon";
pub const SHARD_BEST_STATE: &[u8] = b"beststate-shard-";
pub const SHARD_TO_BEACON_ACCEPTED: &[u8] = b"s2b-accepted-";
pub const PREV_BEACON: &[u8] = b"prev-beacon-";
pub const PREV_SHARD: &[u8] = b"prev-shard-";
pub const COMMITTEE_REWARD: &[u8] = b"committee-reward-";
pub const SHARD_REWARD: &[u8] = b"shard-reward-";

/// Suffix of the per-(token, shard) counter keys.
pub const LEN_SUFFIX: &[u8] = b"len";

const SEP: u8 = b'-';

fn key(parts: &[&[u8]]) -> Vec<u8> {
    let total: usize = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(total + parts.len());
    let mut first = true;
    for part in parts {
        if !first {
            out.push(SEP);
        }
        out.extend_from_slice(part);
        first = false;
    }
    out
}

fn prefixed(prefix: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut out = prefix.to_vec();
    out.extend_from_slice(&key(parts));
    out
}

pub fn beacon_block(hash: &Hash32) -> Vec<u8> {
    prefixed(BEACON_BLOCK, &[hash])
}

pub fn beacon_block_index(hash: &Hash32) -> Vec<u8> {
    prefixed(BEACON_BLOCK_INDEX, &[hash])
}

pub fn beacon_block_height(height: u64) -> Vec<u8> {
    prefixed(BEACON_BLOCK_HEIGHT, &[&height.to_be_bytes()])
}

pub fn shard_block(shard_id: u8, hash: &Hash32) -> Vec<u8> {
    prefixed(SHARD_BLOCK, &[&[shard_id], hash])
}

pub fn shard_block_index(hash: &Hash32) -> Vec<u8> {
    prefixed(SHARD_BLOCK_INDEX, &[hash])
}

pub fn shard_block_height(shard_id: u8, height: u64) -> Vec<u8> {
    prefixed(SHARD_BLOCK, &[&[shard_id], b"height", &height.to_be_bytes()])
}

pub fn transaction(tx_hash: &Hash32) -> Vec<u8> {
    prefixed(TRANSACTION, &[tx_hash])
}

fn token_shard(prefix: &[u8], token_id: &TokenId, shard_id: u8) -> Vec<u8> {
    prefixed(prefix, &[token_id, &[shard_id]])
}

pub fn commitment_by_index(token_id: &TokenId, shard_id: u8, index: u64) -> Vec<u8> {
    let mut k = token_shard(COMMITMENTS, token_id, shard_id);
    k.push(SEP);
    k.extend_from_slice(&index.to_be_bytes());
    k
}

pub fn commitment_by_value(token_id: &TokenId, shard_id: u8, commitment: &[u8]) -> Vec<u8> {
    let mut k = token_shard(COMMITMENTS, token_id, shard_id);
    k.push(SEP);
    k.extend_from_slice(commitment);
    k
}

pub fn commitment_len(token_id: &TokenId, shard_id: u8) -> Vec<u8> {
    let mut k = token_shard(COMMITMENTS, token_id, shard_id);
    k.push(SEP);
    k.extend_from_slice(LEN_SUFFIX);
    k
}

pub fn serial_number(token_id: &TokenId, shard_id: u8, sn: &[u8]) -> Vec<u8> {
    let mut k = token_shard(SERIAL_NUMBERS, token_id, shard_id);
    k.push(SEP);
    k.extend_from_slice(sn);
    k
}

pub fn serial_number_len(token_id: &TokenId, shard_id: u8) -> Vec<u8> {
    let mut k = token_shard(SERIAL_NUMBERS, token_id, shard_id);
    k.push(SEP);
    k.extend_from_slice(LEN_SUFFIX);
    k
}

pub fn output_coin(token_id: &TokenId, shard_id: u8, public_key: &[u8], coin_digest: &Hash32) -> Vec<u8> {
    let mut k = token_shard(OUTPUT_COINS, token_id, shard_id);
    k.push(SEP);
    k.extend_from_slice(public_key);
    k.push(SEP);
    k.extend_from_slice(coin_digest);
    k
}

pub fn output_coin_prefix(token_id: &TokenId, shard_id: u8, public_key: &[u8]) -> Vec<u8> {
    let mut k = token_shard(OUTPUT_COINS, token_id, shard_id);
    k.push(SEP);
    k.extend_from_slice(public_key);
    k.push(SEP);
    k
}

pub fn snd(token_id: &TokenId, shard_id: u8, snd: &[u8]) -> Vec<u8> {
    let mut k = token_shard(SND, token_id, shard_id);
    k.push(SEP);
    k.extend_from_slice(snd);
    k
}

pub fn token_init(token_id: &TokenId) -> Vec<u8> {
    prefixed(TOKEN_INIT, &[token_id])
}

pub fn privacy_token_init(token_id: &TokenId) -> Vec<u8> {
    prefixed(PRIVACY_TOKEN_INIT, &[token_id])
}

pub fn privacy_token_cross_shard(token_id: &TokenId) -> Vec<u8> {
    prefixed(PRIVACY_TOKEN_CROSS_SHARD, &[token_id])
}

pub fn committee_by_height(height: u64) -> Vec<u8> {
    prefixed(COMMITTEE_BY_HEIGHT, &[&height.to_be_bytes()])
}

/// Incoming cross-shard record at the destination:
/// `crossshard-<to>-<from>-<crossblockhash>` -> ingesting block height.
pub fn incoming_cross_shard(to_shard: u8, from_shard: u8, cross_block_hash: &Hash32) -> Vec<u8> {
    prefixed(INCOMING_CROSS_SHARD, &[&[to_shard], &[from_shard], cross_block_hash])
}

pub fn beacon_best_state() -> Vec<u8> {
    BEACON_BEST_STATE.to_vec()
}

pub fn shard_best_state(shard_id: u8) -> Vec<u8> {
    prefixed(SHARD_BEST_STATE, &[&[shard_id]])
}

pub fn cross_shard_next_height(from_shard: u8, to_shard: u8, height: u64) -> Vec<u8> {
    prefixed(
        CROSS_SHARD_NEXT_HEIGHT,
        &[&[from_shard], &[to_shard], &height.to_le_bytes()],
    )
}

pub fn shard_to_beacon_accepted(shard_id: u8, block_hash: &Hash32) -> Vec<u8> {
    prefixed(SHARD_TO_BEACON_ACCEPTED, &[&[shard_id], block_hash])
}

pub fn committee_reward(committee_key: &[u8], token_id: &TokenId) -> Vec<u8> {
    prefixed(COMMITTEE_REWARD, &[committee_key, token_id])
}

pub fn shard_reward(epoch: u64, shard_id: u8, token_id: &TokenId) -> Vec<u8> {
    prefixed(SHARD_REWARD, &[&epoch.to_be_bytes(), &[shard_id], token_id])
}
