//! The instruction language embedded in block bodies.
//!
//! An instruction is an ordered sequence of strings whose first element is
//! either one of the named action tags or a decimal metadata tag. Unknown
//! numeric tags parse to `Instruction::Unknown` and are skipped by the
//! processors; malformed lines of a known tag are errors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::hash::{hash_bytes, Hash32, ZERO_HASH};
use crate::merkle;
use crate::tx::{StakeRole, TokenId, Tx};

pub const STAKE_ACTION: &str = "stake";
pub const RANDOM_ACTION: &str = "random";
pub const ASSIGN_ACTION: &str = "assign";
pub const SWAP_ACTION: &str = "swap";
pub const SET_ACTION: &str = "set";

/// Parameter name the genesis `set` instruction seeds.
pub const RANDOM_NUMBER_PARAM: &str = "randomnumber";

pub const ACCEPTED_BLOCK_REWARD_META: u32 = 37;
pub const BEACON_REWARD_REQUEST_META: u32 = 39;
pub const DEV_REWARD_REQUEST_META: u32 = 42;
pub const SHARD_BLOCK_REWARD_REQUEST_META: u32 = 43;
pub const WITHDRAW_REWARD_REQUEST_META: u32 = 44;
pub const WITHDRAW_REWARD_RESPONSE_META: u32 = 45;
pub const SHARD_STAKING_META: u32 = 63;
pub const BEACON_STAKING_META: u32 = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstructionError {
    #[error("empty instruction line")]
    Empty,
    #[error("instruction {tag} expects at least {expected} fields, got {got}")]
    Arity { tag: String, expected: usize, got: usize },
    #[error("invalid role {0:?}")]
    Role(String),
    #[error("invalid numeric field {0:?}")]
    Numeric(String),
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// Token-keyed amount maps inside instruction payloads serialize as JSON
/// objects with hex token ids.
mod token_amounts {
    use super::*;
    use serde::de::Error as _;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<TokenId, u64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let hex_map: BTreeMap<String, u64> = map
            .iter()
            .map(|(token, amount)| (hex::encode(token), *amount))
            .collect();
        hex_map.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<TokenId, u64>, D::Error> {
        let hex_map = BTreeMap::<String, u64>::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for (key, amount) in hex_map {
            let raw = hex::decode(&key).map_err(D::Error::custom)?;
            let token: TokenId = raw
                .as_slice()
                .try_into()
                .map_err(|_| D::Error::custom("token id must be 32 bytes"))?;
            map.insert(token, amount);
        }
        Ok(map)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconRewardInfo {
    pub pay_to_public_key: String,
    #[serde(with = "token_amounts")]
    pub beacon_reward: BTreeMap<TokenId, u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevRewardInfo {
    #[serde(with = "token_amounts")]
    pub dev_reward: BTreeMap<TokenId, u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRewardInfo {
    pub epoch: u64,
    pub shard_id: u8,
    #[serde(with = "token_amounts")]
    pub shard_reward: BTreeMap<TokenId, u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedBlockRewardInfo {
    pub shard_id: u8,
    pub shard_block_height: u64,
    #[serde(with = "token_amounts")]
    pub txs_fee: BTreeMap<TokenId, u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Stake {
        candidates: Vec<String>,
        role: StakeRole,
        tx_ids: Vec<String>,
    },
    Random {
        randomness: i64,
        nonce: String,
        timestamp: i64,
    },
    Assign {
        candidates: Vec<String>,
        role: StakeRole,
        shard_id: u8,
    },
    Swap {
        incoming: Vec<String>,
        evicted: Vec<String>,
        role: StakeRole,
        shard_id: u8,
    },
    Set {
        param: String,
        value: String,
    },
    BeaconReward {
        shard_id: u8,
        info: BeaconRewardInfo,
    },
    DevReward {
        shard_id: u8,
        info: DevRewardInfo,
    },
    ShardReward {
        shard_id: u8,
        info: ShardRewardInfo,
    },
    AcceptedBlockReward {
        shard_id: u8,
        info: AcceptedBlockRewardInfo,
    },
    /// Numeric tag outside the recognized set; benign, skipped.
    Unknown,
}

fn split_joined(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn need(line: &[String], expected: usize) -> Result<(), InstructionError> {
    if line.len() < expected {
        return Err(InstructionError::Arity {
            tag: line[0].clone(),
            expected,
            got: line.len(),
        });
    }
    Ok(())
}

fn parse_i64(field: &str) -> Result<i64, InstructionError> {
    field
        .parse()
        .map_err(|_| InstructionError::Numeric(field.to_string()))
}

fn parse_shard_id(field: &str) -> Result<u8, InstructionError> {
    field
        .parse()
        .map_err(|_| InstructionError::Numeric(field.to_string()))
}

fn parse_role(field: &str) -> Result<StakeRole, InstructionError> {
    StakeRole::parse(field).ok_or_else(|| InstructionError::Role(field.to_string()))
}

fn parse_payload<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, InstructionError> {
    serde_json::from_str(raw).map_err(|e| InstructionError::Payload(e.to_string()))
}

impl Instruction {
    pub fn parse(line: &[String]) -> Result<Instruction, InstructionError> {
        let tag = line.first().ok_or(InstructionError::Empty)?;
        match tag.as_str() {
            STAKE_ACTION => {
                need(line, 4)?;
                Ok(Instruction::Stake {
                    candidates: split_joined(&line[1]),
                    role: parse_role(&line[2])?,
                    tx_ids: split_joined(&line[3]),
                })
            }
            RANDOM_ACTION => {
                need(line, 4)?;
                Ok(Instruction::Random {
                    randomness: parse_i64(&line[1])?,
                    nonce: line[2].clone(),
                    timestamp: parse_i64(&line[3])?,
                })
            }
            ASSIGN_ACTION => {
                need(line, 4)?;
                Ok(Instruction::Assign {
                    candidates: split_joined(&line[1]),
                    role: parse_role(&line[2])?,
                    shard_id: parse_shard_id(&line[3])?,
                })
            }
            SWAP_ACTION => {
                need(line, 5)?;
                Ok(Instruction::Swap {
                    incoming: split_joined(&line[1]),
                    evicted: split_joined(&line[2]),
                    role: parse_role(&line[3])?,
                    shard_id: parse_shard_id(&line[4])?,
                })
            }
            SET_ACTION => {
                need(line, 3)?;
                Ok(Instruction::Set {
                    param: line[1].clone(),
                    value: line[2].clone(),
                })
            }
            other => {
                let Ok(meta_type) = other.parse::<u32>() else {
                    return Ok(Instruction::Unknown);
                };
                match meta_type {
                    BEACON_REWARD_REQUEST_META => {
                        need(line, 4)?;
                        Ok(Instruction::BeaconReward {
                            shard_id: parse_shard_id(&line[1])?,
                            info: parse_payload(&line[3])?,
                        })
                    }
                    DEV_REWARD_REQUEST_META => {
                        need(line, 4)?;
                        Ok(Instruction::DevReward {
                            shard_id: parse_shard_id(&line[1])?,
                            info: parse_payload(&line[3])?,
                        })
                    }
                    SHARD_BLOCK_REWARD_REQUEST_META => {
                        need(line, 4)?;
                        Ok(Instruction::ShardReward {
                            shard_id: parse_shard_id(&line[1])?,
                            info: parse_payload(&line[3])?,
                        })
                    }
                    ACCEPTED_BLOCK_REWARD_META => {
                        need(line, 3)?;
                        Ok(Instruction::AcceptedBlockReward {
                            shard_id: parse_shard_id(&line[1])?,
                            info: parse_payload(&line[2])?,
                        })
                    }
                    _ => Ok(Instruction::Unknown),
                }
            }
        }
    }

    /// True for the five named committee/parameter actions.
    pub fn is_committee_action(line: &[String]) -> bool {
        matches!(
            line.first().map(String::as_str),
            Some(STAKE_ACTION | RANDOM_ACTION | ASSIGN_ACTION | SWAP_ACTION | SET_ACTION)
        )
    }
}

// ---- builders -------------------------------------------------------------

pub fn build_stake_instruction(candidates: &[String], role: StakeRole, tx_ids: &[String]) -> Vec<String> {
    vec![
        STAKE_ACTION.to_string(),
        candidates.join(","),
        role.as_str().to_string(),
        tx_ids.join(","),
    ]
}

pub fn build_swap_instruction(
    incoming: &[String],
    evicted: &[String],
    role: StakeRole,
    shard_id: u8,
) -> Vec<String> {
    vec![
        SWAP_ACTION.to_string(),
        incoming.join(","),
        evicted.join(","),
        role.as_str().to_string(),
        shard_id.to_string(),
    ]
}

pub fn build_assign_instruction(candidates: &[String], role: StakeRole, shard_id: u8) -> Vec<String> {
    vec![
        ASSIGN_ACTION.to_string(),
        candidates.join(","),
        role.as_str().to_string(),
        shard_id.to_string(),
    ]
}

pub fn build_random_instruction(randomness: i64, nonce: &str, timestamp: i64) -> Vec<String> {
    vec![
        RANDOM_ACTION.to_string(),
        randomness.to_string(),
        nonce.to_string(),
        timestamp.to_string(),
    ]
}

pub fn build_set_instruction(param: &str, value: &str) -> Vec<String> {
    vec![SET_ACTION.to_string(), param.to_string(), value.to_string()]
}

fn reward_payload<T: Serialize>(info: &T) -> String {
    serde_json::to_string(info).expect("reward payloads are plain maps")
}

pub fn build_beacon_reward_instruction(shard_id: u8, info: &BeaconRewardInfo) -> Vec<String> {
    vec![
        BEACON_REWARD_REQUEST_META.to_string(),
        shard_id.to_string(),
        "reward".to_string(),
        reward_payload(info),
    ]
}

pub fn build_dev_reward_instruction(shard_id: u8, info: &DevRewardInfo) -> Vec<String> {
    vec![
        DEV_REWARD_REQUEST_META.to_string(),
        shard_id.to_string(),
        "reward".to_string(),
        reward_payload(info),
    ]
}

pub fn build_shard_reward_instruction(shard_id: u8, info: &ShardRewardInfo) -> Vec<String> {
    vec![
        SHARD_BLOCK_REWARD_REQUEST_META.to_string(),
        shard_id.to_string(),
        "reward".to_string(),
        reward_payload(info),
    ]
}

pub fn build_accepted_block_reward_instruction(
    shard_id: u8,
    info: &AcceptedBlockRewardInfo,
) -> Vec<String> {
    vec![
        ACCEPTED_BLOCK_REWARD_META.to_string(),
        shard_id.to_string(),
        reward_payload(info),
    ]
}

/// Stake instructions derived from a block's staking transactions, one line
/// per role, candidate order preserved.
pub fn build_stake_instructions_from_txs(txs: &[Tx]) -> Vec<Vec<String>> {
    let mut shard_candidates = Vec::new();
    let mut shard_tx_ids = Vec::new();
    let mut beacon_candidates = Vec::new();
    let mut beacon_tx_ids = Vec::new();
    for tx in txs {
        if let Tx::Staking { role, candidate, .. } = tx {
            match role {
                StakeRole::Shard => {
                    shard_candidates.push(candidate.clone());
                    shard_tx_ids.push(hex::encode(tx.hash()));
                }
                StakeRole::Beacon => {
                    beacon_candidates.push(candidate.clone());
                    beacon_tx_ids.push(hex::encode(tx.hash()));
                }
            }
        }
    }
    let mut instructions = Vec::new();
    if !shard_candidates.is_empty() {
        instructions.push(build_stake_instruction(
            &shard_candidates,
            StakeRole::Shard,
            &shard_tx_ids,
        ));
    }
    if !beacon_candidates.is_empty() {
        instructions.push(build_stake_instruction(
            &beacon_candidates,
            StakeRole::Beacon,
            &beacon_tx_ids,
        ));
    }
    instructions
}

/// Candidates seeded by a genesis block's two stake instructions.
pub fn staking_candidates(instructions: &[Vec<String>]) -> (Vec<String>, Vec<String>) {
    let mut beacon = Vec::new();
    let mut shard = Vec::new();
    for line in instructions {
        if line.len() < 3 || line[0] != STAKE_ACTION {
            continue;
        }
        match line[2].as_str() {
            "beacon" => beacon = split_joined(&line[1]),
            "shard" => shard = split_joined(&line[1]),
            _ => {}
        }
    }
    (beacon, shard)
}

// ---- instruction commitments ----------------------------------------------

fn line_hash(line: &[String]) -> Hash32 {
    // Join with an unambiguous separator before hashing; instruction fields
    // never contain a newline.
    hash_bytes(line.join("\n").as_bytes())
}

/// Flat digest of the whole instruction list (header `instruction_root`).
pub fn instructions_hash(instructions: &[Vec<String>]) -> Hash32 {
    if instructions.is_empty() {
        return ZERO_HASH;
    }
    let mut concatenated = Vec::new();
    for line in instructions {
        concatenated.extend_from_slice(&line_hash(line));
    }
    hash_bytes(&concatenated)
}

/// Merkle root over per-line hashes (header `instruction_merkle_root`).
pub fn instruction_merkle_root(instructions: &[Vec<String>]) -> Hash32 {
    if instructions.is_empty() {
        return ZERO_HASH;
    }
    let leaves: Vec<Hash32> = instructions.iter().map(|line| line_hash(line)).collect();
    merkle::root(&leaves)
}
