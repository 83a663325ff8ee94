//! Best-state records for the beacon chain and each shard chain. Committees
//! are owned here; blocks refer to them only through root hashes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::block::{BeaconBlock, ShardBlock};
use crate::committee::{self, CommitteeError};
use crate::config::ChainParams;
use crate::hash::{hash_bytes, Hash32, ZERO_HASH};
use crate::instruction::{Instruction, InstructionError, RANDOM_NUMBER_PARAM};
use crate::tx::StakeRole;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BestStateError {
    #[error(transparent)]
    Committee(#[from] CommitteeError),
    #[error(transparent)]
    Instruction(#[from] InstructionError),
    #[error("swap instruction does not reproduce the committee transition (shard {shard_id})")]
    SwapMismatch { shard_id: u8 },
    #[error("instruction addresses unknown shard {0}")]
    UnknownShard(u8),
}

/// Digest of an ordered key list; the empty list digests to zero so header
/// sentinels hold at genesis.
pub fn root_of_keys(keys: &[String]) -> Hash32 {
    if keys.is_empty() {
        return ZERO_HASH;
    }
    hash_bytes(keys.join("\n").as_bytes())
}

/// Digest of a shard-id keyed family of key lists.
pub fn root_of_key_map(map: &BTreeMap<u8, Vec<String>>) -> Hash32 {
    if map.values().all(Vec::is_empty) {
        return ZERO_HASH;
    }
    let mut buf = Vec::new();
    for (shard_id, keys) in map {
        buf.push(*shard_id);
        buf.extend_from_slice(keys.join("\n").as_bytes());
        buf.push(b'\n');
    }
    hash_bytes(&buf)
}

fn root_of_two(a: &[String], b: &[String]) -> Hash32 {
    if a.is_empty() && b.is_empty() {
        return ZERO_HASH;
    }
    let mut joined = a.to_vec();
    joined.extend_from_slice(b);
    root_of_keys(&joined)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBestState {
    pub best_block_hash: Hash32,
    pub beacon_height: u64,
    pub epoch: u64,
    pub active_shards: usize,
    pub max_beacon_committee_size: usize,
    pub min_beacon_committee_size: usize,
    pub max_shard_committee_size: usize,
    pub min_shard_committee_size: usize,
    pub beacon_proposer_index: usize,
    pub beacon_committee: Vec<String>,
    pub beacon_pending_validator: Vec<String>,
    /// Staked candidates not yet assigned to a pending queue.
    pub candidate_beacon_waiting: Vec<String>,
    pub candidate_shard_waiting: Vec<String>,
    pub shard_committee: BTreeMap<u8, Vec<String>>,
    pub shard_pending_validator: BTreeMap<u8, Vec<String>>,
    pub best_shard_hash: BTreeMap<u8, Hash32>,
    pub best_shard_height: BTreeMap<u8, u64>,
    pub current_random_number: i64,
    pub params: BTreeMap<String, String>,
    /// (from_shard, to_shard) -> height of the last crossing block.
    pub last_cross_shard_state: BTreeMap<u8, BTreeMap<u8, u64>>,
}

impl BeaconBestState {
    pub fn new_with_params(params: &ChainParams) -> Self {
        let mut shard_committee = BTreeMap::new();
        let mut shard_pending = BTreeMap::new();
        for shard in 0..params.active_shards {
            shard_committee.insert(shard as u8, Vec::new());
            shard_pending.insert(shard as u8, Vec::new());
        }
        BeaconBestState {
            active_shards: params.active_shards,
            max_beacon_committee_size: params.beacon_committee_size,
            min_beacon_committee_size: params.min_beacon_committee_size,
            max_shard_committee_size: params.shard_committee_size,
            min_shard_committee_size: params.min_shard_committee_size,
            shard_committee,
            shard_pending_validator: shard_pending,
            ..BeaconBestState::default()
        }
    }

    pub fn shard_committee_for(&self, shard_id: u8) -> &[String] {
        self.shard_committee.get(&shard_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Expected producer key for a block round.
    pub fn beacon_producer(&self, round: u32) -> Option<&String> {
        committee::producer_for_round(&self.beacon_committee, self.beacon_proposer_index, round)
    }

    pub fn beacon_committee_root(&self) -> Hash32 {
        root_of_two(&self.beacon_committee, &self.beacon_pending_validator)
    }

    pub fn beacon_candidate_root(&self) -> Hash32 {
        root_of_keys(&self.candidate_beacon_waiting)
    }

    pub fn shard_candidate_root(&self) -> Hash32 {
        root_of_keys(&self.candidate_shard_waiting)
    }

    pub fn shard_committee_root(&self) -> Hash32 {
        let mut combined = self.shard_committee.clone();
        for (shard_id, pending) in &self.shard_pending_validator {
            combined.entry(*shard_id).or_default().extend(pending.iter().cloned());
        }
        root_of_key_map(&combined)
    }

    /// Apply a beacon body's instructions in array order.
    pub fn apply_instructions(
        &mut self,
        instructions: &[Vec<String>],
    ) -> Result<(), BestStateError> {
        for line in instructions {
            match Instruction::parse(line)? {
                Instruction::Stake { candidates, role, .. } => match role {
                    StakeRole::Beacon => self.candidate_beacon_waiting.extend(candidates),
                    StakeRole::Shard => self.candidate_shard_waiting.extend(candidates),
                },
                Instruction::Random { randomness, .. } => {
                    self.current_random_number = randomness;
                }
                Instruction::Assign { candidates, role, shard_id } => match role {
                    StakeRole::Beacon => {
                        self.candidate_beacon_waiting.retain(|c| !candidates.contains(c));
                        self.beacon_pending_validator.extend(candidates);
                    }
                    StakeRole::Shard => {
                        if shard_id as usize >= self.active_shards {
                            return Err(BestStateError::UnknownShard(shard_id));
                        }
                        self.candidate_shard_waiting.retain(|c| !candidates.contains(c));
                        self.shard_pending_validator
                            .entry(shard_id)
                            .or_default()
                            .extend(candidates);
                    }
                },
                Instruction::Swap { incoming, evicted, role, shard_id } => {
                    self.apply_swap(&incoming, &evicted, role, shard_id)?;
                }
                Instruction::Set { param, value } => {
                    if param == RANDOM_NUMBER_PARAM {
                        if let Ok(v) = value.parse() {
                            self.current_random_number = v;
                        }
                    }
                    self.params.insert(param, value);
                }
                // Reward and bridge effects touch the ledger, not this record.
                _ => {}
            }
        }
        Ok(())
    }

    fn apply_swap(
        &mut self,
        incoming: &[String],
        evicted: &[String],
        role: StakeRole,
        shard_id: u8,
    ) -> Result<(), BestStateError> {
        match role {
            StakeRole::Beacon => {
                let outcome = committee::swap_validator(
                    &self.beacon_pending_validator,
                    &self.beacon_committee,
                    self.max_beacon_committee_size,
                    incoming.len(),
                )?;
                if outcome.incoming != incoming || outcome.evicted != evicted {
                    return Err(BestStateError::SwapMismatch { shard_id });
                }
                self.beacon_pending_validator = outcome.pending;
                self.beacon_committee = outcome.committee;
            }
            StakeRole::Shard => {
                if shard_id as usize >= self.active_shards {
                    return Err(BestStateError::UnknownShard(shard_id));
                }
                let pending = self.shard_pending_validator.entry(shard_id).or_default().clone();
                let committee = self.shard_committee.entry(shard_id).or_default().clone();
                let outcome = committee::swap_validator(
                    &pending,
                    &committee,
                    self.max_shard_committee_size,
                    incoming.len(),
                )?;
                if outcome.incoming != incoming || outcome.evicted != evicted {
                    return Err(BestStateError::SwapMismatch { shard_id });
                }
                self.shard_pending_validator.insert(shard_id, outcome.pending);
                self.shard_committee.insert(shard_id, outcome.committee);
            }
        }
        Ok(())
    }

    /// Advance the record to a freshly applied block.
    pub fn update_from_block(&mut self, block: &BeaconBlock) {
        self.best_block_hash = block.hash();
        self.beacon_height = block.header.height;
        self.epoch = block.header.epoch;
        if block.header.height > 1 {
            self.beacon_proposer_index = committee::producer_position(
                self.beacon_committee.len().max(1),
                self.beacon_proposer_index,
                block.header.round,
            );
        }
        for (shard_id, entries) in &block.body.shard_state {
            if let Some(last) = entries.last() {
                self.best_shard_height.insert(*shard_id, last.height);
                self.best_shard_hash.insert(*shard_id, last.hash);
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardBestState {
    pub shard_id: u8,
    pub best_block_hash: Hash32,
    pub shard_height: u64,
    pub epoch: u64,
    pub shard_committee: Vec<String>,
    pub shard_pending_validator: Vec<String>,
    pub shard_proposer_idx: usize,
    pub beacon_height: u64,
    pub beacon_hash: Hash32,
    pub total_txs: u64,
    pub active_shards: usize,
    pub max_shard_committee_size: usize,
    pub min_shard_committee_size: usize,
}

impl ShardBestState {
    pub fn new_with_params(shard_id: u8, params: &ChainParams) -> Self {
        ShardBestState {
            shard_id,
            active_shards: params.active_shards,
            max_shard_committee_size: params.shard_committee_size,
            min_shard_committee_size: params.min_shard_committee_size,
            ..ShardBestState::default()
        }
    }

    pub fn shard_producer(&self, round: u32) -> Option<&String> {
        committee::producer_for_round(&self.shard_committee, self.shard_proposer_idx, round)
    }

    pub fn committee_root(&self) -> Hash32 {
        root_of_keys(&self.shard_committee)
    }

    pub fn pending_validator_root(&self) -> Hash32 {
        root_of_keys(&self.shard_pending_validator)
    }

    /// Swap instructions inside a shard body rotate this shard's own queues.
    pub fn apply_instructions(
        &mut self,
        instructions: &[Vec<String>],
    ) -> Result<(), BestStateError> {
        for line in instructions {
            if let Instruction::Swap { incoming, evicted, role: StakeRole::Shard, shard_id } =
                Instruction::parse(line)?
            {
                if shard_id != self.shard_id {
                    continue;
                }
                let outcome = committee::swap_validator(
                    &self.shard_pending_validator,
                    &self.shard_committee,
                    self.max_shard_committee_size,
                    incoming.len(),
                )?;
                if outcome.incoming != incoming || outcome.evicted != evicted {
                    return Err(BestStateError::SwapMismatch { shard_id });
                }
                self.shard_pending_validator = outcome.pending;
                self.shard_committee = outcome.committee;
            }
        }
        Ok(())
    }

    /// Enqueue candidates the beacon assigned to this shard.
    pub fn add_pending_validators(&mut self, candidates: &[String]) {
        self.shard_pending_validator.extend_from_slice(candidates);
    }

    pub fn update_from_block(&mut self, block: &ShardBlock) {
        self.best_block_hash = block.hash();
        self.shard_height = block.header.height;
        self.epoch = block.header.epoch;
        self.beacon_height = block.header.beacon_height;
        self.beacon_hash = block.header.beacon_hash;
        self.total_txs += block.body.transactions.len() as u64;
        if block.header.height > 1 && !self.shard_committee.is_empty() {
            self.shard_proposer_idx = committee::producer_position(
                self.shard_committee.len(),
                self.shard_proposer_idx,
                block.header.round,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{build_assign_instruction, build_stake_instruction, build_swap_instruction};

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn state() -> BeaconBestState {
        BeaconBestState::new_with_params(&ChainParams::testnet())
    }

    #[test]
    fn stake_feeds_candidate_pools() {
        let mut st = state();
        let line = build_stake_instruction(&keys(&["pk1", "pk2"]), StakeRole::Shard, &keys(&["t1", "t2"]));
        st.apply_instructions(&[line]).unwrap();
        assert_eq!(st.candidate_shard_waiting, keys(&["pk1", "pk2"]));
    }

    #[test]
    fn assign_moves_candidates_into_pending() {
        let mut st = state();
        st.candidate_shard_waiting = keys(&["pk1", "pk2", "pk3"]);
        let line = build_assign_instruction(&keys(&["pk2", "pk1"]), StakeRole::Shard, 3);
        st.apply_instructions(&[line]).unwrap();
        assert_eq!(st.shard_pending_validator[&3], keys(&["pk2", "pk1"]));
        assert_eq!(st.candidate_shard_waiting, keys(&["pk3"]));
    }

    #[test]
    fn swap_mismatch_is_rejected() {
        let mut st = state();
        st.shard_committee.insert(0, keys(&["A", "B", "C", "D"]));
        st.shard_pending_validator.insert(0, keys(&["E"]));
        st.max_shard_committee_size = 4;
        let bogus = build_swap_instruction(&keys(&["E"]), &keys(&["B"]), StakeRole::Shard, 0);
        assert!(matches!(
            st.apply_instructions(&[bogus]),
            Err(BestStateError::SwapMismatch { shard_id: 0 })
        ));
    }

    #[test]
    fn committee_roots_are_zero_only_when_empty() {
        let mut st = state();
        assert_eq!(st.beacon_committee_root(), ZERO_HASH);
        st.beacon_committee = keys(&["A"]);
        assert_ne!(st.beacon_committee_root(), ZERO_HASH);
    }
}
