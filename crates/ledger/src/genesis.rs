//! Genesis construction: the beacon genesis block seeds the initial
//! committees through two stake instructions and a `set randomnumber 0`;
//! each shard genesis takes its committee slice from those candidates.

use std::sync::Arc;
use tracing::info;

use crate::beststate::{BeaconBestState, ShardBestState};
use crate::block::{BeaconBlock, BeaconBody, BeaconHeader, ShardBlock, ShardHeader};
use crate::chain::{ChainContext, ChainResult};
use crate::config::{ChainParams, BEACON_BLOCK_VERSION, SHARD_BLOCK_VERSION};
use crate::instruction::{
    build_set_instruction, build_stake_instruction, instruction_merkle_root, instructions_hash,
    staking_candidates, RANDOM_NUMBER_PARAM,
};
use crate::tx::StakeRole;

pub fn create_beacon_genesis_block(params: &ChainParams) -> BeaconBlock {
    let mut instructions = Vec::new();
    instructions.push(build_stake_instruction(
        &params.preselect_beacon_keys,
        StakeRole::Beacon,
        &[],
    ));
    instructions.push(build_stake_instruction(
        &params.preselect_shard_keys,
        StakeRole::Shard,
        &[],
    ));
    instructions.push(build_set_instruction(RANDOM_NUMBER_PARAM, "0"));

    let header = BeaconHeader {
        version: BEACON_BLOCK_VERSION,
        height: 1,
        round: 1,
        epoch: 1,
        timestamp: params.genesis_timestamp,
        instruction_hash: instructions_hash(&instructions),
        instruction_merkle_root: instruction_merkle_root(&instructions),
        ..BeaconHeader::default()
    };
    BeaconBlock {
        header,
        body: BeaconBody {
            shard_state: Default::default(),
            instructions,
        },
        ..BeaconBlock::default()
    }
}

pub fn create_shard_genesis_block(shard_id: u8, params: &ChainParams) -> ShardBlock {
    ShardBlock {
        header: ShardHeader {
            version: SHARD_BLOCK_VERSION,
            height: 1,
            round: 1,
            epoch: 1,
            shard_id,
            timestamp: params.genesis_timestamp,
            beacon_height: 1,
            ..ShardHeader::default()
        },
        ..ShardBlock::default()
    }
}

/// Committee slice shard `s` takes from the genesis shard candidates.
fn shard_committee_slice(candidates: &[String], shard_id: u8, committee_size: usize) -> Vec<String> {
    let start = shard_id as usize * committee_size;
    let end = (start + committee_size).min(candidates.len());
    if start >= candidates.len() {
        return Vec::new();
    }
    candidates[start..end].to_vec()
}

impl ChainContext {
    /// Load the committed chain state, or install genesis on an empty store.
    pub fn init_chain_state(&self) -> ChainResult<()> {
        match self.fetch_beacon_best_state() {
            Ok(state) => self.set_beacon_best(Arc::new(state)),
            Err(crate::store::StoreError::NotFound) => self.init_beacon_state()?,
            Err(e) => return Err(e.into()),
        }
        for shard in 0..self.params.active_shards {
            let shard_id = shard as u8;
            match self.fetch_shard_best_state(shard_id) {
                Ok(state) => self.set_shard_best(shard_id, Arc::new(state))?,
                Err(crate::store::StoreError::NotFound) => self.init_shard_state(shard_id)?,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn init_beacon_state(&self) -> ChainResult<()> {
        let block = create_beacon_genesis_block(&self.params);
        let (beacon_candidates, shard_candidates) = staking_candidates(&block.body.instructions);

        let mut state = BeaconBestState::new_with_params(&self.params);
        state.apply_instructions(&block.body.instructions)?;
        // Genesis candidates are installed directly: the beacon candidates
        // become the beacon committee and each shard takes its slice.
        state.beacon_committee = beacon_candidates;
        state.candidate_beacon_waiting.clear();
        for shard in 0..self.params.active_shards {
            let shard_id = shard as u8;
            let committee = shard_committee_slice(
                &shard_candidates,
                shard_id,
                self.params.min_shard_committee_size,
            );
            state
                .candidate_shard_waiting
                .retain(|candidate| !committee.contains(candidate));
            state.shard_committee.insert(shard_id, committee);
        }
        state.update_from_block(&block);

        self.store_beacon_best_state(&state)?;
        self.store_beacon_block(&block)?;
        self.store_committee_by_height(block.header.height, &state.shard_committee)?;
        self.set_beacon_best(Arc::new(state));
        info!("installed beacon genesis");
        Ok(())
    }

    fn init_shard_state(&self, shard_id: u8) -> ChainResult<()> {
        let block = create_shard_genesis_block(shard_id, &self.params);
        let genesis_beacon = self.get_beacon_block_by_height(1)?;
        let (_, shard_candidates) = staking_candidates(&genesis_beacon.body.instructions);

        let mut state = ShardBestState::new_with_params(shard_id, &self.params);
        state.shard_committee = shard_committee_slice(
            &shard_candidates,
            shard_id,
            self.params.min_shard_committee_size,
        );
        state.update_from_block(&block);

        self.store_shard_block(&block)?;
        self.store_shard_best_state(&state)?;
        self.set_shard_best(shard_id, Arc::new(state))?;
        info!(shard_id, "installed shard genesis");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_block_passes_sanity() {
        let params = ChainParams::testnet();
        let block = create_beacon_genesis_block(&params);
        block.validate_sanity().unwrap();
        assert_eq!(block.header.height, 1);
        assert_eq!(block.body.instructions.len(), 3);
    }

    #[test]
    fn committee_slice_is_disjoint_per_shard() {
        let candidates: Vec<String> = (0..8).map(|i| format!("pk{i}")).collect();
        let a = shard_committee_slice(&candidates, 0, 4);
        let b = shard_committee_slice(&candidates, 1, 4);
        assert_eq!(a, vec!["pk0", "pk1", "pk2", "pk3"]);
        assert_eq!(b, vec!["pk4", "pk5", "pk6", "pk7"]);
        assert!(shard_committee_slice(&candidates, 2, 4).is_empty());
    }
}
