//! Beacon commit pipeline: sanity, context validation against the committed
//! best state, backup, apply, best-state commit, backup cleanup.

use std::sync::Arc;
use tracing::{debug, info};

use crate::beststate::BeaconBestState;
use crate::block::BeaconBlock;
use crate::chain::{ChainContext, ChainError, ChainResult};
use crate::hash::hash_of;
use crate::instruction::{instruction_merkle_root, instructions_hash, Instruction};
use crate::reward;
use crate::store::{Scope, StoreError};
use crate::tx::NATIVE_TOKEN_ID;

impl ChainContext {
    /// Validate and commit one beacon block on top of the current best state.
    pub fn insert_beacon_block(&self, block: &BeaconBlock) -> ChainResult<()> {
        self.check_interrupt()?;
        block.validate_sanity()?;

        let _guard = self.beacon_commit_lock.lock();
        let best = self.beacon_best();
        debug!(height = block.header.height, "beacon block entering pipeline");

        // Phase 2: context validation.
        let expected_height = best.beacon_height + 1;
        if block.header.height != expected_height {
            return Err(ChainError::HeightMismatch {
                expected: expected_height,
                got: block.header.height,
            });
        }
        if block.header.previous_block_hash != best.best_block_hash {
            return Err(ChainError::ParentMismatch);
        }
        self.verify_beacon_producer(&best, block)?;

        if instructions_hash(&block.body.instructions) != block.header.instruction_hash {
            return Err(ChainError::RootMismatch { field: "instruction_hash" });
        }
        if instruction_merkle_root(&block.body.instructions) != block.header.instruction_merkle_root {
            return Err(ChainError::RootMismatch { field: "instruction_merkle_root" });
        }
        if hash_of(&block.body.shard_state) != block.header.shard_state_hash {
            return Err(ChainError::RootMismatch { field: "shard_state_hash" });
        }

        // The header roots commit to the post-instruction committee state.
        let mut new_state = (*best).clone();
        new_state.apply_instructions(&block.body.instructions)?;
        if new_state.beacon_committee_root() != block.header.beacon_committee_root {
            return Err(ChainError::RootMismatch { field: "beacon_committee_root" });
        }
        if new_state.shard_committee_root() != block.header.shard_committee_root {
            return Err(ChainError::RootMismatch { field: "shard_committee_root" });
        }
        if new_state.beacon_candidate_root() != block.header.beacon_candidate_root {
            return Err(ChainError::RootMismatch { field: "beacon_candidate_root" });
        }
        if new_state.shard_candidate_root() != block.header.shard_candidate_root {
            return Err(ChainError::RootMismatch { field: "shard_candidate_root" });
        }

        // Phase 3: backup. The previous block's snapshot is dropped first;
        // from here until the next commit the keyspace holds this block's
        // pre-images so it stays revertible.
        self.db.clean_backup(Scope::Beacon)?;
        self.backup_current_beacon_state(block)?;

        // Phase 4: apply.
        self.store_beacon_block(block)?;
        self.apply_shard_states(&mut new_state, block)?;
        self.apply_accepted_block_rewards(block)?;
        new_state.update_from_block(block);
        self.store_committee_by_height(block.header.height, &new_state.shard_committee)?;

        // Phase 5: commit best state; readers swap to the new pointer.
        self.store_beacon_best_state(&new_state)?;
        self.set_beacon_best(Arc::new(new_state));

        info!(height = block.header.height, "beacon block committed");
        Ok(())
    }

    fn verify_beacon_producer(&self, best: &BeaconBestState, block: &BeaconBlock) -> ChainResult<()> {
        let expected = best
            .beacon_producer(block.header.round)
            .cloned()
            .unwrap_or_default();
        let producer = block.header.producer_address.key_string();
        if producer != expected {
            return Err(ChainError::WrongProducer { expected });
        }
        let header_hash = block.header.hash();
        if !self.verifier.verify(
            &block.header.producer_address.public_key,
            &header_hash,
            &block.producer_sig,
        ) {
            return Err(ChainError::InvalidProducerSignature);
        }
        Ok(())
    }

    /// Record accepted shard-to-beacon blocks and extend the per-(from, to)
    /// cross-shard height chains.
    fn apply_shard_states(
        &self,
        new_state: &mut BeaconBestState,
        block: &BeaconBlock,
    ) -> ChainResult<()> {
        for (shard_id, entries) in &block.body.shard_state {
            for entry in entries {
                self.store_accepted_shard_to_beacon(*shard_id, &entry.hash)?;
                for dest in &entry.cross_shard {
                    let previous = new_state
                        .last_cross_shard_state
                        .get(shard_id)
                        .and_then(|to| to.get(dest))
                        .copied()
                        .unwrap_or(0);
                    self.store_cross_shard_next_height(*shard_id, *dest, previous, entry.height)?;
                    self.store_cross_shard_next_height(*shard_id, *dest, entry.height, 0)?;
                    new_state
                        .last_cross_shard_state
                        .entry(*shard_id)
                        .or_default()
                        .insert(*dest, entry.height);
                }
            }
        }
        Ok(())
    }

    /// Grow the pending shard-reward entries for every accepted shard block,
    /// with the base-coin fee augmented by the minted block reward.
    fn apply_accepted_block_rewards(&self, block: &BeaconBlock) -> ChainResult<()> {
        for line in &block.body.instructions {
            if Instruction::is_committee_action(line) || line.len() < 2 {
                continue;
            }
            if let Instruction::AcceptedBlockReward { info, .. } = Instruction::parse(line)? {
                let mut fees = info.txs_fee.clone();
                let minted = reward::reward_amount(&self.params, info.shard_block_height);
                let entry = fees.entry(NATIVE_TOKEN_ID).or_insert(0);
                *entry = entry.saturating_add(minted);
                for (token_id, amount) in &fees {
                    reward::add_shard_reward_request(
                        &self.db,
                        block.header.epoch,
                        info.shard_id,
                        token_id,
                        *amount,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Pre-revert guard: re-validate the committed block against the
    /// snapshotted previous best state, producer signature included.
    pub fn validate_beacon_block_with_prev_best_state(&self, block: &BeaconBlock) -> ChainResult<()> {
        let prev_bytes = self.db.fetch_prev_best_state(Scope::Beacon)?;
        let prev: BeaconBestState = bincode::deserialize(&prev_bytes).map_err(StoreError::from)?;
        self.verify_beacon_producer(&prev, block)?;
        let parent = self.get_beacon_block_by_hash(&block.header.previous_block_hash)?;
        if parent.header.height + 1 != block.header.height {
            return Err(ChainError::HeightMismatch {
                expected: parent.header.height + 1,
                got: block.header.height,
            });
        }
        Ok(())
    }
}
