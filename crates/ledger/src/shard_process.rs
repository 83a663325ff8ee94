//! Shard commit pipeline: the six phases of §block-commit for shard blocks,
//! including incoming cross-shard ingestion and the reward effects of beacon
//! instructions addressed to this shard.

use std::sync::Arc;
use tracing::{debug, info};

use crate::beststate::ShardBestState;
use crate::block::{cross_transaction_root, transactions_root, BeaconBlock, ShardBlock};
use crate::chain::{ChainContext, ChainError, ChainResult};
use crate::crossshard;
use crate::instruction::{instruction_merkle_root, instructions_hash, Instruction};
use crate::reward;
use crate::store::{Scope, StoreError};
use crate::tx::{total_txs_fee, TokenKind};
use crate::utxo;
use crate::view::TxViewPoint;

impl ChainContext {
    /// Validate and commit one shard block on top of its chain's best state.
    pub fn insert_shard_block(&self, block: &ShardBlock) -> ChainResult<()> {
        self.check_interrupt()?;
        block.validate_sanity(&self.params)?;

        let shard_id = block.header.shard_id;
        let _guard = self.shard_commit_lock(shard_id)?.lock();
        let best = self.shard_best(shard_id)?;
        debug!(shard_id, height = block.header.height, "shard block entering pipeline");

        // Phase 2: context validation.
        let expected_height = best.shard_height + 1;
        if block.header.height != expected_height {
            return Err(ChainError::HeightMismatch {
                expected: expected_height,
                got: block.header.height,
            });
        }
        if block.header.previous_block_hash != best.best_block_hash {
            return Err(ChainError::ParentMismatch);
        }
        if block.header.beacon_height < best.beacon_height {
            return Err(ChainError::HeightMismatch {
                expected: best.beacon_height,
                got: block.header.beacon_height,
            });
        }
        self.verify_shard_producer(&best, block)?;

        if transactions_root(&block.body.transactions) != block.header.tx_root {
            return Err(ChainError::RootMismatch { field: "tx_root" });
        }
        if crossshard::shard_tx_root(&block.body.transactions, self.params.active_shards)
            != block.header.shard_tx_root
        {
            return Err(ChainError::RootMismatch { field: "shard_tx_root" });
        }
        if cross_transaction_root(&block.body.cross_transactions)
            != block.header.cross_transaction_root
        {
            return Err(ChainError::RootMismatch { field: "cross_transaction_root" });
        }
        if instructions_hash(&block.body.instructions) != block.header.instructions_root {
            return Err(ChainError::RootMismatch { field: "instructions_root" });
        }
        if instruction_merkle_root(&block.body.instructions) != block.header.instruction_merkle_root {
            return Err(ChainError::RootMismatch { field: "instruction_merkle_root" });
        }
        if total_txs_fee(&block.body.transactions) != block.header.total_txs_fee {
            return Err(ChainError::FeeMismatch);
        }

        // The beacon chain must already hold the referenced block.
        let beacon_hash = self.get_beacon_block_hash_by_height(block.header.beacon_height)?;
        if block.header.height > 1 && beacon_hash != block.header.beacon_hash {
            return Err(ChainError::RootMismatch { field: "beacon_hash" });
        }

        let beacon_blocks =
            self.fetch_beacon_blocks_in_range(best.beacon_height + 1, block.header.beacon_height)?;

        // Post-instruction committee roots.
        let mut new_state = (*best).clone();
        for candidates in assign_instructions_for_shard(&beacon_blocks, shard_id)? {
            new_state.add_pending_validators(&candidates);
        }
        new_state.apply_instructions(&block.body.instructions)?;
        if new_state.committee_root() != block.header.committee_root {
            return Err(ChainError::RootMismatch { field: "committee_root" });
        }
        if new_state.pending_validator_root() != block.header.pending_validator_root {
            return Err(ChainError::RootMismatch { field: "pending_validator_root" });
        }

        let own_view = TxViewPoint::from_block_txs(block, self.params.active_shards);
        self.reject_double_spends(&own_view)?;

        reward::validate_withdraw_responses(&self.db, &block.body.transactions)
            .map_err(|e| ChainError::WithdrawResponse(e.to_string()))?;

        // Phase 3: backup. The previous block's snapshot is dropped first;
        // from here until the next commit the keyspace holds this block's
        // pre-images so it stays revertible.
        self.db.clean_backup(Scope::Shard(shard_id))?;
        self.backup_current_shard_state(block, &beacon_blocks)?;

        // Phase 4: apply.
        self.store_shard_block(block)?;
        let block_hash = block.hash();
        for (index, tx) in block.body.transactions.iter().enumerate() {
            self.store_transaction_index(&tx.hash(), &block_hash, index as u32)?;
        }

        self.apply_own_view(&own_view)?;
        let cross_view =
            TxViewPoint::from_cross_transactions(shard_id, &block.body.cross_transactions);
        self.apply_cross_view(&cross_view)?;

        reward::apply_withdraw_responses(&self.db, &block.body.transactions)
            .map_err(|e| ChainError::WithdrawResponse(e.to_string()))?;

        self.walk_reward_instructions(&beacon_blocks, shard_id, |ctx, key, token_id, amount| {
            reward::add_committee_reward(&ctx.db, key, token_id, amount).map_err(ChainError::from)
        })?;

        for (from_shard, hashes) in block.body.incoming_cross_shard_map() {
            for hash in hashes {
                self.store_incoming_cross_shard(shard_id, from_shard, block.header.height, &hash)?;
            }
        }

        new_state.update_from_block(block);

        // Phase 5: commit best state; readers swap to the new pointer.
        self.store_shard_best_state(&new_state)?;
        self.set_shard_best(shard_id, Arc::new(new_state))?;

        info!(shard_id, height = block.header.height, "shard block committed");
        Ok(())
    }

    fn verify_shard_producer(&self, best: &ShardBestState, block: &ShardBlock) -> ChainResult<()> {
        let expected = best
            .shard_producer(block.header.round)
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

    /// A serial number already present in the index, or repeated inside the
    /// block, rejects the block before any state is touched.
    fn reject_double_spends(&self, view: &TxViewPoint) -> ChainResult<()> {
        let mut check = |token_id: &crate::tx::TokenId,
                         serials: &[Vec<u8>]|
         -> ChainResult<()> {
            let mut seen = std::collections::HashSet::new();
            for sn in serials {
                if !seen.insert(sn.as_slice())
                    || utxo::has_serial_number(&self.db, token_id, view.shard_id, sn)?
                {
                    return Err(ChainError::Utxo(utxo::UtxoError::DoubleSpend(hex::encode(sn))));
                }
            }
            Ok(())
        };
        check(&view.token_id, &view.list_serial_numbers)?;
        for sub in &view.privacy_token_views {
            check(&sub.view.token_id, &sub.view.list_serial_numbers)?;
        }
        Ok(())
    }

    /// Ingest the index mutations of the block's own transactions and
    /// register any tokens they initialize.
    fn apply_own_view(&self, view: &TxViewPoint) -> ChainResult<()> {
        for entry in &view.custom_token_txs {
            match entry.data.kind {
                TokenKind::Init => {
                    utxo::store_custom_token(&self.db, &entry.data.property_id, &entry.tx_hash)?;
                }
                TokenKind::CrossShard => {
                    if !utxo::has_custom_token(&self.db, &entry.data.property_id)? {
                        utxo::store_custom_token(&self.db, &entry.data.property_id, &entry.tx_hash)?;
                    }
                }
                TokenKind::Transfer => {}
            }
        }
        for sub in &view.privacy_token_views {
            if let (Some(TokenKind::Init), Some(tx_hash)) = (sub.kind, sub.tx_hash) {
                utxo::store_privacy_token(&self.db, &sub.view.token_id, &tx_hash)?;
            }
            self.apply_index_from_view(&sub.view, true)?;
        }
        self.apply_index_from_view(view, true)
    }

    /// Ingest incoming cross-shard artifacts and register first-seen
    /// privacy tokens crossing in.
    fn apply_cross_view(&self, view: &TxViewPoint) -> ChainResult<()> {
        for sub in &view.privacy_token_views {
            let known = utxo::has_privacy_token(&self.db, &sub.view.token_id)?
                || utxo::has_privacy_token_cross_shard(&self.db, &sub.view.token_id)?;
            if !known {
                if let Some(meta) = &sub.meta {
                    let bytes = serde_json::to_vec(meta)
                        .map_err(|e| StoreError::Corrupt(format!("token metadata: {e}")))?;
                    utxo::store_privacy_token_cross_shard(&self.db, &sub.view.token_id, &bytes)?;
                }
            }
            self.apply_index_from_view(&sub.view, false)?;
        }
        self.apply_index_from_view(view, false)
    }

    fn apply_index_from_view(&self, view: &TxViewPoint, store_serials: bool) -> ChainResult<()> {
        if store_serials {
            utxo::store_serial_numbers_from_view(&self.db, view)?;
        }
        utxo::store_commitments_from_view(&self.db, view, self.params.active_shards)?;
        utxo::store_snds_from_view(&self.db, view)?;
        Ok(())
    }

    /// Pre-revert guard: re-validate the committed block against the
    /// snapshotted previous best state, producer signature included.
    pub fn validate_shard_block_with_prev_best_state(&self, block: &ShardBlock) -> ChainResult<()> {
        let shard_id = block.header.shard_id;
        let prev_bytes = self.db.fetch_prev_best_state(Scope::Shard(shard_id))?;
        let prev: ShardBestState = bincode::deserialize(&prev_bytes).map_err(StoreError::from)?;
        self.verify_shard_producer(&prev, block)?;
        let parent = self.get_shard_block_by_hash(&block.header.previous_block_hash)?;
        if parent.header.height + 1 != block.header.height {
            return Err(ChainError::HeightMismatch {
                expected: parent.header.height + 1,
                got: block.header.height,
            });
        }
        Ok(())
    }
}

/// Candidate lists the beacon assigned to `shard_id` in the given blocks.
fn assign_instructions_for_shard(
    beacon_blocks: &[BeaconBlock],
    shard_id: u8,
) -> ChainResult<Vec<Vec<String>>> {
    let mut assigned = Vec::new();
    for block in beacon_blocks {
        for line in &block.body.instructions {
            if line.first().map(String::as_str) != Some(crate::instruction::ASSIGN_ACTION) {
                continue;
            }
            if let Instruction::Assign {
                candidates,
                role: crate::tx::StakeRole::Shard,
                shard_id: target,
            } = Instruction::parse(line)?
            {
                if target == shard_id {
                    assigned.push(candidates);
                }
            }
        }
    }
    Ok(assigned)
}
