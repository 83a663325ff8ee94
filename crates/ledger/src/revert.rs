//! Backup and revert: phase 3 of the commit pipeline writes pre-images of
//! everything a block will mutate into the snapshot keyspace; the revert
//! entry points restore them and delete the block. Revert is legal only for
//! the most recently applied block of a chain.

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::beststate::{BeaconBestState, ShardBestState};
use crate::block::{BeaconBlock, ShardBlock};
use crate::chain::{ChainContext, ChainError, ChainResult};
use crate::instruction::Instruction;
use crate::key::decode_public_key;
use crate::reward;
use crate::store::{Scope, StoreError};
use crate::tx::{TokenId, TokenKind, NATIVE_TOKEN_ID};
use crate::utxo;
use crate::view::TxViewPoint;

/// Fee map of an accepted shard block, augmented with the minted base-coin
/// reward for that height. Both backup and restore derive the same set.
fn augmented_fee_tokens(
    ctx: &ChainContext,
    txs_fee: &BTreeMap<TokenId, u64>,
    shard_block_height: u64,
) -> BTreeMap<TokenId, u64> {
    let mut fees = txs_fee.clone();
    let minted = reward::reward_amount(&ctx.params, shard_block_height);
    let entry = fees.entry(NATIVE_TOKEN_ID).or_insert(0);
    *entry = entry.saturating_add(minted);
    fees
}

impl ChainContext {
    // ---- shard chain: backup ------------------------------------------------

    /// Phase 3 for a shard block: snapshot the best state and the pre-images
    /// of every key the block will mutate.
    pub(crate) fn backup_current_shard_state(
        &self,
        block: &ShardBlock,
        beacon_blocks: &[BeaconBlock],
    ) -> ChainResult<()> {
        let shard_id = block.header.shard_id;
        let scope = Scope::Shard(shard_id);
        let current = self.shard_best(shard_id)?;
        let bytes = bincode::serialize(current.as_ref()).map_err(StoreError::from)?;
        self.db.store_prev_best_state(scope, &bytes)?;

        let own_view = TxViewPoint::from_block_txs(block, self.params.active_shards);
        self.backup_view_counters(scope, &own_view, true)?;
        let cross_view =
            TxViewPoint::from_cross_transactions(shard_id, &block.body.cross_transactions);
        self.backup_view_counters(scope, &cross_view, false)?;

        for (requester, token_id) in reward::withdraw_requesters(&block.body.transactions) {
            reward::backup_committee_reward(&self.db, scope, &requester, &token_id)?;
        }

        self.backup_from_beacon_instructions(beacon_blocks, shard_id)?;
        Ok(())
    }

    /// Snapshot the serial-number and commitment counters of every token a
    /// view touches (the native token plus each privacy sub-view).
    fn backup_view_counters(
        &self,
        scope: Scope,
        view: &TxViewPoint,
        include_serials: bool,
    ) -> ChainResult<()> {
        if include_serials {
            utxo::backup_serial_numbers_len(&self.db, scope, &view.token_id, view.shard_id)?;
        }
        utxo::backup_commitments_len(&self.db, scope, &view.token_id, view.shard_id)?;
        for sub in &view.privacy_token_views {
            if include_serials {
                utxo::backup_serial_numbers_len(&self.db, scope, &sub.view.token_id, view.shard_id)?;
            }
            utxo::backup_commitments_len(&self.db, scope, &sub.view.token_id, view.shard_id)?;
        }
        Ok(())
    }

    /// Snapshot the reward-ledger entries that beacon instructions addressed
    /// to this shard will credit.
    fn backup_from_beacon_instructions(
        &self,
        beacon_blocks: &[BeaconBlock],
        shard_id: u8,
    ) -> ChainResult<()> {
        let scope = Scope::Shard(shard_id);
        self.walk_reward_instructions(beacon_blocks, shard_id, |ctx, key, token_id, _amount| {
            reward::backup_committee_reward(&ctx.db, scope, key, token_id).map_err(ChainError::from)
        })
    }

    fn restore_from_beacon_instructions(
        &self,
        beacon_blocks: &[BeaconBlock],
        shard_id: u8,
    ) -> ChainResult<()> {
        let scope = Scope::Shard(shard_id);
        self.walk_reward_instructions(beacon_blocks, shard_id, |ctx, key, token_id, _amount| {
            reward::restore_committee_reward(&ctx.db, scope, key, token_id).map_err(ChainError::from)
        })
    }

    /// Visit each (committee key, token, amount) credit produced by the
    /// reward instructions addressed to `shard_id`. Shared by backup, apply,
    /// and restore so the three walks cannot drift apart; shard rewards are
    /// split across the epoch's committee with floor division.
    pub(crate) fn walk_reward_instructions<F>(
        &self,
        beacon_blocks: &[BeaconBlock],
        shard_id: u8,
        mut visit: F,
    ) -> ChainResult<()>
    where
        F: FnMut(&ChainContext, &[u8], &TokenId, u64) -> ChainResult<()>,
    {
        let mut committee_cache: Option<(u64, Vec<Vec<u8>>)> = None;
        for beacon_block in beacon_blocks {
            for line in &beacon_block.body.instructions {
                if Instruction::is_committee_action(line) || line.len() <= 2 {
                    continue;
                }
                match Instruction::parse(line)? {
                    Instruction::BeaconReward { shard_id: target, info } if target == shard_id => {
                        let key = decode_public_key(&info.pay_to_public_key)
                            .map_err(|_| StoreError::Corrupt(info.pay_to_public_key.clone()))?;
                        for (token_id, amount) in &info.beacon_reward {
                            visit(self, &key, token_id, *amount)?;
                        }
                    }
                    Instruction::DevReward { shard_id: target, info } if target == shard_id => {
                        let dev = decode_public_key(&self.params.dev_reward_address)
                            .map_err(|_| StoreError::Corrupt("dev reward address".into()))?;
                        for (token_id, amount) in &info.dev_reward {
                            visit(self, &dev, token_id, *amount)?;
                        }
                    }
                    Instruction::ShardReward { shard_id: target, info } if target == shard_id => {
                        let snapshot_height = info.epoch * self.params.epoch_span;
                        let refresh = match &committee_cache {
                            Some((height, _)) => *height != snapshot_height,
                            None => true,
                        };
                        if refresh {
                            let committees = self.fetch_committee_by_height(snapshot_height)?;
                            let members = committees
                                .get(&shard_id)
                                .map(Vec::as_slice)
                                .unwrap_or(&[])
                                .iter()
                                .map(|member| {
                                    decode_public_key(member)
                                        .map_err(|_| StoreError::Corrupt(member.clone()))
                                })
                                .collect::<Result<Vec<_>, _>>()?;
                            committee_cache = Some((snapshot_height, members));
                        }
                        let (_, members) = committee_cache.as_ref().expect("cache just filled");
                        let shares = reward::split_reward(&info.shard_reward, members.len());
                        for (token_id, share) in &shares {
                            for member in members {
                                visit(self, member, token_id, *share)?;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    // ---- shard chain: revert -------------------------------------------------

    /// Undo the most recently applied shard block. Legal only before any
    /// descendant has been applied on top of it.
    pub fn revert_shard_state(&self, shard_id: u8) -> ChainResult<()> {
        let _guard = self.shard_commit_lock(shard_id)?.lock();
        let scope = Scope::Shard(shard_id);
        let current = self.shard_best(shard_id)?;
        let block = self.get_shard_block_by_hash(&current.best_block_hash)?;
        // The block being unwound must check out against the snapshotted
        // state, producer signature included, before anything is touched.
        self.validate_shard_block_with_prev_best_state(&block)?;
        let prev_bytes = self.db.fetch_prev_best_state(scope)?;
        let prev_state: ShardBestState =
            bincode::deserialize(&prev_bytes).map_err(StoreError::from)?;

        warn!(shard_id, height = block.header.height, "reverting shard block");

        for (from_shard, hashes) in block.body.incoming_cross_shard_map() {
            for hash in hashes {
                self.delete_incoming_cross_shard(shard_id, from_shard, &hash)?;
            }
        }

        for tx in &block.body.transactions {
            self.delete_transaction_index(&tx.hash())?;
        }

        let own_view = TxViewPoint::from_block_txs(&block, self.params.active_shards);
        self.restore_own_view(scope, &own_view)?;
        let cross_view =
            TxViewPoint::from_cross_transactions(shard_id, &block.body.cross_transactions);
        self.restore_cross_view(scope, &cross_view)?;

        for (requester, token_id) in reward::withdraw_requesters(&block.body.transactions) {
            reward::restore_committee_reward(&self.db, scope, &requester, &token_id)?;
        }

        let beacon_blocks = self
            .fetch_beacon_blocks_in_range(prev_state.beacon_height + 1, block.header.beacon_height)?;
        self.restore_from_beacon_instructions(&beacon_blocks, shard_id)?;

        self.delete_shard_block(shard_id, &block.hash(), block.header.height)?;
        self.store_shard_best_state(&prev_state)?;
        self.set_shard_best(shard_id, std::sync::Arc::new(prev_state))?;
        self.db.clean_backup(scope)?;
        info!(shard_id, "shard revert complete");
        Ok(())
    }

    /// Restore the UTXO index from an own-transaction view: serial numbers
    /// and counters come back, appended commitments, coins, SNDs, and
    /// first-seen token registrations disappear.
    fn restore_own_view(&self, scope: Scope, view: &TxViewPoint) -> ChainResult<()> {
        for entry in &view.custom_token_txs {
            if matches!(entry.data.kind, TokenKind::Init | TokenKind::CrossShard) {
                utxo::delete_custom_token(&self.db, &entry.data.property_id)?;
            }
        }
        for sub in &view.privacy_token_views {
            if matches!(sub.kind, Some(TokenKind::Init)) {
                utxo::delete_privacy_token(&self.db, &sub.view.token_id)?;
            }
            self.restore_index_from_view(scope, &sub.view, true)?;
        }
        self.restore_index_from_view(scope, view, true)
    }

    fn restore_cross_view(&self, scope: Scope, view: &TxViewPoint) -> ChainResult<()> {
        for sub in &view.privacy_token_views {
            utxo::delete_privacy_token_cross_shard(&self.db, &sub.view.token_id)?;
            self.restore_index_from_view(scope, &sub.view, false)?;
        }
        self.restore_index_from_view(scope, view, false)
    }

    fn restore_index_from_view(
        &self,
        scope: Scope,
        view: &TxViewPoint,
        restore_serials: bool,
    ) -> ChainResult<()> {
        if restore_serials {
            utxo::restore_serial_numbers(
                &self.db,
                scope,
                &view.token_id,
                view.shard_id,
                &view.list_serial_numbers,
            )?;
        }
        for key in view.sorted_commitment_keys() {
            let pk = decode_public_key(key).map_err(|_| StoreError::Corrupt(key.clone()))?;
            let owner_shard = crate::key::shard_id_of_key(&pk, self.params.active_shards);
            if owner_shard != view.shard_id {
                continue;
            }
            if let Some(commitments) = view.map_commitments.get(key) {
                utxo::restore_commitments_of_pubkey(&self.db, &view.token_id, view.shard_id, commitments)?;
            }
            if let Some(coins) = view.map_output_coins.get(key) {
                utxo::delete_output_coins(&self.db, &view.token_id, owner_shard, &pk, coins)?;
            }
            if let Some(snds) = view.map_snd.get(key) {
                utxo::delete_snds(&self.db, &view.token_id, view.shard_id, snds)?;
            }
        }
        utxo::restore_commitment_len(&self.db, scope, &view.token_id, view.shard_id)?;
        Ok(())
    }

    // ---- beacon chain: backup and revert --------------------------------------

    /// Phase 3 for a beacon block: snapshot the best state and the pending
    /// shard-reward entries its accepted-block instructions will grow.
    pub(crate) fn backup_current_beacon_state(&self, block: &BeaconBlock) -> ChainResult<()> {
        let current = self.beacon_best();
        let bytes = bincode::serialize(current.as_ref()).map_err(StoreError::from)?;
        self.db.store_prev_best_state(Scope::Beacon, &bytes)?;

        for line in &block.body.instructions {
            if Instruction::is_committee_action(line) || line.len() < 2 {
                continue;
            }
            if let Instruction::AcceptedBlockReward { info, .. } = Instruction::parse(line)? {
                let fees = augmented_fee_tokens(self, &info.txs_fee, info.shard_block_height);
                for token_id in fees.keys() {
                    reward::backup_shard_reward_request(
                        &self.db,
                        Scope::Beacon,
                        block.header.epoch,
                        info.shard_id,
                        token_id,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Undo the most recently applied beacon block.
    pub fn revert_beacon_state(&self) -> ChainResult<()> {
        let _guard = self.beacon_commit_lock.lock();
        let current = self.beacon_best();
        let block = self.get_beacon_block_by_hash(&current.best_block_hash)?;
        self.validate_beacon_block_with_prev_best_state(&block)?;
        let prev_bytes = self.db.fetch_prev_best_state(Scope::Beacon)?;
        let prev_state: BeaconBestState =
            bincode::deserialize(&prev_bytes).map_err(StoreError::from)?;

        warn!(height = block.header.height, "reverting beacon block");

        self.delete_committee_by_height(block.header.height)?;

        for (shard_id, entries) in &block.body.shard_state {
            for entry in entries {
                self.delete_accepted_shard_to_beacon(*shard_id, &entry.hash)?;
            }
        }

        // Height chains that existed before the block are truncated back to
        // their previous tip; chains the block created are removed outright.
        for (from_shard, to_shards) in &current.last_cross_shard_state {
            for to_shard in to_shards.keys() {
                match prev_state
                    .last_cross_shard_state
                    .get(from_shard)
                    .and_then(|m| m.get(to_shard))
                {
                    Some(height) => {
                        self.restore_cross_shard_next_heights(*from_shard, *to_shard, *height)?;
                    }
                    None => {
                        self.clear_cross_shard_heights_from(*from_shard, *to_shard, 0)?;
                    }
                }
            }
        }

        for line in &block.body.instructions {
            if Instruction::is_committee_action(line) || line.len() < 2 {
                continue;
            }
            if let Instruction::AcceptedBlockReward { info, .. } = Instruction::parse(line)? {
                let fees = augmented_fee_tokens(self, &info.txs_fee, info.shard_block_height);
                for token_id in fees.keys() {
                    reward::restore_shard_reward_request(
                        &self.db,
                        Scope::Beacon,
                        block.header.epoch,
                        info.shard_id,
                        token_id,
                    )?;
                }
            }
        }

        self.delete_beacon_block(&block.hash(), block.header.height)?;
        self.store_beacon_best_state(&prev_state)?;
        self.set_beacon_best(std::sync::Arc::new(prev_state));
        self.db.clean_backup(Scope::Beacon)?;
        info!("beacon revert complete");
        Ok(())
    }
}
