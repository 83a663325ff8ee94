//! The chain context: one explicit value owning the store handle, the
//! network parameters, the signature verifier, and the per-chain commit
//! locks and best-state pointers. Everything the pipelines touch is threaded
//! through this value; there are no global singletons.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::beststate::{BeaconBestState, BestStateError, ShardBestState};
use crate::block::{BeaconBlock, SanityError, ShardBlock};
use crate::committee::CommitteeError;
use crate::config::ChainParams;
use crate::crossshard::CrossShardError;
use crate::hash::Hash32;
use crate::instruction::InstructionError;
use crate::key::SigVerifier;
use crate::reward::RewardError;
use crate::schema;
use crate::store::{ChainDb, StoreError, StoreResult};
use crate::tx::Tx;
use crate::utxo::UtxoError;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("sanity: {0}")]
    Sanity(#[from] SanityError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Utxo(#[from] UtxoError),
    #[error(transparent)]
    BestState(#[from] BestStateError),
    #[error(transparent)]
    Committee(#[from] CommitteeError),
    #[error(transparent)]
    Instruction(#[from] InstructionError),
    #[error(transparent)]
    CrossShard(#[from] CrossShardError),
    #[error(transparent)]
    Reward(#[from] RewardError),
    #[error("block height {got}, expected {expected}")]
    HeightMismatch { expected: u64, got: u64 },
    #[error("previous-block hash does not match the best block")]
    ParentMismatch,
    #[error("block addresses shard {got}, this chain is shard {expected}")]
    WrongShardId { expected: u8, got: u8 },
    #[error("producer should be {expected}")]
    WrongProducer { expected: String },
    #[error("producer signature does not verify")]
    InvalidProducerSignature,
    #[error("recomputed {field} does not match the header")]
    RootMismatch { field: &'static str },
    #[error("total transaction fee in the header does not match the body")]
    FeeMismatch,
    #[error("withdraw responses are inconsistent: {0}")]
    WithdrawResponse(String),
    #[error("interrupt raised; refusing new blocks")]
    Interrupted,
    #[error("shard {0} is not an active chain")]
    UnknownShard(u8),
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;

struct ShardChain {
    commit_lock: Mutex<()>,
    best: RwLock<Arc<ShardBestState>>,
}

pub struct ChainContext {
    pub db: Arc<ChainDb>,
    pub params: ChainParams,
    pub verifier: Arc<dyn SigVerifier>,
    pub(crate) beacon_commit_lock: Mutex<()>,
    beacon_best: RwLock<Arc<BeaconBestState>>,
    shards: Vec<ShardChain>,
    interrupted: AtomicBool,
}

impl ChainContext {
    pub fn new(db: Arc<ChainDb>, params: ChainParams, verifier: Arc<dyn SigVerifier>) -> Self {
        let shards = (0..params.active_shards)
            .map(|shard| ShardChain {
                commit_lock: Mutex::new(()),
                best: RwLock::new(Arc::new(ShardBestState::new_with_params(shard as u8, &params))),
            })
            .collect();
        ChainContext {
            db,
            params: params.clone(),
            verifier,
            beacon_commit_lock: Mutex::new(()),
            beacon_best: RwLock::new(Arc::new(BeaconBestState::new_with_params(&params))),
            shards,
            interrupted: AtomicBool::new(false),
        }
    }

    /// Raise the global interrupt: pipelines refuse new blocks at phase 1.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn check_interrupt(&self) -> ChainResult<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(ChainError::Interrupted);
        }
        Ok(())
    }

    // ---- best-state pointers (atomic swap for readers) ---------------------

    pub fn beacon_best(&self) -> Arc<BeaconBestState> {
        self.beacon_best.read().clone()
    }

    pub(crate) fn set_beacon_best(&self, state: Arc<BeaconBestState>) {
        *self.beacon_best.write() = state;
    }

    pub fn shard_best(&self, shard_id: u8) -> ChainResult<Arc<ShardBestState>> {
        let chain = self
            .shards
            .get(shard_id as usize)
            .ok_or(ChainError::UnknownShard(shard_id))?;
        Ok(chain.best.read().clone())
    }

    pub(crate) fn set_shard_best(&self, shard_id: u8, state: Arc<ShardBestState>) -> ChainResult<()> {
        let chain = self
            .shards
            .get(shard_id as usize)
            .ok_or(ChainError::UnknownShard(shard_id))?;
        *chain.best.write() = state;
        Ok(())
    }

    pub(crate) fn shard_commit_lock(&self, shard_id: u8) -> ChainResult<&Mutex<()>> {
        self.shards
            .get(shard_id as usize)
            .map(|chain| &chain.commit_lock)
            .ok_or(ChainError::UnknownShard(shard_id))
    }

    // ---- best-state persistence ---------------------------------------------

    pub fn store_beacon_best_state(&self, state: &BeaconBestState) -> StoreResult<()> {
        let bytes = bincode::serialize(state)?;
        self.db.put(&schema::beacon_best_state(), &bytes)
    }

    pub fn fetch_beacon_best_state(&self) -> StoreResult<BeaconBestState> {
        let bytes = self.db.get(&schema::beacon_best_state())?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn store_shard_best_state(&self, state: &ShardBestState) -> StoreResult<()> {
        let bytes = bincode::serialize(state)?;
        self.db.put(&schema::shard_best_state(state.shard_id), &bytes)
    }

    pub fn fetch_shard_best_state(&self, shard_id: u8) -> StoreResult<ShardBestState> {
        let bytes = self.db.get(&schema::shard_best_state(shard_id))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    // ---- block storage and lookup -------------------------------------------

    pub fn store_beacon_block(&self, block: &BeaconBlock) -> StoreResult<()> {
        let hash = block.hash();
        let bytes = bincode::serialize(block)?;
        self.db.put(&schema::beacon_block(&hash), &bytes)?;
        self.db
            .put(&schema::beacon_block_index(&hash), &block.header.height.to_le_bytes())?;
        self.db.put(&schema::beacon_block_height(block.header.height), &hash)
    }

    pub fn get_beacon_block_by_hash(&self, hash: &Hash32) -> StoreResult<BeaconBlock> {
        let bytes = self.db.get(&schema::beacon_block(hash))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn get_beacon_block_hash_by_height(&self, height: u64) -> StoreResult<Hash32> {
        let raw = self.db.get(&schema::beacon_block_height(height))?;
        raw.as_slice()
            .try_into()
            .map_err(|_| StoreError::Corrupt(format!("beacon height {height}")))
    }

    pub fn get_beacon_block_by_height(&self, height: u64) -> StoreResult<BeaconBlock> {
        let hash = self.get_beacon_block_hash_by_height(height)?;
        self.get_beacon_block_by_hash(&hash)
    }

    pub fn delete_beacon_block(&self, hash: &Hash32, height: u64) -> StoreResult<()> {
        self.db.delete(&schema::beacon_block(hash))?;
        self.db.delete(&schema::beacon_block_index(hash))?;
        self.db.delete(&schema::beacon_block_height(height))
    }

    /// Beacon blocks at heights `from..=to`, ascending.
    pub fn fetch_beacon_blocks_in_range(&self, from: u64, to: u64) -> StoreResult<Vec<BeaconBlock>> {
        let mut blocks = Vec::new();
        for height in from..=to {
            blocks.push(self.get_beacon_block_by_height(height)?);
        }
        Ok(blocks)
    }

    pub fn store_shard_block(&self, block: &ShardBlock) -> StoreResult<()> {
        let hash = block.hash();
        let shard_id = block.header.shard_id;
        let bytes = bincode::serialize(block)?;
        self.db.put(&schema::shard_block(shard_id, &hash), &bytes)?;
        let index = bincode::serialize(&(block.header.height, shard_id))?;
        self.db.put(&schema::shard_block_index(&hash), &index)?;
        self.db
            .put(&schema::shard_block_height(shard_id, block.header.height), &hash)
    }

    pub fn get_shard_block_index(&self, hash: &Hash32) -> StoreResult<(u64, u8)> {
        let raw = self.db.get(&schema::shard_block_index(hash))?;
        Ok(bincode::deserialize(&raw)?)
    }

    pub fn get_shard_block_by_hash(&self, hash: &Hash32) -> StoreResult<ShardBlock> {
        let (_, shard_id) = self.get_shard_block_index(hash)?;
        let bytes = self.db.get(&schema::shard_block(shard_id, hash))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn get_shard_block_by_height(&self, shard_id: u8, height: u64) -> StoreResult<ShardBlock> {
        let raw = self.db.get(&schema::shard_block_height(shard_id, height))?;
        let hash: Hash32 = raw
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Corrupt(format!("shard {shard_id} height {height}")))?;
        let bytes = self.db.get(&schema::shard_block(shard_id, &hash))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn delete_shard_block(&self, shard_id: u8, hash: &Hash32, height: u64) -> StoreResult<()> {
        self.db.delete(&schema::shard_block(shard_id, hash))?;
        self.db.delete(&schema::shard_block_index(hash))?;
        self.db.delete(&schema::shard_block_height(shard_id, height))
    }

    // ---- transaction index ---------------------------------------------------

    pub fn store_transaction_index(
        &self,
        tx_hash: &Hash32,
        block_hash: &Hash32,
        index: u32,
    ) -> StoreResult<()> {
        let value = bincode::serialize(&(*block_hash, index))?;
        self.db.put(&schema::transaction(tx_hash), &value)
    }

    pub fn get_transaction_index(&self, tx_hash: &Hash32) -> StoreResult<(Hash32, u32)> {
        let raw = self.db.get(&schema::transaction(tx_hash))?;
        Ok(bincode::deserialize(&raw)?)
    }

    pub fn delete_transaction_index(&self, tx_hash: &Hash32) -> StoreResult<()> {
        self.db.delete(&schema::transaction(tx_hash))
    }

    /// Resolve a transaction to `(shard, block hash, index, tx)`.
    pub fn get_transaction_by_hash(&self, tx_hash: &Hash32) -> StoreResult<(u8, Hash32, u32, Tx)> {
        let (block_hash, index) = self.get_transaction_index(tx_hash)?;
        let block = self.get_shard_block_by_hash(&block_hash)?;
        let tx = block
            .body
            .transactions
            .get(index as usize)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("tx index {index} out of range")))?;
        Ok((block.header.shard_id, block_hash, index, tx))
    }

    // ---- committee snapshots for reward epochs --------------------------------

    pub fn store_committee_by_height(
        &self,
        height: u64,
        committees: &BTreeMap<u8, Vec<String>>,
    ) -> StoreResult<()> {
        let bytes = serde_json::to_vec(committees)
            .map_err(|e| StoreError::Corrupt(format!("committee snapshot: {e}")))?;
        self.db.put(&schema::committee_by_height(height), &bytes)
    }

    pub fn fetch_committee_by_height(&self, height: u64) -> StoreResult<BTreeMap<u8, Vec<String>>> {
        let bytes = self.db.get(&schema::committee_by_height(height))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("committee snapshot: {e}")))
    }

    pub fn delete_committee_by_height(&self, height: u64) -> StoreResult<()> {
        self.db.delete(&schema::committee_by_height(height))
    }

    // ---- cross-shard bookkeeping -----------------------------------------------

    pub fn store_incoming_cross_shard(
        &self,
        to_shard: u8,
        from_shard: u8,
        block_height: u64,
        cross_block_hash: &Hash32,
    ) -> StoreResult<()> {
        self.db.put_u64(
            &schema::incoming_cross_shard(to_shard, from_shard, cross_block_hash),
            block_height,
        )
    }

    pub fn has_incoming_cross_shard(
        &self,
        to_shard: u8,
        from_shard: u8,
        cross_block_hash: &Hash32,
    ) -> StoreResult<bool> {
        self.db
            .has(&schema::incoming_cross_shard(to_shard, from_shard, cross_block_hash))
    }

    pub fn delete_incoming_cross_shard(
        &self,
        to_shard: u8,
        from_shard: u8,
        cross_block_hash: &Hash32,
    ) -> StoreResult<()> {
        self.db
            .delete(&schema::incoming_cross_shard(to_shard, from_shard, cross_block_hash))
    }

    pub fn store_accepted_shard_to_beacon(&self, shard_id: u8, block_hash: &Hash32) -> StoreResult<()> {
        self.db
            .put(&schema::shard_to_beacon_accepted(shard_id, block_hash), &[])
    }

    pub fn has_accepted_shard_to_beacon(&self, shard_id: u8, block_hash: &Hash32) -> StoreResult<bool> {
        self.db.has(&schema::shard_to_beacon_accepted(shard_id, block_hash))
    }

    pub fn delete_accepted_shard_to_beacon(&self, shard_id: u8, block_hash: &Hash32) -> StoreResult<()> {
        self.db
            .delete(&schema::shard_to_beacon_accepted(shard_id, block_hash))
    }

    /// Link `height` behind the previous crossing height in the
    /// (from, to) singly-linked height chain.
    pub fn store_cross_shard_next_height(
        &self,
        from_shard: u8,
        to_shard: u8,
        height: u64,
        next_height: u64,
    ) -> StoreResult<()> {
        self.db.put_u64(
            &schema::cross_shard_next_height(from_shard, to_shard, height),
            next_height,
        )
    }

    pub fn fetch_cross_shard_next_height(
        &self,
        from_shard: u8,
        to_shard: u8,
        height: u64,
    ) -> StoreResult<u64> {
        self.db
            .get_u64_or_zero(&schema::cross_shard_next_height(from_shard, to_shard, height))
    }

    /// Walk the (from, to) chain from `height` forward, unlinking every
    /// later entry, and terminate the chain at `height` again.
    pub fn restore_cross_shard_next_heights(
        &self,
        from_shard: u8,
        to_shard: u8,
        height: u64,
    ) -> StoreResult<()> {
        self.unlink_cross_shard_heights_from(from_shard, to_shard, height)?;
        self.store_cross_shard_next_height(from_shard, to_shard, height, 0)
    }

    /// Delete the (from, to) chain from `start` forward without re-creating
    /// a terminator; used when the chain did not exist before the block.
    pub fn clear_cross_shard_heights_from(
        &self,
        from_shard: u8,
        to_shard: u8,
        start: u64,
    ) -> StoreResult<()> {
        self.unlink_cross_shard_heights_from(from_shard, to_shard, start)
    }

    fn unlink_cross_shard_heights_from(
        &self,
        from_shard: u8,
        to_shard: u8,
        start: u64,
    ) -> StoreResult<()> {
        let mut current = start;
        loop {
            let key = schema::cross_shard_next_height(from_shard, to_shard, current);
            let next = self.db.get_u64_or_zero(&key)?;
            self.db.delete(&key)?;
            if next == 0 {
                return Ok(());
            }
            current = next;
        }
    }
}
