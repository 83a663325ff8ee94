//! Canonical block structures for the beacon chain, the shard chains, and
//! the two shard projections (shard-to-beacon, cross-shard), together with
//! their hashing and the database-free sanity predicates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::{ChainParams, BEACON_BLOCK_VERSION, SHARD_BLOCK_VERSION};
use crate::hash::{hash_concat, hash_of, is_zero, Hash32, ZERO_HASH};
use crate::instruction::build_stake_instructions_from_txs;
use crate::key::{ProducerAddress, PRODUCER_ADDRESS_LEN};
use crate::merkle;
use crate::tx::{OutputCoin, TokenData, TokenId, Tx};

const BEACON_HEADER_DOMAIN: &[u8] = b"veil.beacon.header.v1";
const SHARD_HEADER_DOMAIN: &[u8] = b"veil.shard.header.v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SanityError {
    #[error("block version {got} below minimum {min}")]
    Version { got: u32, min: u32 },
    #[error("height must be at least 1")]
    Height,
    #[error("round must be at least 1")]
    Round,
    #[error("epoch must be at least 1")]
    Epoch,
    #[error("timestamp must not be negative")]
    Timestamp,
    #[error("shard id {0} outside the active range")]
    ShardId(u8),
    #[error("genesis header must carry an empty producer address, got {0} bytes")]
    GenesisProducerAddress(usize),
    #[error("producer address must be {PRODUCER_ADDRESS_LEN} bytes, got {0}")]
    ProducerAddress(usize),
    #[error("genesis header must carry a zero previous-block hash")]
    GenesisPreviousHash,
    #[error("previous-block hash must be non-zero past genesis")]
    PreviousHash,
    #[error("genesis header must carry a zero committee root")]
    GenesisCommitteeRoot,
    #[error("committee root must be non-zero past genesis")]
    CommitteeRoot,
    #[error("cross-shard bitmap holds {got} entries, limit {limit}")]
    CrossShardBitmap { got: usize, limit: usize },
    #[error("beacon height must be at least 1")]
    BeaconHeight,
    #[error("beacon hash must be non-zero once the beacon chain has advanced")]
    BeaconHash,
    #[error("instruction list is non-empty but the instruction merkle root is zero")]
    InstructionMerkleRoot,
    #[error("cross transactions are present but the cross-transaction root is zero")]
    CrossTransactionRoot,
    #[error("transactions are present but the tx root is zero")]
    TxRoot,
}

// ---- beacon ---------------------------------------------------------------

/// Shard progress entry a shard chain reports into a beacon body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStateEntry {
    pub height: u64,
    pub hash: Hash32,
    /// Destination shards the reported block crossed to.
    pub cross_shard: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconHeader {
    pub version: u32,
    pub height: u64,
    pub round: u32,
    pub epoch: u64,
    pub timestamp: i64,
    pub previous_block_hash: Hash32,
    pub producer_address: ProducerAddress,
    pub shard_state_hash: Hash32,
    pub instruction_hash: Hash32,
    pub instruction_merkle_root: Hash32,
    pub shard_candidate_root: Hash32,
    pub beacon_candidate_root: Hash32,
    pub shard_committee_root: Hash32,
    pub beacon_committee_root: Hash32,
}

impl BeaconHeader {
    pub fn hash(&self) -> Hash32 {
        hash_concat(&[BEACON_HEADER_DOMAIN, &hash_of(self)])
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBody {
    pub shard_state: BTreeMap<u8, Vec<ShardStateEntry>>,
    pub instructions: Vec<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlock {
    pub header: BeaconHeader,
    pub body: BeaconBody,
    pub producer_sig: Vec<u8>,
    pub aggregated_sig: Vec<u8>,
}

impl BeaconBlock {
    pub fn hash(&self) -> Hash32 {
        self.header.hash()
    }

    pub fn validate_sanity(&self) -> Result<(), SanityError> {
        let h = &self.header;
        if h.version < BEACON_BLOCK_VERSION {
            return Err(SanityError::Version { got: h.version, min: BEACON_BLOCK_VERSION });
        }
        if h.height < 1 {
            return Err(SanityError::Height);
        }
        if h.round < 1 {
            return Err(SanityError::Round);
        }
        if h.epoch < 1 {
            return Err(SanityError::Epoch);
        }
        if h.timestamp < 0 {
            return Err(SanityError::Timestamp);
        }
        check_lineage(
            h.height,
            &h.previous_block_hash,
            // Beacon headers have no committee root zero-sentinel of their
            // own; the beacon committee root plays that role.
            &h.beacon_committee_root,
            &h.producer_address,
        )?;
        if !self.body.instructions.is_empty() && is_zero(&h.instruction_merkle_root) {
            return Err(SanityError::InstructionMerkleRoot);
        }
        Ok(())
    }
}

fn check_lineage(
    height: u64,
    previous_block_hash: &Hash32,
    committee_root: &Hash32,
    producer_address: &ProducerAddress,
) -> Result<(), SanityError> {
    if height == 1 {
        if producer_address.bytes_len() != 0 {
            return Err(SanityError::GenesisProducerAddress(producer_address.bytes_len()));
        }
        if !is_zero(previous_block_hash) {
            return Err(SanityError::GenesisPreviousHash);
        }
        if !is_zero(committee_root) {
            return Err(SanityError::GenesisCommitteeRoot);
        }
    } else {
        if producer_address.bytes_len() != PRODUCER_ADDRESS_LEN {
            return Err(SanityError::ProducerAddress(producer_address.bytes_len()));
        }
        if is_zero(previous_block_hash) {
            return Err(SanityError::PreviousHash);
        }
        if is_zero(committee_root) {
            return Err(SanityError::CommitteeRoot);
        }
    }
    Ok(())
}

// ---- shard ----------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardHeader {
    pub version: u32,
    pub height: u64,
    pub round: u32,
    pub epoch: u64,
    pub timestamp: i64,
    pub shard_id: u8,
    pub previous_block_hash: Hash32,
    pub producer_address: ProducerAddress,
    pub tx_root: Hash32,
    pub shard_tx_root: Hash32,
    pub cross_transaction_root: Hash32,
    pub instructions_root: Hash32,
    pub committee_root: Hash32,
    pub pending_validator_root: Hash32,
    pub instruction_merkle_root: Hash32,
    pub cross_shard_bitmap: Vec<u8>,
    pub beacon_height: u64,
    pub beacon_hash: Hash32,
    pub total_txs: u64,
    pub total_txs_fee: BTreeMap<TokenId, u64>,
}

impl ShardHeader {
    pub fn hash(&self) -> Hash32 {
        hash_concat(&[SHARD_HEADER_DOMAIN, &hash_of(self)])
    }
}

/// Cross-shard slice of a privacy custom token: token identity plus the
/// outputs addressed to the destination shard.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossTokenPrivacyData {
    pub property_id: TokenId,
    pub property_name: String,
    pub property_symbol: String,
    pub mintable: bool,
    pub amount: u64,
    pub output_coins: Vec<OutputCoin>,
}

impl CrossTokenPrivacyData {
    pub fn hash(&self) -> Hash32 {
        hash_of(self)
    }
}

/// An incoming cross-shard record as it sits in a destination block body:
/// the source block it came from plus the artifacts addressed here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossTransaction {
    pub block_hash: Hash32,
    pub block_height: u64,
    pub output_coins: Vec<OutputCoin>,
    pub token_privacy_data: Vec<CrossTokenPrivacyData>,
}

impl CrossTransaction {
    pub fn hash(&self) -> Hash32 {
        hash_of(self)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardBody {
    pub instructions: Vec<Vec<String>>,
    /// Incoming cross-shard records grouped by source shard.
    pub cross_transactions: BTreeMap<u8, Vec<CrossTransaction>>,
    pub transactions: Vec<Tx>,
}

impl ShardBody {
    /// Source shard -> hashes of the cross-shard blocks this body ingested.
    pub fn incoming_cross_shard_map(&self) -> BTreeMap<u8, Vec<Hash32>> {
        let mut map: BTreeMap<u8, Vec<Hash32>> = BTreeMap::new();
        for (from_shard, records) in &self.cross_transactions {
            for record in records {
                map.entry(*from_shard).or_default().push(record.block_hash);
            }
        }
        map
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardBlock {
    pub header: ShardHeader,
    pub body: ShardBody,
    pub producer_sig: Vec<u8>,
    pub aggregated_sig: Vec<u8>,
}

impl ShardBlock {
    pub fn hash(&self) -> Hash32 {
        self.header.hash()
    }

    pub fn add_transaction(&mut self, tx: Tx) {
        self.body.transactions.push(tx);
    }

    pub fn validate_sanity(&self, params: &ChainParams) -> Result<(), SanityError> {
        let h = &self.header;
        if h.version < SHARD_BLOCK_VERSION {
            return Err(SanityError::Version { got: h.version, min: SHARD_BLOCK_VERSION });
        }
        if h.height < 1 {
            return Err(SanityError::Height);
        }
        if h.round < 1 {
            return Err(SanityError::Round);
        }
        if h.epoch < 1 {
            return Err(SanityError::Epoch);
        }
        if h.timestamp < 0 {
            return Err(SanityError::Timestamp);
        }
        if h.shard_id as usize >= params.active_shards {
            return Err(SanityError::ShardId(h.shard_id));
        }
        check_lineage(h.height, &h.previous_block_hash, &h.committee_root, &h.producer_address)?;
        let bitmap_limit = params.active_shards.saturating_sub(1);
        if h.cross_shard_bitmap.len() > bitmap_limit {
            return Err(SanityError::CrossShardBitmap {
                got: h.cross_shard_bitmap.len(),
                limit: bitmap_limit,
            });
        }
        if h.beacon_height < 1 {
            return Err(SanityError::BeaconHeight);
        }
        if h.beacon_height > 1 && is_zero(&h.beacon_hash) {
            return Err(SanityError::BeaconHash);
        }
        if !self.body.instructions.is_empty() && is_zero(&h.instruction_merkle_root) {
            return Err(SanityError::InstructionMerkleRoot);
        }
        if !self.body.cross_transactions.is_empty() && is_zero(&h.cross_transaction_root) {
            return Err(SanityError::CrossTransactionRoot);
        }
        if !self.body.transactions.is_empty() && is_zero(&h.tx_root) {
            return Err(SanityError::TxRoot);
        }
        Ok(())
    }

    /// Projection shipped to the beacon: header and instructions only, the
    /// latter extended with stake instructions derived from the block's
    /// staking transactions.
    pub fn to_shard_to_beacon(&self) -> ShardToBeaconBlock {
        let mut instructions = self.body.instructions.clone();
        instructions.extend(build_stake_instructions_from_txs(&self.body.transactions));
        ShardToBeaconBlock {
            header: self.header.clone(),
            instructions,
            producer_sig: self.producer_sig.clone(),
            aggregated_sig: self.aggregated_sig.clone(),
        }
    }
}

/// What a shard ships to the beacon for inclusion in `shard_state`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardToBeaconBlock {
    pub header: ShardHeader,
    pub instructions: Vec<Vec<String>>,
    pub producer_sig: Vec<u8>,
    pub aggregated_sig: Vec<u8>,
}

impl ShardToBeaconBlock {
    pub fn hash(&self) -> Hash32 {
        self.header.hash()
    }
}

/// Source-shard projection addressed to one destination shard, with the
/// Merkle path proving inclusion under the source header's `shard_tx_root`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossShardBlock {
    pub header: ShardHeader,
    pub to_shard_id: u8,
    pub merkle_path: Vec<Hash32>,
    pub cross_output_coins: Vec<OutputCoin>,
    pub cross_token_data: Vec<TokenData>,
    pub cross_privacy_token_data: Vec<CrossTokenPrivacyData>,
    pub producer_sig: Vec<u8>,
    pub aggregated_sig: Vec<u8>,
}

impl CrossShardBlock {
    pub fn hash(&self) -> Hash32 {
        self.header.hash()
    }
}

/// Root committed in a shard header over the incoming cross-transaction map:
/// a Merkle tree over record hashes in source-shard order; empty maps commit
/// to the zero hash.
pub fn cross_transaction_root(cross: &BTreeMap<u8, Vec<CrossTransaction>>) -> Hash32 {
    if cross.is_empty() {
        return ZERO_HASH;
    }
    let hashes: Vec<Hash32> = cross
        .values()
        .flat_map(|records| records.iter().map(CrossTransaction::hash))
        .collect();
    merkle::tx_root(&hashes)
}

/// Root over a body's transaction hashes.
pub fn transactions_root(txs: &[Tx]) -> Hash32 {
    let hashes: Vec<Hash32> = txs.iter().map(Tx::hash).collect();
    merkle::tx_root(&hashes)
}
