//! Chain-state machine for the veil sharded ledger.
//!
//! One coordinating beacon chain and `K` shard chains, coupled through
//! cross-shard value transfer and an instruction-driven committee rotation.
//! This crate owns block validation, the commit/revert pipeline, the UTXO
//! and privacy index, committee state, cross-shard packaging, and reward
//! accounting. Transport, RPC, mempool, the vote engine, and the
//! zero-knowledge verifiers live elsewhere and are consumed as verdicts.

pub mod beacon_process;
pub mod beststate;
pub mod block;
pub mod chain;
pub mod committee;
pub mod config;
pub mod crossshard;
pub mod genesis;
pub mod hash;
pub mod instruction;
pub mod key;
pub mod merkle;
pub mod reward;
pub mod revert;
pub mod schema;
pub mod shard_process;
pub mod store;
pub mod tx;
pub mod utxo;
pub mod view;

pub use beststate::{BeaconBestState, BestStateError, ShardBestState};
pub use block::{
    cross_transaction_root, transactions_root, BeaconBlock, BeaconBody, BeaconHeader,
    CrossShardBlock, CrossTokenPrivacyData, CrossTransaction, SanityError, ShardBlock, ShardBody,
    ShardHeader, ShardStateEntry, ShardToBeaconBlock,
};
pub use chain::{ChainContext, ChainError, ChainResult};
pub use committee::{
    candidate_shard_id, producer_for_round, remove_validator, shuffle_candidates, swap_validator,
    CommitteeError, SwapOutcome,
};
pub use config::{ChainParams, StoreCfg, BEACON_BLOCK_VERSION, SHARD_BLOCK_VERSION};
pub use crossshard::{
    create_all_cross_shard_blocks, create_cross_shard_block, cross_shard_bitmap, shard_tx_root,
    verify_cross_shard_block, CrossShardError,
};
pub use genesis::{create_beacon_genesis_block, create_shard_genesis_block};
pub use hash::{Hash32, HASH_SIZE, ZERO_HASH};
pub use instruction::{Instruction, InstructionError};
pub use key::{
    encode_public_key, AcceptAllVerifier, Ed25519Verifier, KeyError, ProducerAddress, SigVerifier,
};
pub use reward::{reward_amount, RewardError};
pub use store::{ChainDb, Scope, StoreError, StoreResult};
pub use tx::{
    InputCoin, Metadata, OutputCoin, StakeRole, TokenData, TokenId, Tx, TxBase, TxProof,
    NATIVE_TOKEN_ID,
};
pub use utxo::UtxoError;
pub use view::TxViewPoint;
