//! Transaction model: a closed variant set dispatched on exhaustively by
//! every algorithm in the crate. Zero-knowledge material inside proofs is
//! treated as already verified; only the ledger-visible fields live here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hash::{hash_of, Hash32};
use crate::key::shard_id_of_key;

pub type TokenId = Hash32;

/// Base coin id. Token-keyed indices use this id for native transfers.
pub const NATIVE_TOKEN_ID: TokenId = {
    let mut id = [0u8; 32];
    id[31] = 1;
    id
};

/// Spent-coin identifier; set membership enforces no-double-spend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCoin {
    pub serial_number: Vec<u8>,
}

/// Newly created coin. The owner key's last byte binds it to a shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCoin {
    pub public_key: Vec<u8>,
    pub commitment: Vec<u8>,
    pub snd: Vec<u8>,
    pub value: u64,
}

impl OutputCoin {
    pub fn shard_id(&self, active_shards: usize) -> u8 {
        shard_id_of_key(&self.public_key, active_shards)
    }

    /// Stable byte encoding used for out-coin storage keys and the
    /// cross-shard group digests.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("bincode encoding of coins is total")
    }
}

/// Ledger-visible projection of a transaction proof. The range/one-of-many
/// material has been checked upstream; what remains is what the UTXO index
/// must ingest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxProof {
    pub input_coins: Vec<InputCoin>,
    pub output_coins: Vec<OutputCoin>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Init,
    Transfer,
    CrossShard,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenVin {
    pub payment_address: Vec<u8>,
    pub tx_id: Hash32,
    pub vout_index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenVout {
    pub payment_address: Vec<u8>,
    pub value: u64,
}

impl TokenVout {
    pub fn shard_id(&self, active_shards: usize) -> u8 {
        shard_id_of_key(&self.payment_address, active_shards)
    }
}

/// Plain (non-privacy) custom token payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    pub property_id: TokenId,
    pub property_name: String,
    pub property_symbol: String,
    pub kind: TokenKind,
    pub mintable: bool,
    pub amount: u64,
    pub vins: Vec<TokenVin>,
    pub vouts: Vec<TokenVout>,
}

impl TokenData {
    /// Digest excluding vins/vouts ordering artifacts: the whole structure
    /// is hashed canonically.
    pub fn hash(&self) -> Hash32 {
        hash_of(self)
    }

    /// Copy carrying only the token identity, typed as a cross-shard slice.
    pub fn clone_for_cross_shard(&self) -> TokenData {
        TokenData {
            property_id: self.property_id,
            property_name: self.property_name.clone(),
            property_symbol: self.property_symbol.clone(),
            kind: TokenKind::CrossShard,
            mintable: self.mintable,
            amount: self.amount,
            vins: Vec::new(),
            vouts: Vec::new(),
        }
    }
}

/// Privacy custom token payload: token identity plus the nested normal
/// transfer whose outputs carry the token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyTokenData {
    pub property_id: TokenId,
    pub property_name: String,
    pub property_symbol: String,
    pub kind: TokenKind,
    pub mintable: bool,
    pub amount: u64,
    pub proof: TxProof,
}

/// Closed metadata set attached to transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metadata {
    ShardStaking { funder: Vec<u8> },
    BeaconStaking { funder: Vec<u8> },
    WithdrawRewardRequest { payment_address: Vec<u8>, token_id: TokenId },
    WithdrawRewardResponse { request_tx: Hash32 },
}

impl Metadata {
    pub fn hash(&self) -> Hash32 {
        hash_of(self)
    }
}

/// Fields shared by every transaction variant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxBase {
    pub version: u32,
    pub lock_time: i64,
    pub fee: u64,
    pub sig_pub_key: Vec<u8>,
    pub proof: TxProof,
    pub metadata: Option<Metadata>,
    pub info: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeRole {
    Beacon,
    Shard,
}

impl StakeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            StakeRole::Beacon => "beacon",
            StakeRole::Shard => "shard",
        }
    }

    pub fn parse(s: &str) -> Option<StakeRole> {
        match s {
            "beacon" => Some(StakeRole::Beacon),
            "shard" => Some(StakeRole::Shard),
            _ => None,
        }
    }
}

/// The transaction variant set. Reward transactions are producer-minted
/// (withdraw responses, block salary); staking transactions register a
/// committee candidate; the token variants carry their token payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tx {
    Normal(TxBase),
    Reward(TxBase),
    Staking {
        base: TxBase,
        role: StakeRole,
        candidate: String,
    },
    CustomToken {
        base: TxBase,
        token: TokenData,
    },
    PrivacyToken {
        base: TxBase,
        token: PrivacyTokenData,
    },
}

impl Tx {
    pub fn base(&self) -> &TxBase {
        match self {
            Tx::Normal(base) | Tx::Reward(base) => base,
            Tx::Staking { base, .. } | Tx::CustomToken { base, .. } | Tx::PrivacyToken { base, .. } => base,
        }
    }

    pub fn hash(&self) -> Hash32 {
        hash_of(self)
    }

    pub fn proof(&self) -> &TxProof {
        &self.base().proof
    }

    pub fn fee(&self) -> u64 {
        self.base().fee
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.base().metadata.as_ref()
    }

    /// Token whose index this transaction mutates. Plain and privacy tokens
    /// additionally mutate the native index through their base proof.
    pub fn token_id(&self) -> TokenId {
        match self {
            Tx::Normal(_) | Tx::Reward(_) | Tx::Staking { .. } => NATIVE_TOKEN_ID,
            Tx::CustomToken { token, .. } => token.property_id,
            Tx::PrivacyToken { token, .. } => token.property_id,
        }
    }

    pub fn is_reward(&self) -> bool {
        matches!(self, Tx::Reward(_))
    }
}

/// Per-token fee totals for a block body, native fees first.
pub fn total_txs_fee(txs: &[Tx]) -> BTreeMap<TokenId, u64> {
    let mut fees: BTreeMap<TokenId, u64> = BTreeMap::new();
    for tx in txs {
        let entry = fees.entry(NATIVE_TOKEN_ID).or_insert(0);
        *entry = entry.saturating_add(tx.fee());
    }
    fees
}
