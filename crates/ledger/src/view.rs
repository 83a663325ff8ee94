//! Deterministic projection of a block's transactions into the mutation set
//! the UTXO index ingests. A view point is pure: it reads the block, never
//! the database, and its maps are ordered by base58 public key so two nodes
//! walk identical key sequences.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::block::{CrossTransaction, ShardBlock};
use crate::hash::Hash32;
use crate::key::{encode_public_key, shard_id_of_key};
use crate::tx::{OutputCoin, TokenData, TokenId, TokenKind, Tx, TxProof, NATIVE_TOKEN_ID};

/// Identity fields of a privacy token crossing in from another shard, kept
/// so the destination can register first-seen tokens.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyTokenMeta {
    pub property_id: TokenId,
    pub property_name: String,
    pub property_symbol: String,
    pub mintable: bool,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomTokenEntry {
    pub tx_index: usize,
    pub tx_hash: Hash32,
    pub data: TokenData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivacyTokenSubView {
    pub tx_index: Option<usize>,
    pub tx_hash: Option<Hash32>,
    pub kind: Option<TokenKind>,
    pub meta: Option<PrivacyTokenMeta>,
    pub view: TxViewPoint,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxViewPoint {
    pub token_id: TokenId,
    pub shard_id: u8,
    pub list_serial_numbers: Vec<Vec<u8>>,
    pub map_commitments: BTreeMap<String, Vec<Vec<u8>>>,
    pub map_output_coins: BTreeMap<String, Vec<OutputCoin>>,
    pub map_snd: BTreeMap<String, Vec<Vec<u8>>>,
    /// `(receiver key, tx hash, receiver shard)` tuples indexing incoming
    /// transfers for full-node lookups.
    pub tx_by_pub_key: BTreeSet<(String, Hash32, u8)>,
    pub custom_token_txs: Vec<CustomTokenEntry>,
    pub privacy_token_views: Vec<PrivacyTokenSubView>,
}

impl TxViewPoint {
    pub fn new(token_id: TokenId, shard_id: u8) -> Self {
        TxViewPoint {
            token_id,
            shard_id,
            list_serial_numbers: Vec::new(),
            map_commitments: BTreeMap::new(),
            map_output_coins: BTreeMap::new(),
            map_snd: BTreeMap::new(),
            tx_by_pub_key: BTreeSet::new(),
            custom_token_txs: Vec::new(),
            privacy_token_views: Vec::new(),
        }
    }

    fn absorb_proof(&mut self, proof: &TxProof, tx_hash: Option<Hash32>, active_shards: usize) {
        for input in &proof.input_coins {
            self.list_serial_numbers.push(input.serial_number.clone());
        }
        for coin in &proof.output_coins {
            let key = encode_public_key(&coin.public_key);
            self.map_commitments
                .entry(key.clone())
                .or_default()
                .push(coin.commitment.clone());
            self.map_snd.entry(key.clone()).or_default().push(coin.snd.clone());
            self.map_output_coins.entry(key.clone()).or_default().push(coin.clone());
            if let Some(tx_hash) = tx_hash {
                let receiver_shard = shard_id_of_key(&coin.public_key, active_shards);
                self.tx_by_pub_key.insert((key, tx_hash, receiver_shard));
            }
        }
    }

    fn absorb_cross_coins(&mut self, coins: &[OutputCoin]) {
        for coin in coins {
            let key = encode_public_key(&coin.public_key);
            self.map_commitments
                .entry(key.clone())
                .or_default()
                .push(coin.commitment.clone());
            self.map_snd.entry(key.clone()).or_default().push(coin.snd.clone());
            self.map_output_coins.entry(key).or_default().push(coin.clone());
        }
    }

    fn privacy_sub_view_mut(&mut self, token_id: TokenId) -> &mut PrivacyTokenSubView {
        if let Some(position) = self
            .privacy_token_views
            .iter()
            .position(|sub| sub.view.token_id == token_id)
        {
            return &mut self.privacy_token_views[position];
        }
        self.privacy_token_views.push(PrivacyTokenSubView {
            tx_index: None,
            tx_hash: None,
            kind: None,
            meta: None,
            view: TxViewPoint::new(token_id, self.shard_id),
        });
        self.privacy_token_views.last_mut().expect("just pushed")
    }

    /// View of a block's own transactions.
    pub fn from_block_txs(block: &ShardBlock, active_shards: usize) -> TxViewPoint {
        let shard_id = block.header.shard_id;
        let mut view = TxViewPoint::new(NATIVE_TOKEN_ID, shard_id);
        for (tx_index, tx) in block.body.transactions.iter().enumerate() {
            let tx_hash = tx.hash();
            view.absorb_proof(tx.proof(), Some(tx_hash), active_shards);
            match tx {
                Tx::CustomToken { token, .. } => {
                    view.custom_token_txs.push(CustomTokenEntry {
                        tx_index,
                        tx_hash,
                        data: token.clone(),
                    });
                }
                Tx::PrivacyToken { token, .. } => {
                    let sub = view.privacy_sub_view_mut(token.property_id);
                    sub.tx_index = Some(tx_index);
                    sub.tx_hash = Some(tx_hash);
                    sub.kind = Some(token.kind);
                    sub.view.absorb_proof(&token.proof, Some(tx_hash), active_shards);
                }
                Tx::Normal(_) | Tx::Reward(_) | Tx::Staking { .. } => {}
            }
        }
        view
    }

    /// View of the incoming cross-shard records of a block body.
    pub fn from_cross_transactions(
        shard_id: u8,
        cross_transactions: &BTreeMap<u8, Vec<CrossTransaction>>,
    ) -> TxViewPoint {
        let mut view = TxViewPoint::new(NATIVE_TOKEN_ID, shard_id);
        for records in cross_transactions.values() {
            for record in records {
                view.absorb_cross_coins(&record.output_coins);
                for token_data in &record.token_privacy_data {
                    let sub = view.privacy_sub_view_mut(token_data.property_id);
                    if sub.meta.is_none() {
                        sub.meta = Some(PrivacyTokenMeta {
                            property_id: token_data.property_id,
                            property_name: token_data.property_name.clone(),
                            property_symbol: token_data.property_symbol.clone(),
                            mintable: token_data.mintable,
                            amount: token_data.amount,
                        });
                    }
                    sub.view.absorb_cross_coins(&token_data.output_coins);
                }
            }
        }
        view
    }

    /// Map keys in storage order.
    pub fn sorted_commitment_keys(&self) -> impl Iterator<Item = &String> {
        self.map_commitments.keys()
    }
}
