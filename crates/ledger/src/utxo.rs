//! Per-(token, shard) UTXO and privacy index: serial numbers, commitments,
//! SNDs, output coins, and the token registry. Apply-side writes are
//! append-only; the `restore_*` functions are revert-only primitives driven
//! by the snapshot keyspace.

use thiserror::Error;

use crate::hash::{hash_bytes, Hash32};
use crate::schema;
use crate::store::{ChainDb, Scope, StoreError, StoreResult};
use crate::tx::{OutputCoin, TokenId};
use crate::view::TxViewPoint;

#[derive(Debug, Error)]
pub enum UtxoError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("serial number {0} already spent")]
    DoubleSpend(String),
}

pub type UtxoResult<T> = std::result::Result<T, UtxoError>;

// ---- serial numbers -------------------------------------------------------

pub fn has_serial_number(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    sn: &[u8],
) -> StoreResult<bool> {
    db.has(&schema::serial_number(token_id, shard_id, sn))
}

/// Insert spent serial numbers; a duplicate is a double spend and rejects
/// the whole batch before any write.
pub fn store_serial_numbers(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    serial_numbers: &[Vec<u8>],
) -> UtxoResult<()> {
    let mut seen = std::collections::HashSet::new();
    for sn in serial_numbers {
        if !seen.insert(sn.as_slice()) || has_serial_number(db, token_id, shard_id, sn)? {
            return Err(UtxoError::DoubleSpend(hex::encode(sn)));
        }
    }
    let len_key = schema::serial_number_len(token_id, shard_id);
    let mut len = db.get_u64_or_zero(&len_key)?;
    for sn in serial_numbers {
        db.put(&schema::serial_number(token_id, shard_id, sn), &[])?;
        len += 1;
    }
    db.put_u64(&len_key, len)?;
    Ok(())
}

pub fn serial_number_count(db: &ChainDb, token_id: &TokenId, shard_id: u8) -> StoreResult<u64> {
    db.get_u64_or_zero(&schema::serial_number_len(token_id, shard_id))
}

pub fn backup_serial_numbers_len(
    db: &ChainDb,
    scope: Scope,
    token_id: &TokenId,
    shard_id: u8,
) -> StoreResult<()> {
    db.backup_value(scope, &schema::serial_number_len(token_id, shard_id))
}

/// Revert-only: drop the block's serial numbers and put the counter back.
pub fn restore_serial_numbers(
    db: &ChainDb,
    scope: Scope,
    token_id: &TokenId,
    shard_id: u8,
    serial_numbers: &[Vec<u8>],
) -> StoreResult<()> {
    for sn in serial_numbers {
        db.delete(&schema::serial_number(token_id, shard_id, sn))?;
    }
    db.restore_value(scope, &schema::serial_number_len(token_id, shard_id))
}

// ---- commitments ----------------------------------------------------------

pub fn commitment_length(db: &ChainDb, token_id: &TokenId, shard_id: u8) -> StoreResult<u64> {
    db.get_u64_or_zero(&schema::commitment_len(token_id, shard_id))
}

pub fn has_commitment(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    commitment: &[u8],
) -> StoreResult<bool> {
    db.has(&schema::commitment_by_value(token_id, shard_id, commitment))
}

pub fn commitment_by_index(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    index: u64,
) -> StoreResult<Option<Vec<u8>>> {
    db.get_opt(&schema::commitment_by_index(token_id, shard_id, index))
}

pub fn commitment_index(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    commitment: &[u8],
) -> StoreResult<Option<u64>> {
    let raw = db.get_opt(&schema::commitment_by_value(token_id, shard_id, commitment))?;
    match raw {
        Some(bytes) => {
            let arr: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::Corrupt(hex::encode(commitment)))?;
            Ok(Some(u64::from_le_bytes(arr)))
        }
        None => Ok(None),
    }
}

/// Append commitments: each gets the next index plus a reverse lookup from
/// its value, and the counter advances.
pub fn store_commitments(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    commitments: &[Vec<u8>],
) -> StoreResult<()> {
    let len_key = schema::commitment_len(token_id, shard_id);
    let mut len = db.get_u64_or_zero(&len_key)?;
    for commitment in commitments {
        db.put(&schema::commitment_by_index(token_id, shard_id, len), commitment)?;
        db.put(
            &schema::commitment_by_value(token_id, shard_id, commitment),
            &len.to_le_bytes(),
        )?;
        len += 1;
    }
    db.put_u64(&len_key, len)
}

pub fn backup_commitments_len(
    db: &ChainDb,
    scope: Scope,
    token_id: &TokenId,
    shard_id: u8,
) -> StoreResult<()> {
    db.backup_value(scope, &schema::commitment_len(token_id, shard_id))
}

/// Revert-only: delete the reverse lookups of one key's commitments.
pub fn restore_commitments_of_pubkey(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    commitments: &[Vec<u8>],
) -> StoreResult<()> {
    for commitment in commitments {
        db.delete(&schema::commitment_by_value(token_id, shard_id, commitment))?;
    }
    Ok(())
}

/// Revert-only: put the counter back and drop every index entry the block
/// appended above the restored length.
pub fn restore_commitment_len(
    db: &ChainDb,
    scope: Scope,
    token_id: &TokenId,
    shard_id: u8,
) -> StoreResult<()> {
    let len_key = schema::commitment_len(token_id, shard_id);
    let current = db.get_u64_or_zero(&len_key)?;
    db.restore_value(scope, &len_key)?;
    let restored = db.get_u64_or_zero(&len_key)?;
    for index in restored..current {
        db.delete(&schema::commitment_by_index(token_id, shard_id, index))?;
    }
    Ok(())
}

// ---- output coins ---------------------------------------------------------

/// Append encoded output coins under the owner key, de-duplicated by digest
/// of the coin bytes.
pub fn store_output_coins(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    public_key: &[u8],
    coins: &[OutputCoin],
) -> StoreResult<()> {
    for coin in coins {
        let bytes = coin.to_bytes();
        let digest: Hash32 = hash_bytes(&bytes);
        db.put(&schema::output_coin(token_id, shard_id, public_key, &digest), &bytes)?;
    }
    Ok(())
}

pub fn output_coins_by_pubkey(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    public_key: &[u8],
) -> StoreResult<Vec<Vec<u8>>> {
    let prefix = schema::output_coin_prefix(token_id, shard_id, public_key);
    Ok(db
        .iter_prefix(&prefix)?
        .into_iter()
        .map(|(_, value)| value)
        .collect())
}

/// Revert-only: remove the coins the block appended for one owner.
pub fn delete_output_coins(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    public_key: &[u8],
    coins: &[OutputCoin],
) -> StoreResult<()> {
    for coin in coins {
        let digest = hash_bytes(&coin.to_bytes());
        db.delete(&schema::output_coin(token_id, shard_id, public_key, &digest))?;
    }
    Ok(())
}

// ---- serial-number derivators ---------------------------------------------

pub fn has_snd(db: &ChainDb, token_id: &TokenId, shard_id: u8, snd: &[u8]) -> StoreResult<bool> {
    db.has(&schema::snd(token_id, shard_id, snd))
}

pub fn store_snds(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    snds: &[Vec<u8>],
) -> StoreResult<()> {
    for snd in snds {
        db.put(&schema::snd(token_id, shard_id, snd), &[])?;
    }
    Ok(())
}

pub fn delete_snds(
    db: &ChainDb,
    token_id: &TokenId,
    shard_id: u8,
    snds: &[Vec<u8>],
) -> StoreResult<()> {
    for snd in snds {
        db.delete(&schema::snd(token_id, shard_id, snd))?;
    }
    Ok(())
}

// ---- token registry -------------------------------------------------------

pub fn store_custom_token(db: &ChainDb, token_id: &TokenId, init_tx: &Hash32) -> StoreResult<()> {
    db.put(&schema::token_init(token_id), init_tx)
}

pub fn has_custom_token(db: &ChainDb, token_id: &TokenId) -> StoreResult<bool> {
    db.has(&schema::token_init(token_id))
}

pub fn delete_custom_token(db: &ChainDb, token_id: &TokenId) -> StoreResult<()> {
    db.delete(&schema::token_init(token_id))
}

pub fn store_privacy_token(db: &ChainDb, token_id: &TokenId, init_tx: &Hash32) -> StoreResult<()> {
    db.put(&schema::privacy_token_init(token_id), init_tx)
}

pub fn has_privacy_token(db: &ChainDb, token_id: &TokenId) -> StoreResult<bool> {
    db.has(&schema::privacy_token_init(token_id))
}

pub fn delete_privacy_token(db: &ChainDb, token_id: &TokenId) -> StoreResult<()> {
    db.delete(&schema::privacy_token_init(token_id))
}

pub fn store_privacy_token_cross_shard(
    db: &ChainDb,
    token_id: &TokenId,
    metadata: &[u8],
) -> StoreResult<()> {
    db.put(&schema::privacy_token_cross_shard(token_id), metadata)
}

pub fn has_privacy_token_cross_shard(db: &ChainDb, token_id: &TokenId) -> StoreResult<bool> {
    db.has(&schema::privacy_token_cross_shard(token_id))
}

pub fn delete_privacy_token_cross_shard(db: &ChainDb, token_id: &TokenId) -> StoreResult<()> {
    db.delete(&schema::privacy_token_cross_shard(token_id))
}

// ---- view-point application ------------------------------------------------

/// Store a view point's serial numbers (own-transaction views only).
pub fn store_serial_numbers_from_view(db: &ChainDb, view: &TxViewPoint) -> UtxoResult<()> {
    if view.list_serial_numbers.is_empty() {
        return Ok(());
    }
    store_serial_numbers(db, &view.token_id, view.shard_id, &view.list_serial_numbers)
}

/// Store a view point's SNDs, walking the commitment map keys in sorted
/// order. SNDs are global per (token, shard): no receiver-shard filtering.
pub fn store_snds_from_view(db: &ChainDb, view: &TxViewPoint) -> StoreResult<()> {
    for key in view.sorted_commitment_keys() {
        if let Some(snds) = view.map_snd.get(key) {
            store_snds(db, &view.token_id, view.shard_id, snds)?;
        }
    }
    Ok(())
}

/// Store a view point's commitments and output coins for the keys that live
/// on the view's shard, in sorted key order so two nodes produce
/// byte-identical state.
pub fn store_commitments_from_view(
    db: &ChainDb,
    view: &TxViewPoint,
    active_shards: usize,
) -> UtxoResult<()> {
    for key in view.sorted_commitment_keys() {
        let pk = crate::key::decode_public_key(key)
            .map_err(|_| StoreError::Corrupt(key.clone()))?;
        let owner_shard = crate::key::shard_id_of_key(&pk, active_shards);
        if owner_shard != view.shard_id {
            continue;
        }
        if let Some(commitments) = view.map_commitments.get(key) {
            store_commitments(db, &view.token_id, view.shard_id, commitments)?;
        }
        if let Some(coins) = view.map_output_coins.get(key) {
            store_output_coins(db, &view.token_id, owner_shard, &pk, coins)?;
        }
    }
    Ok(())
}
