//! Ordered byte-keyed persistence on RocksDB, plus the `prev-` snapshot
//! keyspace that lets the commit pipeline revert the most recent block.

use rocksdb::{Direction, IteratorMode, Options, DB};
use thiserror::Error;

use crate::config::StoreCfg;
use crate::schema::{PREV_BEACON, PREV_SHARD};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("codec error: {0}")]
    Codec(#[from] Box<bincode::ErrorKind>),
    #[error("corrupt value under key {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which chain a snapshot key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Beacon,
    Shard(u8),
}

impl Scope {
    fn prev_prefix(self) -> Vec<u8> {
        match self {
            Scope::Beacon => PREV_BEACON.to_vec(),
            Scope::Shard(shard_id) => {
                let mut p = PREV_SHARD.to_vec();
                p.push(shard_id);
                p.push(b'-');
                p
            }
        }
    }
}

pub struct ChainDb {
    db: DB,
}

impl ChainDb {
    pub fn open(cfg: &StoreCfg) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        if cfg.enable_compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }
        let db = DB::open(&opts, &cfg.db_path)?;
        Ok(ChainDb { db })
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.db.put(key, value)?;
        Ok(())
    }

    /// Fetch a value; absent keys are `StoreError::NotFound`.
    pub fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.db.get(key)?.ok_or(StoreError::NotFound)
    }

    pub fn get_opt(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    pub fn has(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.db.get_pinned(key)?.is_some())
    }

    pub fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.db.delete(key)?;
        Ok(())
    }

    /// All `(key, value)` pairs under `prefix`, in key order. A prefix with
    /// no entries yields the empty vector, never an error.
    pub fn iter_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (k, v) = item?;
            if !k.starts_with(prefix) {
                break;
            }
            out.push((k.into_vec(), v.into_vec()));
        }
        Ok(out)
    }

    pub fn put_u64(&self, key: &[u8], value: u64) -> StoreResult<()> {
        self.put(key, &value.to_le_bytes())
    }

    pub fn get_u64(&self, key: &[u8]) -> StoreResult<u64> {
        let raw = self.get(key)?;
        decode_u64(&raw).ok_or_else(|| StoreError::Corrupt(hex::encode(key)))
    }

    /// Counter read where an absent key means zero.
    pub fn get_u64_or_zero(&self, key: &[u8]) -> StoreResult<u64> {
        match self.get_opt(key)? {
            Some(raw) => decode_u64(&raw).ok_or_else(|| StoreError::Corrupt(hex::encode(key))),
            None => Ok(0),
        }
    }

    // ---- snapshot keyspace -------------------------------------------------

    pub fn prev_key(&self, scope: Scope, key: &[u8]) -> Vec<u8> {
        let mut k = scope.prev_prefix();
        k.extend_from_slice(key);
        k
    }

    /// Copy the current value under `key` (or the empty pre-image when the
    /// key does not exist yet) into the scope's snapshot keyspace.
    pub fn backup_value(&self, scope: Scope, key: &[u8]) -> StoreResult<()> {
        let prev = self.prev_key(scope, key);
        match self.get_opt(key)? {
            Some(value) => self.put(&prev, &value),
            None => self.put(&prev, &[]),
        }
    }

    /// Put the snapshotted value back under `key`. An empty pre-image means
    /// the key did not exist before the block and is deleted. A missing
    /// snapshot entry is tolerated as an empty pre-image.
    pub fn restore_value(&self, scope: Scope, key: &[u8]) -> StoreResult<()> {
        let prev = self.prev_key(scope, key);
        match self.get_opt(&prev)? {
            Some(value) if !value.is_empty() => self.put(key, &value),
            _ => self.delete(key),
        }
    }

    pub fn store_prev_best_state(&self, scope: Scope, bytes: &[u8]) -> StoreResult<()> {
        self.put(&scope.prev_prefix(), bytes)
    }

    pub fn fetch_prev_best_state(&self, scope: Scope) -> StoreResult<Vec<u8>> {
        self.get(&scope.prev_prefix())
    }

    /// Drop the whole snapshot keyspace of a scope. Called once the block is
    /// durably committed and no revert is wanted.
    pub fn clean_backup(&self, scope: Scope) -> StoreResult<()> {
        let prefix = scope.prev_prefix();
        for (key, _) in self.iter_prefix(&prefix)? {
            self.delete(&key)?;
        }
        Ok(())
    }
}

fn decode_u64(raw: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}
