use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const SHARD_BLOCK_VERSION: u32 = 1;
pub const BEACON_BLOCK_VERSION: u32 = 1;

/// Network-fixed chain parameters. The defaults mirror the test network:
/// eight shards, committees of four, a 40-milli base reward reduced by one
/// eighth per halflife period.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainParams {
    /// Number of shard chains `K`. Shard ids are `0..K`.
    pub active_shards: usize,
    pub shard_committee_size: usize,
    pub min_shard_committee_size: usize,
    pub beacon_committee_size: usize,
    pub min_beacon_committee_size: usize,
    /// Number of validators moved per `swap`.
    pub swap_offset: usize,
    /// Heights per epoch; committee snapshots for reward accounting are
    /// keyed by `epoch * epoch_span`.
    pub epoch_span: u64,
    /// Base-coin units minted per accepted shard block before decay.
    pub basic_reward: u64,
    /// Heights after which the reward decays by one eighth.
    pub reward_halflife: u64,
    /// Base58 public key credited by dev-reward instructions.
    pub dev_reward_address: String,
    /// Unix timestamp baked into the beacon genesis header.
    pub genesis_timestamp: i64,
    /// Pre-selected beacon committee installed by beacon genesis.
    pub preselect_beacon_keys: Vec<String>,
    /// Pre-selected shard candidates installed by beacon genesis; shard `s`
    /// takes the slice starting at `s * min_shard_committee_size`.
    pub preselect_shard_keys: Vec<String>,
}

impl ChainParams {
    pub fn testnet() -> Self {
        ChainParams {
            active_shards: 8,
            shard_committee_size: 16,
            min_shard_committee_size: 4,
            beacon_committee_size: 4,
            min_beacon_committee_size: 4,
            swap_offset: 1,
            epoch_span: 100,
            basic_reward: 400_000_000,
            reward_halflife: 3_155_760,
            dev_reward_address: String::new(),
            genesis_timestamp: 1_533_081_600, // 2018-08-01T00:00:00Z
            preselect_beacon_keys: Vec::new(),
            preselect_shard_keys: Vec::new(),
        }
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::testnet()
    }
}

/// Key-value store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreCfg {
    pub db_path: PathBuf,
    pub enable_compression: bool,
}

impl StoreCfg {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        StoreCfg {
            db_path: path.into(),
            enable_compression: true,
        }
    }
}
