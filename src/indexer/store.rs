mod clickhouse_impl;

pub use self::clickhouse_impl::ClickHouseStore;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row per transaction, ordered by `(chain_id, block_number, hash)`.
/// `value` and `gas_price` are decimal strings so 256-bit amounts survive
/// the trip through JSON and the wire format.
#[derive(Debug, Clone, ::clickhouse::Row, Serialize, Deserialize)]
pub struct TransactionRow {
    pub chain_id: u32,
    pub block_number: u64,
    pub hash: String,
    pub from_address: String,
    /// Empty on contract creation.
    pub to_address: String,
    pub value: String,
    pub gas_price: String,
    pub gas: u64,
    pub input: String,
    /// `None` until a receipt fetch fills it in; the block rpc carries no
    /// receipt data and a fabricated 0 would read as "failed".
    pub receipt_status: Option<u8>,
    #[serde(with = "::clickhouse::serde::chrono::datetime")]
    pub timestamp: DateTime<Utc>,
}

/// One row per event log, ordered by
/// `(chain_id, block_number, transaction_hash, log_index)`.
/// `event_name` and `params` are both set or both null.
#[derive(Debug, Clone, ::clickhouse::Row, Serialize, Deserialize)]
pub struct EventRow {
    pub chain_id: u32,
    pub block_number: u64,
    pub transaction_hash: String,
    pub transaction_index: u32,
    pub log_index: u32,
    pub address: String,
    pub topic0: Option<String>,
    pub topic1: Option<String>,
    pub topic2: Option<String>,
    pub topic3: Option<String>,
    pub data: String,
    pub event_name: Option<String>,
    pub params: Option<String>,
}

#[derive(Debug, Clone, ::clickhouse::Row, Serialize, Deserialize)]
pub struct AbiRow {
    pub chain_id: u32,
    pub address: String,
    pub abi: String,
    #[serde(with = "::clickhouse::serde::chrono::datetime")]
    pub created_at: DateTime<Utc>,
}

/// Gateway to the analytical store. Implementations are shared across
/// pipelines and must be thread-safe; each insert call is one batch and fails
/// as a whole.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn insert_transactions(&self, rows: &[TransactionRow]) -> Result<()>;
    async fn insert_events(&self, rows: &[EventRow]) -> Result<()>;
    async fn insert_abis(&self, rows: &[AbiRow]) -> Result<()>;

    /// ABI json keyed by address, for the subset of `addresses` that has a
    /// persisted ABI on `chain_id`. Missing addresses are absent from the map.
    async fn load_abis(&self, chain_id: u32, addresses: &[String])
        -> Result<HashMap<String, String>>;

    /// Highest block number already persisted for `chain_id`, used to resume
    /// after a restart. `None` when the chain has never been indexed.
    async fn latest_block(&self, chain_id: u32) -> Result<Option<u64>>;
}
