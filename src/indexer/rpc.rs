mod http;

pub use http::HttpRpc;

use async_trait::async_trait;
use serde::Deserialize;

/// A block with full transaction objects, as returned by
/// `eth_getBlockByNumber(n, true)`. Quantities stay hex-encoded until row
/// assembly normalizes them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    /// `None` for contract creation transactions.
    #[serde(default)]
    pub to: Option<String>,
    pub value: String,
    /// Absent on some typed transactions.
    #[serde(default)]
    pub gas_price: Option<String>,
    pub gas: String,
    pub input: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
    pub transaction_index: String,
    pub log_index: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("http status {0}")]
    Http(u16),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait EthRpc: Send + Sync {
    /// `eth_getBlockByNumber` with full transaction objects. `Ok(None)` when
    /// the node does not know the block yet.
    async fn get_block(&self, chain_id: u32, number: u64) -> Result<Option<Block>, RpcError>;

    /// `eth_getLogs` over an inclusive block range.
    async fn get_logs(&self, chain_id: u32, from: u64, to: u64) -> Result<Vec<Log>, RpcError>;

    /// `eth_blockNumber`: the current chain head.
    async fn get_block_number(&self, chain_id: u32) -> Result<u64, RpcError>;
}
