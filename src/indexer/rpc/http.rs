use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::{Block, EthRpc, Log, RpcError};
use crate::hex::{hex_to_u64, u64_to_hex};

const RPC_TIMEOUT: Duration = Duration::from_secs(15);

pub struct HttpRpc {
    client: reqwest::Client,
    urls: HashMap<u32, String>,
    request_id: AtomicU64,
}

impl HttpRpc {
    pub fn new(urls: HashMap<u32, String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .expect("failed to build http client");
        Self {
            client,
            urls,
            request_id: AtomicU64::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        chain_id: u32,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let url = self
            .urls
            .get(&chain_id)
            .ok_or_else(|| RpcError::Transport(format!("no rpc url for chain {chain_id}")))?;

        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
        });

        let response = self.client.post(url).json(&body).send().await.map_err(|err| {
            if err.is_timeout() {
                RpcError::Timeout
            } else {
                RpcError::Transport(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Http(status.as_u16()));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|err| RpcError::InvalidResponse(err.to_string()))?;

        if let Some(error) = envelope.get("error") {
            return Err(RpcError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        let result = envelope
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::InvalidResponse("missing result field".to_string()))?;
        serde_json::from_value(result).map_err(|err| RpcError::InvalidResponse(err.to_string()))
    }
}

#[async_trait]
impl EthRpc for HttpRpc {
    async fn get_block(&self, chain_id: u32, number: u64) -> Result<Option<Block>, RpcError> {
        // `true` asks for full transaction objects; a null result means the
        // node has not seen the block.
        self.call(chain_id, "eth_getBlockByNumber", json!([u64_to_hex(number), true]))
            .await
    }

    async fn get_logs(&self, chain_id: u32, from: u64, to: u64) -> Result<Vec<Log>, RpcError> {
        self.call(
            chain_id,
            "eth_getLogs",
            json!([{ "fromBlock": u64_to_hex(from), "toBlock": u64_to_hex(to) }]),
        )
        .await
    }

    async fn get_block_number(&self, chain_id: u32) -> Result<u64, RpcError> {
        let head: String = self.call(chain_id, "eth_blockNumber", json!([])).await?;
        hex_to_u64(&head).map_err(|err| RpcError::InvalidResponse(err.to_string()))
    }
}
