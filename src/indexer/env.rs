use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use serde::Deserialize;

use crate::env::{deserialize_url, deserialize_urls, get_app_config};

#[derive(Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default, deserialize_with = "deserialize_urls")]
    pub sourcify_proxy_urls: Vec<Url>,
    #[serde(
        default = "default_sourcify_direct_url",
        deserialize_with = "deserialize_url"
    )]
    pub sourcify_direct_url: Url,
    /// Milliseconds.
    #[serde(default = "default_sourcify_timeout")]
    pub sourcify_timeout: u64,
    #[serde(default = "default_sourcify_max_retries")]
    pub sourcify_max_retries: u32,
    /// Milliseconds.
    #[serde(default = "default_sourcify_cache_ttl")]
    pub sourcify_cache_ttl: u64,
    #[serde(default = "default_clickhouse_url")]
    pub clickhouse_url: String,
    #[serde(default = "default_clickhouse_database")]
    pub clickhouse_database: String,
    #[serde(default)]
    pub clickhouse_user: Option<String>,
    #[serde(default)]
    pub clickhouse_password: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_sourcify_direct_url() -> Url {
    Url::parse("https://sourcify.dev/server").unwrap()
}

fn default_sourcify_timeout() -> u64 {
    30_000
}

fn default_sourcify_max_retries() -> u32 {
    3
}

fn default_sourcify_cache_ttl() -> u64 {
    86_400_000
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_database() -> String {
    "chainsink".to_string()
}

pub static APP_CONFIG: LazyLock<AppConfig> = LazyLock::new(get_app_config);

/// Resolve the chain id → rpc url map from the environment.
///
/// `CHAINS="1=https://eth.example,10=https://op.example"` wins when set;
/// otherwise `SUPPORTED_CHAINS="1,10"` is expanded against one `RPC_URL_<id>`
/// variable per chain. Errors name the variable that is missing or malformed
/// so startup failures are actionable.
pub fn chain_map() -> Result<HashMap<u32, String>> {
    if let Ok(spec) = std::env::var("CHAINS") {
        return parse_chain_spec(&spec);
    }

    let ids = std::env::var("SUPPORTED_CHAINS")
        .map_err(|_| anyhow!("missing environment variable CHAINS or SUPPORTED_CHAINS"))?;

    let mut chains = HashMap::new();
    for id in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let chain_id: u32 = id
            .parse()
            .with_context(|| format!("invalid chain id {id:?} in SUPPORTED_CHAINS"))?;
        let var = format!("RPC_URL_{chain_id}");
        let url = std::env::var(&var).map_err(|_| anyhow!("missing environment variable {var}"))?;
        chains.insert(chain_id, url);
    }

    if chains.is_empty() {
        return Err(anyhow!("SUPPORTED_CHAINS is empty"));
    }
    Ok(chains)
}

fn parse_chain_spec(spec: &str) -> Result<HashMap<u32, String>> {
    let mut chains = HashMap::new();
    for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, url) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid CHAINS entry {entry:?}, expected <chain_id>=<rpc_url>"))?;
        let chain_id: u32 = id
            .trim()
            .parse()
            .with_context(|| format!("invalid chain id in CHAINS entry {entry:?}"))?;
        let url = url.trim();
        if url.is_empty() {
            return Err(anyhow!("empty rpc url for chain {chain_id} in CHAINS"));
        }
        chains.insert(chain_id, url.to_string());
    }

    if chains.is_empty() {
        return Err(anyhow!("CHAINS is empty"));
    }
    Ok(chains)
}
