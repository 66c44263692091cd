use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tokio::time::Instant;
use tracing::warn;

use crate::hex::normalize_address;

/// Why an ABI could not be produced for a `(chain_id, address)` pair.
#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    #[error("contract is not verified")]
    NotFound,
    #[error("rate limited")]
    RateLimited { retry_after: Option<u64> },
    #[error("request timed out")]
    Timeout,
    #[error("http status {0}")]
    Http(u16),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("metadata file carries no abi")]
    InvalidMetadata,
    #[error("no abi file in response")]
    NoAbiFound,
    #[error("transport error: {0}")]
    Transport(String),
}

impl AbiError {
    /// Authoritative negatives and malformed payloads come back as-is;
    /// everything else is worth another proxy.
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AbiError::NotFound | AbiError::InvalidMetadata | AbiError::NoAbiFound
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Full,
    Partial,
    NotVerified,
}

#[derive(Debug, Clone)]
pub struct SourcifyOptions {
    pub proxy_urls: Vec<Url>,
    pub direct_url: Url,
    pub timeout: Duration,
    pub max_retries: u32,
    pub cache_ttl: Duration,
}

impl Default for SourcifyOptions {
    fn default() -> Self {
        Self {
            proxy_urls: Vec::new(),
            direct_url: Url::parse("https://sourcify.dev/server").unwrap(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Anything that can turn a `(chain_id, address)` pair into ABI json.
#[async_trait]
pub trait AbiSource: Send + Sync {
    async fn get_abi(&self, chain_id: u32, address: &str) -> Result<String, AbiError>;
}

struct CacheEntry {
    abi: String,
    inserted_at: Instant,
}

/// Sourcify metadata client.
///
/// Requests rotate through a pool of proxy front-ends when one is configured,
/// falling back to the direct service URL. Resolved ABIs live in an in-memory
/// TTL cache keyed by `(chain_id, normalized address)`; duplicate concurrent
/// misses may both hit the network, last writer wins.
pub struct SourcifyClient {
    http: reqwest::Client,
    opts: SourcifyOptions,
    rotation_cursor: AtomicUsize,
    cache: Mutex<HashMap<(u32, String), CacheEntry>>,
}

impl SourcifyClient {
    pub fn new(opts: SourcifyOptions) -> Self {
        let http = reqwest::Client::builder()
            .timeout(opts.timeout)
            .build()
            .expect("failed to build http client");
        Self {
            http,
            opts,
            rotation_cursor: AtomicUsize::new(0),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_abi(&self, chain_id: u32, address: &str) -> Result<String, AbiError> {
        let address = normalize_address(address);
        if let Some(abi) = self.get_cached(chain_id, &address) {
            return Ok(abi);
        }

        let abi = self
            .fetch_with_retry(|base| self.fetch_abi_once(base, chain_id, &address))
            .await?;
        self.put_cached(chain_id, &address, abi.clone());
        Ok(abi)
    }

    /// Verification status without downloading files.
    pub async fn check_verified(
        &self,
        chain_id: u32,
        address: &str,
    ) -> Result<VerificationStatus, AbiError> {
        let address = normalize_address(address);
        self.fetch_with_retry(|base| self.check_verified_once(base, chain_id, &address))
            .await
    }

    /// Drop one `(chain_id, address)` entry, everything for one chain, or
    /// the whole cache.
    pub fn clear_cache(&self, chain_id: Option<u32>, address: Option<&str>) {
        let mut cache = self.cache.lock().unwrap();
        match (chain_id, address) {
            (Some(chain), Some(address)) => {
                cache.remove(&(chain, normalize_address(address)));
            }
            (Some(chain), None) => cache.retain(|(c, _), _| *c != chain),
            _ => cache.clear(),
        }
    }

    fn get_cached(&self, chain_id: u32, address: &str) -> Option<String> {
        let cache = self.cache.lock().unwrap();
        let entry = cache.get(&(chain_id, address.to_string()))?;
        (entry.inserted_at.elapsed() < self.opts.cache_ttl).then(|| entry.abi.clone())
    }

    fn put_cached(&self, chain_id: u32, address: &str, abi: String) {
        let mut cache = self.cache.lock().unwrap();
        cache.insert(
            (chain_id, address.to_string()),
            CacheEntry {
                abi,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Round-robin over the proxy pool; the direct URL when the pool is empty.
    fn next_url(&self) -> Url {
        if self.opts.proxy_urls.is_empty() {
            return self.opts.direct_url.clone();
        }
        let cursor = self.rotation_cursor.fetch_add(1, Ordering::Relaxed);
        self.opts.proxy_urls[cursor % self.opts.proxy_urls.len()].clone()
    }

    /// At most `max_retries` calls to `fetch`, each against the next proxy in
    /// the rotation. Rate limits back off `Retry-After` seconds when the
    /// server names a wait, `2^(attempt-1)` otherwise; timeouts and transport
    /// errors rotate immediately.
    async fn fetch_with_retry<T, F, Fut>(&self, fetch: F) -> Result<T, AbiError>
    where
        F: Fn(Url) -> Fut,
        Fut: Future<Output = Result<T, AbiError>>,
    {
        let mut attempt = 1;
        loop {
            let base = self.next_url();
            match fetch(base.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.opts.max_retries && err.is_retryable() => {
                    if let AbiError::RateLimited { retry_after } = &err {
                        let wait = retry_after.unwrap_or(1 << (attempt - 1));
                        warn!(proxy = %base, attempt, wait, "rate limited, backing off");
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                    } else {
                        warn!(proxy = %base, attempt, %err, "fetch failed, rotating proxy");
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_abi_once(
        &self,
        base: Url,
        chain_id: u32,
        address: &str,
    ) -> Result<String, AbiError> {
        let url = format!(
            "{}/files/any/{}/{}",
            base.as_str().trim_end_matches('/'),
            chain_id,
            address
        );
        let body = self.get_json(&url).await?;
        extract_abi(&body)
    }

    async fn check_verified_once(
        &self,
        base: Url,
        chain_id: u32,
        address: &str,
    ) -> Result<VerificationStatus, AbiError> {
        let url = format!(
            "{}/check-all-by-addresses?addresses={}&chainIds={}",
            base.as_str().trim_end_matches('/'),
            address,
            chain_id
        );
        let body = match self.get_json(&url).await {
            Ok(body) => body,
            Err(AbiError::NotFound) => return Ok(VerificationStatus::NotVerified),
            Err(err) => return Err(err),
        };

        let status = body
            .as_array()
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get("status"))
            .and_then(Value::as_str);
        Ok(match status {
            Some("full") | Some("perfect") => VerificationStatus::Full,
            Some("partial") => VerificationStatus::Partial,
            _ => VerificationStatus::NotVerified,
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, AbiError> {
        let response = self.http.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                AbiError::Timeout
            } else {
                AbiError::Transport(err.to_string())
            }
        })?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|err| AbiError::InvalidResponse(err.to_string())),
            StatusCode::NOT_FOUND => Err(AbiError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse().ok());
                Err(AbiError::RateLimited { retry_after })
            }
            status => Err(AbiError::Http(status.as_u16())),
        }
    }
}

#[async_trait]
impl AbiSource for SourcifyClient {
    async fn get_abi(&self, chain_id: u32, address: &str) -> Result<String, AbiError> {
        SourcifyClient::get_abi(self, chain_id, address).await
    }
}

/// Pull the ABI out of a `/files/any` response: either `{files: [...]}` or a
/// bare array of `{name, content}` files. The metadata file wins over loose
/// `.abi.json` files.
fn extract_abi(body: &Value) -> Result<String, AbiError> {
    let files = body
        .get("files")
        .and_then(Value::as_array)
        .or_else(|| body.as_array())
        .ok_or_else(|| AbiError::InvalidResponse("expected a files array".to_string()))?;

    if let Some(content) = find_file(files, |name| name.ends_with("metadata.json")) {
        let metadata: Value =
            serde_json::from_str(content).map_err(|_| AbiError::InvalidMetadata)?;
        let abi = metadata
            .get("output")
            .and_then(|output| output.get("abi"))
            .or_else(|| metadata.get("abi"));
        return match abi {
            Some(abi) => Ok(abi.to_string()),
            None => Err(AbiError::InvalidMetadata),
        };
    }

    if let Some(content) = find_file(files, |name| name.ends_with(".abi.json") || name == "abi.json")
    {
        let abi: Value = serde_json::from_str(content).map_err(|_| AbiError::InvalidMetadata)?;
        return Ok(abi.to_string());
    }

    Err(AbiError::NoAbiFound)
}

fn find_file<'a>(files: &'a [Value], matches: impl Fn(&str) -> bool) -> Option<&'a str> {
    files.iter().find_map(|file| {
        let name = file.get("name").and_then(Value::as_str)?;
        if matches(name) {
            file.get("content").and_then(Value::as_str)
        } else {
            None
        }
    })
}
