use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use itertools::Itertools;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::decoder::EventDecoder;
use super::known_events::KNOWN_EVENTS;
use super::producer::{self, ProducerOptions};
use super::rpc::{Block, EthRpc, Log};
use super::sourcify::{AbiError, AbiSource};
use super::store::{AbiRow, EventRow, IndexStore, TransactionRow};
use crate::hex::{hex_to_u256, hex_to_u64, normalize_address};

const PROCESSOR_CONCURRENCY: usize = 10;
const BATCHER_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub start_block: u64,
    /// Flush a batch at this many blocks, or at `batch_timeout`, whichever
    /// fires first.
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub poll_interval: Duration,
    /// Concurrent Sourcify lookups per batch.
    pub resolver_concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            start_block: 0,
            batch_size: 100,
            batch_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_secs(1),
            resolver_concurrency: 1,
        }
    }
}

/// A block-height message after the processor stage: the full block plus its
/// logs.
#[derive(Debug, Clone)]
pub struct BlockMessage {
    pub chain_id: u32,
    pub block_number: u64,
    pub block: Block,
    pub logs: Vec<Log>,
}

/// Called when a fetched block's parent hash does not extend the previous
/// one. Compensating deletes are a future capability; the default hook only
/// makes the reorg visible.
pub trait ReorgHook: Send + Sync {
    fn on_reorg(&self, chain_id: u32, block_number: u64);
}

pub struct LogReorgHook;

impl ReorgHook for LogReorgHook {
    fn on_reorg(&self, chain_id: u32, block_number: u64) {
        warn!(
            chain_id,
            block_number, "parent hash mismatch, possible reorg; orphaned rows are retained"
        );
    }
}

/// One chain's ingestion pipeline: a demand-driven height producer, a pool of
/// block fetchers, and a batching committer writing to the store.
pub struct Pipeline {
    chain_id: u32,
    rpc: Arc<dyn EthRpc>,
    store: Arc<dyn IndexStore>,
    abi_source: Arc<dyn AbiSource>,
    reorg_hook: Arc<dyn ReorgHook>,
    opts: PipelineOptions,
    last_seen: Mutex<Option<(u64, String)>>,
}

impl Pipeline {
    pub fn new(
        chain_id: u32,
        rpc: Arc<dyn EthRpc>,
        store: Arc<dyn IndexStore>,
        abi_source: Arc<dyn AbiSource>,
        opts: PipelineOptions,
    ) -> Self {
        Self {
            chain_id,
            rpc,
            store,
            abi_source,
            reorg_hook: Arc::new(LogReorgHook),
            opts,
            last_seen: Mutex::new(None),
        }
    }

    pub fn with_reorg_hook(mut self, hook: Arc<dyn ReorgHook>) -> Self {
        self.reorg_hook = hook;
        self
    }

    /// Runs until a batch commit fails. Dropping the returned future aborts
    /// the in-flight fetches; the producer task is stopped on the way out.
    pub async fn run(&self) -> Result<()> {
        let (heights, producer) = producer::spawn(
            self.chain_id,
            self.rpc.clone(),
            ProducerOptions {
                start_block: self.opts.start_block,
                demand: self.opts.batch_size,
                poll_interval: self.opts.poll_interval,
            },
        );

        let result = self.run_stages(heights).await;
        producer.abort();
        result
    }

    async fn run_stages(&self, heights: tokio::sync::mpsc::Receiver<u64>) -> Result<()> {
        let chain_id = self.chain_id;
        // `buffered` keeps fetches concurrent but releases blocks in height
        // order, so batches stay contiguous per chain
        let fetched = ReceiverStream::new(heights)
            .map(|block_number| {
                Box::pin(async move { (block_number, self.fetch(block_number).await) })
                    as std::pin::Pin<Box<dyn std::future::Future<Output = _> + Send + '_>>
            })
            .buffered(PROCESSOR_CONCURRENCY)
            .filter_map(move |(block_number, result)| async move {
                match result {
                    Ok(message) => Some(message),
                    Err(err) => {
                        warn!(
                            chain_id,
                            block_number,
                            err = ?err,
                            "dropping block after fetch failure"
                        );
                        None
                    }
                }
            });

        let batches = tokio_stream::StreamExt::chunks_timeout(
            fetched,
            self.opts.batch_size,
            self.opts.batch_timeout,
        );
        let commits = batches
            .map(|batch| {
                Box::pin(async move {
                    self.observe_continuity(&batch);
                    self.commit_batch(batch).await
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = _> + Send + '_>>
            })
            .buffered(BATCHER_CONCURRENCY);
        let mut commits = Box::pin(commits);

        while let Some(result) = commits.next().await {
            result?;
        }
        Ok(())
    }

    async fn fetch(&self, block_number: u64) -> Result<BlockMessage> {
        let block = self
            .rpc
            .get_block(self.chain_id, block_number)
            .await?
            .with_context(|| format!("block {block_number} not available on the node"))?;
        let logs = self
            .rpc
            .get_logs(self.chain_id, block_number, block_number)
            .await?;

        let (logs, strays): (Vec<Log>, Vec<Log>) = logs.into_iter().partition(|log| {
            hex_to_u64(&log.block_number).map(|n| n == block_number).unwrap_or(false)
        });
        if !strays.is_empty() {
            warn!(
                chain_id = self.chain_id,
                block_number,
                strays = strays.len(),
                "discarding logs reported outside the requested block"
            );
        }

        Ok(BlockMessage {
            chain_id: self.chain_id,
            block_number,
            block,
            logs,
        })
    }

    /// Runs synchronously in batch order, before commits interleave.
    fn observe_continuity(&self, batch: &[BlockMessage]) {
        let mut last_seen = self.last_seen.lock().unwrap();
        for message in batch {
            if let Some((previous_number, previous_hash)) = last_seen.as_ref() {
                if message.block_number == previous_number + 1
                    && message.block.parent_hash != *previous_hash
                {
                    self.reorg_hook.on_reorg(self.chain_id, message.block_number);
                }
            }
            *last_seen = Some((message.block_number, message.block.hash.clone()));
        }
    }

    async fn commit_batch(&self, batch: Vec<BlockMessage>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let started = Instant::now();

        let abis = self.resolve_abis(&batch).await?;
        let decoders = build_decoders(&abis);

        let tx_rows = batch.iter().flat_map(build_tx_rows).collect_vec();
        let event_rows = batch
            .iter()
            .flat_map(|message| build_event_rows(message, &decoders))
            .collect_vec();

        // both inserts belong to the same logical batch; if either fails the
        // whole batch is failed and the supervisor restarts from the
        // checkpoint
        if !tx_rows.is_empty() {
            self.store.insert_transactions(&tx_rows).await?;
        }
        if !event_rows.is_empty() {
            self.store.insert_events(&event_rows).await?;
        }

        info!(
            chain_id = self.chain_id,
            blocks = batch.len(),
            transactions = tx_rows.len(),
            events = event_rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "committed batch"
        );
        Ok(())
    }

    /// Address → ABI json for every contract that emitted a log in the
    /// batch: persisted ABIs first, then Sourcify for the misses. Freshly
    /// fetched ABIs are persisted before use.
    async fn resolve_abis(&self, batch: &[BlockMessage]) -> Result<HashMap<String, String>> {
        let addresses = batch
            .iter()
            .flat_map(|message| message.logs.iter())
            .map(|log| normalize_address(&log.address))
            .unique()
            .sorted()
            .collect_vec();

        let mut abis = self.store.load_abis(self.chain_id, &addresses).await?;

        let missing = addresses
            .iter()
            .filter(|address| !abis.contains_key(*address))
            .cloned()
            .collect_vec();
        let abi_source = self.abi_source.clone();
        let chain_id = self.chain_id;
        let fetched: Vec<(String, String)> = futures::stream::iter(missing)
            .map(move |address| {
                let abi_source = abi_source.clone();
                async move {
                    match abi_source.get_abi(chain_id, &address).await {
                        Ok(abi) => Some((address.clone(), abi)),
                        Err(AbiError::NotFound) => {
                            debug!(
                                chain_id,
                                address = address.as_str(),
                                "contract not verified, leaving logs undecoded"
                            );
                            None
                        }
                        Err(err) => {
                            warn!(
                                chain_id,
                                address = address.as_str(),
                                %err,
                                "abi resolution failed, leaving logs undecoded"
                            );
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.opts.resolver_concurrency.max(1))
            .filter_map(|resolved| async move { resolved })
            .collect()
            .await;

        if !fetched.is_empty() {
            let created_at = Utc::now();
            let rows = fetched
                .iter()
                .map(|(address, abi)| AbiRow {
                    chain_id: self.chain_id,
                    address: address.clone(),
                    abi: abi.clone(),
                    created_at,
                })
                .collect_vec();
            self.store.insert_abis(&rows).await?;
            abis.extend(fetched);
        }

        Ok(abis)
    }
}

fn build_decoders(abis: &HashMap<String, String>) -> HashMap<String, EventDecoder> {
    abis.iter()
        .filter_map(|(address, abi)| match EventDecoder::from_json(abi) {
            Ok(decoder) => Some((address.clone(), decoder)),
            Err(err) => {
                warn!(address = address.as_str(), %err, "unparseable abi, logs for this contract stay raw");
                None
            }
        })
        .collect()
}

fn build_tx_rows(message: &BlockMessage) -> Vec<TransactionRow> {
    let timestamp = block_timestamp(&message.block);
    message
        .block
        .transactions
        .iter()
        .map(|tx| TransactionRow {
            chain_id: message.chain_id,
            block_number: message.block_number,
            hash: tx.hash.to_lowercase(),
            from_address: tx.from.to_lowercase(),
            to_address: tx.to.as_deref().map(str::to_lowercase).unwrap_or_default(),
            value: decimal_string(&tx.value),
            gas_price: tx
                .gas_price
                .as_deref()
                .map(decimal_string)
                .unwrap_or_else(|| "0".to_string()),
            gas: hex_to_u64(&tx.gas).unwrap_or_default(),
            input: tx.input.clone(),
            receipt_status: None,
            timestamp,
        })
        .collect()
}

fn build_event_rows(
    message: &BlockMessage,
    decoders: &HashMap<String, EventDecoder>,
) -> Vec<EventRow> {
    message
        .logs
        .iter()
        .map(|log| {
            let address = normalize_address(&log.address);
            let decoded = decoders
                .get(&address)
                .and_then(|decoder| decoder.decode(&log.topics, &log.data))
                .or_else(|| KNOWN_EVENTS.decode(&log.topics, &log.data));
            if decoded.is_none() && decoders.contains_key(&address) {
                warn!(
                    chain_id = message.chain_id,
                    block_number = message.block_number,
                    address = address.as_str(),
                    "log did not decode against the contract abi, storing raw"
                );
            }
            let (event_name, params) = match decoded {
                Some(event) => match serde_json::to_string(&event.params) {
                    Ok(params) => (Some(event.name), Some(params)),
                    Err(_) => (None, None),
                },
                None => (None, None),
            };

            let mut topics = log.topics.iter().cloned();
            EventRow {
                chain_id: message.chain_id,
                block_number: message.block_number,
                transaction_hash: log.transaction_hash.clone(),
                transaction_index: hex_to_u64(&log.transaction_index).unwrap_or_default() as u32,
                log_index: hex_to_u64(&log.log_index).unwrap_or_default() as u32,
                address,
                topic0: topics.next(),
                topic1: topics.next(),
                topic2: topics.next(),
                topic3: topics.next(),
                data: log.data.clone(),
                event_name,
                params,
            }
        })
        .collect()
}

fn decimal_string(hex_value: &str) -> String {
    hex_to_u256(hex_value)
        .map(|value| value.to_string())
        .unwrap_or_else(|_| "0".to_string())
}

fn block_timestamp(block: &Block) -> DateTime<Utc> {
    hex_to_u64(&block.timestamp)
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds as i64, 0))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::indexer::rpc::{RpcError, Transaction};

    const TRANSFER_TOPIC0: &str =
        "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

    fn pad(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x"))
    }

    fn block(number: u64) -> Block {
        Block {
            number: format!("0x{number:x}"),
            hash: format!("0x{:0>64x}", number + 1),
            parent_hash: format!("0x{:0>64x}", number),
            timestamp: "0x64b8f000".to_string(),
            transactions: vec![Transaction {
                hash: format!("0x{:0>64x}", number * 1000),
                from: "0x1111111111111111111111111111111111111111".to_string(),
                to: Some("0x2222222222222222222222222222222222222222".to_string()),
                value: "0xde0b6b3a7640000".to_string(),
                gas_price: Some("0x3b9aca00".to_string()),
                gas: "0x5208".to_string(),
                input: "0x".to_string(),
            }],
        }
    }

    fn transfer_log(block_number: u64, address: &str) -> Log {
        Log {
            address: address.to_string(),
            topics: vec![
                TRANSFER_TOPIC0.to_string(),
                pad("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
                pad("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            ],
            data: format!("0x{:0>64}", "3e8"),
            block_number: format!("0x{block_number:x}"),
            transaction_hash: format!("0x{:0>64x}", block_number * 1000),
            transaction_index: "0x0".to_string(),
            log_index: "0x0".to_string(),
        }
    }

    fn message(block_number: u64, logs: Vec<Log>) -> BlockMessage {
        BlockMessage {
            chain_id: 1,
            block_number,
            block: block(block_number),
            logs,
        }
    }

    struct UnusedRpc;

    #[async_trait]
    impl EthRpc for UnusedRpc {
        async fn get_block(&self, _: u32, _: u64) -> Result<Option<Block>, RpcError> {
            unimplemented!("commit tests never fetch")
        }
        async fn get_logs(&self, _: u32, _: u64, _: u64) -> Result<Vec<Log>, RpcError> {
            unimplemented!("commit tests never fetch")
        }
        async fn get_block_number(&self, _: u32) -> Result<u64, RpcError> {
            unimplemented!("commit tests never fetch")
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        seeded_abis: Mutex<HashMap<String, String>>,
        tx_batches: Mutex<Vec<Vec<TransactionRow>>>,
        event_batches: Mutex<Vec<Vec<EventRow>>>,
        abi_rows: Mutex<Vec<AbiRow>>,
    }

    #[async_trait]
    impl IndexStore for MemoryStore {
        async fn insert_transactions(&self, rows: &[TransactionRow]) -> Result<()> {
            self.tx_batches.lock().unwrap().push(rows.to_vec());
            Ok(())
        }

        async fn insert_events(&self, rows: &[EventRow]) -> Result<()> {
            self.event_batches.lock().unwrap().push(rows.to_vec());
            Ok(())
        }

        async fn insert_abis(&self, rows: &[AbiRow]) -> Result<()> {
            self.abi_rows.lock().unwrap().extend(rows.to_vec());
            Ok(())
        }

        async fn load_abis(
            &self,
            _chain_id: u32,
            addresses: &[String],
        ) -> Result<HashMap<String, String>> {
            let seeded = self.seeded_abis.lock().unwrap();
            Ok(addresses
                .iter()
                .filter_map(|address| {
                    seeded.get(address).map(|abi| (address.clone(), abi.clone()))
                })
                .collect())
        }

        async fn latest_block(&self, _chain_id: u32) -> Result<Option<u64>> {
            Ok(None)
        }
    }

    struct NoAbis {
        calls: AtomicUsize,
    }

    impl NoAbis {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AbiSource for NoAbis {
        async fn get_abi(&self, _: u32, _: &str) -> Result<String, AbiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AbiError::NotFound)
        }
    }

    fn pipeline(store: Arc<MemoryStore>, abis: Arc<dyn AbiSource>) -> Pipeline {
        Pipeline::new(
            1,
            Arc::new(UnusedRpc),
            store,
            abis,
            PipelineOptions::default(),
        )
    }

    #[tokio::test]
    async fn one_batch_means_one_insert_per_table() {
        let store = Arc::new(MemoryStore::default());
        let pipeline = pipeline(store.clone(), Arc::new(NoAbis::new()));

        let batch = (0..100u64)
            .map(|n| message(n, vec![transfer_log(n, "0xcccccccccccccccccccccccccccccccccccccccc")]))
            .collect_vec();
        pipeline.commit_batch(batch).await.unwrap();

        let tx_batches = store.tx_batches.lock().unwrap();
        let event_batches = store.event_batches.lock().unwrap();
        assert_eq!(tx_batches.len(), 1);
        assert_eq!(tx_batches[0].len(), 100);
        assert_eq!(event_batches.len(), 1);
        assert_eq!(event_batches[0].len(), 100);
    }

    #[tokio::test]
    async fn unresolved_abi_is_asked_once_per_address_and_logs_stay_raw() {
        let store = Arc::new(MemoryStore::default());
        let abis = Arc::new(NoAbis::new());
        let pipeline = pipeline(store.clone(), abis.clone());

        let unknown_topic = format!("0x{}", "fe".repeat(32));
        let log = Log {
            topics: vec![
                unknown_topic.clone(),
                pad("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
                pad("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            ],
            ..transfer_log(7, "0xdddddddddddddddddddddddddddddddddddddddd")
        };
        let mut batch = vec![message(7, vec![log.clone()]), message(8, vec![])];
        batch[1].logs = vec![Log {
            block_number: "0x8".to_string(),
            ..log
        }];
        pipeline.commit_batch(batch).await.unwrap();

        // two logs, one contract: a single sourcify lookup
        assert_eq!(abis.calls.load(Ordering::SeqCst), 1);
        assert!(store.abi_rows.lock().unwrap().is_empty());

        let event_batches = store.event_batches.lock().unwrap();
        let rows = &event_batches[0];
        assert_eq!(rows.len(), 2);
        for row in rows {
            assert_eq!(row.event_name, None);
            assert_eq!(row.params, None);
            assert_eq!(row.topic0.as_deref(), Some(unknown_topic.as_str()));
            assert_eq!(row.topic1.as_deref(), Some(pad("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").as_str()));
            assert!(row.data.starts_with("0x"));
        }
    }

    #[tokio::test]
    async fn stored_abi_decodes_and_fetched_abi_is_persisted() {
        struct OneAbi;

        #[async_trait]
        impl AbiSource for OneAbi {
            async fn get_abi(&self, _: u32, address: &str) -> Result<String, AbiError> {
                if address == "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee" {
                    Ok(r#"[{"type":"event","name":"Transfer","inputs":[
                        {"name":"from","type":"address","indexed":true},
                        {"name":"to","type":"address","indexed":true},
                        {"name":"value","type":"uint256","indexed":false}]}]"#
                        .to_string())
                } else {
                    Err(AbiError::NotFound)
                }
            }
        }

        let store = Arc::new(MemoryStore::default());
        let pipeline = pipeline(store.clone(), Arc::new(OneAbi));

        let batch = vec![message(
            5,
            vec![transfer_log(5, "0xEEEEeeeeEEEEeeeeEEEEeeeeEEEEeeeeEEEEeeee")],
        )];
        pipeline.commit_batch(batch).await.unwrap();

        // the freshly fetched abi got persisted
        let abi_rows = store.abi_rows.lock().unwrap();
        assert_eq!(abi_rows.len(), 1);
        assert_eq!(abi_rows[0].address, "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee");

        let event_batches = store.event_batches.lock().unwrap();
        let row = &event_batches[0][0];
        assert_eq!(row.event_name.as_deref(), Some("Transfer"));
        let params: serde_json::Value = serde_json::from_str(row.params.as_ref().unwrap()).unwrap();
        assert_eq!(params["from"], "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(params["to"], "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        assert_eq!(params["value"], 1000);
    }

    #[tokio::test]
    async fn known_event_fallback_decodes_unverified_contracts() {
        let store = Arc::new(MemoryStore::default());
        let pipeline = pipeline(store.clone(), Arc::new(NoAbis::new()));

        let batch = vec![message(
            3,
            vec![transfer_log(3, "0xcccccccccccccccccccccccccccccccccccccccc")],
        )];
        pipeline.commit_batch(batch).await.unwrap();

        let event_batches = store.event_batches.lock().unwrap();
        let row = &event_batches[0][0];
        assert_eq!(row.event_name.as_deref(), Some("Transfer"));
        assert!(row.params.as_ref().unwrap().contains("\"value\":1000"));
    }

    #[tokio::test]
    async fn failed_insert_fails_the_batch() {
        struct FailingStore(MemoryStore);

        #[async_trait]
        impl IndexStore for FailingStore {
            async fn insert_transactions(&self, _: &[TransactionRow]) -> Result<()> {
                Err(anyhow::anyhow!("connection reset"))
            }
            async fn insert_events(&self, rows: &[EventRow]) -> Result<()> {
                self.0.insert_events(rows).await
            }
            async fn insert_abis(&self, rows: &[AbiRow]) -> Result<()> {
                self.0.insert_abis(rows).await
            }
            async fn load_abis(
                &self,
                chain_id: u32,
                addresses: &[String],
            ) -> Result<HashMap<String, String>> {
                self.0.load_abis(chain_id, addresses).await
            }
            async fn latest_block(&self, chain_id: u32) -> Result<Option<u64>> {
                self.0.latest_block(chain_id).await
            }
        }

        let store = Arc::new(FailingStore(MemoryStore::default()));
        let pipeline = Pipeline::new(
            1,
            Arc::new(UnusedRpc),
            store.clone(),
            Arc::new(NoAbis::new()),
            PipelineOptions::default(),
        );

        let batch = vec![message(1, vec![])];
        assert!(pipeline.commit_batch(batch).await.is_err());
        // the event insert never ran: no partial commit
        assert!(store.0.event_batches.lock().unwrap().is_empty());
    }

    #[test]
    fn contract_creation_tx_rows() {
        let mut msg = message(12, vec![]);
        msg.block.transactions = vec![Transaction {
            hash: "0xABCD".to_string(),
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: None,
            value: "0x0".to_string(),
            gas_price: None,
            gas: "0x5208".to_string(),
            input: "0x6080604052".to_string(),
        }];

        let rows = build_tx_rows(&msg);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].to_address, "");
        assert_eq!(rows[0].value, "0");
        assert_eq!(rows[0].gas, 21_000);
        assert_eq!(rows[0].gas_price, "0");
        assert_eq!(rows[0].receipt_status, None);
    }

    #[test]
    fn value_and_timestamp_normalization() {
        let msg = message(12, vec![]);
        let rows = build_tx_rows(&msg);
        assert_eq!(rows[0].value, "1000000000000000000");
        assert_eq!(rows[0].gas_price, "1000000000");
        assert_eq!(rows[0].timestamp.timestamp(), 0x64b8f000);
    }

    #[test]
    fn reorg_hook_fires_on_parent_hash_mismatch() {
        struct CountingHook(AtomicUsize);

        impl ReorgHook for CountingHook {
            fn on_reorg(&self, _: u32, _: u64) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        let pipeline = Pipeline::new(
            1,
            Arc::new(UnusedRpc),
            Arc::new(MemoryStore::default()),
            Arc::new(NoAbis::new()),
            PipelineOptions::default(),
        )
        .with_reorg_hook(hook.clone());

        let mut first = message(10, vec![]);
        first.block.hash = "0xaa".to_string();
        let mut second = message(11, vec![]);
        second.block.parent_hash = "0xbb".to_string();

        pipeline.observe_continuity(&[first]);
        assert_eq!(hook.0.load(Ordering::SeqCst), 0);
        pipeline.observe_continuity(&[second]);
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn short_batches_flush_on_timeout() {
        use futures::stream;

        // 30 messages and a closed stream: chunks_timeout flushes what it has
        let messages = (0..30u64).map(|n| message(n, vec![])).collect_vec();
        let stream = stream::iter(messages);
        let batches: Vec<Vec<BlockMessage>> =
            tokio_stream::StreamExt::chunks_timeout(stream, 100, Duration::from_millis(1000))
                .collect::<Vec<_>>()
                .await;

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 30);
    }
}
