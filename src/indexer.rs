mod decoder;
mod env;
mod known_events;
mod pipeline;
mod producer;
mod rpc;
mod sourcify;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::{http::StatusCode, routing::get, Router};
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use self::env::APP_CONFIG;
use self::pipeline::{Pipeline, PipelineOptions};
use self::rpc::{EthRpc, HttpRpc};
use self::sourcify::{AbiSource, SourcifyClient, SourcifyOptions};
use self::store::{ClickHouseStore, IndexStore};
use crate::log;

const RESTART_BACKOFF_FLOOR: Duration = Duration::from_secs(1);
const RESTART_BACKOFF_CAP: Duration = Duration::from_secs(64);
const HEALTHY_RUN: Duration = Duration::from_secs(60);

/// Start one ingestion pipeline per configured chain, plus a liveness
/// endpoint. Runs until the process is killed; individual pipelines are
/// restarted with backoff and never take each other down.
pub async fn start_indexing() -> Result<()> {
    log::init();

    let chains = env::chain_map()?;
    info!(chains = chains.len(), "starting ingestion");

    let rpc: Arc<dyn EthRpc> = Arc::new(HttpRpc::new(chains.clone()));
    let store: Arc<dyn IndexStore> = Arc::new(ClickHouseStore::new(
        &APP_CONFIG.clickhouse_url,
        &APP_CONFIG.clickhouse_database,
        APP_CONFIG.clickhouse_user.as_deref(),
        APP_CONFIG.clickhouse_password.as_deref(),
    ));
    let abi_source: Arc<dyn AbiSource> = Arc::new(SourcifyClient::new(SourcifyOptions {
        proxy_urls: APP_CONFIG.sourcify_proxy_urls.clone(),
        direct_url: APP_CONFIG.sourcify_direct_url.clone(),
        timeout: Duration::from_millis(APP_CONFIG.sourcify_timeout),
        max_retries: APP_CONFIG.sourcify_max_retries,
        cache_ttl: Duration::from_millis(APP_CONFIG.sourcify_cache_ttl),
    }));

    let handles = chains
        .keys()
        .copied()
        .map(|chain_id| {
            tokio::spawn(supervise_chain(
                chain_id,
                rpc.clone(),
                store.clone(),
                abi_source.clone(),
            ))
        })
        .collect::<Vec<_>>();

    let supervisors = async {
        futures::future::join_all(handles).await;
        Err::<(), anyhow::Error>(anyhow!("all chain supervisors exited"))
    };

    tokio::try_join!(mount_health_route(), supervisors)?;
    Ok(())
}

/// One-for-one restarts with exponential backoff. Each run resumes from the
/// store's checkpoint so a restart re-fetches at most the failed batch.
async fn supervise_chain(
    chain_id: u32,
    rpc: Arc<dyn EthRpc>,
    store: Arc<dyn IndexStore>,
    abi_source: Arc<dyn AbiSource>,
) {
    let mut backoff = RESTART_BACKOFF_FLOOR;
    loop {
        let start_block = resume_block(chain_id, store.as_ref()).await;
        let pipeline = Pipeline::new(
            chain_id,
            rpc.clone(),
            store.clone(),
            abi_source.clone(),
            PipelineOptions {
                start_block,
                ..PipelineOptions::default()
            },
        );

        info!(chain_id, start_block, "starting pipeline");
        let started = Instant::now();
        match pipeline.run().await {
            Ok(()) => warn!(chain_id, "pipeline exited without error, restarting"),
            Err(err) => error!(chain_id, err = ?err, "pipeline failed"),
        }

        if started.elapsed() >= HEALTHY_RUN {
            backoff = RESTART_BACKOFF_FLOOR;
        }
        sleep(backoff).await;
        backoff = (backoff * 2).min(RESTART_BACKOFF_CAP);
    }
}

async fn resume_block(chain_id: u32, store: &dyn IndexStore) -> u64 {
    match store.latest_block(chain_id).await {
        Ok(Some(latest)) => latest.saturating_add(1).max(APP_CONFIG.start_block),
        Ok(None) => APP_CONFIG.start_block,
        Err(err) => {
            warn!(chain_id, err = ?err, "failed to load checkpoint, using configured start block");
            APP_CONFIG.start_block
        }
    }
}

async fn mount_health_route() -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], APP_CONFIG.port));
    let app = Router::new().route("/", get(|| async { StatusCode::OK }));

    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await.map_err(Into::into)
}
