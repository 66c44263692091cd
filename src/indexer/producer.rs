use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::warn;

use super::rpc::EthRpc;

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub start_block: u64,
    /// Channel capacity; how many heights may be in flight downstream.
    pub demand: usize,
    pub poll_interval: Duration,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            start_block: 0,
            demand: 100,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Demand-driven source of block heights for one chain.
///
/// The bounded channel is the demand window: sends park once downstream stops
/// pulling, and unfilled demand stays parked until the head advances. The
/// head is polled at most once per `poll_interval`, and emitted heights are
/// strictly increasing. The task ends when the receiver is dropped.
pub fn spawn(
    chain_id: u32,
    rpc: Arc<dyn EthRpc>,
    opts: ProducerOptions,
) -> (mpsc::Receiver<u64>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(opts.demand.max(1));

    let handle = tokio::spawn(async move {
        let mut next_block = opts.start_block;
        let mut head: Option<(u64, Instant)> = None;

        loop {
            let stale = head.is_none_or(|(_, checked_at)| checked_at.elapsed() >= opts.poll_interval);
            if stale {
                match rpc.get_block_number(chain_id).await {
                    Ok(number) => head = Some((number, Instant::now())),
                    Err(err) => {
                        warn!(chain_id, %err, "failed to fetch chain head");
                        tokio::select! {
                            _ = tx.closed() => return,
                            _ = sleep(opts.poll_interval) => {}
                        }
                        continue;
                    }
                }
            }

            let (current_head, _) = head.expect("head is set after a successful poll");
            if next_block > current_head {
                tokio::select! {
                    _ = tx.closed() => return,
                    _ = sleep(opts.poll_interval) => {}
                }
                continue;
            }

            while next_block <= current_head {
                if tx.send(next_block).await.is_err() {
                    // receiver dropped, the pipeline is going away
                    return;
                }
                next_block += 1;
            }
        }
    });

    (rx, handle)
}
