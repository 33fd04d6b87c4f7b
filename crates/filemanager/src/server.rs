use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use barge_broker::{Broker, BrokerError, ConsumeOptions, QueueSpec};
use barge_protocol::{DIAGNOSE_EXCHANGE, DIAGNOSE_REQUEST_PATTERN, FILEMANAGER_EXCHANGE, Operation};
use barge_storage::Storage;

use crate::diagnose;
use crate::handlers::FileManager;

/// Name this service answers diagnose fan-outs under.
pub const SERVICE_NAME: &str = "filemanager";

/// Cadence of the reassembly-buffer sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Idle horizon after which a pending chunked upload is evicted. The
/// gateway gives up long before this, so anything older is abandoned.
const REASSEMBLY_IDLE_HORIZON: Duration = Duration::from_secs(300);

/// Declares the topology and consumes until `cancel` fires.
///
/// One durable queue per operation, named by its routing key, each with its
/// own consumer task at prefetch 1 so frames of a chunked upload are
/// handled in delivery order.
pub async fn run<B: Broker, S: Storage>(
    broker: Arc<B>,
    storage: Arc<S>,
    cancel: CancellationToken,
) -> Result<(), BrokerError> {
    broker.declare_exchange(FILEMANAGER_EXCHANGE).await?;
    broker.declare_exchange(DIAGNOSE_EXCHANGE).await?;

    let manager = Arc::new(FileManager::new(Arc::clone(&broker), storage));
    let mut tasks = Vec::new();

    for op in Operation::ALL {
        let queue = broker
            .declare_queue(QueueSpec::durable(op.request_key()))
            .await?;
        broker
            .bind(&queue, &op.request_key(), FILEMANAGER_EXCHANGE)
            .await?;
        let mut sub = broker
            .consume(&queue, ConsumeOptions { prefetch: Some(1) })
            .await?;

        let manager = Arc::clone(&manager);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = sub.next() => {
                        let Some(delivery) = next else { break };
                        manager.handle_delivery(op, delivery).await;
                    }
                }
            }
        }));
    }

    // Diagnose fan-outs share the consumer lifecycle with the operations.
    let diagnose_queue = broker
        .declare_queue(QueueSpec::durable(format!("{SERVICE_NAME}.diagnose")))
        .await?;
    broker
        .bind(&diagnose_queue, DIAGNOSE_REQUEST_PATTERN, DIAGNOSE_EXCHANGE)
        .await?;
    let mut diagnose_sub = broker
        .consume(&diagnose_queue, ConsumeOptions { prefetch: Some(1) })
        .await?;
    {
        let broker = Arc::clone(&broker);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = diagnose_sub.next() => {
                        let Some(delivery) = next else { break };
                        diagnose::handle(broker.as_ref(), delivery).await;
                    }
                }
            }
        }));
    }

    // Abandoned chunked uploads would otherwise accumulate forever.
    {
        let manager = Arc::clone(&manager);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for transaction in manager.reassembler().sweep(REASSEMBLY_IDLE_HORIZON) {
                            warn!(transaction = %transaction, "evicted stale chunked upload");
                        }
                    }
                }
            }
        }));
    }

    info!("filemanager listening for operations");
    cancel.cancelled().await;
    info!("filemanager shutting down");
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
