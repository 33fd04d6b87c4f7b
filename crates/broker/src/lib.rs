//! Connection-oriented, thread-safe handle over a topic broker.
//!
//! The [`Broker`] trait keeps the services free of client-library types:
//! the gateway and filemanager speak in exchanges, routing keys, and
//! deliveries with manual acknowledgement. [`AmqpBroker`] implements the
//! contract over AMQP 0.9.1; [`MemoryBroker`] is a faithful in-process
//! topic exchange used by the integration tests and for single-process
//! development.

mod amqp;
mod config;
mod memory;
mod topic;

pub use amqp::AmqpBroker;
pub use config::BrokerConfig;
pub use memory::MemoryBroker;
pub use topic::topic_matches;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Errors from the broker adapter.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker protocol error: {0}")]
    Protocol(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("broker connection closed")]
    Closed,

    #[error(transparent)]
    Amqp(#[from] lapin::Error),
}

/// Declaration parameters for a queue.
///
/// An empty `name` asks the broker to mint a unique one; the effective name
/// comes back from [`Broker::declare_queue`].
#[derive(Debug, Clone, Default)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
}

impl QueueSpec {
    /// A durable, shared work queue (service side).
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            auto_delete: false,
            exclusive: false,
        }
    }

    /// An exclusive, auto-delete, broker-named reply queue (caller side).
    pub fn reply() -> Self {
        Self {
            name: String::new(),
            durable: false,
            auto_delete: true,
            exclusive: true,
        }
    }
}

/// Consumer options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeOptions {
    /// Per-consumer prefetch; `Some(1)` preserves per-queue FIFO handling.
    pub prefetch: Option<u16>,
}

/// Manual acknowledgement handle for one delivery.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    /// Negative acknowledgement; `requeue` sends the message back to the
    /// queue, `false` drops it (poisoned message).
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// One message handed to a consumer.
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub acker: Box<dyn AckHandle>,
}

/// A live consumer. Dropping it cancels the underlying consumer, which
/// lets the broker reclaim auto-delete queues.
pub struct Subscription {
    rx: mpsc::Receiver<Delivery>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<Delivery>, guard: SubscriptionGuard) -> Self {
        Self { rx, _guard: guard }
    }

    /// Waits for the next delivery. `None` means the consumer ended
    /// (connection loss or queue deletion).
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

pub(crate) struct SubscriptionGuard {
    cancel: tokio_util::sync::CancellationToken,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub(crate) fn new(
        cancel: tokio_util::sync::CancellationToken,
        on_drop: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        Self { cancel, on_drop }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}

/// Thread-safe handle over a topic broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Declares a durable topic exchange. Idempotent.
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError>;

    /// Declares a queue and returns its effective name.
    async fn declare_queue(&self, spec: QueueSpec) -> Result<String, BrokerError>;

    /// Binds `queue` to `routing_key` on `exchange`.
    async fn bind(&self, queue: &str, routing_key: &str, exchange: &str)
    -> Result<(), BrokerError>;

    /// Publishes `body` with the given routing key and content type.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<(), BrokerError>;

    /// Starts consuming from `queue` with manual acknowledgement.
    async fn consume(&self, queue: &str, opts: ConsumeOptions)
    -> Result<Subscription, BrokerError>;
}
