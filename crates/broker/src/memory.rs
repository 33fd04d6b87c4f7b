use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::topic::topic_matches;
use crate::{
    AckHandle, Broker, BrokerError, ConsumeOptions, Delivery, QueueSpec, Subscription,
    SubscriptionGuard,
};

/// In-process topic broker.
///
/// Implements the same contract as the AMQP backend: topic exchanges with
/// `*`/`#` binding patterns, broker-named queues, auto-delete on consumer
/// exit, so the full gateway/filemanager pipeline runs in one process
/// under test. Acknowledgement outcomes are counted for assertions.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    acked: AtomicUsize,
    nacked_requeued: AtomicUsize,
    nacked_dropped: AtomicUsize,
}

#[derive(Default)]
struct State {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
}

struct QueueState {
    tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    rx: Option<mpsc::UnboundedReceiver<(String, Vec<u8>)>>,
    auto_delete: bool,
}

struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries acknowledged so far.
    pub fn acked(&self) -> usize {
        self.inner.acked.load(Ordering::SeqCst)
    }

    /// Deliveries nacked with requeue.
    pub fn nacked_requeued(&self) -> usize {
        self.inner.nacked_requeued.load(Ordering::SeqCst)
    }

    /// Deliveries nacked without requeue (dropped as poisoned).
    pub fn nacked_dropped(&self) -> usize {
        self.inner.nacked_dropped.load(Ordering::SeqCst)
    }

    /// Whether a queue currently exists (auto-delete queues disappear when
    /// their consumer drops).
    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.state.lock().unwrap().queues.contains_key(name)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock().unwrap();
        state.exchanges.insert(name.to_string());
        Ok(())
    }

    async fn declare_queue(&self, spec: QueueSpec) -> Result<String, BrokerError> {
        let mut state = self.inner.state.lock().unwrap();
        let name = if spec.name.is_empty() {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("amq.gen-{}", &suffix[..12])
        } else {
            spec.name.clone()
        };

        if !state.queues.contains_key(&name) {
            let (tx, rx) = mpsc::unbounded_channel();
            state.queues.insert(
                name.clone(),
                QueueState {
                    tx,
                    rx: Some(rx),
                    auto_delete: spec.auto_delete,
                },
            );
        }
        Ok(name)
    }

    async fn bind(
        &self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock().unwrap();
        if !state.exchanges.contains(exchange) {
            return Err(BrokerError::Protocol(format!(
                "unknown exchange: {exchange}"
            )));
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::Protocol(format!("unknown queue: {queue}")));
        }
        state.bindings.push(Binding {
            exchange: exchange.to_string(),
            pattern: routing_key.to_string(),
            queue: queue.to_string(),
        });
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        _content_type: &str,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let state = self.inner.state.lock().unwrap();
        if !state.exchanges.contains(exchange) {
            return Err(BrokerError::Publish(format!(
                "unknown exchange: {exchange}"
            )));
        }

        // One delivery per queue, however many bindings match.
        let mut targets: HashSet<&str> = HashSet::new();
        for binding in &state.bindings {
            if binding.exchange == exchange && topic_matches(&binding.pattern, routing_key) {
                targets.insert(binding.queue.as_str());
            }
        }

        for queue in targets {
            if let Some(q) = state.queues.get(queue) {
                // A closed receiver means the consumer is gone; the message
                // is simply dropped, as an unbound broker queue would.
                let _ = q.tx.send((routing_key.to_string(), body.clone()));
            }
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _opts: ConsumeOptions,
    ) -> Result<Subscription, BrokerError> {
        let mut queue_rx = {
            let mut state = self.inner.state.lock().unwrap();
            let q = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::Consume(format!("unknown queue: {queue}")))?;
            q.rx.take()
                .ok_or_else(|| BrokerError::Consume(format!("queue already consumed: {queue}")))?
        };

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();
        let counters = Arc::clone(&self.inner);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    next = queue_rx.recv() => {
                        let Some((routing_key, body)) = next else { break };
                        let delivery = Delivery {
                            routing_key,
                            body,
                            acker: Box::new(MemoryAcker {
                                counters: Arc::clone(&counters),
                            }),
                        };
                        if tx.send(delivery).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Auto-delete queues vanish when their consumer goes away.
        let inner = Arc::clone(&self.inner);
        let queue_name = queue.to_string();
        let on_drop: Box<dyn FnOnce() + Send> = Box::new(move || {
            let mut state = inner.state.lock().unwrap();
            let auto_delete = state
                .queues
                .get(&queue_name)
                .is_some_and(|q| q.auto_delete);
            if auto_delete {
                state.queues.remove(&queue_name);
                state.bindings.retain(|b| b.queue != queue_name);
            }
        });

        Ok(Subscription::new(
            rx,
            SubscriptionGuard::new(cancel, Some(on_drop)),
        ))
    }
}

struct MemoryAcker {
    counters: Arc<Inner>,
}

#[async_trait]
impl AckHandle for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.counters.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        if requeue {
            self.counters.nacked_requeued.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.nacked_dropped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
