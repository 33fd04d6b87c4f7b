use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    AckHandle, Broker, BrokerConfig, BrokerError, ConsumeOptions, Delivery, QueueSpec,
    Subscription, SubscriptionGuard,
};

/// How often the heartbeat task checks connection liveness.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// AMQP 0.9.1 implementation of the [`Broker`] contract.
///
/// A single channel is shared by all callers and guarded internally, so
/// publishes on one routing key stay FIFO. The heartbeat task replaces the
/// connection on loss and re-declares every previously declared exchange;
/// re-binding ephemeral queues is the caller's responsibility.
pub struct AmqpBroker {
    config: BrokerConfig,
    state: Mutex<ConnState>,
    declared_exchanges: std::sync::Mutex<HashSet<String>>,
}

struct ConnState {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    /// Dials the broker once.
    pub async fn connect(config: BrokerConfig) -> Result<Self, BrokerError> {
        let state = Self::dial(&config).await?;
        info!(host = %config.host, port = %config.port, "connected to broker");
        Ok(Self {
            config,
            state: Mutex::new(state),
            declared_exchanges: std::sync::Mutex::new(HashSet::new()),
        })
    }

    /// Dials the broker with exponential backoff.
    ///
    /// Used at service startup: transient broker unavailability (container
    /// orchestration races, broker restarts) should not kill the process.
    pub async fn connect_with_retry(
        config: BrokerConfig,
        attempts: u32,
    ) -> Result<Self, BrokerError> {
        let mut last_err = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                warn!(
                    attempt,
                    delay_secs = delay.as_secs(),
                    "broker unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            match Self::connect(config.clone()).await {
                Ok(broker) => return Ok(broker),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| BrokerError::Unavailable("no attempts made".into())))
    }

    async fn dial(config: &BrokerConfig) -> Result<ConnState, BrokerError> {
        let mut props = ConnectionProperties::default();
        if let Some(name) = &config.connection_name {
            props = props.with_connection_name(name.clone().into());
        }
        let connection = Connection::connect(&config.url(), props)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        let channel = connection.create_channel().await?;
        Ok(ConnState {
            connection,
            channel,
        })
    }

    /// Whether the underlying connection is currently open.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connection.status().connected()
    }

    /// Spawns the liveness monitor: every 30 seconds, reconnect if the
    /// connection dropped. Stops when `cancel` fires.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick fires immediately

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if broker.is_connected().await {
                            continue;
                        }
                        warn!("broker connection lost, attempting to reconnect");
                        match broker.reconnect().await {
                            Ok(()) => info!("broker reconnected"),
                            Err(e) => error!(error = %e, "broker reconnect failed"),
                        }
                    }
                }
            }
        })
    }

    async fn reconnect(&self) -> Result<(), BrokerError> {
        let new_state = Self::dial(&self.config).await?;

        // Durable exchanges survive a broker restart but not a broker
        // replacement; re-declare everything we have ever declared.
        let exchanges: Vec<String> = self
            .declared_exchanges
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect();
        for name in exchanges {
            declare_topic_exchange(&new_state.channel, &name).await?;
        }

        *self.state.lock().await = new_state;
        Ok(())
    }

    async fn channel(&self) -> Channel {
        self.state.lock().await.channel.clone()
    }
}

async fn declare_topic_exchange(channel: &Channel, name: &str) -> Result<(), BrokerError> {
    channel
        .exchange_declare(
            name,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Protocol(e.to_string()))
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(5))
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let channel = self.channel().await;
        declare_topic_exchange(&channel, name).await?;
        self.declared_exchanges
            .lock()
            .unwrap()
            .insert(name.to_string());
        Ok(())
    }

    async fn declare_queue(&self, spec: QueueSpec) -> Result<String, BrokerError> {
        let channel = self.channel().await;
        let queue = channel
            .queue_declare(
                &spec.name,
                QueueDeclareOptions {
                    durable: spec.durable,
                    auto_delete: spec.auto_delete,
                    exclusive: spec.exclusive,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind(
        &self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
    ) -> Result<(), BrokerError> {
        let channel = self.channel().await;
        channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let channel = self.channel().await;
        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_content_type(content_type.to_string().into()),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        opts: ConsumeOptions,
    ) -> Result<Subscription, BrokerError> {
        let channel = self.channel().await;
        if let Some(prefetch) = opts.prefetch {
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await?;
        }

        let mut consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;
        let tag = consumer.tag().clone();

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    next = consumer.next() => {
                        match next {
                            Some(Ok(delivery)) => {
                                let lapin::message::Delivery {
                                    data,
                                    acker,
                                    routing_key,
                                    ..
                                } = delivery;
                                let out = Delivery {
                                    routing_key: routing_key.to_string(),
                                    body: data,
                                    acker: Box::new(AmqpAcker { acker }),
                                };
                                if tx.send(out).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "consumer stream error");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        // Cancel the consumer on drop so auto-delete queues are reclaimed.
        let cancel_channel = channel.clone();
        let on_drop: Box<dyn FnOnce() + Send> = Box::new(move || {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = cancel_channel
                        .basic_cancel(tag.as_str(), BasicCancelOptions::default())
                        .await;
                });
            }
        });

        Ok(Subscription::new(
            rx,
            SubscriptionGuard::new(cancel, Some(on_drop)),
        ))
    }
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl AckHandle for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(Into::into)
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(16));
        // Capped so a long outage never produces multi-minute waits.
        assert_eq!(backoff_delay(10), Duration::from_secs(32));
    }
}
