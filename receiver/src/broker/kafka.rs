//! Kafka broker adapter (librdkafka)
//!
//! Maps the broker settings onto a consumer group:
//!
//! | Setting | librdkafka property |
//! |---------|---------------------|
//! | `host:port` | `bootstrap.servers` |
//! | `vpn` | `group.id` |
//! | `username` / `password` | `sasl.username` / `sasl.password` (PLAIN) |
//! | `tls` + `trust_store` | `security.protocol=SASL_SSL`, `ssl.ca.location` |
//! | queue | subscribed topic |
//!
//! Offsets are stored only when the receiver acknowledges a message
//! (`enable.auto.offset.store=false`) and committed in the background, so an
//! unacknowledged message is consumed again after a restart or rebalance.
//! Commits are cumulative, so the stored offset only advances past the
//! contiguous acknowledged prefix of each partition (see [`OffsetTracker`]).
//! A failed message holds its partition's commit back; everything after it is
//! redelivered with it.

use super::{AckMode, Acknowledger, ConsumerSpec, MessagingService, OffsetTracker, QueueConsumer};
use crate::config::BrokerConfig;
use crate::error::ReceiverError;
use async_trait::async_trait;
use bytes::Bytes;
use laituri_core::{DeliveryReceipt, PluginError, RawMessage};
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message as _, Offset, TopicPartitionList};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Metadata round-trip used to verify the connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a consume error before polling again
const RECEIVE_BACKOFF: Duration = Duration::from_millis(500);

/// Kafka messaging service
pub struct KafkaService {
    broker: BrokerConfig,
    connected: AtomicBool,
}

impl KafkaService {
    /// Create a service for the given broker; nothing is contacted yet
    ///
    /// # Errors
    /// `ReceiverError::Config` when required broker settings are missing.
    pub fn new(broker: BrokerConfig) -> Result<Self, ReceiverError> {
        broker.validate()?;
        Ok(Self {
            broker,
            connected: AtomicBool::new(false),
        })
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.broker.endpoint())
            .set("group.id", &self.broker.vpn)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("sasl.mechanism", "PLAIN")
            .set("sasl.username", &self.broker.username)
            .set("sasl.password", &self.broker.password);

        if self.broker.tls {
            config
                .set("security.protocol", "SASL_SSL")
                .set("ssl.ca.location", self.broker.trust_store.display().to_string());
        } else {
            config.set("security.protocol", "SASL_PLAINTEXT");
        }
        config
    }
}

#[async_trait]
impl MessagingService for KafkaService {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn connect(&self) -> Result<(), PluginError> {
        let probe: BaseConsumer = self
            .client_config()
            .create()
            .map_err(|e| PluginError::Connection(format!("failed to create Kafka client: {e}")))?;

        // metadata fetch blocks on the network
        let brokers = tokio::task::spawn_blocking(move || {
            probe
                .fetch_metadata(None, CONNECT_TIMEOUT)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| PluginError::Connection(format!("metadata task failed: {e}")))?
        .map_err(|e| PluginError::Connection(format!("failed to reach Kafka: {e}")))?;

        self.connected.store(true, Ordering::SeqCst);
        info!(
            endpoint = %self.broker.endpoint(),
            group = %self.broker.vpn,
            brokers,
            tls = self.broker.tls,
            "Connected to Kafka"
        );
        Ok(())
    }

    async fn create_consumer(
        &self,
        spec: &ConsumerSpec,
    ) -> Result<Arc<dyn QueueConsumer>, PluginError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PluginError::NotReady);
        }

        let consumer: StreamConsumer = self
            .client_config()
            .set("client.id", &spec.client_name)
            .create()
            .map_err(|e| PluginError::Init(format!("failed to create Kafka consumer: {e}")))?;

        Ok(Arc::new(KafkaQueueConsumer {
            consumer: Arc::new(consumer),
            topic: spec.queue.clone(),
            offsets: Arc::new(OffsetTracker::new()),
            stopped: AtomicBool::new(false),
            stop: Notify::new(),
        }))
    }

    async fn disconnect(&self) -> Result<(), PluginError> {
        self.connected.store(false, Ordering::SeqCst);
        debug!(endpoint = %self.broker.endpoint(), "Disconnected from Kafka");
        Ok(())
    }
}

/// Consumer subscribed to one topic
pub struct KafkaQueueConsumer {
    consumer: Arc<StreamConsumer>,
    topic: String,
    offsets: Arc<OffsetTracker>,
    stopped: AtomicBool,
    stop: Notify,
}

#[async_trait]
impl QueueConsumer for KafkaQueueConsumer {
    fn ack_mode(&self) -> AckMode {
        AckMode::Client(Arc::new(KafkaAcknowledger {
            consumer: Arc::clone(&self.consumer),
            topic: self.topic.clone(),
            offsets: Arc::clone(&self.offsets),
        }))
    }

    async fn start(&self) -> Result<(), PluginError> {
        self.consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| PluginError::Init(format!("failed to subscribe to '{}': {e}", self.topic)))?;
        info!(topic = %self.topic, "Subscribed to Kafka topic");
        Ok(())
    }

    async fn receive(&self) -> Option<RawMessage> {
        loop {
            let stopped = self.stop.notified();
            tokio::pin!(stopped);
            stopped.as_mut().enable();

            if self.stopped.load(Ordering::SeqCst) {
                return None;
            }

            tokio::select! {
                biased;

                _ = &mut stopped => return None,

                result = self.consumer.recv() => match result {
                    Ok(msg) => {
                        self.offsets.track(msg.partition(), msg.offset());
                        let receipt = DeliveryReceipt::new(msg.partition(), msg.offset());
                        return Some(match msg.payload() {
                            Some(payload) => RawMessage::new(Bytes::copy_from_slice(payload), receipt),
                            None => RawMessage::empty(receipt),
                        });
                    }
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "Kafka receive failed");
                        tokio::time::sleep(RECEIVE_BACKOFF).await;
                    }
                },
            }
        }
    }

    async fn stop_delivery(&self) -> Result<(), PluginError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
        Ok(())
    }

    async fn terminate(&self, grace: Duration) -> Result<(), PluginError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();

        let consumer = Arc::clone(&self.consumer);
        let flush = tokio::task::spawn_blocking(move || {
            let committed = consumer.commit_consumer_state(CommitMode::Sync);
            consumer.unsubscribe();
            committed
        });

        match tokio::time::timeout(grace, flush).await {
            Ok(Ok(Ok(()))) => Ok(()),
            // nothing consumed yet, nothing to commit
            Ok(Ok(Err(rdkafka::error::KafkaError::ConsumerCommit(
                rdkafka::types::RDKafkaErrorCode::NoOffset,
            )))) => Ok(()),
            Ok(Ok(Err(e))) => Err(PluginError::Shutdown(format!("offset commit failed: {e}"))),
            Ok(Err(e)) => Err(PluginError::Shutdown(format!("commit task failed: {e}"))),
            Err(_) => Err(PluginError::Shutdown(format!(
                "offset commit did not finish within {grace:?}"
            ))),
        }
    }
}

struct KafkaAcknowledger {
    consumer: Arc<StreamConsumer>,
    topic: String,
    offsets: Arc<OffsetTracker>,
}

#[async_trait]
impl Acknowledger for KafkaAcknowledger {
    async fn ack(&self, receipt: DeliveryReceipt) -> Result<(), PluginError> {
        let Some(next) = self.offsets.settle(receipt.partition(), receipt.sequence()) else {
            debug!(
                partition = receipt.partition(),
                offset = receipt.sequence(),
                pending = self.offsets.pending(receipt.partition()),
                "Acknowledged behind an unsettled offset"
            );
            return Ok(());
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, receipt.partition(), Offset::Offset(next))
            .map_err(|e| PluginError::Ack(e.to_string()))?;
        self.consumer
            .store_offsets(&tpl)
            .map_err(|e| PluginError::Ack(e.to_string()))
    }
}
