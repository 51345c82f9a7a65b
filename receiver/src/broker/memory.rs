//! In-process broker
//!
//! Durable exclusive queues held in memory. Messages survive consumers
//! coming and going: anything delivered but not acknowledged when a consumer
//! terminates goes back to the head of its queue, flagged as redelivered.
//!
//! Used by the integration tests and for embedding the receiver behind an
//! in-process producer. Failure switches (`fail_connect`, `fail_ack`, ...)
//! let tests drive the error paths.

use super::{AckMode, Acknowledger, ConsumerSpec, MessagingService, QueueConsumer};
use async_trait::async_trait;
use bytes::Bytes;
use laituri_core::{DeliveryReceipt, PluginError, RawMessage};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// In-memory message broker
///
/// Cloning is cheap; clones share the same queues.
///
/// # Example
///
/// ```ignore
/// use laituri_receiver::broker::MemoryBroker;
///
/// let broker = MemoryBroker::new();
/// broker.publish("telemetry-queue", payload);
/// let receiver = QueueReceiver::new(Arc::new(broker.clone()), consumer, config);
/// ```
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

#[derive(Default)]
struct BrokerInner {
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    connected: AtomicBool,
    auto_ack: AtomicBool,
    fail_connect: AtomicBool,
    fail_start: AtomicBool,
    fail_ack: AtomicBool,
}

impl BrokerInner {
    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        Arc::clone(
            self.queues
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryQueue::default())),
        )
    }
}

#[derive(Default)]
struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Stored>,
    unacked: BTreeMap<i64, Stored>,
    next_sequence: i64,
    bound: bool,
    delivered: usize,
    acked: usize,
}

#[derive(Clone)]
struct Stored {
    payload: Option<Bytes>,
    redelivered: bool,
}

impl MemoryBroker {
    /// Create a broker whose consumers use client acknowledgment
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch consumers created from now on to auto-acknowledgment
    pub fn with_auto_ack(self) -> Self {
        self.inner.auto_ack.store(true, Ordering::SeqCst);
        self
    }

    /// Enqueue a message
    pub fn publish(&self, queue: &str, payload: impl Into<Bytes>) {
        self.enqueue(queue, Some(payload.into()));
    }

    /// Enqueue a message that has no payload
    pub fn publish_empty(&self, queue: &str) {
        self.enqueue(queue, None);
    }

    fn enqueue(&self, queue: &str, payload: Option<Bytes>) {
        let q = self.inner.queue(queue);
        q.state.lock().ready.push_back(Stored {
            payload,
            redelivered: false,
        });
        q.notify.notify_waiters();
    }

    /// Messages waiting to be delivered
    pub fn ready(&self, queue: &str) -> usize {
        self.inner.queue(queue).state.lock().ready.len()
    }

    /// Messages delivered but not yet acknowledged
    pub fn unacked(&self, queue: &str) -> usize {
        self.inner.queue(queue).state.lock().unacked.len()
    }

    /// Messages acknowledged so far (including auto-acknowledged)
    pub fn acked(&self, queue: &str) -> usize {
        self.inner.queue(queue).state.lock().acked
    }

    /// Deliveries so far, redeliveries included
    pub fn delivered(&self, queue: &str) -> usize {
        self.inner.queue(queue).state.lock().delivered
    }

    /// Whether a consumer is currently bound to the queue
    pub fn is_bound(&self, queue: &str) -> bool {
        self.inner.queue(queue).state.lock().bound
    }

    /// Whether the service is connected
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Make `connect` fail
    pub fn fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make `QueueConsumer::start` fail
    pub fn fail_start(&self, fail: bool) {
        self.inner.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make acknowledgments fail
    pub fn fail_ack(&self, fail: bool) {
        self.inner.fail_ack.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessagingService for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<(), PluginError> {
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(PluginError::Connection("broker unreachable".into()));
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_consumer(
        &self,
        spec: &ConsumerSpec,
    ) -> Result<Arc<dyn QueueConsumer>, PluginError> {
        if !self.is_connected() {
            return Err(PluginError::NotReady);
        }

        let queue = self.inner.queue(&spec.queue);
        {
            let mut state = queue.state.lock();
            if spec.exclusive && state.bound {
                return Err(PluginError::Init(format!(
                    "queue '{}' already has an exclusive consumer",
                    spec.queue
                )));
            }
            state.bound = true;
        }

        debug!(queue = %spec.queue, client = %spec.client_name, "Bound memory consumer");

        Ok(Arc::new(MemoryConsumer {
            broker: Arc::clone(&self.inner),
            queue,
            auto_ack: self.inner.auto_ack.load(Ordering::SeqCst),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }))
    }

    async fn disconnect(&self) -> Result<(), PluginError> {
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Consumer bound to a [`MemoryBroker`] queue
pub struct MemoryConsumer {
    broker: Arc<BrokerInner>,
    queue: Arc<MemoryQueue>,
    auto_ack: bool,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl MemoryConsumer {
    fn try_take(&self) -> Option<RawMessage> {
        let mut state = self.queue.state.lock();
        let stored = state.ready.pop_front()?;

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.delivered += 1;
        if self.auto_ack {
            state.acked += 1;
        } else {
            state.unacked.insert(sequence, stored.clone());
        }

        let receipt = DeliveryReceipt::new(0, sequence);
        let msg = match stored.payload {
            Some(payload) => RawMessage::new(payload, receipt),
            None => RawMessage::empty(receipt),
        };
        Some(msg.redelivered(stored.redelivered))
    }
}

#[async_trait]
impl QueueConsumer for MemoryConsumer {
    fn ack_mode(&self) -> AckMode {
        if self.auto_ack {
            AckMode::Auto
        } else {
            AckMode::Client(Arc::new(MemoryAcknowledger {
                broker: Arc::clone(&self.broker),
                queue: Arc::clone(&self.queue),
            }))
        }
    }

    async fn start(&self) -> Result<(), PluginError> {
        if self.broker.fail_start.load(Ordering::SeqCst) {
            return Err(PluginError::Init("consumer refused to start".into()));
        }
        self.started.store(true, Ordering::SeqCst);
        self.queue.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self) -> Option<RawMessage> {
        loop {
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            // register before checking so a publish in between is not missed
            notified.as_mut().enable();

            if self.stopped.load(Ordering::SeqCst) {
                return None;
            }
            if self.started.load(Ordering::SeqCst) {
                if let Some(msg) = self.try_take() {
                    return Some(msg);
                }
            }

            notified.await;
        }
    }

    async fn stop_delivery(&self) -> Result<(), PluginError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.queue.notify.notify_waiters();
        Ok(())
    }

    async fn terminate(&self, _grace: Duration) -> Result<(), PluginError> {
        self.stopped.store(true, Ordering::SeqCst);

        let mut state = self.queue.state.lock();
        let unacked = std::mem::take(&mut state.unacked);
        // oldest first at the head of the queue
        for (_, mut stored) in unacked.into_iter().rev() {
            stored.redelivered = true;
            state.ready.push_front(stored);
        }
        state.bound = false;
        drop(state);

        self.queue.notify.notify_waiters();
        Ok(())
    }
}

struct MemoryAcknowledger {
    broker: Arc<BrokerInner>,
    queue: Arc<MemoryQueue>,
}

#[async_trait]
impl Acknowledger for MemoryAcknowledger {
    async fn ack(&self, receipt: DeliveryReceipt) -> Result<(), PluginError> {
        if self.broker.fail_ack.load(Ordering::SeqCst) {
            return Err(PluginError::Ack("session closed".into()));
        }

        let mut state = self.queue.state.lock();
        if state.unacked.remove(&receipt.sequence()).is_none() {
            return Err(PluginError::Ack(format!("unknown delivery {receipt}")));
        }
        state.acked += 1;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const QUEUE: &str = "telemetry-queue";

    async fn bound(broker: &MemoryBroker) -> Arc<dyn QueueConsumer> {
        broker.connect().await.unwrap();
        let consumer = broker
            .create_consumer(&ConsumerSpec::durable_exclusive(QUEUE, "test"))
            .await
            .unwrap();
        consumer.start().await.unwrap();
        consumer
    }

    #[tokio::test]
    async fn test_create_consumer_requires_connection() {
        let broker = MemoryBroker::new();
        let result = broker
            .create_consumer(&ConsumerSpec::durable_exclusive(QUEUE, "test"))
            .await;
        assert!(matches!(result, Err(PluginError::NotReady)));
    }

    #[tokio::test]
    async fn test_connect_failure_switch() {
        let broker = MemoryBroker::new();
        broker.fail_connect(true);
        assert!(broker.connect().await.is_err());
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_exclusive_binding() {
        let broker = MemoryBroker::new();
        let first = bound(&broker).await;
        let second = broker
            .create_consumer(&ConsumerSpec::durable_exclusive(QUEUE, "other"))
            .await;
        assert!(matches!(second, Err(PluginError::Init(_))));

        first.terminate(Duration::ZERO).await.unwrap();
        assert!(!broker.is_bound(QUEUE));
    }

    #[tokio::test]
    async fn test_messages_published_before_start_are_kept() {
        let broker = MemoryBroker::new();
        broker.publish(QUEUE, &b"first"[..]);
        broker.publish(QUEUE, &b"second"[..]);

        let consumer = bound(&broker).await;
        let a = consumer.receive().await.unwrap();
        let b = consumer.receive().await.unwrap();
        assert_eq!(a.payload_as_str(), Some("first"));
        assert_eq!(b.payload_as_str(), Some("second"));
        assert_eq!(broker.unacked(QUEUE), 2);
    }

    #[tokio::test]
    async fn test_receive_waits_for_publish() {
        let broker = MemoryBroker::new();
        let consumer = bound(&broker).await;

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(QUEUE, &b"late"[..]);
        });

        let msg = tokio::time::timeout(Duration::from_secs(2), consumer.receive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload_as_str(), Some("late"));
    }

    #[tokio::test]
    async fn test_stop_delivery_releases_receivers() {
        let broker = MemoryBroker::new();
        let consumer = bound(&broker).await;

        let waiting = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        consumer.stop_delivery().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_ack_settles_message() {
        let broker = MemoryBroker::new();
        broker.publish(QUEUE, &b"payload"[..]);
        let consumer = bound(&broker).await;

        let AckMode::Client(acker) = consumer.ack_mode() else {
            panic!("memory consumers default to client acknowledgment");
        };
        let msg = consumer.receive().await.unwrap();
        acker.ack(msg.into_receipt()).await.unwrap();

        assert_eq!(broker.acked(QUEUE), 1);
        assert_eq!(broker.unacked(QUEUE), 0);
    }

    #[tokio::test]
    async fn test_ack_failure_switch() {
        let broker = MemoryBroker::new();
        broker.publish(QUEUE, &b"payload"[..]);
        broker.fail_ack(true);
        let consumer = bound(&broker).await;

        let AckMode::Client(acker) = consumer.ack_mode() else {
            panic!("expected client acknowledgment");
        };
        let msg = consumer.receive().await.unwrap();
        assert!(matches!(
            acker.ack(msg.into_receipt()).await,
            Err(PluginError::Ack(_))
        ));
        assert_eq!(broker.unacked(QUEUE), 1);
    }

    #[tokio::test]
    async fn test_terminate_requeues_unacked_as_redelivered() {
        let broker = MemoryBroker::new();
        broker.publish(QUEUE, &b"one"[..]);
        broker.publish(QUEUE, &b"two"[..]);
        broker.publish(QUEUE, &b"three"[..]);

        let consumer = bound(&broker).await;
        let _one = consumer.receive().await.unwrap();
        let _two = consumer.receive().await.unwrap();
        consumer.terminate(Duration::ZERO).await.unwrap();
        assert_eq!(broker.ready(QUEUE), 3);

        let consumer = bound(&broker).await;
        let again = consumer.receive().await.unwrap();
        assert_eq!(again.payload_as_str(), Some("one"));
        assert!(again.is_redelivered());
        let _two = consumer.receive().await.unwrap();
        let three = consumer.receive().await.unwrap();
        assert_eq!(three.payload_as_str(), Some("three"));
        assert!(!three.is_redelivered());
        assert_eq!(broker.delivered(QUEUE), 5);
    }

    #[tokio::test]
    async fn test_auto_ack_settles_on_delivery() {
        let broker = MemoryBroker::new().with_auto_ack();
        broker.publish(QUEUE, &b"payload"[..]);
        let consumer = bound(&broker).await;

        assert!(!consumer.ack_mode().is_client());
        consumer.receive().await.unwrap();
        assert_eq!(broker.acked(QUEUE), 1);
        assert_eq!(broker.unacked(QUEUE), 0);
    }

    #[tokio::test]
    async fn test_empty_message() {
        let broker = MemoryBroker::new();
        broker.publish_empty(QUEUE);
        let consumer = bound(&broker).await;
        assert!(consumer.receive().await.unwrap().payload_as_bytes().is_none());
    }
}
