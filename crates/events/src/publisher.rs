//! Subscriber registry for change events.
//!
//! Each [`Subscription`] owns a bounded `broadcast` buffer. When a client
//! stops reading and its buffer fills, the oldest buffered events are
//! dropped and the subscription next yields [`StreamMessage::Lagged`] with
//! the number lost. Publishing never waits on a subscriber.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::Stream;
use ingestq_core::types::DbId;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::change::{ChangeEvent, StreamMessage};

/// Default per-subscriber buffer capacity.
const DEFAULT_BUFFER: usize = 256;

/// Default idle interval before a heartbeat is sent.
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Events buffered per subscriber before the oldest are dropped.
    pub buffer: usize,
    /// Idle time after which a subscription yields a heartbeat.
    pub heartbeat_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_BUFFER,
            heartbeat_interval: DEFAULT_HEARTBEAT,
        }
    }
}

/// Which jobs a subscriber wants to hear about. Empty means all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter(HashSet<DbId>);

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn jobs(ids: impl IntoIterator<Item = DbId>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if self.0.is_empty() {
            return true;
        }
        event.job_id.is_some_and(|id| self.0.contains(&id))
    }
}

/// Item carried in a subscriber buffer.
#[derive(Debug, Clone)]
enum Delivery {
    Event(Arc<ChangeEvent>),
    Gap,
}

struct Subscriber {
    sender: broadcast::Sender<Delivery>,
    filter: JobFilter,
}

struct Registry {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    config: PublisherConfig,
}

impl Registry {
    /// The map stays consistent even if a holder panicked: every critical
    /// section is a single insert, remove or iteration.
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fan-out hub shared by the listener and every streaming client.
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct ChangePublisher {
    registry: Arc<Registry>,
}

impl ChangePublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Register a subscriber interested in `filter`.
    pub fn subscribe(&self, filter: JobFilter) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = broadcast::channel(self.registry.config.buffer.max(1));
        self.registry.lock().insert(id, Subscriber { sender, filter });
        tracing::debug!(subscriber = id, "Change subscriber registered");

        let heartbeat = self.registry.config.heartbeat_interval;
        Subscription {
            id,
            receiver,
            registry: Arc::clone(&self.registry),
            heartbeat,
            deadline: Instant::now() + heartbeat,
        }
    }

    /// Deliver an event to every matching subscriber. Returns how many
    /// subscribers it was delivered to.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        self.registry.lock().retain(|_, sub| {
            if !sub.filter.matches(&event) {
                return true;
            }
            match sub.sender.send(Delivery::Event(Arc::clone(&event))) {
                Ok(_) => {
                    delivered += 1;
                    true
                }
                // Receiver dropped without unsubscribing.
                Err(_) => false,
            }
        });
        delivered
    }

    /// Tell every subscriber that events may have been lost.
    pub fn publish_gap(&self) {
        let mut subscribers = self.registry.lock();
        subscribers.retain(|_, sub| sub.sender.send(Delivery::Gap).is_ok());
        tracing::warn!(subscribers = subscribers.len(), "Published change-stream gap");
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Drop every subscriber; their streams end.
    pub fn close_all(&self) {
        self.registry.lock().clear();
    }
}

impl Default for ChangePublisher {
    fn default() -> Self {
        Self::new(PublisherConfig::default())
    }
}

/// A registered subscriber. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    receiver: broadcast::Receiver<Delivery>,
    registry: Arc<Registry>,
    heartbeat: Duration,
    deadline: Instant,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next message. Yields a heartbeat after each idle
    /// interval; returns `None` once the publisher dropped this subscriber.
    pub async fn next(&mut self) -> Option<StreamMessage> {
        let message = tokio::select! {
            received = self.receiver.recv() => match received {
                Ok(Delivery::Event(event)) => StreamMessage::Event((*event).clone()),
                Ok(Delivery::Gap) => StreamMessage::Gap,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(subscriber = self.id, missed, "Change subscriber lagged");
                    StreamMessage::Lagged { missed }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            },
            _ = tokio::time::sleep_until(self.deadline) => StreamMessage::Heartbeat,
        };
        self.deadline = Instant::now() + self.heartbeat;
        Some(message)
    }

    /// Convert into a `Stream` of messages.
    pub fn into_stream(self) -> impl Stream<Item = StreamMessage> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|msg| (msg, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
        tracing::debug!(subscriber = self.id, "Change subscriber removed");
    }
}
