//! In-memory messaging provider.
//!
//! A single-process broker for local runs and tests. It models the parts of
//! Service Bus the listener depends on:
//!
//! - queues, and topics that fan out to their subscriptions;
//! - peek-lock receive with per-receiver lock tokens and lock expiry;
//! - delivery counting, sequence numbers and enqueue timestamps;
//! - abandon with redelivery, dead-lettering after `max_delivery_count`;
//! - dead-letter sub-queues (`<entity>/$DeadLetterQueue`) with the source
//!   entity stamped on each message;
//! - receive-and-delete mode, where no lock token is issued.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use binding::entity::{format_dead_letter_path, DEAD_LETTER_QUEUE_SUFFIX};
use binding::{
    ClientEntity, EntityDescriptor, LockToken, Message, MessageReceiver, MessagingProvider,
    QueueName, ReceiveMode, ServiceBusAccount, ServiceBusOptions, SubscriptionName,
    SystemProperties, TopicName, TransportError,
};
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Delivery attempts before a message is dead-lettered.
pub const DEFAULT_MAX_DELIVERY_COUNT: i32 = 10;
/// How long a peek-lock is held before the message becomes available again.
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(30);

/// User property carrying the dead-letter reason.
pub const DEAD_LETTER_REASON_PROPERTY: &str = "DeadLetterReason";
/// User property carrying the dead-letter description.
pub const DEAD_LETTER_DESCRIPTION_PROPERTY: &str = "DeadLetterErrorDescription";
/// Reason stamped on messages that ran out of delivery attempts.
pub const MAX_DELIVERY_COUNT_EXCEEDED: &str = "MaxDeliveryCountExceeded";

// ---------------------------------------------------------------------------
// Broker state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    sequence_number: i64,
    enqueued_time_utc: DateTime<Utc>,
    delivery_count: i32,
    dead_letter_source: Option<String>,
}

impl StoredMessage {
    fn deliver(&self, lock_token: Option<LockToken>, locked_until_utc: Option<DateTime<Utc>>) -> Message {
        self.message.clone().received(SystemProperties {
            sequence_number: self.sequence_number,
            enqueued_time_utc: self.enqueued_time_utc,
            delivery_count: self.delivery_count,
            lock_token,
            locked_until_utc,
            dead_letter_source: self.dead_letter_source.clone(),
        })
    }
}

#[derive(Debug)]
struct LockedMessage {
    stored: StoredMessage,
    receiver: u64,
    locked_until_utc: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct EntityState {
    /// Available messages keyed by sequence number, so redelivered messages
    /// keep their original position.
    available: BTreeMap<i64, StoredMessage>,
    locked: HashMap<String, LockedMessage>,
    next_sequence: i64,
    notify: Arc<Notify>,
}

impl EntityState {
    fn enqueue(&mut self, message: Message) -> i64 {
        self.next_sequence += 1;
        let sequence_number = self.next_sequence;
        self.available.insert(
            sequence_number,
            StoredMessage {
                message,
                sequence_number,
                enqueued_time_utc: Utc::now(),
                delivery_count: 0,
                dead_letter_source: None,
            },
        );
        self.notify.notify_waiters();
        sequence_number
    }

    /// Makes messages with lapsed locks available again.
    ///
    /// Messages that already reached `delivery_limit` are handed back instead.
    fn release_expired_locks(
        &mut self,
        now: DateTime<Utc>,
        delivery_limit: Option<i32>,
    ) -> Vec<StoredMessage> {
        let expired: Vec<String> = self
            .locked
            .iter()
            .filter(|(_, locked)| locked.locked_until_utc <= now)
            .map(|(token, _)| token.clone())
            .collect();
        let mut exhausted = Vec::new();
        for token in expired {
            if let Some(locked) = self.locked.remove(&token) {
                if delivery_limit.is_some_and(|limit| locked.stored.delivery_count >= limit) {
                    exhausted.push(locked.stored);
                } else {
                    self.available
                        .insert(locked.stored.sequence_number, locked.stored);
                }
            }
        }
        exhausted
    }

    fn release_receiver_locks(&mut self, receiver: u64) {
        let held: Vec<String> = self
            .locked
            .iter()
            .filter(|(_, locked)| locked.receiver == receiver)
            .map(|(token, _)| token.clone())
            .collect();
        for token in held {
            if let Some(locked) = self.locked.remove(&token) {
                self.available
                    .insert(locked.stored.sequence_number, locked.stored);
            }
        }
        if !self.available.is_empty() {
            self.notify.notify_waiters();
        }
    }

    fn take_lock(&mut self, lock_token: &LockToken, receiver: u64) -> Result<StoredMessage, TransportError> {
        match self.locked.get(lock_token.as_str()) {
            Some(locked) if locked.receiver == receiver && locked.locked_until_utc > Utc::now() => {}
            _ => {
                return Err(TransportError::LockLost {
                    lock_token: lock_token.to_string(),
                })
            }
        }
        self.locked
            .remove(lock_token.as_str())
            .map(|locked| locked.stored)
            .ok_or_else(|| TransportError::LockLost {
                lock_token: lock_token.to_string(),
            })
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    entities: HashMap<String, EntityState>,
    /// Topic name → entity paths of its subscriptions.
    topics: HashMap<String, Vec<String>>,
}

impl BrokerState {
    fn entity_mut(&mut self, path: &str) -> Result<&mut EntityState, TransportError> {
        self.entities
            .get_mut(path)
            .ok_or_else(|| TransportError::EntityNotFound {
                entity_path: path.to_string(),
            })
    }

    fn ensure_entity(&mut self, path: String) {
        let dead_letter = format_dead_letter_path(&path);
        self.entities.entry(path).or_default();
        self.entities.entry(dead_letter).or_default();
    }

    fn dead_letter(
        &mut self,
        source_path: &str,
        mut stored: StoredMessage,
        reason: &str,
        description: &str,
    ) -> Result<(), TransportError> {
        stored.message = stored
            .message
            .with_user_property(DEAD_LETTER_REASON_PROPERTY, reason)
            .with_user_property(DEAD_LETTER_DESCRIPTION_PROPERTY, description);
        stored.dead_letter_source = Some(source_path.to_string());

        let dead_letter_path = format_dead_letter_path(source_path);
        let target = self.entity_mut(&dead_letter_path)?;
        target.available.insert(stored.sequence_number, stored);
        target.notify.notify_waiters();
        Ok(())
    }

    fn dead_letter_exhausted(
        &mut self,
        source_path: &str,
        stored: StoredMessage,
        max_delivery_count: i32,
    ) -> Result<(), TransportError> {
        warn!(
            entity = %source_path,
            sequence_number = stored.sequence_number,
            delivery_count = stored.delivery_count,
            "Max delivery count exceeded, dead-lettering"
        );
        let description =
            format!("Message could not be consumed after {max_delivery_count} delivery attempts.");
        self.dead_letter(source_path, stored, MAX_DELIVERY_COUNT_EXCEEDED, &description)
    }
}

struct Broker {
    state: Mutex<BrokerState>,
    max_delivery_count: i32,
    lock_duration: chrono::Duration,
    next_receiver: AtomicU64,
}

impl Broker {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivery attempts allowed on `entity_path`; dead-letter queues have no limit.
    fn delivery_limit(&self, entity_path: &str) -> Option<i32> {
        (!entity_path.ends_with(DEAD_LETTER_QUEUE_SUFFIX)).then_some(self.max_delivery_count)
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// A [`MessagingProvider`] backed by process memory.
///
/// Clones share the same broker.
#[derive(Clone)]
pub struct InMemoryMessagingProvider {
    broker: Arc<Broker>,
}

impl InMemoryMessagingProvider {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_MAX_DELIVERY_COUNT, DEFAULT_LOCK_DURATION)
    }

    /// Creates a broker with custom dead-lettering and lock settings.
    pub fn with_settings(max_delivery_count: i32, lock_duration: Duration) -> Self {
        let lock_duration = chrono::Duration::from_std(lock_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        Self {
            broker: Arc::new(Broker {
                state: Mutex::new(BrokerState::default()),
                max_delivery_count: max_delivery_count.max(1),
                lock_duration,
                next_receiver: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a queue (and its dead-letter queue). Idempotent.
    pub fn create_queue(&self, queue: &QueueName) {
        self.broker.lock().ensure_entity(queue.as_str().to_string());
        info!(queue = %queue, "Queue created");
    }

    /// Creates a topic. Idempotent.
    pub fn create_topic(&self, topic: &TopicName) {
        self.broker
            .lock()
            .topics
            .entry(topic.as_str().to_string())
            .or_default();
        info!(topic = %topic, "Topic created");
    }

    /// Creates a subscription on an existing topic. Idempotent.
    pub fn create_subscription(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
    ) -> Result<(), TransportError> {
        let path = EntityDescriptor::subscription(topic.clone(), subscription.clone()).entity_path();
        let mut state = self.broker.lock();
        let subscriptions =
            state
                .topics
                .get_mut(topic.as_str())
                .ok_or_else(|| TransportError::EntityNotFound {
                    entity_path: topic.to_string(),
                })?;
        if !subscriptions.contains(&path) {
            subscriptions.push(path.clone());
        }
        state.ensure_entity(path);
        info!(topic = %topic, subscription = %subscription, "Subscription created");
        Ok(())
    }

    /// Creates whatever `entity` needs to exist: a queue, or a topic plus
    /// subscription.
    pub fn ensure_entity(&self, entity: &EntityDescriptor) -> Result<(), TransportError> {
        match entity {
            EntityDescriptor::Queue { queue } => {
                self.create_queue(queue);
                Ok(())
            }
            EntityDescriptor::Subscription {
                topic,
                subscription,
            } => {
                self.create_topic(topic);
                self.create_subscription(topic, subscription)
            }
        }
    }

    /// Sends a message to a queue or topic.
    ///
    /// Sending to a topic copies the message into every subscription. Returns
    /// the number of entities the message landed in.
    pub fn send(&self, path: &str, message: Message) -> Result<usize, TransportError> {
        let mut state = self.broker.lock();
        let targets = match state.topics.get(path) {
            Some(subscriptions) => subscriptions.clone(),
            None => vec![path.to_string()],
        };

        for target in &targets {
            let sequence_number = state.entity_mut(target)?.enqueue(message.clone());
            debug!(entity = %target, sequence_number, "Message enqueued");
        }
        Ok(targets.len())
    }

    /// Sends a message to where `entity` receives from: the queue, or the
    /// subscription's topic.
    pub fn send_to(&self, entity: &EntityDescriptor, message: Message) -> Result<usize, TransportError> {
        match entity {
            EntityDescriptor::Queue { queue } => self.send(queue.as_str(), message),
            EntityDescriptor::Subscription { topic, .. } => self.send(topic.as_str(), message),
        }
    }

    /// Messages still in the entity, locked or not.
    pub fn message_count(&self, path: &str) -> Result<usize, TransportError> {
        let mut state = self.broker.lock();
        let entity = state.entity_mut(path)?;
        Ok(entity.available.len() + entity.locked.len())
    }

    /// Messages in the dead-letter sub-queue of `path`.
    pub fn dead_letter_count(&self, path: &str) -> Result<usize, TransportError> {
        self.message_count(&format_dead_letter_path(path))
    }

    /// Returns the available messages in sequence order without locking them.
    pub fn peek(&self, path: &str) -> Result<Vec<Message>, TransportError> {
        let mut state = self.broker.lock();
        let entity = state.entity_mut(path)?;
        Ok(entity
            .available
            .values()
            .map(|stored| stored.deliver(None, None))
            .collect())
    }
}

impl Default for InMemoryMessagingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryMessagingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMessagingProvider")
            .field("max_delivery_count", &self.broker.max_delivery_count)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessagingProvider for InMemoryMessagingProvider {
    async fn create_message_receiver(
        &self,
        entity: &EntityDescriptor,
        account: &ServiceBusAccount,
        options: &ServiceBusOptions,
    ) -> Result<Arc<dyn MessageReceiver>, TransportError> {
        let entity_path = entity.entity_path();
        self.broker.lock().entity_mut(&entity_path)?;

        let id = self.broker.next_receiver.fetch_add(1, Ordering::Relaxed);
        debug!(
            entity = %entity_path,
            connection = %account.connection_name,
            receiver = id,
            mode = ?options.receive_mode,
            "Receiver opened"
        );
        Ok(Arc::new(InMemoryReceiver {
            id,
            entity_path,
            receive_mode: options.receive_mode,
            broker: Arc::clone(&self.broker),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_client_entity(
        &self,
        entity: &EntityDescriptor,
        account: &ServiceBusAccount,
    ) -> Result<Arc<dyn ClientEntity>, TransportError> {
        let entity_path = entity.entity_path();
        self.broker.lock().entity_mut(&entity_path)?;

        let client_id = format!("{}-{}", account.connection_name, Uuid::new_v4());
        debug!(entity = %entity_path, client = %client_id, "Client entity opened");
        Ok(Arc::new(InMemoryClientEntity {
            client_id,
            entity_path,
            closed: AtomicBool::new(false),
        }))
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Outcome of one non-blocking receive attempt.
enum Take {
    Batch(Vec<Message>),
    /// Nothing available; wait on the entity's notifier.
    Empty(Arc<Notify>),
}

/// Receiver attached to one in-memory entity.
pub struct InMemoryReceiver {
    id: u64,
    entity_path: String,
    receive_mode: ReceiveMode,
    broker: Arc<Broker>,
    closed: AtomicBool,
}

impl InMemoryReceiver {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed {
                entity_path: self.entity_path.clone(),
            });
        }
        Ok(())
    }

    fn try_take(&self, max_messages: usize) -> Result<Take, TransportError> {
        self.ensure_open()?;
        let now = Utc::now();
        let delivery_limit = self.broker.delivery_limit(&self.entity_path);
        let mut state = self.broker.lock();
        let exhausted = state
            .entity_mut(&self.entity_path)?
            .release_expired_locks(now, delivery_limit);
        for stored in exhausted {
            state.dead_letter_exhausted(&self.entity_path, stored, self.broker.max_delivery_count)?;
        }
        let entity = state.entity_mut(&self.entity_path)?;

        if entity.available.is_empty() {
            return Ok(Take::Empty(Arc::clone(&entity.notify)));
        }

        let mut batch = Vec::with_capacity(max_messages.min(entity.available.len()));
        while batch.len() < max_messages {
            let Some((_, mut stored)) = entity.available.pop_first() else {
                break;
            };
            stored.delivery_count += 1;

            match self.receive_mode {
                ReceiveMode::ReceiveAndDelete => batch.push(stored.deliver(None, None)),
                ReceiveMode::PeekLock => {
                    let token = Uuid::new_v4().to_string();
                    let locked_until_utc = now + self.broker.lock_duration;
                    let Some(lock_token) = LockToken::new(token.clone()) else {
                        entity.available.insert(stored.sequence_number, stored);
                        break;
                    };
                    batch.push(stored.deliver(Some(lock_token), Some(locked_until_utc)));
                    entity.locked.insert(
                        token,
                        LockedMessage {
                            stored,
                            receiver: self.id,
                            locked_until_utc,
                        },
                    );
                }
            }
        }
        Ok(Take::Batch(batch))
    }

    fn settle<F>(&self, lock_token: &LockToken, settle: F) -> Result<(), TransportError>
    where
        F: FnOnce(&mut BrokerState, StoredMessage) -> Result<(), TransportError>,
    {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        let stored = state
            .entity_mut(&self.entity_path)?
            .take_lock(lock_token, self.id)?;
        settle(&mut *state, stored)
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    fn receive_mode(&self) -> ReceiveMode {
        self.receive_mode
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Message>, TransportError> {
        let max_messages = max_messages.max(1);
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let notify = match self.try_take(max_messages)? {
                Take::Batch(batch) => return Ok(batch),
                Take::Empty(notify) => notify,
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Re-check after registering so a send between the two is not missed.
            if let Take::Batch(batch) = self.try_take(max_messages)? {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn complete(&self, lock_token: &LockToken) -> Result<(), TransportError> {
        self.settle(lock_token, |_, stored| {
            debug!(entity = %self.entity_path, sequence_number = stored.sequence_number, "Message completed");
            Ok(())
        })
    }

    async fn abandon(&self, lock_token: &LockToken) -> Result<(), TransportError> {
        let delivery_limit = self.broker.delivery_limit(&self.entity_path);
        self.settle(lock_token, |state, stored| {
            if delivery_limit.is_some_and(|limit| stored.delivery_count >= limit) {
                return state.dead_letter_exhausted(
                    &self.entity_path,
                    stored,
                    self.broker.max_delivery_count,
                );
            }

            let entity = state.entity_mut(&self.entity_path)?;
            debug!(entity = %self.entity_path, sequence_number = stored.sequence_number, "Message abandoned");
            entity.available.insert(stored.sequence_number, stored);
            entity.notify.notify_waiters();
            Ok(())
        })
    }

    async fn dead_letter(
        &self,
        lock_token: &LockToken,
        reason: &str,
        description: &str,
    ) -> Result<(), TransportError> {
        self.settle(lock_token, |state, stored| {
            info!(
                entity = %self.entity_path,
                sequence_number = stored.sequence_number,
                reason,
                "Message dead-lettered"
            );
            state.dead_letter(&self.entity_path, stored, reason, description)
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.broker.lock();
        if let Ok(entity) = state.entity_mut(&self.entity_path) {
            entity.release_receiver_locks(self.id);
            entity.notify.notify_waiters();
        }
        debug!(entity = %self.entity_path, receiver = self.id, "Receiver closed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Client entity
// ---------------------------------------------------------------------------

/// Client entity attached to one in-memory entity.
#[derive(Debug)]
pub struct InMemoryClientEntity {
    client_id: String,
    entity_path: String,
    closed: AtomicBool,
}

#[async_trait]
impl ClientEntity for InMemoryClientEntity {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
