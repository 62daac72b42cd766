//! Port traits for the messaging transport.
//!
//! The binding and the listener only ever talk to a broker through these
//! traits. Infrastructure crates supply implementations; the in-memory
//! provider in the `listener` crate is one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    EntityDescriptor, LockToken, Message, ReceiveMode, ServiceBusAccount, ServiceBusOptions,
    TransportError,
};

/// A connection-level client attached to one broker entity.
#[async_trait]
pub trait ClientEntity: Send + Sync {
    /// Unique id of this client, for diagnostics.
    fn client_id(&self) -> &str;

    /// Path of the entity this client is attached to.
    fn entity_path(&self) -> &str;

    /// Returns `true` once [`ClientEntity::close`] has completed.
    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Fetches and settles messages from one broker entity.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Path of the entity this receiver pulls from.
    fn entity_path(&self) -> &str;

    fn receive_mode(&self) -> ReceiveMode;

    /// Receives up to `max_messages`, waiting at most `wait` for the first
    /// one. Returns an empty batch when nothing arrived in time.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Message>, TransportError>;

    /// Removes a locked message from the entity.
    async fn complete(&self, lock_token: &LockToken) -> Result<(), TransportError>;

    /// Releases the lock so the message can be redelivered.
    async fn abandon(&self, lock_token: &LockToken) -> Result<(), TransportError>;

    /// Moves a locked message to the entity's dead-letter sub-queue.
    async fn dead_letter(
        &self,
        lock_token: &LockToken,
        reason: &str,
        description: &str,
    ) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates transport handles for broker entities.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn create_message_receiver(
        &self,
        entity: &EntityDescriptor,
        account: &ServiceBusAccount,
        options: &ServiceBusOptions,
    ) -> Result<Arc<dyn MessageReceiver>, TransportError>;

    async fn create_client_entity(
        &self,
        entity: &EntityDescriptor,
        account: &ServiceBusAccount,
    ) -> Result<Arc<dyn ClientEntity>, TransportError>;
}
