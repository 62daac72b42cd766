//! Listener construction scoped to one entity.

use std::sync::Arc;

use binding::{
    ClientEntityHandle, EntityDescriptor, ListenerId, MessagingProvider, ReceiverHandle,
    ServiceBusAccount, ServiceBusOptions,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pump::MessagePump;
use crate::{Listener, ListenerError, TriggeredFunctionExecutor};

/// Builds a [`Listener`] for one entity, account and executor.
pub struct ListenerFactory {
    account: ServiceBusAccount,
    entity: EntityDescriptor,
    executor: Arc<dyn TriggeredFunctionExecutor>,
    options: ServiceBusOptions,
    provider: Arc<dyn MessagingProvider>,
}

impl ListenerFactory {
    pub fn new(
        account: ServiceBusAccount,
        entity: EntityDescriptor,
        executor: Arc<dyn TriggeredFunctionExecutor>,
        options: ServiceBusOptions,
        provider: Arc<dyn MessagingProvider>,
    ) -> Self {
        Self {
            account,
            entity,
            executor,
            options,
            provider,
        }
    }

    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    /// Opens the transport handles and assembles a `Created` listener.
    ///
    /// Handles opened before a failure or cancellation are closed again.
    pub async fn create(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<Arc<Listener>, ListenerError> {
        let entity_path = self.entity.entity_path();
        if cancellation.is_cancelled() {
            return Err(ListenerError::Cancelled { entity_path });
        }

        debug!(entity = %entity_path, connection = %self.account.connection_name, "Opening message receiver");
        let receiver = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                return Err(ListenerError::Cancelled { entity_path });
            }
            created = self.provider.create_message_receiver(&self.entity, &self.account, &self.options) => {
                created.map_err(|source| ListenerError::Transport {
                    entity_path: entity_path.clone(),
                    source,
                })?
            }
        };

        let client_entity = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(ListenerError::Cancelled {
                entity_path: entity_path.clone(),
            }),
            created = self.provider.create_client_entity(&self.entity, &self.account) => {
                created.map_err(|source| ListenerError::Transport {
                    entity_path: entity_path.clone(),
                    source,
                })
            }
        };
        let client_entity = match client_entity {
            Ok(client_entity) => client_entity,
            Err(error) => {
                if let Err(close_error) = receiver.close().await {
                    warn!(entity = %entity_path, error = %close_error, "Failed to close receiver after aborted listener creation");
                }
                return Err(error);
            }
        };

        let id = ListenerId::new_random();
        let pump = MessagePump::new(
            id,
            Arc::clone(&receiver),
            Arc::clone(&self.executor),
            self.options.clone(),
        );
        info!(listener = %id, entity = %entity_path, "Listener created");

        Ok(Arc::new(Listener::new(
            id,
            self.entity.clone(),
            ReceiverHandle::new(receiver),
            ClientEntityHandle::new(client_entity),
            pump,
        )))
    }
}
