//! Listener lifecycle.
//!
//! A [`Listener`] owns the transport handles for one broker entity and the
//! message pump that feeds the executor. It moves through
//! `Created → Starting → Running → Stopping → Stopped`, with `Faulted`
//! reachable from `Starting` and `Running` when the transport fails for good.

use std::sync::{Arc, Mutex, PoisonError};

use binding::{ClientEntityHandle, EntityDescriptor, ListenerId, ReceiverHandle};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pump::MessagePump;
use crate::ListenerError;

/// Lifecycle state of a [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Faulted,
}

impl ListenerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Faulted => "faulted",
        }
    }

    /// Returns `true` once the listener will never receive again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Faulted)
    }
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Moves `state` to `to` if it is currently one of `from`.
///
/// Returns the state it found when the transition is rejected.
pub(crate) fn transition(
    state: &watch::Sender<ListenerState>,
    from: &[ListenerState],
    to: ListenerState,
) -> Result<(), ListenerState> {
    let mut rejected = None;
    state.send_if_modified(|current| {
        if from.contains(current) {
            *current = to;
            true
        } else {
            rejected = Some(*current);
            false
        }
    });
    match rejected {
        Some(current) => Err(current),
        None => Ok(()),
    }
}

/// The long-lived subscription to one broker entity.
pub struct Listener {
    id: ListenerId,
    entity: EntityDescriptor,
    receiver: ReceiverHandle,
    client_entity: ClientEntityHandle,
    state: Arc<watch::Sender<ListenerState>>,
    stop: CancellationToken,
    pump: Mutex<Option<MessagePump>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    pub(crate) fn new(
        id: ListenerId,
        entity: EntityDescriptor,
        receiver: ReceiverHandle,
        client_entity: ClientEntityHandle,
        pump: MessagePump,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Created);
        Self {
            id,
            entity,
            receiver,
            client_entity,
            state: Arc::new(state),
            stop: CancellationToken::new(),
            pump: Mutex::new(Some(pump)),
            task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    pub fn receiver(&self) -> &ReceiverHandle {
        &self.receiver
    }

    pub fn client_entity(&self) -> &ClientEntityHandle {
        &self.client_entity
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Starts the message pump.
    ///
    /// Fails with [`ListenerError::Cancelled`] if `cancellation` has already
    /// fired. The transport handles are closed and the listener is left
    /// `Stopped`.
    pub async fn start(&self, cancellation: &CancellationToken) -> Result<(), ListenerError> {
        self.move_to(&[ListenerState::Created], ListenerState::Starting)?;

        let pump = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(pump) = pump.filter(|_| !cancellation.is_cancelled()) else {
            self.close_handles().await;
            let _ = transition(&self.state, &[ListenerState::Starting], ListenerState::Stopped);
            info!(listener = %self.id, entity = %self.entity, "Listener start cancelled");
            return Err(ListenerError::Cancelled {
                entity_path: self.entity.entity_path(),
            });
        };

        // The pump may fault straight away; it must find the listener running.
        self.move_to(&[ListenerState::Starting], ListenerState::Running)?;
        let handle = tokio::spawn(pump.run(Arc::clone(&self.state), self.stop.clone()));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(listener = %self.id, entity = %self.entity, "Listener running");
        Ok(())
    }

    /// Stops accepting messages, drains in-flight invocations per the drain
    /// policy, and closes the transport handles.
    ///
    /// Stopping a stopped listener is a no-op. A faulted listener stays
    /// `Faulted`.
    pub async fn stop(&self) -> Result<(), ListenerError> {
        let faulted = match transition(
            &self.state,
            &[ListenerState::Created, ListenerState::Running],
            ListenerState::Stopping,
        ) {
            Ok(()) => false,
            Err(ListenerState::Stopped) => return Ok(()),
            Err(ListenerState::Faulted) => true,
            Err(from) => {
                return Err(ListenerError::InvalidState {
                    listener: self.id,
                    from,
                    to: ListenerState::Stopping,
                })
            }
        };

        info!(listener = %self.id, entity = %self.entity, "Stopping listener");
        self.stop.cancel();
        self.pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(listener = %self.id, %error, "Message pump ended abnormally");
            }
        }

        self.close_handles().await;

        if !faulted {
            self.move_to(&[ListenerState::Stopping], ListenerState::Stopped)?;
        }
        info!(listener = %self.id, entity = %self.entity, state = %self.state(), "Listener stopped");
        Ok(())
    }

    /// Requests a stop without waiting for it.
    ///
    /// The pump stops receiving; in-flight invocations still drain. Call
    /// [`Listener::stop`] to wait for completion.
    pub fn cancel(&self) {
        self.stop.cancel();
    }

    async fn close_handles(&self) {
        if let Err(error) = self.receiver.receiver().close().await {
            warn!(listener = %self.id, %error, "Failed to close message receiver");
        }
        if let Err(error) = self.client_entity.client_entity().close().await {
            warn!(listener = %self.id, %error, "Failed to close client entity");
        }
    }

    fn move_to(&self, from: &[ListenerState], to: ListenerState) -> Result<(), ListenerError> {
        transition(&self.state, from, to).map_err(|current| ListenerError::InvalidState {
            listener: self.id,
            from: current,
            to,
        })
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("entity", &self.entity)
            .field("state", &self.state())
            .finish()
    }
}
