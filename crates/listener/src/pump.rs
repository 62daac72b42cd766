//! The message pump: receive, dispatch, settle, drain.

use std::sync::Arc;
use std::time::Duration;

use binding::{
    DrainPolicy, ListenerId, LockToken, Message, MessageReceiver, RetryPolicy, ServiceBusOptions,
    TriggerValue,
};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::listener::transition;
use crate::{FailureKind, FunctionResult, ListenerState, TriggeredFunctionData, TriggeredFunctionExecutor};

/// Dead-letter reason used when a message can never be bound.
pub const BINDING_FAILED_REASON: &str = "BindingFailed";

const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 30_000;

/// What to do with a message once its invocation finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Complete,
    Abandon,
    DeadLetter { reason: String, description: String },
    /// Leave the message alone: no lock is held, or settling is up to the
    /// function.
    Leave,
}

impl Disposition {
    /// Decides the disposition for an invocation outcome.
    ///
    /// `cancelled` is `true` when the host abandoned the invocation while
    /// draining.
    pub fn for_result(result: &FunctionResult, auto_complete: bool, cancelled: bool) -> Self {
        match result {
            FunctionResult::Succeeded if auto_complete => Self::Complete,
            FunctionResult::Succeeded => Self::Leave,
            FunctionResult::Failed { .. } if cancelled => Self::Abandon,
            FunctionResult::Failed {
                kind: FailureKind::Binding,
                error,
            } => Self::DeadLetter {
                reason: BINDING_FAILED_REASON.to_string(),
                description: error.clone(),
            },
            FunctionResult::Failed {
                kind: FailureKind::Function,
                ..
            } => Self::Abandon,
        }
    }
}

/// Exponential back-off for consecutive transient receive failures.
pub(crate) fn receive_backoff(consecutive_failures: u32) -> Duration {
    let exp = 2u64.saturating_pow(consecutive_failures.saturating_sub(1));
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(exp).min(MAX_BACKOFF_MS))
}

/// Owns everything the background receive loop needs.
pub(crate) struct MessagePump {
    listener: ListenerId,
    receiver: Arc<dyn MessageReceiver>,
    executor: Arc<dyn TriggeredFunctionExecutor>,
    options: ServiceBusOptions,
}

impl MessagePump {
    pub(crate) fn new(
        listener: ListenerId,
        receiver: Arc<dyn MessageReceiver>,
        executor: Arc<dyn TriggeredFunctionExecutor>,
        options: ServiceBusOptions,
    ) -> Self {
        Self {
            listener,
            receiver,
            executor,
            options,
        }
    }

    /// Runs until `stop` fires or the transport fails for good, then drains.
    pub(crate) async fn run(
        self,
        state: Arc<watch::Sender<ListenerState>>,
        stop: CancellationToken,
    ) {
        let slots = Arc::new(Semaphore::new(self.options.max_concurrent_calls()));
        let invocations = CancellationToken::new();
        let mut in_flight = JoinSet::new();
        let mut failures = 0u32;

        info!(
            listener = %self.listener,
            entity = self.receiver.entity_path(),
            max_concurrent_calls = self.options.max_concurrent_calls(),
            prefetch_count = self.options.prefetch_count,
            "Message pump started"
        );

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(error) = joined {
                    error!(listener = %self.listener, %error, "Dispatch task panicked");
                }
            }

            let first = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let batch_size = self.options.receive_batch_size(slots.available_permits() + 1);
            let received = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                received = self.receiver.receive(batch_size, self.options.receive_wait()) => received,
            };

            match received {
                Ok(messages) => {
                    failures = 0;
                    let mut first = Some(first);
                    for message in messages {
                        let permit = match first.take() {
                            Some(permit) => permit,
                            None => match Arc::clone(&slots).try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    self.release_unscheduled(&message).await;
                                    continue;
                                }
                            },
                        };
                        in_flight.spawn(dispatch(
                            self.listener,
                            Arc::clone(&self.receiver),
                            Arc::clone(&self.executor),
                            message,
                            self.options.message_handler.auto_complete,
                            invocations.child_token(),
                            permit,
                        ));
                    }
                }
                Err(error) => match error.retry_policy() {
                    RetryPolicy::Retryable { after } => {
                        failures = failures.saturating_add(1);
                        let delay = after.unwrap_or_else(|| receive_backoff(failures));
                        warn!(
                            listener = %self.listener,
                            %error,
                            attempt = failures,
                            delay_ms = delay.as_millis() as u64,
                            "Receive failed, backing off"
                        );
                        tokio::select! {
                            biased;
                            _ = stop.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    RetryPolicy::NonRetryable => {
                        error!(listener = %self.listener, %error, "Receive failed permanently, faulting listener");
                        let _ = transition(
                            &state,
                            &[ListenerState::Starting, ListenerState::Running],
                            ListenerState::Faulted,
                        );
                        break;
                    }
                },
            }
        }

        self.drain(in_flight, invocations).await;
        info!(listener = %self.listener, "Message pump stopped");
    }

    async fn drain(&self, mut in_flight: JoinSet<()>, invocations: CancellationToken) {
        if in_flight.is_empty() {
            return;
        }

        let policy = self.options.drain.policy;
        let timeout = self.options.drain_timeout();
        info!(
            listener = %self.listener,
            in_flight = in_flight.len(),
            ?policy,
            "Draining in-flight invocations"
        );

        match policy {
            DrainPolicy::Abandon => invocations.cancel(),
            DrainPolicy::Complete => {
                if tokio::time::timeout(timeout, join_all(&mut in_flight))
                    .await
                    .is_err()
                {
                    warn!(
                        listener = %self.listener,
                        remaining = in_flight.len(),
                        "Drain timed out, cancelling remaining invocations"
                    );
                    invocations.cancel();
                }
            }
        }

        // Invocations are cooperative; give cancelled ones one more timeout
        // window before dropping them. Their locks then lapse on the broker.
        if tokio::time::timeout(timeout, join_all(&mut in_flight))
            .await
            .is_err()
        {
            warn!(
                listener = %self.listener,
                remaining = in_flight.len(),
                "Invocations ignored cancellation, aborting"
            );
            in_flight.abort_all();
            join_all(&mut in_flight).await;
        }
    }

    async fn release_unscheduled(&self, message: &Message) {
        if let Ok(Some(lock_token)) = message.lock_token() {
            settle(self.listener, self.receiver.as_ref(), lock_token, Disposition::Abandon).await;
        }
    }
}

async fn join_all(in_flight: &mut JoinSet<()>) {
    while let Some(joined) = in_flight.join_next().await {
        if let Err(error) = joined {
            if !error.is_cancelled() {
                error!(%error, "Dispatch task panicked");
            }
        }
    }
}

async fn dispatch(
    listener: ListenerId,
    receiver: Arc<dyn MessageReceiver>,
    executor: Arc<dyn TriggeredFunctionExecutor>,
    message: Message,
    auto_complete: bool,
    cancellation: CancellationToken,
    permit: OwnedSemaphorePermit,
) {
    let _permit = permit;
    let lock_token = message.lock_token().ok().flatten().cloned();
    debug!(
        %listener,
        message_id = message.message_id().unwrap_or_default(),
        delivery_count = message.delivery_count().ok(),
        "Dispatching message"
    );

    let result = executor
        .try_execute(
            TriggeredFunctionData::new(TriggerValue::Message(message)),
            cancellation.clone(),
        )
        .await;

    let Some(lock_token) = lock_token else {
        return;
    };
    let disposition =
        Disposition::for_result(&result, auto_complete, cancellation.is_cancelled());
    settle(listener, receiver.as_ref(), &lock_token, disposition).await;
}

async fn settle(
    listener: ListenerId,
    receiver: &dyn MessageReceiver,
    lock_token: &LockToken,
    disposition: Disposition,
) {
    let settled = match &disposition {
        Disposition::Complete => receiver.complete(lock_token).await,
        Disposition::Abandon => receiver.abandon(lock_token).await,
        Disposition::DeadLetter {
            reason,
            description,
        } => receiver.dead_letter(lock_token, reason, description).await,
        Disposition::Leave => Ok(()),
    };

    match settled {
        Ok(()) => debug!(%listener, %lock_token, ?disposition, "Message settled"),
        Err(error) => warn!(%listener, %lock_token, ?disposition, %error, "Failed to settle message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(kind: FailureKind) -> FunctionResult {
        FunctionResult::Failed {
            kind,
            error: "boom".into(),
        }
    }

    #[test]
    fn test_success_completes_only_with_auto_complete() {
        assert_eq!(
            Disposition::for_result(&FunctionResult::Succeeded, true, false),
            Disposition::Complete
        );
        assert_eq!(
            Disposition::for_result(&FunctionResult::Succeeded, false, false),
            Disposition::Leave
        );
    }

    #[test]
    fn test_function_failure_abandons() {
        assert_eq!(
            Disposition::for_result(&failed(FailureKind::Function), true, false),
            Disposition::Abandon
        );
    }

    #[test]
    fn test_binding_failure_dead_letters() {
        assert_eq!(
            Disposition::for_result(&failed(FailureKind::Binding), true, false),
            Disposition::DeadLetter {
                reason: BINDING_FAILED_REASON.into(),
                description: "boom".into()
            }
        );
    }

    #[test]
    fn test_cancelled_failure_abandons() {
        assert_eq!(
            Disposition::for_result(&failed(FailureKind::Binding), true, true),
            Disposition::Abandon
        );
    }

    #[test]
    fn test_receive_backoff_grows_and_caps() {
        assert_eq!(receive_backoff(1), Duration::from_millis(200));
        assert_eq!(receive_backoff(2), Duration::from_millis(400));
        assert_eq!(receive_backoff(40), Duration::from_millis(MAX_BACKOFF_MS));
    }
}
