#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use binding::{
    ArgumentBinding, EntityDescriptor, ParameterName, QueueName, ServiceBusAccount,
    ServiceBusOptions,
};
use listener::{
    FunctionResult, InMemoryMessagingProvider, TriggerBinding, TriggeredFunctionData,
    TriggeredFunctionExecutor,
};
use tokio_util::sync::CancellationToken;

pub const QUEUE: &str = "orders";

pub fn queue() -> EntityDescriptor {
    EntityDescriptor::queue(QueueName::new(QUEUE).unwrap())
}

/// Options tuned for tests: short receive waits and drain timeouts.
pub fn fast_options() -> ServiceBusOptions {
    let mut options = ServiceBusOptions::default();
    options.message_handler.receive_wait_ms = 50;
    options.drain.timeout_secs = 5;
    options
}

pub fn provider() -> InMemoryMessagingProvider {
    let provider = InMemoryMessagingProvider::new();
    provider.ensure_entity(&queue()).unwrap();
    provider
}

pub fn trigger_binding<A: ArgumentBinding>(
    argument: A,
    provider: &InMemoryMessagingProvider,
    options: ServiceBusOptions,
) -> TriggerBinding<A> {
    TriggerBinding::new(
        ParameterName::new("message").unwrap(),
        argument,
        ServiceBusAccount::default(),
        options,
        Arc::new(provider.clone()),
        queue(),
    )
}

/// Executor that succeeds without looking at its input.
pub struct NoopExecutor;

#[async_trait]
impl TriggeredFunctionExecutor for NoopExecutor {
    async fn try_execute(
        &self,
        _input: TriggeredFunctionData,
        _cancellation: CancellationToken,
    ) -> FunctionResult {
        FunctionResult::Succeeded
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
