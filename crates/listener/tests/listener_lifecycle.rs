mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use binding::builtin::MESSAGE_RECEIVER;
use binding::{
    ClientEntity, DrainPolicy, EntityDescriptor, FunctionName, LockToken, Message,
    MessageReceiver, MessagingProvider, ReceiveMode, ServiceBusAccount, ServiceBusOptions,
    TextArgument, TransportError,
};
use common::{eventually, fast_options, provider, queue, trigger_binding, NoopExecutor, QUEUE};
use listener::memory::{DEAD_LETTER_REASON_PROPERTY, MAX_DELIVERY_COUNT_EXCEEDED};
use listener::{
    job_fn, BoundFunction, FunctionError, InMemoryMessagingProvider, Invocation, ListenerError,
    ListenerFactory, ListenerFactoryContext, ListenerState, TriggeredFunctionExecutor,
    BINDING_FAILED_REASON,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn function_name() -> FunctionName {
    FunctionName::new("ProcessOrder").unwrap()
}

// ---------------------------------------------------------------------------
// Dispatch and settlement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_successful_invocation_completes_message() {
    let provider = provider();
    let binding = Arc::new(trigger_binding(TextArgument, &provider, fast_options()));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let job = job_fn(move |invocation: Invocation<String>| {
        let tx = tx.clone();
        async move {
            let has_receiver = invocation.binding_data.contains_key(MESSAGE_RECEIVER);
            let _ = tx.send((invocation.argument, has_receiver));
            Ok::<(), FunctionError>(())
        }
    });
    let executor = Arc::new(BoundFunction::new(function_name(), Arc::clone(&binding), job));

    let cancellation = CancellationToken::new();
    let listener = binding
        .create_listener(ListenerFactoryContext::new(executor, cancellation.clone()))
        .await
        .unwrap();
    listener.start(&cancellation).await.unwrap();
    assert_eq!(listener.state(), ListenerState::Running);

    provider.send(QUEUE, Message::new("order-1")).unwrap();

    let (body, has_receiver) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body, "order-1");
    assert!(has_receiver);

    eventually(|| provider.message_count(QUEUE).unwrap() == 0).await;
    listener.stop().await.unwrap();
    assert_eq!(listener.state(), ListenerState::Stopped);
}

#[tokio::test]
async fn test_failing_function_abandons_until_dead_lettered() {
    let provider = InMemoryMessagingProvider::with_settings(2, Duration::from_secs(30));
    provider.ensure_entity(&queue()).unwrap();
    let binding = Arc::new(trigger_binding(TextArgument, &provider, fast_options()));
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&attempts);
    let job = job_fn(move |_invocation: Invocation<String>| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), FunctionError>("downstream unavailable".into())
        }
    });
    let executor = Arc::new(BoundFunction::new(function_name(), Arc::clone(&binding), job));

    let cancellation = CancellationToken::new();
    let listener = binding
        .create_listener(ListenerFactoryContext::new(executor, cancellation.clone()))
        .await
        .unwrap();
    listener.start(&cancellation).await.unwrap();

    provider.send(QUEUE, Message::new("order-1")).unwrap();

    eventually(|| provider.dead_letter_count(QUEUE).unwrap() == 1).await;
    listener.stop().await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let dead = provider.peek("orders/$DeadLetterQueue").unwrap();
    assert_eq!(
        dead[0].user_properties()[DEAD_LETTER_REASON_PROPERTY],
        serde_json::json!(MAX_DELIVERY_COUNT_EXCEEDED)
    );
}

#[tokio::test]
async fn test_unbindable_message_is_dead_lettered() {
    let provider = provider();
    let binding = Arc::new(trigger_binding(TextArgument, &provider, fast_options()));
    let invoked = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&invoked);
    let job = job_fn(move |_invocation: Invocation<String>| {
        let flag = Arc::clone(&flag);
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<(), FunctionError>(())
        }
    });
    let executor = Arc::new(BoundFunction::new(function_name(), Arc::clone(&binding), job));

    let cancellation = CancellationToken::new();
    let listener = binding
        .create_listener(ListenerFactoryContext::new(executor, cancellation.clone()))
        .await
        .unwrap();
    listener.start(&cancellation).await.unwrap();

    provider.send(QUEUE, Message::new(vec![0xff, 0xfe])).unwrap();

    eventually(|| provider.dead_letter_count(QUEUE).unwrap() == 1).await;
    listener.stop().await.unwrap();

    assert!(!invoked.load(Ordering::SeqCst));
    let dead = provider.peek("orders/$DeadLetterQueue").unwrap();
    assert_eq!(
        dead[0].user_properties()[DEAD_LETTER_REASON_PROPERTY],
        serde_json::json!(BINDING_FAILED_REASON)
    );
    assert_eq!(dead[0].dead_letter_source().unwrap(), Some(QUEUE));
}

#[tokio::test]
async fn test_receive_and_delete_messages_are_not_settled() {
    let provider = provider();
    let mut options = fast_options();
    options.receive_mode = ReceiveMode::ReceiveAndDelete;
    let binding = Arc::new(trigger_binding(TextArgument, &provider, options));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let job = job_fn(move |invocation: Invocation<String>| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(invocation.binding_data.contains_key("LockToken"));
            Err::<(), FunctionError>("ignored".into())
        }
    });
    let executor = Arc::new(BoundFunction::new(function_name(), Arc::clone(&binding), job));

    let cancellation = CancellationToken::new();
    let listener = binding
        .create_listener(ListenerFactoryContext::new(executor, cancellation.clone()))
        .await
        .unwrap();
    listener.start(&cancellation).await.unwrap();
    provider.send(QUEUE, Message::new("once")).unwrap();

    let has_lock_token = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    listener.stop().await.unwrap();

    assert!(!has_lock_token);
    assert_eq!(provider.message_count(QUEUE).unwrap(), 0);
    assert_eq!(provider.dead_letter_count(QUEUE).unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Draining
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_waits_for_in_flight_invocation() {
    let provider = provider();
    let binding = Arc::new(trigger_binding(TextArgument, &provider, fast_options()));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let finished = Arc::new(AtomicBool::new(false));

    let done = Arc::clone(&finished);
    let job = job_fn(move |_invocation: Invocation<String>| {
        let started_tx = started_tx.clone();
        let done = Arc::clone(&done);
        async move {
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_millis(100)).await;
            done.store(true, Ordering::SeqCst);
            Ok::<(), FunctionError>(())
        }
    });
    let executor = Arc::new(BoundFunction::new(function_name(), Arc::clone(&binding), job));

    let cancellation = CancellationToken::new();
    let listener = binding
        .create_listener(ListenerFactoryContext::new(executor, cancellation.clone()))
        .await
        .unwrap();
    listener.start(&cancellation).await.unwrap();
    provider.send(QUEUE, Message::new("slow")).unwrap();

    tokio::time::timeout(Duration::from_secs(5), started_rx.recv())
        .await
        .unwrap()
        .unwrap();
    listener.stop().await.unwrap();

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(provider.message_count(QUEUE).unwrap(), 0);
}

#[tokio::test]
async fn test_abandon_drain_cancels_and_releases_message() {
    let provider = provider();
    let mut options = fast_options();
    options.drain.policy = DrainPolicy::Abandon;
    let binding = Arc::new(trigger_binding(TextArgument, &provider, options));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    let job = job_fn(move |invocation: Invocation<String>| {
        let started_tx = started_tx.clone();
        async move {
            let _ = started_tx.send(());
            invocation.cancellation.cancelled().await;
            Err::<(), FunctionError>("cancelled".into())
        }
    });
    let executor = Arc::new(BoundFunction::new(function_name(), Arc::clone(&binding), job));

    let cancellation = CancellationToken::new();
    let listener = binding
        .create_listener(ListenerFactoryContext::new(executor, cancellation.clone()))
        .await
        .unwrap();
    listener.start(&cancellation).await.unwrap();
    provider.send(QUEUE, Message::new("long-running")).unwrap();

    tokio::time::timeout(Duration::from_secs(5), started_rx.recv())
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), listener.stop())
        .await
        .unwrap()
        .unwrap();

    let remaining = provider.peek(QUEUE).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].delivery_count().unwrap(), 1);
    assert_eq!(provider.dead_letter_count(QUEUE).unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

async fn created_listener(provider: &InMemoryMessagingProvider) -> Arc<listener::Listener> {
    let factory = ListenerFactory::new(
        ServiceBusAccount::default(),
        queue(),
        Arc::new(NoopExecutor),
        fast_options(),
        Arc::new(provider.clone()),
    );
    factory.create(&CancellationToken::new()).await.unwrap()
}

#[tokio::test]
async fn test_stop_before_start_closes_handles() {
    let provider = provider();
    let listener = created_listener(&provider).await;
    assert_eq!(listener.state(), ListenerState::Created);

    listener.stop().await.unwrap();

    assert_eq!(listener.state(), ListenerState::Stopped);
    assert!(listener.client_entity().client_entity().is_closed());
    // Stopping twice is a no-op.
    listener.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let provider = provider();
    let listener = created_listener(&provider).await;
    let cancellation = CancellationToken::new();

    listener.start(&cancellation).await.unwrap();
    let error = listener.start(&cancellation).await.unwrap_err();

    assert!(matches!(
        error,
        ListenerError::InvalidState {
            from: ListenerState::Running,
            to: ListenerState::Starting,
            ..
        }
    ));
    listener.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_with_cancelled_token_stops_listener() {
    let provider = provider();
    let listener = created_listener(&provider).await;
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let error = listener.start(&cancellation).await.unwrap_err();

    assert!(matches!(error, ListenerError::Cancelled { .. }));
    assert_eq!(listener.state(), ListenerState::Stopped);
    assert!(listener.client_entity().client_entity().is_closed());

    listener.stop().await.unwrap();
    assert_eq!(listener.state(), ListenerState::Stopped);
}

// ---------------------------------------------------------------------------
// Transport failures
// ---------------------------------------------------------------------------

/// Receiver that fails a fixed number of times with `failure`, then idles.
struct FailingReceiver {
    failures_left: AtomicUsize,
    calls: Arc<AtomicUsize>,
    failure: fn() -> TransportError,
}

#[async_trait]
impl MessageReceiver for FailingReceiver {
    fn entity_path(&self) -> &str {
        QUEUE
    }

    fn receive_mode(&self) -> ReceiveMode {
        ReceiveMode::PeekLock
    }

    async fn receive(
        &self,
        _max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Message>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err((self.failure)());
        }
        tokio::time::sleep(wait).await;
        Ok(Vec::new())
    }

    async fn complete(&self, _lock_token: &LockToken) -> Result<(), TransportError> {
        Ok(())
    }

    async fn abandon(&self, _lock_token: &LockToken) -> Result<(), TransportError> {
        Ok(())
    }

    async fn dead_letter(
        &self,
        _lock_token: &LockToken,
        _reason: &str,
        _description: &str,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct FailingProvider {
    failures: usize,
    calls: Arc<AtomicUsize>,
    failure: fn() -> TransportError,
    inner: InMemoryMessagingProvider,
}

#[async_trait]
impl MessagingProvider for FailingProvider {
    async fn create_message_receiver(
        &self,
        _entity: &EntityDescriptor,
        _account: &ServiceBusAccount,
        _options: &ServiceBusOptions,
    ) -> Result<Arc<dyn MessageReceiver>, TransportError> {
        Ok(Arc::new(FailingReceiver {
            failures_left: AtomicUsize::new(self.failures),
            calls: Arc::clone(&self.calls),
            failure: self.failure,
        }))
    }

    async fn create_client_entity(
        &self,
        entity: &EntityDescriptor,
        account: &ServiceBusAccount,
    ) -> Result<Arc<dyn ClientEntity>, TransportError> {
        self.inner.create_client_entity(entity, account).await
    }
}

async fn failing_listener(
    failures: usize,
    failure: fn() -> TransportError,
) -> (Arc<listener::Listener>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let provider = FailingProvider {
        failures,
        calls: Arc::clone(&calls),
        failure,
        inner: provider(),
    };
    let executor: Arc<dyn TriggeredFunctionExecutor> = Arc::new(NoopExecutor);
    let factory = ListenerFactory::new(
        ServiceBusAccount::default(),
        queue(),
        executor,
        fast_options(),
        Arc::new(provider),
    );
    let listener = factory.create(&CancellationToken::new()).await.unwrap();
    (listener, calls)
}

#[tokio::test]
async fn test_fatal_receive_error_faults_listener() {
    let (listener, _calls) = failing_listener(usize::MAX, || TransportError::Fatal {
        message: "unauthorized".into(),
    })
    .await;
    let mut state = listener.watch_state();

    listener.start(&CancellationToken::new()).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ListenerState::Faulted),
    )
    .await
    .unwrap()
    .unwrap();

    listener.stop().await.unwrap();
    assert_eq!(listener.state(), ListenerState::Faulted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_succeeds_when_pump_faults_immediately() {
    for _ in 0..20 {
        let (listener, _calls) = failing_listener(usize::MAX, || TransportError::Fatal {
            message: "unauthorized".into(),
        })
        .await;
        let mut state = listener.watch_state();

        listener.start(&CancellationToken::new()).await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ListenerState::Faulted),
        )
        .await
        .unwrap()
        .unwrap();
        listener.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_transient_receive_errors_are_retried() {
    let (listener, calls) = failing_listener(3, || TransportError::Transient {
        message: "server busy".into(),
        retry_after: Some(Duration::from_millis(1)),
    })
    .await;

    listener.start(&CancellationToken::new()).await.unwrap();
    eventually(|| calls.load(Ordering::SeqCst) > 3).await;

    assert_eq!(listener.state(), ListenerState::Running);
    listener.stop().await.unwrap();
    assert_eq!(listener.state(), ListenerState::Stopped);
}
