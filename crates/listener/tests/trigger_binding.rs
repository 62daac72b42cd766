mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use binding::builtin::{
    CLIENT_ENTITY, CONTENT_TYPE, DELIVERY_COUNT, LOCK_TOKEN, MESSAGE_RECEIVER, USER_PROPERTIES,
};
use binding::{
    BindingError, BindingType, BindingValue, InvocationId, JsonArgument, Message,
    MessageArgument, SystemProperties, TextArgument, TriggerValue, ValueBindingContext,
};
use chrono::Utc;
use common::{fast_options, provider, trigger_binding, NoopExecutor};
use listener::{ListenerError, ListenerFactoryContext};
use tokio_util::sync::CancellationToken;

fn context() -> ValueBindingContext {
    ValueBindingContext::new(InvocationId::new_random())
}

fn received_message() -> Message {
    Message::new("payload")
        .with_user_property("env", "prod")
        .received(SystemProperties {
            sequence_number: 7,
            enqueued_time_utc: Utc::now(),
            delivery_count: 3,
            lock_token: None,
            locked_until_utc: None,
            dead_letter_source: None,
        })
}

#[tokio::test]
async fn test_bind_without_listener_omits_handles() {
    let provider = provider();
    let binding = trigger_binding(MessageArgument, &provider, fast_options());
    let message = received_message();

    let bound = binding
        .bind(TriggerValue::Message(message.clone()), &context())
        .await
        .unwrap();

    let data = &bound.binding_data;
    assert_eq!(data.get(DELIVERY_COUNT), Some(&BindingValue::Integer(3)));
    assert_eq!(data.get("deliverycount"), Some(&BindingValue::Integer(3)));
    assert_eq!(
        data.get(USER_PROPERTIES),
        Some(&BindingValue::Properties(BTreeMap::from([(
            "env".to_string(),
            serde_json::json!("prod")
        )])))
    );
    assert!(!data.contains_key(LOCK_TOKEN));
    assert!(!data.contains_key(MESSAGE_RECEIVER));
    assert!(!data.contains_key(CLIENT_ENTITY));
    assert_eq!(bound.value, message);
}

#[tokio::test]
async fn test_bind_after_listener_created_includes_handles() {
    let provider = provider();
    let binding = trigger_binding(MessageArgument, &provider, fast_options());
    let listener = binding
        .create_listener(ListenerFactoryContext::new(
            Arc::new(NoopExecutor),
            CancellationToken::new(),
        ))
        .await
        .unwrap();

    let bound = binding
        .bind(TriggerValue::Message(received_message()), &context())
        .await
        .unwrap();

    assert_eq!(
        bound.binding_data.get(MESSAGE_RECEIVER),
        Some(&BindingValue::MessageReceiver(listener.receiver().clone()))
    );
    assert_eq!(
        bound.binding_data.get(CLIENT_ENTITY),
        Some(&BindingValue::ClientEntity(listener.client_entity().clone()))
    );

    listener.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_create_listener_publishes_nothing() {
    let provider = provider();
    let binding = trigger_binding(MessageArgument, &provider, fast_options());
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let result = binding
        .create_listener(ListenerFactoryContext::new(Arc::new(NoopExecutor), cancellation))
        .await;

    assert!(matches!(result, Err(ListenerError::Cancelled { .. })));
    assert!(binding.active_listener().is_none());
}

#[tokio::test]
async fn test_create_listener_on_missing_entity_fails() {
    let provider = listener::InMemoryMessagingProvider::new();
    let binding = trigger_binding(MessageArgument, &provider, fast_options());

    let result = binding
        .create_listener(ListenerFactoryContext::new(
            Arc::new(NoopExecutor),
            CancellationToken::new(),
        ))
        .await;

    assert!(matches!(result, Err(ListenerError::Transport { .. })));
    assert!(binding.active_listener().is_none());
}

#[tokio::test]
async fn test_later_listener_replaces_earlier() {
    let provider = provider();
    let binding = trigger_binding(MessageArgument, &provider, fast_options());
    let context = || ListenerFactoryContext::new(Arc::new(NoopExecutor), CancellationToken::new());

    let first = binding.create_listener(context()).await.unwrap();
    let second = binding.create_listener(context()).await.unwrap();

    let active = binding.active_listener().unwrap();
    assert_eq!(active.id(), second.id());
    assert_ne!(active.id(), first.id());
}

#[tokio::test]
async fn test_text_trigger_value_binds_to_text_parameter() {
    let provider = provider();
    let binding = trigger_binding(TextArgument, &provider, fast_options());

    let bound = binding
        .bind(TriggerValue::from("hello"), &context())
        .await
        .unwrap();

    assert_eq!(bound.value, "hello");
    assert_eq!(
        bound.binding_data.get(CONTENT_TYPE),
        Some(&BindingValue::Text("text/plain".into()))
    );
    // Never received, so broker-assigned fields are absent.
    assert!(!bound.binding_data.contains_key(DELIVERY_COUNT));
}

#[tokio::test]
async fn test_bytes_trigger_value_fails_conversion() {
    let provider = provider();
    let binding = trigger_binding(MessageArgument, &provider, fast_options());

    let error = binding
        .bind(TriggerValue::Bytes(vec![1, 2, 3]), &context())
        .await
        .unwrap_err();

    assert!(matches!(error, BindingError::Conversion { .. }));
}

#[tokio::test]
async fn test_json_fields_override_built_ins() {
    let provider = provider();
    let argument = JsonArgument::<serde_json::Value>::new()
        .with_field("MessageId", BindingType::Text)
        .with_field("Region", BindingType::Text);
    let binding = trigger_binding(argument, &provider, fast_options());

    assert_eq!(binding.binding_data_contract().len(), 16);
    assert_eq!(
        binding.binding_data_contract().get("region"),
        Some(&BindingType::Text)
    );

    let message = Message::new(r#"{"messageId":"from-body","region":"eu"}"#)
        .with_message_id("from-broker");
    let bound = binding
        .bind(TriggerValue::Message(message), &context())
        .await
        .unwrap();

    assert_eq!(
        bound.binding_data.get("MessageId"),
        Some(&BindingValue::Text("from-body".into()))
    );
    assert_eq!(
        bound.binding_data.get("Region"),
        Some(&BindingValue::Text("eu".into()))
    );
}

#[tokio::test]
async fn test_describe_serializes_for_tooling() {
    let provider = provider();
    let binding = trigger_binding(MessageArgument, &provider, fast_options());

    let descriptor = serde_json::to_value(binding.describe()).unwrap();

    assert_eq!(
        descriptor,
        serde_json::json!({
            "Name": "message",
            "QueueName": "orders",
            "TopicName": null,
            "SubscriptionName": null,
            "DisplayHints": {
                "Description": "dequeue from 'orders'",
                "Prompt": "Enter the queue message body",
                "DefaultValue": null
            }
        })
    );
}
