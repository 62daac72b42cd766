//! Argument bindings: message → strongly-typed function parameter.
//!
//! An [`ArgumentBinding`] produces the value handed to the job function and
//! may contribute its own binding data. Contributed fields override the
//! built-in fields of the same name, both in the contract and per dispatch.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::{
    BindingData, BindingDataContract, BindingError, BindingType, BindingValue, FunctionName,
    InvocationId, Message, ParameterKind, ParameterName,
};

/// Ambient context for binding one invocation's values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueBindingContext {
    pub invocation_id: InvocationId,
    pub function_name: Option<FunctionName>,
}

impl ValueBindingContext {
    pub fn new(invocation_id: InvocationId) -> Self {
        Self {
            invocation_id,
            function_name: None,
        }
    }

    pub fn with_function(mut self, function_name: FunctionName) -> Self {
        self.function_name = Some(function_name);
        self
    }
}

/// The bound argument plus the binding data it contributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentData<V> {
    pub value: V,
    pub binding_data: BindingData,
}

impl<V> ArgumentData<V> {
    /// An argument that contributes no binding data.
    pub fn plain(value: V) -> Self {
        Self {
            value,
            binding_data: BindingData::new(),
        }
    }
}

/// Produces a typed function parameter from a message.
#[async_trait]
pub trait ArgumentBinding: Send + Sync {
    type Value: Send + 'static;

    /// Declared kind of the parameter; selects the string converter.
    fn parameter_kind(&self) -> ParameterKind;

    /// Fields this binding contributes to the binding data contract.
    fn binding_data_contract(&self) -> BindingDataContract {
        BindingDataContract::new()
    }

    async fn bind(
        &self,
        parameter: &ParameterName,
        message: &Message,
        context: &ValueBindingContext,
    ) -> Result<ArgumentData<Self::Value>, BindingError>;
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Binds the message itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageArgument;

#[async_trait]
impl ArgumentBinding for MessageArgument {
    type Value = Message;

    fn parameter_kind(&self) -> ParameterKind {
        ParameterKind::Message
    }

    async fn bind(
        &self,
        _parameter: &ParameterName,
        message: &Message,
        _context: &ValueBindingContext,
    ) -> Result<ArgumentData<Message>, BindingError> {
        Ok(ArgumentData::plain(message.clone()))
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// Binds the body decoded as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextArgument;

#[async_trait]
impl ArgumentBinding for TextArgument {
    type Value = String;

    fn parameter_kind(&self) -> ParameterKind {
        ParameterKind::Text
    }

    async fn bind(
        &self,
        parameter: &ParameterName,
        message: &Message,
        _context: &ValueBindingContext,
    ) -> Result<ArgumentData<String>, BindingError> {
        let text = std::str::from_utf8(message.body()).map_err(|e| BindingError::Argument {
            parameter: parameter.clone(),
            reason: format!("body is not valid UTF-8: {e}"),
        })?;
        Ok(ArgumentData::plain(text.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Bytes
// ---------------------------------------------------------------------------

/// Binds the raw body.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesArgument;

#[async_trait]
impl ArgumentBinding for BytesArgument {
    type Value = Vec<u8>;

    fn parameter_kind(&self) -> ParameterKind {
        ParameterKind::Bytes
    }

    async fn bind(
        &self,
        _parameter: &ParameterName,
        message: &Message,
        _context: &ValueBindingContext,
    ) -> Result<ArgumentData<Vec<u8>>, BindingError> {
        Ok(ArgumentData::plain(message.body().to_vec()))
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Binds the body deserialized from JSON into `T`.
///
/// Top-level members named by [`JsonArgument::with_field`] are exposed as
/// binding data. Member lookup ignores case; a member whose JSON value does
/// not fit the declared type is omitted.
pub struct JsonArgument<T = serde_json::Value> {
    fields: BindingDataContract,
    _target: PhantomData<fn() -> T>,
}

impl<T> JsonArgument<T> {
    pub fn new() -> Self {
        Self {
            fields: BindingDataContract::new(),
            _target: PhantomData,
        }
    }

    /// Declares a top-level payload member as binding data.
    pub fn with_field(mut self, name: impl Into<String>, binding_type: BindingType) -> Self {
        self.fields.insert(name, binding_type);
        self
    }

    fn payload_binding_data(&self, payload: &serde_json::Value) -> BindingData {
        let mut data = BindingData::new();
        let Some(object) = payload.as_object() else {
            return data;
        };
        for (name, binding_type) in self.fields.iter() {
            let member = object.get(name).or_else(|| {
                object
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            });
            if let Some(value) = member.and_then(|m| json_to_binding_value(m, *binding_type)) {
                data.insert(name, value);
            }
        }
        data
    }
}

impl<T> Default for JsonArgument<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonArgument<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonArgument")
            .field("fields", &self.fields)
            .field("target", &std::any::type_name::<T>())
            .finish()
    }
}

#[async_trait]
impl<T> ArgumentBinding for JsonArgument<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn parameter_kind(&self) -> ParameterKind {
        ParameterKind::Json
    }

    fn binding_data_contract(&self) -> BindingDataContract {
        self.fields.clone()
    }

    async fn bind(
        &self,
        parameter: &ParameterName,
        message: &Message,
        _context: &ValueBindingContext,
    ) -> Result<ArgumentData<T>, BindingError> {
        let invalid = |reason: String| BindingError::Argument {
            parameter: parameter.clone(),
            reason,
        };

        let payload: serde_json::Value = serde_json::from_slice(message.body())
            .map_err(|e| invalid(format!("body is not valid JSON: {e}")))?;
        let binding_data = self.payload_binding_data(&payload);
        let value = serde_json::from_value(payload).map_err(|e| {
            invalid(format!(
                "body does not match {}: {e}",
                std::any::type_name::<T>()
            ))
        })?;

        Ok(ArgumentData {
            value,
            binding_data,
        })
    }
}

fn json_to_binding_value(value: &serde_json::Value, binding_type: BindingType) -> Option<BindingValue> {
    match binding_type {
        BindingType::Integer => value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(BindingValue::Integer),
        BindingType::Long => value.as_i64().map(BindingValue::Long),
        BindingType::Text => value.as_str().map(|s| BindingValue::Text(s.to_string())),
        BindingType::Timestamp => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| BindingValue::Timestamp(dt.with_timezone(&Utc))),
        BindingType::Properties => value.as_object().map(|object| {
            BindingValue::Properties(
                object
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
        }),
        BindingType::Bytes => value
            .as_str()
            .map(|s| BindingValue::Bytes(s.as_bytes().to_vec())),
        BindingType::Json => Some(BindingValue::Json(value.clone())),
        BindingType::MessageReceiver | BindingType::ClientEntity => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn context() -> ValueBindingContext {
        ValueBindingContext::new(InvocationId::new_random())
    }

    fn parameter() -> ParameterName {
        ParameterName::new("message").unwrap()
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Order {
        id: String,
        quantity: u32,
    }

    #[tokio::test]
    async fn test_text_argument_decodes_utf8() {
        let bound = TextArgument
            .bind(&parameter(), &Message::new("héllo"), &context())
            .await
            .unwrap();
        assert_eq!(bound.value, "héllo");
        assert!(bound.binding_data.is_empty());
    }

    #[tokio::test]
    async fn test_text_argument_rejects_invalid_utf8() {
        let err = TextArgument
            .bind(&parameter(), &Message::new(vec![0xff, 0xfe]), &context())
            .await
            .unwrap_err();
        assert!(matches!(err, BindingError::Argument { .. }));
    }

    #[tokio::test]
    async fn test_json_argument_deserializes_and_exposes_fields() {
        let binding = JsonArgument::<Order>::new()
            .with_field("Id", BindingType::Text)
            .with_field("Quantity", BindingType::Integer)
            .with_field("Missing", BindingType::Text);
        let message = Message::new(r#"{"id":"o-1","quantity":3}"#);

        let bound = binding.bind(&parameter(), &message, &context()).await.unwrap();
        assert_eq!(
            bound.value,
            Order {
                id: "o-1".into(),
                quantity: 3
            }
        );
        assert_eq!(
            bound.binding_data.get("id").and_then(BindingValue::as_text),
            Some("o-1")
        );
        assert_eq!(
            bound.binding_data.get("quantity"),
            Some(&BindingValue::Integer(3))
        );
        assert!(!bound.binding_data.contains_key("Missing"));
    }

    #[tokio::test]
    async fn test_json_argument_rejects_shape_mismatch() {
        let binding = JsonArgument::<Order>::new();
        let err = binding
            .bind(&parameter(), &Message::new(r#"{"id":1}"#), &context())
            .await
            .unwrap_err();
        assert!(matches!(err, BindingError::Argument { .. }));
    }

    #[test]
    fn test_json_argument_contract_lists_declared_fields() {
        let binding = JsonArgument::<serde_json::Value>::new().with_field("MessageId", BindingType::Json);
        let contract = binding.binding_data_contract();
        assert_eq!(contract.get("messageid"), Some(&BindingType::Json));
    }
}
