//! Shared value types for the trigger-binding domain.
//!
//! [`BindingType`] is the schema side of binding data (what a function may ask
//! for by name); [`BindingValue`] is the instance side (what a dispatch
//! actually supplies). [`TriggerValue`] is the raw inbound value before
//! conversion.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::ports::{ClientEntity, MessageReceiver};
use crate::Message;

// ---------------------------------------------------------------------------
// Binding data schema
// ---------------------------------------------------------------------------

/// Semantic type of a binding data field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingType {
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    Long,
    /// UTF-8 text.
    Text,
    /// UTC timestamp.
    Timestamp,
    /// Mapping of text to arbitrary JSON values.
    Properties,
    /// Handle to the live message receiver.
    MessageReceiver,
    /// Handle to the live client entity.
    ClientEntity,
    /// Raw bytes.
    Bytes,
    /// Arbitrary JSON value.
    Json,
}

impl BindingType {
    /// Snake-case name, as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
            Self::Properties => "properties",
            Self::MessageReceiver => "message_receiver",
            Self::ClientEntity => "client_entity",
            Self::Bytes => "bytes",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for BindingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Shared handle to a [`MessageReceiver`], usable as binding data.
///
/// Two handles are equal when they point at the same receiver.
#[derive(Clone)]
pub struct ReceiverHandle(Arc<dyn MessageReceiver>);

impl ReceiverHandle {
    /// Wraps a receiver.
    pub fn new(receiver: Arc<dyn MessageReceiver>) -> Self {
        Self(receiver)
    }

    /// The receiver this handle points at.
    pub fn receiver(&self) -> &Arc<dyn MessageReceiver> {
        &self.0
    }
}

impl std::fmt::Debug for ReceiverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReceiverHandle")
            .field(&self.0.entity_path())
            .finish()
    }
}

impl PartialEq for ReceiverHandle {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

/// Shared handle to a [`ClientEntity`], usable as binding data.
#[derive(Clone)]
pub struct ClientEntityHandle(Arc<dyn ClientEntity>);

impl ClientEntityHandle {
    /// Wraps a client entity.
    pub fn new(entity: Arc<dyn ClientEntity>) -> Self {
        Self(entity)
    }

    /// The client entity this handle points at.
    pub fn client_entity(&self) -> &Arc<dyn ClientEntity> {
        &self.0
    }
}

impl std::fmt::Debug for ClientEntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ClientEntityHandle")
            .field(&self.0.client_id())
            .finish()
    }
}

impl PartialEq for ClientEntityHandle {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

// ---------------------------------------------------------------------------
// Binding data values
// ---------------------------------------------------------------------------

/// Runtime value of a binding data field.
///
/// One variant per [`BindingType`].
#[derive(Debug, Clone, PartialEq)]
pub enum BindingValue {
    Integer(i32),
    Long(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Properties(BTreeMap<String, serde_json::Value>),
    MessageReceiver(ReceiverHandle),
    ClientEntity(ClientEntityHandle),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl BindingValue {
    /// Returns the semantic type this value carries.
    pub fn binding_type(&self) -> BindingType {
        match self {
            Self::Integer(_) => BindingType::Integer,
            Self::Long(_) => BindingType::Long,
            Self::Text(_) => BindingType::Text,
            Self::Timestamp(_) => BindingType::Timestamp,
            Self::Properties(_) => BindingType::Properties,
            Self::MessageReceiver(_) => BindingType::MessageReceiver,
            Self::ClientEntity(_) => BindingType::ClientEntity,
            Self::Bytes(_) => BindingType::Bytes,
            Self::Json(_) => BindingType::Json,
        }
    }

    /// The value if it is an [`BindingValue::Integer`].
    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// The value if it is a [`BindingValue::Long`].
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// The value if it is [`BindingValue::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// The value if it is a [`BindingValue::Timestamp`].
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// The value if it is [`BindingValue::Properties`].
    pub fn as_properties(&self) -> Option<&BTreeMap<String, serde_json::Value>> {
        match self {
            Self::Properties(v) => Some(v),
            _ => None,
        }
    }

    /// Renders the value as JSON for logging and tooling.
    ///
    /// Handles are rendered as the path or id of what they point at.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Integer(v) => Value::from(*v),
            Self::Long(v) => Value::from(*v),
            Self::Text(v) => Value::from(v.as_str()),
            Self::Timestamp(v) => Value::from(v.to_rfc3339()),
            Self::Properties(v) => Value::Object(v.clone().into_iter().collect()),
            Self::MessageReceiver(h) => Value::from(h.receiver().entity_path()),
            Self::ClientEntity(h) => Value::from(h.client_entity().client_id()),
            Self::Bytes(v) => Value::from(v.clone()),
            Self::Json(v) => v.clone(),
        }
    }
}

impl Serialize for BindingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Trigger values
// ---------------------------------------------------------------------------

/// The raw inbound value that initiates a function invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerValue {
    /// Already the canonical message type.
    Message(Message),
    /// A string, e.g. typed by an operator in a dashboard "run" form.
    Text(String),
    /// Raw body bytes.
    Bytes(Vec<u8>),
    /// A JSON document, e.g. from a seed file.
    Json(serde_json::Value),
}

impl TriggerValue {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

impl From<Message> for TriggerValue {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<String> for TriggerValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for TriggerValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_reports_its_type() {
        assert_eq!(BindingValue::Long(5).binding_type(), BindingType::Long);
        assert_eq!(
            BindingValue::Text("x".into()).binding_type(),
            BindingType::Text
        );
    }

    #[test]
    fn test_properties_render_as_json_object() {
        let mut props = BTreeMap::new();
        props.insert("env".to_string(), serde_json::json!("prod"));
        let value = BindingValue::Properties(props);
        assert_eq!(value.to_json(), serde_json::json!({ "env": "prod" }));
    }

    #[test]
    fn test_trigger_value_kind() {
        assert_eq!(TriggerValue::from("hi").kind(), "text");
        assert_eq!(TriggerValue::Bytes(vec![1]).kind(), "bytes");
    }
}
