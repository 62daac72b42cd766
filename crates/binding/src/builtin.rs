//! The built-in binding data field table.
//!
//! One table drives both the static contract ([`crate::contract`]) and the
//! per-dispatch extraction ([`crate::data`]), so a field can never appear in
//! one without the other. Field names are an external contract: renaming one
//! breaks every function that consumes it.

use crate::{BindingType, BindingValue, ClientEntityHandle, Message, PropertyError, ReceiverHandle};

/// Times the message has been delivered.
pub const DELIVERY_COUNT: &str = "DeliveryCount";
/// Entity a dead-lettered message came from.
pub const DEAD_LETTER_SOURCE: &str = "DeadLetterSource";
/// Peek-lock token; absent in receive-and-delete mode.
pub const LOCK_TOKEN: &str = "LockToken";
/// Enqueue time plus time-to-live.
pub const EXPIRES_AT_UTC: &str = "ExpiresAtUtc";
/// When the broker accepted the message.
pub const ENQUEUED_TIME_UTC: &str = "EnqueuedTimeUtc";
/// Application message identifier.
pub const MESSAGE_ID: &str = "MessageId";
/// MIME type of the body.
pub const CONTENT_TYPE: &str = "ContentType";
/// Reply-to entity.
pub const REPLY_TO: &str = "ReplyTo";
/// Broker-assigned sequence number.
pub const SEQUENCE_NUMBER: &str = "SequenceNumber";
/// Destination address.
pub const TO: &str = "To";
/// Application label.
pub const LABEL: &str = "Label";
/// Correlation identifier.
pub const CORRELATION_ID: &str = "CorrelationId";
/// Sender-set application properties.
pub const USER_PROPERTIES: &str = "UserProperties";
/// Receiver handle of the active listener.
pub const MESSAGE_RECEIVER: &str = "MessageReceiver";
/// Client entity handle of the active listener.
pub const CLIENT_ENTITY: &str = "ClientEntity";

/// Everything a built-in field may be read from during one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct FieldSource<'a> {
    /// The message being dispatched.
    pub message: &'a Message,
    /// Receiver of the active listener, if any.
    pub receiver: Option<&'a ReceiverHandle>,
    /// Client entity of the active listener, if any.
    pub client_entity: Option<&'a ClientEntityHandle>,
}

/// Reads one field. `Ok(None)` means the value is structurally absent.
type FieldReader = fn(&FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError>;

/// One row of the built-in field table.
pub struct BuiltInField {
    /// Field name as exposed to binding expressions.
    pub name: &'static str,
    /// Declared type in the contract.
    pub binding_type: BindingType,
    reader: FieldReader,
}

impl BuiltInField {
    /// Attempts to read this field from `source`.
    pub fn read(&self, source: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
        (self.reader)(source)
    }
}

impl std::fmt::Debug for BuiltInField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltInField")
            .field("name", &self.name)
            .field("binding_type", &self.binding_type)
            .finish()
    }
}

/// The fixed built-in field set, in extraction order.
pub static BUILT_IN_FIELDS: [BuiltInField; 15] = [
    BuiltInField {
        name: DELIVERY_COUNT,
        binding_type: BindingType::Integer,
        reader: read_delivery_count,
    },
    BuiltInField {
        name: DEAD_LETTER_SOURCE,
        binding_type: BindingType::Text,
        reader: read_dead_letter_source,
    },
    BuiltInField {
        name: LOCK_TOKEN,
        binding_type: BindingType::Text,
        reader: read_lock_token,
    },
    BuiltInField {
        name: EXPIRES_AT_UTC,
        binding_type: BindingType::Timestamp,
        reader: read_expires_at_utc,
    },
    BuiltInField {
        name: ENQUEUED_TIME_UTC,
        binding_type: BindingType::Timestamp,
        reader: read_enqueued_time_utc,
    },
    BuiltInField {
        name: MESSAGE_ID,
        binding_type: BindingType::Text,
        reader: read_message_id,
    },
    BuiltInField {
        name: CONTENT_TYPE,
        binding_type: BindingType::Text,
        reader: read_content_type,
    },
    BuiltInField {
        name: REPLY_TO,
        binding_type: BindingType::Text,
        reader: read_reply_to,
    },
    BuiltInField {
        name: SEQUENCE_NUMBER,
        binding_type: BindingType::Long,
        reader: read_sequence_number,
    },
    BuiltInField {
        name: TO,
        binding_type: BindingType::Text,
        reader: read_to,
    },
    BuiltInField {
        name: LABEL,
        binding_type: BindingType::Text,
        reader: read_label,
    },
    BuiltInField {
        name: CORRELATION_ID,
        binding_type: BindingType::Text,
        reader: read_correlation_id,
    },
    BuiltInField {
        name: USER_PROPERTIES,
        binding_type: BindingType::Properties,
        reader: read_user_properties,
    },
    BuiltInField {
        name: MESSAGE_RECEIVER,
        binding_type: BindingType::MessageReceiver,
        reader: read_message_receiver,
    },
    BuiltInField {
        name: CLIENT_ENTITY,
        binding_type: BindingType::ClientEntity,
        reader: read_client_entity,
    },
];

fn text(value: Option<&str>) -> Option<BindingValue> {
    value.map(|v| BindingValue::Text(v.to_string()))
}

fn read_delivery_count(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(Some(BindingValue::Integer(s.message.delivery_count()?)))
}

fn read_dead_letter_source(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(text(s.message.dead_letter_source()?))
}

fn read_lock_token(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(s.message
        .lock_token()?
        .map(|token| BindingValue::Text(token.to_string())))
}

fn read_expires_at_utc(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(Some(BindingValue::Timestamp(s.message.expires_at_utc()?)))
}

fn read_enqueued_time_utc(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(Some(BindingValue::Timestamp(s.message.enqueued_time_utc()?)))
}

fn read_message_id(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(text(s.message.message_id()))
}

fn read_content_type(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(text(s.message.content_type()))
}

fn read_reply_to(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(text(s.message.reply_to()))
}

fn read_sequence_number(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(Some(BindingValue::Long(s.message.sequence_number()?)))
}

fn read_to(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(text(s.message.to()))
}

fn read_label(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(text(s.message.label()))
}

fn read_correlation_id(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(text(s.message.correlation_id()))
}

fn read_user_properties(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(Some(BindingValue::Properties(
        s.message.user_properties().clone(),
    )))
}

fn read_message_receiver(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(s.receiver.cloned().map(BindingValue::MessageReceiver))
}

fn read_client_entity(s: &FieldSource<'_>) -> Result<Option<BindingValue>, PropertyError> {
    Ok(s.client_entity.cloned().map(BindingValue::ClientEntity))
}
