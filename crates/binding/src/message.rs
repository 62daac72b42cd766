//! The canonical broker message.
//!
//! A [`Message`] carries application properties set by the sender and, once
//! received from an entity, broker-assigned [`SystemProperties`]. Reading a
//! system property on a message that was never received is a
//! [`PropertyError`], mirroring what a broker SDK does for locally-built
//! messages.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::{LockToken, PropertyError};

/// Broker-assigned properties, present only on received messages.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemProperties {
    /// Position of the message in its entity, assigned on enqueue.
    pub sequence_number: i64,
    /// When the broker accepted the message.
    pub enqueued_time_utc: DateTime<Utc>,
    /// Number of times the message has been delivered, including this one.
    pub delivery_count: i32,
    /// Lock token; `None` in receive-and-delete mode.
    pub lock_token: Option<LockToken>,
    /// When the current lock expires, if locked.
    pub locked_until_utc: Option<DateTime<Utc>>,
    /// Entity the message was dead-lettered from, if it came off a
    /// dead-letter queue.
    pub dead_letter_source: Option<String>,
}

/// One unit delivered from a broker entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    body: Vec<u8>,
    message_id: Option<String>,
    content_type: Option<String>,
    correlation_id: Option<String>,
    label: Option<String>,
    reply_to: Option<String>,
    to: Option<String>,
    time_to_live: Option<Duration>,
    user_properties: BTreeMap<String, serde_json::Value>,
    system_properties: Option<SystemProperties>,
}

impl Message {
    /// Creates an unsent message with the given body.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Sets the message id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the application label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the reply-to address.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Sets the "to" address.
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Sets the time-to-live relative to the enqueue time.
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Adds or replaces a user-defined property.
    pub fn with_user_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.user_properties.insert(key.into(), value.into());
        self
    }

    /// Attaches broker-assigned system properties, marking the message as
    /// received. Used by messaging providers on delivery.
    pub fn received(mut self, system: SystemProperties) -> Self {
        self.system_properties = Some(system);
        self
    }

    /// Returns the message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the message and returns its body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Application-assigned message identifier.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// MIME type of the body, if set by the sender.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Correlation identifier for request/reply patterns.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Application-specific label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Entity the receiver should reply to.
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Intended destination address.
    pub fn to(&self) -> Option<&str> {
        self.to.as_deref()
    }

    /// Time after enqueue at which the message expires.
    pub fn time_to_live(&self) -> Option<Duration> {
        self.time_to_live
    }

    /// Application properties set by the sender.
    pub fn user_properties(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.user_properties
    }

    /// Returns `true` if the message was received from a broker entity.
    pub fn is_received(&self) -> bool {
        self.system_properties.is_some()
    }

    /// Returns the broker-assigned properties.
    pub fn system_properties(&self) -> Result<&SystemProperties, PropertyError> {
        self.system_properties
            .as_ref()
            .ok_or(PropertyError::NotReceived {
                property: "SystemProperties",
            })
    }

    /// Number of times the message has been delivered.
    pub fn delivery_count(&self) -> Result<i32, PropertyError> {
        self.system("DeliveryCount").map(|s| s.delivery_count)
    }

    /// Broker-assigned sequence number, unique within the entity.
    pub fn sequence_number(&self) -> Result<i64, PropertyError> {
        self.system("SequenceNumber").map(|s| s.sequence_number)
    }

    /// When the broker accepted the message.
    pub fn enqueued_time_utc(&self) -> Result<DateTime<Utc>, PropertyError> {
        self.system("EnqueuedTimeUtc").map(|s| s.enqueued_time_utc)
    }

    /// Entity the message was dead-lettered from; `Ok(None)` outside a
    /// dead-letter queue.
    pub fn dead_letter_source(&self) -> Result<Option<&str>, PropertyError> {
        self.system("DeadLetterSource")
            .map(|s| s.dead_letter_source.as_deref())
    }

    /// Returns the lock token; `Ok(None)` when the message is not locked.
    pub fn lock_token(&self) -> Result<Option<&LockToken>, PropertyError> {
        self.system("LockToken").map(|s| s.lock_token.as_ref())
    }

    /// Returns the absolute expiry time: enqueue time plus time-to-live.
    ///
    /// Saturates at the maximum representable time when no time-to-live is
    /// set or the sum overflows.
    pub fn expires_at_utc(&self) -> Result<DateTime<Utc>, PropertyError> {
        let enqueued = self.system("ExpiresAtUtc")?.enqueued_time_utc;
        Ok(self
            .time_to_live
            .and_then(|ttl| enqueued.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    fn system(&self, property: &'static str) -> Result<&SystemProperties, PropertyError> {
        self.system_properties
            .as_ref()
            .ok_or(PropertyError::NotReceived { property })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn system() -> SystemProperties {
        SystemProperties {
            sequence_number: 7,
            enqueued_time_utc: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            delivery_count: 1,
            lock_token: None,
            locked_until_utc: None,
            dead_letter_source: None,
        }
    }

    #[test]
    fn test_system_properties_unavailable_before_receive() {
        let message = Message::new("hello");
        assert_eq!(
            message.delivery_count(),
            Err(PropertyError::NotReceived {
                property: "DeliveryCount"
            })
        );
        assert!(message.lock_token().is_err());
        assert!(!message.is_received());
    }

    #[test]
    fn test_expiry_is_enqueue_plus_ttl() {
        let message = Message::new("hello")
            .with_time_to_live(Duration::minutes(5))
            .received(system());
        assert_eq!(
            message.expires_at_utc().unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap()
        );
    }

    #[test]
    fn test_expiry_without_ttl_saturates() {
        let message = Message::new("hello").received(system());
        assert_eq!(message.expires_at_utc().unwrap(), DateTime::<Utc>::MAX_UTC);
    }
}
