//! Parameter descriptors for tooling and dashboards.

use serde::{Deserialize, Serialize};

use crate::{EntityDescriptor, ParameterName, QueueName, SubscriptionName, TopicName};

/// Hints for rendering a parameter in a "run function" form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterDisplayHints {
    /// One-line summary of where the parameter comes from.
    pub description: String,
    /// Label for the input field.
    pub prompt: String,
    /// Pre-filled input, if any.
    pub default_value: Option<String>,
}

impl ParameterDisplayHints {
    /// Builds the hints for a trigger receiving from `entity_path`.
    pub fn for_trigger(entity_path: &str) -> Self {
        Self {
            description: format!("dequeue from '{entity_path}'"),
            prompt: "Enter the queue message body".to_string(),
            default_value: None,
        }
    }
}

/// Static, serializable self-description of a trigger parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterDescriptor {
    /// Parameter the trigger value binds to.
    pub name: ParameterName,
    /// Set when the entity is a queue.
    pub queue_name: Option<QueueName>,
    /// Set when the entity is a topic subscription.
    pub topic_name: Option<TopicName>,
    /// Set together with `topic_name`.
    pub subscription_name: Option<SubscriptionName>,
    pub display_hints: ParameterDisplayHints,
}

impl ParameterDescriptor {
    /// Describes a trigger parameter receiving from `entity`.
    pub fn for_trigger(name: ParameterName, entity: &EntityDescriptor) -> Self {
        Self {
            name,
            queue_name: entity.queue_name().cloned(),
            topic_name: entity.topic_name().cloned(),
            subscription_name: entity.subscription_name().cloned(),
            display_hints: ParameterDisplayHints::for_trigger(&entity.entity_path()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_descriptor_for_subscription() {
        let entity = EntityDescriptor::subscription(
            TopicName::new("orders").unwrap(),
            SubscriptionName::new("audit").unwrap(),
        );
        let descriptor = ParameterDescriptor::for_trigger(ParameterName::new("msg").unwrap(), &entity);

        assert!(descriptor.queue_name.is_none());
        assert_eq!(descriptor.topic_name.as_ref().map(TopicName::as_str), Some("orders"));
        assert_eq!(
            descriptor.display_hints.description,
            "dequeue from 'orders/Subscriptions/audit'"
        );
        assert!(descriptor.display_hints.default_value.is_none());
    }

    #[test]
    fn test_descriptor_serializes_pascal_case() {
        let entity = EntityDescriptor::queue(QueueName::new("jobs").unwrap());
        let descriptor = ParameterDescriptor::for_trigger(ParameterName::new("job").unwrap(), &entity);
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["Name"], "job");
        assert_eq!(json["QueueName"], "jobs");
        assert_eq!(json["TopicName"], serde_json::Value::Null);
        assert_eq!(json["DisplayHints"]["Prompt"], "Enter the queue message body");
    }
}
