//! Broker entity descriptors.

use serde::{Deserialize, Serialize};

use crate::{QueueName, SubscriptionName, TopicName};

/// Path segment separating a topic from its subscription name.
const SUBSCRIPTIONS_SEGMENT: &str = "Subscriptions";

/// Suffix of the dead-letter sub-queue of any entity.
pub const DEAD_LETTER_QUEUE_SUFFIX: &str = "$DeadLetterQueue";

/// Identifies the broker entity a trigger receives from.
///
/// Immutable once bound. Used to construct the listener and exposed through
/// the binding's parameter descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityDescriptor {
    /// A queue.
    Queue {
        /// Queue name.
        queue: QueueName,
    },
    /// A subscription on a topic.
    Subscription {
        /// Topic name.
        topic: TopicName,
        /// Subscription name.
        subscription: SubscriptionName,
    },
}

impl EntityDescriptor {
    /// Creates a queue descriptor.
    pub fn queue(queue: QueueName) -> Self {
        Self::Queue { queue }
    }

    /// Creates a topic subscription descriptor.
    pub fn subscription(topic: TopicName, subscription: SubscriptionName) -> Self {
        Self::Subscription {
            topic,
            subscription,
        }
    }

    /// Returns the queue name, if this is a queue.
    pub fn queue_name(&self) -> Option<&QueueName> {
        match self {
            Self::Queue { queue } => Some(queue),
            Self::Subscription { .. } => None,
        }
    }

    /// Returns the topic name, if this is a subscription.
    pub fn topic_name(&self) -> Option<&TopicName> {
        match self {
            Self::Queue { .. } => None,
            Self::Subscription { topic, .. } => Some(topic),
        }
    }

    /// Returns the subscription name, if this is a subscription.
    pub fn subscription_name(&self) -> Option<&SubscriptionName> {
        match self {
            Self::Queue { .. } => None,
            Self::Subscription { subscription, .. } => Some(subscription),
        }
    }

    /// Returns the broker path of the entity.
    ///
    /// Queues are addressed by name; subscriptions as
    /// `"<topic>/Subscriptions/<subscription>"`.
    pub fn entity_path(&self) -> String {
        match self {
            Self::Queue { queue } => queue.to_string(),
            Self::Subscription {
                topic,
                subscription,
            } => format!("{topic}/{SUBSCRIPTIONS_SEGMENT}/{subscription}"),
        }
    }

    /// Returns the path of this entity's dead-letter sub-queue.
    pub fn dead_letter_path(&self) -> String {
        format_dead_letter_path(&self.entity_path())
    }
}

impl std::fmt::Display for EntityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.entity_path())
    }
}

/// Formats the dead-letter sub-queue path for an entity path.
pub fn format_dead_letter_path(entity_path: &str) -> String {
    format!("{entity_path}/{DEAD_LETTER_QUEUE_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> EntityDescriptor {
        EntityDescriptor::subscription(
            TopicName::new("orders").unwrap(),
            SubscriptionName::new("billing").unwrap(),
        )
    }

    #[test]
    fn test_queue_path_is_queue_name() {
        let entity = EntityDescriptor::queue(QueueName::new("orders").unwrap());
        assert_eq!(entity.entity_path(), "orders");
        assert_eq!(entity.queue_name().map(QueueName::as_str), Some("orders"));
        assert!(entity.topic_name().is_none());
    }

    #[test]
    fn test_subscription_path_includes_topic() {
        let entity = subscription();
        assert_eq!(entity.entity_path(), "orders/Subscriptions/billing");
        assert_eq!(
            entity.dead_letter_path(),
            "orders/Subscriptions/billing/$DeadLetterQueue"
        );
        assert!(entity.queue_name().is_none());
    }

    #[test]
    fn test_descriptor_serializes_with_kind_tag() {
        let json = serde_json::to_value(subscription()).unwrap();
        assert_eq!(json["kind"], "subscription");
        assert_eq!(json["topic"], "orders");
    }
}
