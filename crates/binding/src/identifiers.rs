//! Newtype domain identifiers.
//!
//! Every broker or host concept that has an identity is represented as a
//! distinct newtype wrapping a primitive. This prevents accidentally
//! interchanging, for example, a [`QueueName`] with a [`TopicName`] even though
//! both are strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for UUID-backed newtypes (internally generated).
// Generates: struct (Copy), new_random(), from_uuid(), as_uuid(), Display.
// ---------------------------------------------------------------------------
macro_rules! uuid_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates the identifier from an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the underlying [`Uuid`].
            pub fn as_uuid(self) -> Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers — broker entity names
// ---------------------------------------------------------------------------

string_id! {
    /// Name of a broker queue.
    QueueName
}

string_id! {
    /// Name of a broker topic.
    TopicName
}

string_id! {
    /// Name of a subscription on a topic.
    SubscriptionName
}

string_id! {
    /// Opaque handle identifying a message's current receive lock.
    ///
    /// Only present on messages received in peek-lock mode, and only while
    /// the lock is held.
    LockToken
}

// ---------------------------------------------------------------------------
// Identifiers — host configuration names
// ---------------------------------------------------------------------------

string_id! {
    /// Name of the job function parameter a trigger binding is attached to.
    ParameterName
}

string_id! {
    /// Name of a registered job function (e.g. `"ProcessOrder"`).
    FunctionName
}

// ---------------------------------------------------------------------------
// Identifiers — UUID-backed
// ---------------------------------------------------------------------------

uuid_id! {
    /// Identifies one invocation of a job function.
    ///
    /// Generated fresh for every dispatched message and propagated through
    /// spans so binding, execution and settlement can be correlated.
    InvocationId
}

uuid_id! {
    /// Identifies one listener instance for the lifetime of the host.
    ListenerId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_id_rejects_empty() {
        assert!(QueueName::new("").is_none());
        assert_eq!(QueueName::new("orders").unwrap().as_str(), "orders");
    }

    #[test]
    fn test_uuid_ids_are_distinct() {
        assert_ne!(InvocationId::new_random(), InvocationId::new_random());
    }
}
