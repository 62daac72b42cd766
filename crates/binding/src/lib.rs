//! Trigger-binding domain for BusJobs.
//!
//! This crate turns an inbound broker message into a strongly-typed invocation
//! context for a job function: the bound argument plus a case-insensitive
//! dictionary of message metadata ("binding data"). It also defines the port
//! traits through which the listener talks to a broker.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* a transport must provide; infrastructure crates define
//! *how*.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`QueueName`, `LockToken`, `InvocationId`, etc.) |
//! | [`entity`] | Queue / topic-subscription descriptors and entity paths |
//! | [`message`] | The canonical [`Message`] and its broker-assigned properties |
//! | [`types`] | Binding types, binding values, handles and trigger values |
//! | [`fields`] | Case-insensitive field maps for contracts and binding data |
//! | [`builtin`] | The built-in binding data field table |
//! | [`converter`] | Trigger value → message converter chain |
//! | [`contract`] | Binding data contract builder |
//! | [`data`] | Per-dispatch binding data extraction |
//! | [`argument`] | Argument bindings (message, text, bytes, JSON) |
//! | [`descriptor`] | Parameter descriptors for tooling |
//! | [`options`] | Account and listener tuning configuration |
//! | [`ports`] | Messaging provider, receiver and client entity traits |
//! | [`errors`] | Binding, property and transport errors; retry policy |

pub mod argument;
pub mod builtin;
pub mod contract;
pub mod converter;
pub mod data;
pub mod descriptor;
pub mod entity;
pub mod errors;
pub mod fields;
pub mod identifiers;
pub mod message;
pub mod options;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use argument::{
    ArgumentBinding, ArgumentData, BytesArgument, JsonArgument, MessageArgument, TextArgument,
    ValueBindingContext,
};
pub use contract::{build_contract, built_in_contract};
pub use converter::{ConverterChain, MessageConverter, ParameterKind, StringConversion};
pub use data::extract_binding_data;
pub use descriptor::{ParameterDescriptor, ParameterDisplayHints};
pub use entity::EntityDescriptor;
pub use errors::{BindingError, PropertyError, RetryPolicy, TransportError};
pub use fields::{BindingData, BindingDataContract, FieldMap};
pub use identifiers::{
    FunctionName, InvocationId, ListenerId, LockToken, ParameterName, QueueName,
    SubscriptionName, TopicName,
};
pub use message::{Message, SystemProperties};
pub use options::{
    DrainOptions, DrainPolicy, MessageHandlerOptions, ReceiveMode, ServiceBusAccount,
    ServiceBusOptions,
};
pub use ports::{ClientEntity, MessageReceiver, MessagingProvider};
pub use types::{BindingType, BindingValue, ClientEntityHandle, ReceiverHandle, TriggerValue};
