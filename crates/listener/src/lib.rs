//! BusJobs listener infrastructure.
//!
//! Everything between a broker entity and a job function lives here:
//!
//! - [`TriggerBinding`] binds inbound trigger values into a typed argument
//!   plus binding data, and creates the listener that feeds its function.
//! - [`ListenerFactory`] opens the transport handles for one entity and
//!   assembles a [`Listener`].
//! - [`Listener`] owns the receive loop: it pulls batches from a
//!   [`binding::MessageReceiver`], dispatches each message to a
//!   [`TriggeredFunctionExecutor`] under a concurrency limit, and settles
//!   the message from the invocation's outcome.
//! - [`InMemoryMessagingProvider`] is a process-local broker implementing
//!   [`binding::MessagingProvider`], used by the CLI and by tests.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Tasks, cancellation and transport lifecycles live here.
//! The [`binding`] crate stays free of I/O and sees only its port traits.
//!
//! ## Settlement
//!
//! | Outcome | Message |
//! |---------|---------|
//! | Function succeeded, `auto_complete` on | completed |
//! | Function succeeded, `auto_complete` off | left to the function |
//! | Function failed | abandoned (redelivered) |
//! | Binding failed | dead-lettered with reason `BindingFailed` |
//! | No lock token (receive-and-delete) | never settled |

pub mod error;
pub mod executor;
pub mod factory;
pub mod listener;
pub mod memory;
pub mod pump;
pub mod trigger;

pub use error::ListenerError;
pub use executor::{
    job_fn, BoundFunction, FailureKind, FnJob, FunctionError, FunctionResult, Invocation,
    JobFunction, TriggeredFunctionData, TriggeredFunctionExecutor,
};
pub use factory::ListenerFactory;
pub use listener::{Listener, ListenerState};
pub use memory::{InMemoryClientEntity, InMemoryMessagingProvider, InMemoryReceiver};
pub use pump::{Disposition, BINDING_FAILED_REASON};
pub use trigger::{ListenerFactoryContext, TriggerBinding, TriggerData};
