//! Function executor port and the adapter that binds trigger values for a
//! user job function.
//!
//! The listener only knows [`TriggeredFunctionExecutor`]: it hands over the
//! raw trigger value and gets back a [`FunctionResult`] that decides the
//! message's disposition. [`BoundFunction`] is the executor used by the host:
//! it runs the trigger binding and then the user's [`JobFunction`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use binding::{
    ArgumentBinding, BindingData, BindingError, FunctionName, InvocationId, TriggerValue,
    ValueBindingContext,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::TriggerBinding;

/// Error type returned by user job functions.
pub type FunctionError = Box<dyn std::error::Error + Send + Sync>;

/// Input handed from a listener to an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredFunctionData {
    pub trigger_value: TriggerValue,
    /// Invocation that caused this one, if any.
    pub parent_id: Option<InvocationId>,
}

impl TriggeredFunctionData {
    pub fn new(trigger_value: TriggerValue) -> Self {
        Self {
            trigger_value,
            parent_id: None,
        }
    }
}

/// Why an invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The trigger value could not be bound; retrying cannot help.
    Binding,
    /// The job function itself failed.
    Function,
}

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionResult {
    Succeeded,
    Failed { kind: FailureKind, error: String },
}

impl FunctionResult {
    pub fn binding_failed(error: &BindingError) -> Self {
        Self::Failed {
            kind: FailureKind::Binding,
            error: error.to_string(),
        }
    }

    pub fn function_failed(error: impl std::fmt::Display) -> Self {
        Self::Failed {
            kind: FailureKind::Function,
            error: error.to_string(),
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Runs a function for a trigger value delivered by a listener.
#[async_trait]
pub trait TriggeredFunctionExecutor: Send + Sync {
    async fn try_execute(
        &self,
        input: TriggeredFunctionData,
        cancellation: CancellationToken,
    ) -> FunctionResult;
}

// ---------------------------------------------------------------------------
// Job functions
// ---------------------------------------------------------------------------

/// Everything a job function receives for one invocation.
#[derive(Debug)]
pub struct Invocation<V> {
    pub id: InvocationId,
    pub function: FunctionName,
    pub argument: V,
    pub binding_data: BindingData,
    /// Fires when the host wants the invocation to stop early.
    pub cancellation: CancellationToken,
}

/// User code invoked with a bound argument.
#[async_trait]
pub trait JobFunction<V>: Send + Sync {
    async fn invoke(&self, invocation: Invocation<V>) -> Result<(), FunctionError>;
}

/// Adapts an async closure into a [`JobFunction`].
pub struct FnJob<F>(F);

/// Wraps `f` as a [`JobFunction`].
pub fn job_fn<F>(f: F) -> FnJob<F> {
    FnJob(f)
}

#[async_trait]
impl<V, F, Fut> JobFunction<V> for FnJob<F>
where
    V: Send + 'static,
    F: Fn(Invocation<V>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), FunctionError>> + Send,
{
    async fn invoke(&self, invocation: Invocation<V>) -> Result<(), FunctionError> {
        (self.0)(invocation).await
    }
}

// ---------------------------------------------------------------------------
// BoundFunction
// ---------------------------------------------------------------------------

/// Executor that binds each trigger value through a [`TriggerBinding`] and
/// invokes a [`JobFunction`] with the result.
pub struct BoundFunction<A: ArgumentBinding, J> {
    name: FunctionName,
    binding: Arc<TriggerBinding<A>>,
    job: J,
}

impl<A: ArgumentBinding, J> BoundFunction<A, J> {
    pub fn new(name: FunctionName, binding: Arc<TriggerBinding<A>>, job: J) -> Self {
        Self { name, binding, job }
    }

    pub fn name(&self) -> &FunctionName {
        &self.name
    }
}

#[async_trait]
impl<A, J> TriggeredFunctionExecutor for BoundFunction<A, J>
where
    A: ArgumentBinding + 'static,
    J: JobFunction<A::Value> + 'static,
{
    async fn try_execute(
        &self,
        input: TriggeredFunctionData,
        cancellation: CancellationToken,
    ) -> FunctionResult {
        let id = InvocationId::new_random();
        let span = info_span!("invocation", function = %self.name, invocation_id = %id);

        async move {
            let context = ValueBindingContext::new(id).with_function(self.name.clone());
            let bound = match self.binding.bind(input.trigger_value, &context).await {
                Ok(bound) => bound,
                Err(error) => {
                    warn!(%error, "Trigger binding failed");
                    return FunctionResult::binding_failed(&error);
                }
            };

            let invocation = Invocation {
                id,
                function: self.name.clone(),
                argument: bound.value,
                binding_data: bound.binding_data,
                cancellation,
            };

            match self.job.invoke(invocation).await {
                Ok(()) => {
                    debug!("Function succeeded");
                    FunctionResult::Succeeded
                }
                Err(error) => {
                    warn!(%error, "Function failed");
                    FunctionResult::function_failed(error)
                }
            }
        }
        .instrument(span)
        .await
    }
}
