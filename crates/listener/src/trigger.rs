//! The Service Bus trigger binding.
//!
//! A [`TriggerBinding`] is built once per bound function. It owns the
//! converter chain and the cached binding data contract, binds each inbound
//! trigger value into an argument plus binding data, and creates the listener
//! that feeds the function. The most recently created listener is published
//! through an [`ArcSwapOption`] so concurrent binds can read its transport
//! handles without locking.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use binding::{
    build_contract, extract_binding_data, ArgumentBinding, BindingData, BindingDataContract,
    BindingError, ConverterChain, EntityDescriptor, MessagingProvider, ParameterDescriptor,
    ParameterName, ServiceBusAccount, ServiceBusOptions, TriggerValue, ValueBindingContext,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{Listener, ListenerError, ListenerFactory, TriggeredFunctionExecutor};

/// Result of binding one trigger value.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerData<V> {
    /// The typed argument handed to the function.
    pub value: V,
    pub binding_data: BindingData,
}

/// What the host supplies when asking a binding for its listener.
#[derive(Clone)]
pub struct ListenerFactoryContext {
    pub executor: Arc<dyn TriggeredFunctionExecutor>,
    pub cancellation: CancellationToken,
}

impl ListenerFactoryContext {
    pub fn new(executor: Arc<dyn TriggeredFunctionExecutor>, cancellation: CancellationToken) -> Self {
        Self {
            executor,
            cancellation,
        }
    }
}

impl std::fmt::Debug for ListenerFactoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerFactoryContext")
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Binds a job function parameter to a queue or topic subscription.
pub struct TriggerBinding<A: ArgumentBinding> {
    parameter_name: ParameterName,
    converter: ConverterChain,
    argument_binding: A,
    contract: BindingDataContract,
    account: ServiceBusAccount,
    entity: EntityDescriptor,
    options: ServiceBusOptions,
    provider: Arc<dyn MessagingProvider>,
    listener: ArcSwapOption<Listener>,
}

impl<A: ArgumentBinding> TriggerBinding<A> {
    pub fn new(
        parameter_name: ParameterName,
        argument_binding: A,
        account: ServiceBusAccount,
        options: ServiceBusOptions,
        provider: Arc<dyn MessagingProvider>,
        entity: EntityDescriptor,
    ) -> Self {
        let converter = ConverterChain::for_parameter(argument_binding.parameter_kind());
        let contract = build_contract(&argument_binding.binding_data_contract());
        debug!(
            parameter = %parameter_name,
            entity = %entity,
            fields = contract.len(),
            "Trigger binding created"
        );

        Self {
            parameter_name,
            converter,
            argument_binding,
            contract,
            account,
            entity,
            options,
            provider,
            listener: ArcSwapOption::empty(),
        }
    }

    pub fn parameter_name(&self) -> &ParameterName {
        &self.parameter_name
    }

    /// Names and types of every binding data field this trigger supplies.
    pub fn binding_data_contract(&self) -> &BindingDataContract {
        &self.contract
    }

    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    pub fn account(&self) -> &ServiceBusAccount {
        &self.account
    }

    pub fn options(&self) -> &ServiceBusOptions {
        &self.options
    }

    pub fn converter(&self) -> &ConverterChain {
        &self.converter
    }

    /// The most recently created listener, if any.
    pub fn active_listener(&self) -> Option<Arc<Listener>> {
        self.listener.load_full()
    }

    /// Binds one trigger value.
    ///
    /// Binding data carries the receiver and client entity handles of the
    /// active listener; before a listener exists those fields are omitted.
    pub async fn bind(
        &self,
        value: TriggerValue,
        context: &ValueBindingContext,
    ) -> Result<TriggerData<A::Value>, BindingError> {
        let message = self.converter.convert(value)?;
        let argument = self
            .argument_binding
            .bind(&self.parameter_name, &message, context)
            .await?;

        let listener = self.listener.load_full();
        let binding_data = extract_binding_data(
            &message,
            listener.as_deref().map(Listener::receiver),
            listener.as_deref().map(Listener::client_entity),
            &argument.binding_data,
        );

        Ok(TriggerData {
            value: argument.value,
            binding_data,
        })
    }

    /// Creates the listener that feeds this binding's function and publishes
    /// it as the active listener.
    ///
    /// Nothing is published when creation fails or is cancelled.
    pub async fn create_listener(
        &self,
        context: ListenerFactoryContext,
    ) -> Result<Arc<Listener>, ListenerError> {
        let factory = ListenerFactory::new(
            self.account.clone(),
            self.entity.clone(),
            context.executor,
            self.options.clone(),
            Arc::clone(&self.provider),
        );

        let listener = factory.create(&context.cancellation).await?;
        if let Some(previous) = self.listener.swap(Some(Arc::clone(&listener))) {
            info!(
                previous = %previous.id(),
                listener = %listener.id(),
                entity = %self.entity,
                "Replaced active listener"
            );
        }
        Ok(listener)
    }

    /// Describes the trigger parameter for tooling.
    pub fn describe(&self) -> ParameterDescriptor {
        ParameterDescriptor::for_trigger(self.parameter_name.clone(), &self.entity)
    }
}

impl<A: ArgumentBinding> std::fmt::Debug for TriggerBinding<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerBinding")
            .field("parameter_name", &self.parameter_name)
            .field("entity", &self.entity)
            .field("converter", &self.converter)
            .finish_non_exhaustive()
    }
}
