//! The job host.
//!
//! Registers every configured function against the in-memory broker, creates
//! and starts one listener per function, replays seed messages and stops all
//! listeners with draining on shutdown. Registered functions log each
//! invocation with its bound argument and binding data.
//!
//! ## Seed files
//!
//! One JSON object per line; blank lines are skipped:
//!
//! ```json
//! {"entity": "orders", "body": {"id": 7}, "message_id": "m-1", "user_properties": {"env": "prod"}}
//! ```
//!
//! `entity` is a queue or topic name. A string `body` is sent as its UTF-8
//! bytes; any other JSON value is serialized and tagged `application/json`
//! unless `content_type` says otherwise.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use binding::builtin::{DELIVERY_COUNT, MESSAGE_ID};
use binding::converter::CONTENT_TYPE_JSON;
use binding::{
    ArgumentBinding, BindingValue, BytesArgument, EntityDescriptor, FunctionName, JsonArgument,
    Message, MessageArgument, MessagingProvider, ParameterDescriptor, ParameterKind,
    ParameterName, TextArgument,
};
use listener::{
    BoundFunction, FunctionError, InMemoryMessagingProvider, Invocation, JobFunction, Listener,
    ListenerError, ListenerFactoryContext, TriggerBinding, TriggeredFunctionExecutor,
};
use serde::Deserialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::HostError;
use crate::settings::{FunctionConfig, HostConfig, ServiceBusConfig};

const SUMMARY_LIMIT: usize = 120;

// ---------------------------------------------------------------------------
// Logging job function
// ---------------------------------------------------------------------------

/// Short, log-friendly rendering of a bound argument.
pub trait ArgumentSummary {
    fn summary(&self) -> String;
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(SUMMARY_LIMIT) {
        Some((end, _)) => format!("{}…", &text[..end]),
        None => text.to_string(),
    }
}

impl ArgumentSummary for Message {
    fn summary(&self) -> String {
        format!(
            "message of {} bytes ({})",
            self.body().len(),
            self.content_type().unwrap_or("no content type")
        )
    }
}

impl ArgumentSummary for String {
    fn summary(&self) -> String {
        truncate(self)
    }
}

impl ArgumentSummary for Vec<u8> {
    fn summary(&self) -> String {
        format!("{} bytes", self.len())
    }
}

impl ArgumentSummary for serde_json::Value {
    fn summary(&self) -> String {
        truncate(&self.to_string())
    }
}

/// Job function that logs each invocation and succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogInvocation;

#[async_trait]
impl<V> JobFunction<V> for LogInvocation
where
    V: ArgumentSummary + Send + 'static,
{
    async fn invoke(&self, invocation: Invocation<V>) -> Result<(), FunctionError> {
        let data = &invocation.binding_data;
        info!(
            function = %invocation.function,
            invocation_id = %invocation.id,
            message_id = data.get(MESSAGE_ID).and_then(BindingValue::as_text),
            delivery_count = data.get(DELIVERY_COUNT).and_then(BindingValue::as_integer),
            binding_fields = data.len(),
            argument = %invocation.argument.summary(),
            "Function invoked"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hosted functions
// ---------------------------------------------------------------------------

/// A registered function with its argument type erased.
#[async_trait]
trait HostedFunction: Send + Sync {
    fn name(&self) -> &FunctionName;

    fn describe(&self) -> ParameterDescriptor;

    async fn create_listener(
        &self,
        cancellation: CancellationToken,
    ) -> Result<Arc<Listener>, ListenerError>;
}

struct Hosted<A: ArgumentBinding> {
    name: FunctionName,
    binding: Arc<TriggerBinding<A>>,
    executor: Arc<dyn TriggeredFunctionExecutor>,
}

#[async_trait]
impl<A> HostedFunction for Hosted<A>
where
    A: ArgumentBinding + 'static,
{
    fn name(&self) -> &FunctionName {
        &self.name
    }

    fn describe(&self) -> ParameterDescriptor {
        self.binding.describe()
    }

    async fn create_listener(
        &self,
        cancellation: CancellationToken,
    ) -> Result<Arc<Listener>, ListenerError> {
        self.binding
            .create_listener(ListenerFactoryContext::new(
                Arc::clone(&self.executor),
                cancellation,
            ))
            .await
    }
}

fn hosted<A>(
    name: FunctionName,
    parameter: ParameterName,
    argument: A,
    entity: EntityDescriptor,
    service_bus: &ServiceBusConfig,
    provider: Arc<dyn MessagingProvider>,
) -> Box<dyn HostedFunction>
where
    A: ArgumentBinding + 'static,
    A::Value: ArgumentSummary,
{
    let binding = Arc::new(TriggerBinding::new(
        parameter,
        argument,
        service_bus.account.clone(),
        service_bus.options.clone(),
        provider,
        entity,
    ));
    let executor: Arc<dyn TriggeredFunctionExecutor> = Arc::new(BoundFunction::new(
        name.clone(),
        Arc::clone(&binding),
        LogInvocation,
    ));
    Box::new(Hosted {
        name,
        binding,
        executor,
    })
}

fn register(
    function: &FunctionConfig,
    service_bus: &ServiceBusConfig,
    provider: &InMemoryMessagingProvider,
) -> Result<Box<dyn HostedFunction>, HostError> {
    let name = function.function_name()?;
    let parameter = function.parameter_name()?;
    let entity = function.entity()?;
    provider.ensure_entity(&entity)?;

    let port: Arc<dyn MessagingProvider> = Arc::new(provider.clone());
    let hosted = match function.parameter {
        ParameterKind::Message => {
            hosted(name, parameter, MessageArgument, entity, service_bus, port)
        }
        ParameterKind::Text => hosted(name, parameter, TextArgument, entity, service_bus, port),
        ParameterKind::Bytes => hosted(name, parameter, BytesArgument, entity, service_bus, port),
        ParameterKind::Json => {
            let argument = function.json_fields.iter().fold(
                JsonArgument::<serde_json::Value>::new(),
                |argument, (field, binding_type)| argument.with_field(field.clone(), *binding_type),
            );
            hosted(name, parameter, argument, entity, service_bus, port)
        }
    };
    Ok(hosted)
}

// ---------------------------------------------------------------------------
// Seed messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeedMessage {
    entity: String,
    body: serde_json::Value,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    reply_to: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    time_to_live_secs: Option<i64>,
    #[serde(default)]
    user_properties: BTreeMap<String, serde_json::Value>,
}

impl SeedMessage {
    /// Builds the message to send and the entity to send it to.
    ///
    /// Fails with a reason when a field is out of range.
    fn into_message(self) -> Result<(String, Message), String> {
        let (body, default_content_type) = match self.body {
            serde_json::Value::String(text) => (text.into_bytes(), None),
            other => (other.to_string().into_bytes(), Some(CONTENT_TYPE_JSON)),
        };

        let mut message = Message::new(body);
        if let Some(content_type) = self.content_type.as_deref().or(default_content_type) {
            message = message.with_content_type(content_type);
        }
        if let Some(id) = self.message_id {
            message = message.with_message_id(id);
        }
        if let Some(id) = self.correlation_id {
            message = message.with_correlation_id(id);
        }
        if let Some(label) = self.label {
            message = message.with_label(label);
        }
        if let Some(reply_to) = self.reply_to {
            message = message.with_reply_to(reply_to);
        }
        if let Some(to) = self.to {
            message = message.with_to(to);
        }
        if let Some(secs) = self.time_to_live_secs {
            let ttl = chrono::Duration::try_seconds(secs)
                .ok_or_else(|| "time_to_live_secs out of range".to_string())?;
            message = message.with_time_to_live(ttl);
        }
        for (key, value) in self.user_properties {
            message = message.with_user_property(key, value);
        }
        Ok((self.entity, message))
    }
}

// ---------------------------------------------------------------------------
// JobHost
// ---------------------------------------------------------------------------

pub struct JobHost {
    provider: InMemoryMessagingProvider,
    functions: Vec<Box<dyn HostedFunction>>,
    listeners: Vec<(FunctionName, Arc<Listener>)>,
    cancellation: CancellationToken,
}

impl JobHost {
    /// Registers every configured function, creating missing entities.
    pub fn new(config: &HostConfig, provider: InMemoryMessagingProvider) -> Result<Self, HostError> {
        config.validate()?;
        let functions = config
            .functions
            .iter()
            .map(|function| register(function, &config.service_bus, &provider))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            provider,
            functions,
            listeners: Vec::new(),
            cancellation: CancellationToken::new(),
        })
    }

    pub fn provider(&self) -> &InMemoryMessagingProvider {
        &self.provider
    }

    /// Descriptors of every registered trigger parameter.
    pub fn descriptors(&self) -> Vec<(FunctionName, ParameterDescriptor)> {
        self.functions
            .iter()
            .map(|function| (function.name().clone(), function.describe()))
            .collect()
    }

    pub fn listeners(&self) -> impl Iterator<Item = &Arc<Listener>> {
        self.listeners.iter().map(|(_, listener)| listener)
    }

    /// Creates and starts a listener per function.
    ///
    /// On failure, listeners started so far are stopped again.
    pub async fn start(&mut self) -> Result<(), HostError> {
        for index in 0..self.functions.len() {
            if let Err(error) = self.start_function(index).await {
                self.stop().await;
                return Err(error);
            }
        }
        info!(listeners = self.listeners.len(), "Job host started");
        Ok(())
    }

    async fn start_function(&mut self, index: usize) -> Result<(), HostError> {
        let function = &self.functions[index];
        let name = function.name().clone();
        let to_host_error = |source| HostError::Listener {
            function: name.to_string(),
            source,
        };

        let listener = function
            .create_listener(self.cancellation.clone())
            .await
            .map_err(to_host_error)?;
        self.listeners.push((name.clone(), Arc::clone(&listener)));
        listener
            .start(&self.cancellation)
            .await
            .map_err(to_host_error)
    }

    /// Sends every message in a JSON-lines seed file.
    pub async fn replay(&self, path: &Path) -> Result<usize, HostError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| HostError::SeedFile {
                    path: path.to_path_buf(),
                    source,
                })?;

        let mut sent = 0;
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let invalid = |reason: String| HostError::SeedMessage {
                path: path.to_path_buf(),
                line: index + 1,
                reason,
            };

            let seed: SeedMessage =
                serde_json::from_str(line).map_err(|e| invalid(e.to_string()))?;
            let (entity, message) = seed.into_message().map_err(invalid)?;
            self.provider
                .send(&entity, message)
                .map_err(|e| invalid(e.to_string()))?;
            sent += 1;
        }

        info!(path = %path.display(), messages = sent, "Seed file replayed");
        Ok(sent)
    }

    /// Cancels pending listener creation and stops every listener, draining
    /// in-flight invocations.
    pub async fn stop(&mut self) {
        self.cancellation.cancel();

        let mut stopping = JoinSet::new();
        for (name, listener) in self.listeners.drain(..) {
            stopping.spawn(async move {
                let result = listener.stop().await;
                (name, result)
            });
        }

        while let Some(joined) = stopping.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!(function = %name, "Listener stopped"),
                Ok((name, Err(error))) => warn!(function = %name, %error, "Listener failed to stop cleanly"),
                Err(error) => warn!(%error, "Listener stop task panicked"),
            }
        }
    }
}
