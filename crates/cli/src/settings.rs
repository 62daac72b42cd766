//! Host configuration.
//!
//! Loaded in three layers: built-in defaults, an optional file named by
//! `BUSJOBS_CONFIG` (default `config/busjobs`, any format the `config` crate
//! recognises by extension), then `BUSJOBS__SECTION__KEY` environment
//! variables.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use binding::{
    BindingType, EntityDescriptor, FunctionName, ParameterKind, ParameterName, QueueName,
    ServiceBusAccount, ServiceBusOptions, SubscriptionName, TopicName,
};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::HostError;

pub const CONFIG_PATH_VAR: &str = "BUSJOBS_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/busjobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Spans are only exported when set.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    "busjobs".into()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: default_service_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceBusConfig {
    #[serde(default)]
    pub account: ServiceBusAccount,
    #[serde(default)]
    pub options: ServiceBusOptions,
}

/// One job function and the entity that triggers it.
///
/// Exactly one entity form is allowed: `queue`, or `topic` together with
/// `subscription`.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionConfig {
    pub name: String,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub parameter: ParameterKind,
    #[serde(default = "default_parameter_name")]
    pub parameter_name: String,
    /// Top-level payload members exposed as binding data; JSON parameters only.
    #[serde(default)]
    pub json_fields: BTreeMap<String, BindingType>,
}

fn default_parameter_name() -> String {
    "message".into()
}

impl FunctionConfig {
    fn invalid(&self, reason: impl Into<String>) -> HostError {
        HostError::InvalidFunction {
            function: self.name.clone(),
            reason: reason.into(),
        }
    }

    pub fn function_name(&self) -> Result<FunctionName, HostError> {
        FunctionName::new(self.name.clone()).ok_or_else(|| self.invalid("name is empty"))
    }

    pub fn parameter_name(&self) -> Result<ParameterName, HostError> {
        ParameterName::new(self.parameter_name.clone())
            .ok_or_else(|| self.invalid("parameter_name is empty"))
    }

    /// Resolves the configured entity.
    pub fn entity(&self) -> Result<EntityDescriptor, HostError> {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
        match (
            non_empty(&self.queue),
            non_empty(&self.topic),
            non_empty(&self.subscription),
        ) {
            (Some(queue), None, None) => QueueName::new(queue)
                .map(EntityDescriptor::queue)
                .ok_or_else(|| self.invalid("queue name is empty")),
            (None, Some(topic), Some(subscription)) => {
                match (TopicName::new(topic), SubscriptionName::new(subscription)) {
                    (Some(topic), Some(subscription)) => {
                        Ok(EntityDescriptor::subscription(topic, subscription))
                    }
                    _ => Err(self.invalid("topic or subscription name is empty")),
                }
            }
            (None, Some(_), None) | (None, None, Some(_)) => {
                Err(self.invalid("topic and subscription must be set together"))
            }
            (None, None, None) => Err(self.invalid("no queue or topic subscription set")),
            (Some(_), _, _) => Err(self.invalid("set either queue or topic/subscription, not both")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayConfig {
    /// JSON-lines file of messages to send once the listeners are running.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub service_bus: ServiceBusConfig,
    #[serde(default)]
    pub functions: Vec<FunctionConfig>,
    #[serde(default)]
    pub replay: ReplayConfig,
}

impl HostConfig {
    /// Loads from `BUSJOBS_CONFIG` (or the default path) and the environment.
    pub fn load() -> Result<Self, HostError> {
        let path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Loads from `path` and the environment, then validates.
    pub fn load_from(path: &str) -> Result<Self, HostError> {
        let settings = Config::builder()
            .set_default("log.level", "info")?
            .set_default("log.format", "json")?
            .set_default("telemetry.service_name", "busjobs")?
            .set_default("service_bus.account.connection_name", "ServiceBus")?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("BUSJOBS").separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every function resolves to an entity and names are unique.
    pub fn validate(&self) -> Result<(), HostError> {
        let mut seen = HashSet::new();
        for function in &self.functions {
            function.function_name()?;
            function.parameter_name()?;
            function.entity()?;
            if !function.json_fields.is_empty() && function.parameter != ParameterKind::Json {
                return Err(function.invalid("json_fields requires parameter = \"json\""));
            }
            if !seen.insert(function.name.to_ascii_lowercase()) {
                return Err(HostError::DuplicateFunction {
                    name: function.name.clone(),
                });
            }
        }
        Ok(())
    }
}
