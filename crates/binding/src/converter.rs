//! Trigger value → message conversion.
//!
//! A [`ConverterChain`] is a closed, ordered list of converters built once per
//! binding from the parameter's declared kind. The first converter that
//! accepts the value wins.

use serde::{Deserialize, Serialize};

use crate::{BindingError, Message, TriggerValue};

pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Declared kind of the job function parameter a trigger binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// The parameter is the message itself.
    #[default]
    Message,
    /// The parameter is the body decoded as UTF-8 text.
    Text,
    /// The parameter is the raw body.
    Bytes,
    /// The parameter is the body deserialized from JSON.
    Json,
}

/// How a string trigger value becomes a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringConversion {
    /// UTF-8 body tagged `text/plain`.
    Text,
    /// UTF-8 body tagged `application/octet-stream`.
    Binary,
    /// UTF-8 body tagged `application/json`.
    Json,
}

impl StringConversion {
    /// Selects the conversion for a parameter kind.
    pub fn for_parameter(kind: ParameterKind) -> Self {
        match kind {
            ParameterKind::Message | ParameterKind::Text => Self::Text,
            ParameterKind::Bytes => Self::Binary,
            ParameterKind::Json => Self::Json,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Self::Text => CONTENT_TYPE_TEXT,
            Self::Binary => CONTENT_TYPE_OCTET_STREAM,
            Self::Json => CONTENT_TYPE_JSON,
        }
    }

    fn convert(self, input: &str) -> Message {
        Message::new(input.as_bytes()).with_content_type(self.content_type())
    }
}

/// One link in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageConverter {
    /// Accepts a value that already is a message, unchanged.
    Identity,
    /// Accepts a string and builds a message from it.
    FromString(StringConversion),
}

impl MessageConverter {
    /// Returns the converted message, or hands the value back if this
    /// converter does not accept it.
    fn try_convert(self, value: TriggerValue) -> Result<Message, TriggerValue> {
        match (self, value) {
            (Self::Identity, TriggerValue::Message(message)) => Ok(message),
            (Self::FromString(conversion), TriggerValue::Text(text)) => {
                Ok(conversion.convert(&text))
            }
            (_, other) => Err(other),
        }
    }
}

/// Ordered converters from trigger values to [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterChain {
    converters: Vec<MessageConverter>,
}

impl ConverterChain {
    /// Builds the chain for a parameter: identity first, then the string
    /// conversion matching the parameter kind.
    pub fn for_parameter(kind: ParameterKind) -> Self {
        Self {
            converters: vec![
                MessageConverter::Identity,
                MessageConverter::FromString(StringConversion::for_parameter(kind)),
            ],
        }
    }

    pub fn converters(&self) -> &[MessageConverter] {
        &self.converters
    }

    /// Converts `value` with the first converter that accepts it.
    pub fn convert(&self, value: TriggerValue) -> Result<Message, BindingError> {
        let mut value = value;
        for converter in &self.converters {
            match converter.try_convert(value) {
                Ok(message) => return Ok(message),
                Err(rejected) => value = rejected,
            }
        }
        Err(BindingError::Conversion {
            value_kind: value.kind(),
        })
    }
}
