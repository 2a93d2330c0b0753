//! Error handling for argbind.

use thiserror::Error;

use crate::convert::ConvertError;

/// Boxed error used for causes coming from user supplied code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for argbind operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The declared command tree is inconsistent. Raised while configuring or
    /// building the command model, before any argument is looked at.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No converter could be resolved for a parameter.
    #[error("Could not find converter for {parameter} (type {type_name})")]
    NoConverterFound {
        parameter: String,
        type_name: String,
    },

    /// A converter failed for a reason other than "not supported".
    #[error("Failed to convert '{value}' for {parameter} using {converter}: {source}")]
    ConversionFailed {
        parameter: String,
        value: String,
        converter: String,
        #[source]
        source: ConvertError,
    },

    /// A parameter validator or the settings validation rejected the input.
    #[error("{message}")]
    Validation { message: String },

    /// A required parameter was not supplied anywhere on the command line.
    #[error("Command '{command}' is missing required {kind} '{parameter}'")]
    RequiredParameterMissing {
        command: String,
        kind: &'static str,
        parameter: String,
    },

    /// Bound values could not be turned into a settings instance.
    #[error("Binding error: {0}")]
    Binding(String),

    /// The tokenizer adapter rejected the raw arguments.
    #[error(transparent)]
    Parse(#[from] clap::Error),

    /// Loading a YAML command mapping failed.
    #[error("Mapping error: {0:#}")]
    Mapping(anyhow::Error),

    /// A command body failed.
    #[error(transparent)]
    Command(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub(crate) fn binding(msg: impl Into<String>) -> Self {
        Error::Binding(msg.into())
    }
}

/// A Result type alias for argbind operations.
pub type Result<T> = std::result::Result<T, Error>;
