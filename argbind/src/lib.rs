//! Typed command trees for command line applications.
//!
//! Applications declare commands and their settings types through a
//! [`Configurator`] (or a YAML mapping), argbind builds a [`CommandModel`]
//! from them, matches the process arguments against it and binds the
//! matched values into a validated settings instance that the command
//! consumes.

use std::ffi::OsString;

use tracing::debug;

pub mod binding;
pub mod cli;
pub mod configuration;
pub mod convert;
pub mod error;
pub mod mapping;
pub mod model;
pub mod parameter;
pub mod resolver;
pub mod settings;
pub mod tree;
pub mod types;
pub mod value;

pub use binding::{Binder, BoundSettings, CommandValueLookup};
pub use configuration::{
    AppSettings, BranchConfigurator, Command, CommandConfigurator, CommandContext, CommandHandler, Configuration,
    Configurator, ConfiguratorScope, ConfiguredCommand, DEFAULT_COMMAND_NAME,
};
pub use convert::{ConvertError, ConverterRegistry, TypeConverter};
pub use error::{Error, Result};
pub use model::{CommandId, CommandInfo, CommandModel};
pub use parameter::{
    CommandParameter, ParameterContext, ParameterDecl, ParameterKind, ParameterValidationContext,
    ParameterValidator, ParameterValueProvider, ValidationResult,
};
pub use resolver::{DefaultTypeResolver, TypeResolver};
pub use settings::{CommandSettings, EmptySettings, SettingsType};
pub use tree::CommandTree;
pub use types::ParamType;
pub use value::{FlagValue, Value};

// =====================
// Application entry point
// =====================

/// Wires configuration, the clap adapter, binding and execution together.
pub struct CommandApp {
    configurator: Configurator,
    registry: ConverterRegistry,
    resolver: Box<dyn TypeResolver>,
}

impl Default for CommandApp {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Configuration> for CommandApp {
    fn from(configuration: Configuration) -> Self {
        Self {
            configurator: Configurator::from(configuration),
            ..Self::new()
        }
    }
}

impl CommandApp {
    #[must_use]
    pub fn new() -> Self {
        Self {
            configurator: Configurator::new(),
            registry: ConverterRegistry::intrinsic(),
            resolver: Box::new(DefaultTypeResolver::new()),
        }
    }

    /// Replaces the resolver used for settings instances and named
    /// converters.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl TypeResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ConverterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn configure<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut Configurator),
    {
        configure(&mut self.configurator);
        self
    }

    pub fn configuration(&self) -> &Configuration {
        self.configurator.configuration()
    }

    /// Builds the command model from the current configuration.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when the declared tree is inconsistent.
    pub fn build_model(&self) -> Result<CommandModel> {
        model::build(self.configurator.configuration())
    }

    /// Matches `args` (including the program name) and binds the settings of
    /// the matched command without executing it.
    ///
    /// # Errors
    /// Any configuration, parse, conversion, validation or binding error.
    pub fn parse<I, T>(&self, args: I) -> Result<BoundSettings>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let model = self.build_model()?;
        let tree = cli::tokenize(&model, args)?;
        Binder::new(&model, &self.registry, self.resolver.as_ref()).bind(&tree)
    }

    /// Runs the matched command and returns its exit code.
    ///
    /// # Errors
    /// Any error raised before or by the command body.
    pub fn try_run<I, T>(&self, args: I) -> Result<i32>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let model = self.build_model()?;
        let tree = cli::tokenize(&model, args)?;
        let bound = Binder::new(&model, &self.registry, self.resolver.as_ref()).bind(&tree)?;

        let info = model.command(bound.command());
        let handler = info
            .handler()
            .ok_or_else(|| Error::binding(format!("Command '{}' cannot be executed", info.name())))?;
        let context = CommandContext::new(info.name().to_string(), model.path(info.id()), info.data().cloned());

        let result = handler.validate(&context, bound.settings())?;
        if !result.is_successful() {
            return Err(Error::Validation {
                message: result
                    .message()
                    .map_or_else(|| format!("Command '{}' rejected its settings", info.name()), str::to_string),
            });
        }

        debug!("Executing '{}'", context.path().join(" "));
        handler.execute(&context, bound.settings())
    }

    /// Like [`CommandApp::try_run`], but reports errors on stderr.
    ///
    /// Help and version requests print through clap and keep its exit codes;
    /// every other error yields `-1`.
    pub fn run<I, T>(&self, args: I) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match self.try_run(args) {
            Ok(code) => code,
            Err(Error::Parse(err)) => report_parse_error(&err),
            Err(err) => {
                eprintln!("Error: {err:#}");
                -1
            }
        }
    }
}

/// Prints a clap error, falling back to plain stderr when clap cannot
/// write, and returns the exit code for it.
fn report_parse_error(err: &clap::Error) -> i32 {
    if err.print().is_err() {
        eprintln!("{err}");
    }
    if err.use_stderr() {
        -1
    } else {
        err.exit_code()
    }
}
