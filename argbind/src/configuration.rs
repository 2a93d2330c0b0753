//! Declaring the command tree: commands, delegates, branches, default
//! commands and examples.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::parameter::ValidationResult;
use crate::settings::{CommandSettings, SettingsType};

/// Name given to the hidden child that runs when a branch is invoked
/// without a sub-command.
pub const DEFAULT_COMMAND_NAME: &str = "__default_command";

/// Opaque per-command data handed back to the command at execution.
pub type CommandData = Arc<dyn Any + Send + Sync>;

/// Execution context passed to commands.
#[derive(Clone)]
pub struct CommandContext {
    name: String,
    path: Vec<String>,
    data: Option<CommandData>,
}

impl CommandContext {
    pub(crate) fn new(name: String, path: Vec<String>, data: Option<CommandData>) -> Self {
        Self { name, path, data }
    }

    /// Name of the executing command.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command names from the root to the executing command.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn data(&self) -> Option<&CommandData> {
        self.data.as_ref()
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A command bound to one settings type.
pub trait Command: Send + Sync + 'static {
    type Settings: CommandSettings;

    /// Runs after binding, before [`Command::execute`].
    fn validate(&self, _context: &CommandContext, _settings: &Self::Settings) -> ValidationResult {
        ValidationResult::success()
    }

    fn execute(&self, context: &CommandContext, settings: &Self::Settings) -> anyhow::Result<i32>;
}

/// Type-erased form of a [`Command`] or delegate.
pub trait CommandHandler: Send + Sync {
    fn validate(&self, context: &CommandContext, settings: &dyn CommandSettings) -> Result<ValidationResult>;
    fn execute(&self, context: &CommandContext, settings: &dyn CommandSettings) -> Result<i32>;
}

fn settings_as<'a, S: CommandSettings>(settings: &'a dyn CommandSettings, command: &str) -> Result<&'a S> {
    settings.downcast_ref::<S>().ok_or_else(|| {
        Error::binding(format!(
            "Command '{}' expected settings of type {}",
            command,
            std::any::type_name::<S>()
        ))
    })
}

struct TypedCommand<C>(C);

impl<C: Command> CommandHandler for TypedCommand<C> {
    fn validate(&self, context: &CommandContext, settings: &dyn CommandSettings) -> Result<ValidationResult> {
        let settings = settings_as::<C::Settings>(settings, context.name())?;
        Ok(self.0.validate(context, settings))
    }

    fn execute(&self, context: &CommandContext, settings: &dyn CommandSettings) -> Result<i32> {
        let settings = settings_as::<C::Settings>(settings, context.name())?;
        Ok(self.0.execute(context, settings)?)
    }
}

struct DelegateCommand<S, F> {
    func: F,
    _marker: PhantomData<fn(&S)>,
}

impl<S, F> CommandHandler for DelegateCommand<S, F>
where
    S: CommandSettings,
    F: Fn(&CommandContext, &S) -> anyhow::Result<i32> + Send + Sync,
{
    fn validate(&self, _context: &CommandContext, _settings: &dyn CommandSettings) -> Result<ValidationResult> {
        Ok(ValidationResult::success())
    }

    fn execute(&self, context: &CommandContext, settings: &dyn CommandSettings) -> Result<i32> {
        let settings = settings_as::<S>(settings, context.name())?;
        Ok((self.func)(context, settings)?)
    }
}

/// A command as declared by the application.
#[derive(Clone)]
pub struct ConfiguredCommand {
    pub(crate) name: String,
    pub(crate) aliases: Vec<String>,
    pub(crate) description: Option<String>,
    pub(crate) data: Option<CommandData>,
    pub(crate) handler: Option<Arc<dyn CommandHandler>>,
    pub(crate) settings_type: Arc<SettingsType>,
    pub(crate) is_default_command: bool,
    pub(crate) is_hidden: bool,
    pub(crate) children: Vec<ConfiguredCommand>,
    pub(crate) examples: Vec<Vec<String>>,
}

impl ConfiguredCommand {
    fn new(
        name: impl Into<String>,
        handler: Option<Arc<dyn CommandHandler>>,
        settings_type: Arc<SettingsType>,
        is_default_command: bool,
    ) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            description: None,
            data: None,
            handler,
            settings_type,
            is_default_command,
            // Default commands are always hidden.
            is_hidden: is_default_command,
            children: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn from_command<C: Command>(name: impl Into<String>, command: C, is_default_command: bool) -> Self {
        Self::new(
            name,
            Some(Arc::new(TypedCommand(command))),
            C::Settings::describe(),
            is_default_command,
        )
    }

    pub fn from_delegate<S, F>(name: impl Into<String>, func: F) -> Self
    where
        S: CommandSettings,
        F: Fn(&CommandContext, &S) -> anyhow::Result<i32> + Send + Sync + 'static,
    {
        let handler = DelegateCommand {
            func,
            _marker: PhantomData,
        };
        Self::new(name, Some(Arc::new(handler)), S::describe(), false)
    }

    pub fn from_branch(name: impl Into<String>, settings_type: Arc<SettingsType>) -> Self {
        Self::new(name, None, settings_type, false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn settings_type(&self) -> &Arc<SettingsType> {
        &self.settings_type
    }

    pub fn children(&self) -> &[ConfiguredCommand] {
        &self.children
    }

    pub fn examples(&self) -> &[Vec<String>] {
        &self.examples
    }

    pub fn is_branch(&self) -> bool {
        self.handler.is_none()
    }

    pub fn is_default_command(&self) -> bool {
        self.is_default_command
    }

    pub fn is_hidden(&self) -> bool {
        self.is_hidden
    }

    /// Adds an alias; aliases compare case-insensitively and duplicates are
    /// ignored.
    pub(crate) fn add_alias(&mut self, alias: impl Into<String>) {
        let alias = alias.into();
        if !self.aliases.iter().any(|a| a.eq_ignore_ascii_case(&alias)) {
            self.aliases.push(alias);
        }
    }
}

impl fmt::Debug for ConfiguredCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredCommand")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("settings", &self.settings_type.name())
            .field("is_branch", &self.is_branch())
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// Application level settings.
#[derive(Debug, Clone, Default)]
pub struct AppSettings {
    pub application_name: Option<String>,
    pub application_version: Option<String>,
}

/// The complete declared command tree.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    pub(crate) settings: AppSettings,
    pub(crate) commands: Vec<ConfiguredCommand>,
    pub(crate) default_command: Option<ConfiguredCommand>,
    pub(crate) examples: Vec<Vec<String>>,
}

impl Configuration {
    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn commands(&self) -> &[ConfiguredCommand] {
        &self.commands
    }

    pub fn default_command(&self) -> Option<&ConfiguredCommand> {
        self.default_command.as_ref()
    }

    pub fn examples(&self) -> &[Vec<String>] {
        &self.examples
    }
}

// =====================
// Configurators
// =====================

/// Fluent access to a command that was just added.
pub struct CommandConfigurator<'a> {
    command: &'a mut ConfiguredCommand,
}

impl<'a> CommandConfigurator<'a> {
    pub fn with_alias(self, alias: impl Into<String>) -> Self {
        self.command.add_alias(alias);
        self
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.command.description = Some(description.into());
        self
    }

    pub fn with_example<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.examples.push(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_data<D: Any + Send + Sync>(self, data: D) -> Self {
        self.command.data = Some(Arc::new(data));
        self
    }

    pub fn hidden(self) -> Self {
        self.command.is_hidden = true;
        self
    }
}

/// Operations shared by the root configurator and branch configurators.
pub trait ConfiguratorScope {
    /// The children of this scope.
    fn commands_mut(&mut self) -> &mut Vec<ConfiguredCommand>;

    fn add_configured(&mut self, command: ConfiguredCommand) -> CommandConfigurator<'_> {
        let commands = self.commands_mut();
        let index = commands.len();
        commands.push(command);
        CommandConfigurator {
            command: &mut commands[index],
        }
    }

    fn add_command<C: Command>(&mut self, name: &str, command: C) -> CommandConfigurator<'_> {
        self.add_configured(ConfiguredCommand::from_command(name, command, false))
    }

    fn add_delegate<S, F>(&mut self, name: &str, func: F) -> CommandConfigurator<'_>
    where
        S: CommandSettings,
        F: Fn(&CommandContext, &S) -> anyhow::Result<i32> + Send + Sync + 'static,
    {
        self.add_configured(ConfiguredCommand::from_delegate(name, func))
    }

    /// Adds a branch whose children must use settings derived from `S`.
    fn add_branch<S, F>(&mut self, name: &str, configure: F) -> CommandConfigurator<'_>
    where
        S: CommandSettings,
        F: FnOnce(&mut BranchConfigurator<'_>),
    {
        let mut branch = ConfiguredCommand::from_branch(name, S::describe());
        configure(&mut BranchConfigurator {
            command: &mut branch,
        });
        self.add_configured(branch)
    }
}

pub struct BranchConfigurator<'a> {
    command: &'a mut ConfiguredCommand,
}

impl BranchConfigurator<'_> {
    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.command.description = Some(description.into());
        self
    }

    pub fn add_example<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.examples.push(args.into_iter().map(Into::into).collect());
        self
    }

    /// Runs `command` when the branch is invoked without a sub-command.
    pub fn set_default_command<C: Command>(&mut self, command: C) -> &mut Self {
        self.command
            .children
            .push(ConfiguredCommand::from_command(DEFAULT_COMMAND_NAME, command, true));
        self
    }

    pub fn hide_branch(&mut self) -> &mut Self {
        self.command.is_hidden = true;
        self
    }

    pub fn set_data<D: Any + Send + Sync>(&mut self, data: D) -> &mut Self {
        self.command.data = Some(Arc::new(data));
        self
    }
}

impl ConfiguratorScope for BranchConfigurator<'_> {
    fn commands_mut(&mut self) -> &mut Vec<ConfiguredCommand> {
        &mut self.command.children
    }
}

/// Root configurator.
#[derive(Debug, Default)]
pub struct Configurator {
    configuration: Configuration,
}

impl Configurator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings_mut(&mut self) -> &mut AppSettings {
        &mut self.configuration.settings
    }

    pub fn set_application_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.configuration.settings.application_name = Some(name.into());
        self
    }

    pub fn set_application_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.configuration.settings.application_version = Some(version.into());
        self
    }

    pub fn add_example<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.configuration
            .examples
            .push(args.into_iter().map(Into::into).collect());
        self
    }

    /// Runs `command` when no command is named on the command line.
    pub fn set_default_command<C: Command>(&mut self, command: C) -> CommandConfigurator<'_> {
        self.set_default_configured(ConfiguredCommand::from_command(DEFAULT_COMMAND_NAME, command, true))
    }

    pub(crate) fn set_default_configured(&mut self, command: ConfiguredCommand) -> CommandConfigurator<'_> {
        CommandConfigurator {
            command: self.configuration.default_command.insert(command),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn into_configuration(self) -> Configuration {
        self.configuration
    }
}

impl From<Configuration> for Configurator {
    fn from(configuration: Configuration) -> Self {
        Self { configuration }
    }
}

impl ConfiguratorScope for Configurator {
    fn commands_mut(&mut self) -> &mut Vec<ConfiguredCommand> {
        &mut self.configuration.commands
    }
}
