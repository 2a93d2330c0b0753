//! The resolved command model.
//!
//! Commands live in an arena owned by [`CommandModel`]; parent and child
//! links are [`CommandId`] indices into it.

mod builder;
mod validator;

use std::fmt;
use std::sync::Arc;

pub use builder::build;

use crate::configuration::{AppSettings, CommandData, CommandHandler};
use crate::parameter::{CommandParameter, ParameterId};
use crate::settings::SettingsType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub(crate) usize);

/// A resolved command node.
pub struct CommandInfo {
    pub(crate) id: CommandId,
    pub(crate) name: String,
    pub(crate) aliases: Vec<String>,
    pub(crate) description: Option<String>,
    pub(crate) data: Option<CommandData>,
    pub(crate) handler: Option<Arc<dyn CommandHandler>>,
    pub(crate) settings_type: Arc<SettingsType>,
    pub(crate) parent: Option<CommandId>,
    pub(crate) children: Vec<CommandId>,
    pub(crate) parameters: Vec<Arc<CommandParameter>>,
    pub(crate) examples: Vec<Vec<String>>,
    pub(crate) is_default_command: bool,
    pub(crate) is_hidden: bool,
}

impl CommandInfo {
    pub fn id(&self) -> CommandId {
        self.id
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

    pub fn data(&self) -> Option<&CommandData> {
        self.data.as_ref()
    }

    pub(crate) fn handler(&self) -> Option<&Arc<dyn CommandHandler>> {
        self.handler.as_ref()
    }

    pub fn settings_type(&self) -> &Arc<SettingsType> {
        &self.settings_type
    }

    pub fn parent(&self) -> Option<CommandId> {
        self.parent
    }

    pub fn children(&self) -> &[CommandId] {
        &self.children
    }

    /// Options first within each inheritance level, then arguments.
    pub fn parameters(&self) -> &[Arc<CommandParameter>] {
        &self.parameters
    }

    pub fn options(&self) -> impl Iterator<Item = &Arc<CommandParameter>> + '_ {
        self.parameters.iter().filter(|p| p.is_option())
    }

    /// Arguments ordered by position.
    pub fn arguments(&self) -> Vec<&Arc<CommandParameter>> {
        let mut args: Vec<_> = self.parameters.iter().filter(|p| p.is_argument()).collect();
        args.sort_by_key(|p| p.position());
        args
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

    /// Whether `name` matches the command name or one of its aliases,
    /// ignoring case.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

impl fmt::Debug for CommandInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

pub struct CommandModel {
    pub(crate) settings: AppSettings,
    pub(crate) commands: Vec<CommandInfo>,
    pub(crate) roots: Vec<CommandId>,
    pub(crate) default_command: Option<CommandId>,
    pub(crate) parameters: Vec<Arc<CommandParameter>>,
    pub(crate) examples: Vec<Vec<String>>,
}

impl CommandModel {
    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn command(&self, id: CommandId) -> &CommandInfo {
        &self.commands[id.0]
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandInfo> + '_ {
        self.commands.iter()
    }

    /// Top level commands, excluding the root default command.
    pub fn roots(&self) -> impl Iterator<Item = &CommandInfo> + '_ {
        self.roots.iter().map(|id| self.command(*id))
    }

    pub fn default_command(&self) -> Option<&CommandInfo> {
        self.default_command.map(|id| self.command(id))
    }

    pub fn children(&self, id: CommandId) -> impl Iterator<Item = &CommandInfo> + '_ {
        self.command(id).children.iter().map(|c| self.command(*c))
    }

    pub fn parent(&self, id: CommandId) -> Option<&CommandInfo> {
        self.command(id).parent.map(|p| self.command(p))
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: CommandId) -> impl Iterator<Item = &CommandInfo> + '_ {
        std::iter::successors(self.parent(id), |c| self.parent(c.id))
    }

    /// Command names from the root down to `id`.
    pub fn path(&self, id: CommandId) -> Vec<String> {
        let mut path: Vec<String> = self.ancestors(id).map(|c| c.name.clone()).collect();
        path.reverse();
        path.push(self.command(id).name.clone());
        path
    }

    pub fn find_root(&self, name: &str) -> Option<&CommandInfo> {
        self.roots().find(|c| c.matches_name(name))
    }

    pub fn find_child(&self, id: CommandId, name: &str) -> Option<&CommandInfo> {
        self.children(id).find(|c| c.matches_name(name))
    }

    /// The hidden default child of a branch, if any.
    pub fn default_child(&self, id: CommandId) -> Option<&CommandInfo> {
        self.children(id).find(|c| c.is_default_command)
    }

    pub fn parameter(&self, id: ParameterId) -> &Arc<CommandParameter> {
        &self.parameters[id.0]
    }

    pub fn examples(&self) -> &[Vec<String>] {
        &self.examples
    }
}

impl fmt::Debug for CommandModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandModel")
            .field("commands", &self.commands)
            .field("roots", &self.roots)
            .field("default_command", &self.default_command)
            .finish_non_exhaustive()
    }
}
