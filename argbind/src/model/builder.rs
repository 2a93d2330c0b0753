use std::sync::Arc;

use tracing::{debug, trace};

use super::{validator, CommandId, CommandInfo, CommandModel};
use crate::configuration::{Configuration, ConfiguredCommand};
use crate::error::Result;
use crate::parameter::{CommandParameter, ParameterId, ParameterRole};
use crate::settings::SettingsType;

/// Provisional id for parameters not yet added to the model.
const PENDING: ParameterId = ParameterId(usize::MAX);

/// Builds and validates the command model for a configuration.
pub fn build(configuration: &Configuration) -> Result<CommandModel> {
    let mut builder = ModelBuilder::default();

    let mut roots = Vec::with_capacity(configuration.commands.len());
    for command in &configuration.commands {
        roots.push(builder.build_command(None, command)?);
    }

    let default_command = match &configuration.default_command {
        Some(command) => {
            // The application examples belong to the default command.
            let mut command = command.clone();
            command.examples.extend(configuration.examples.iter().cloned());
            Some(builder.build_command(None, &command)?)
        }
        None => None,
    };

    let model = CommandModel {
        settings: configuration.settings.clone(),
        commands: builder.commands,
        roots,
        default_command,
        parameters: builder.parameters,
        examples: configuration.examples.clone(),
    };
    validator::validate(&model)?;
    Ok(model)
}

/// One inheritance level of a settings type.
struct Level<'a> {
    level: i32,
    sort_order: i32,
    settings: &'a SettingsType,
}

#[derive(Default)]
struct ModelBuilder {
    commands: Vec<CommandInfo>,
    parameters: Vec<Arc<CommandParameter>>,
}

impl ModelBuilder {
    fn build_command(&mut self, parent: Option<CommandId>, command: &ConfiguredCommand) -> Result<CommandId> {
        let id = CommandId(self.commands.len());
        let resolved = self.resolve_parameters(parent, command)?;

        let mut parameters = Vec::with_capacity(resolved.len());
        for mut parameter in resolved {
            parameter.id = ParameterId(self.parameters.len());
            let parameter = Arc::new(parameter);
            self.parameters.push(Arc::clone(&parameter));
            parameters.push(parameter);
        }

        debug!(
            "Built command '{}' ({}) with {} parameters",
            command.name,
            command.settings_type.name(),
            parameters.len()
        );

        self.commands.push(CommandInfo {
            id,
            name: command.name.clone(),
            aliases: command.aliases.clone(),
            description: command.description.clone(),
            data: command.data.clone(),
            handler: command.handler.clone(),
            settings_type: Arc::clone(&command.settings_type),
            parent,
            children: Vec::new(),
            parameters,
            examples: command.examples.clone(),
            is_default_command: command.is_default_command,
            is_hidden: command.is_hidden,
        });

        let mut children = Vec::with_capacity(command.children.len());
        for child in &command.children {
            children.push(self.build_command(Some(id), child)?);
        }
        self.commands[id.0].children = children;

        Ok(id)
    }

    fn ancestors(&self, parent: Option<CommandId>) -> impl Iterator<Item = &CommandInfo> + '_ {
        std::iter::successors(parent.map(|p| &self.commands[p.0]), |c| {
            c.parent.map(|p| &self.commands[p.0])
        })
    }

    /// Inheritance levels of the command's settings type, ordered by
    /// (level, sort order). A base type that an ancestor command already uses
    /// as its own settings type moves one level up.
    fn levels<'a>(&self, parent: Option<CommandId>, settings: &'a SettingsType) -> Vec<Level<'a>> {
        let mut levels = Vec::new();
        let mut level = 0;
        let mut sort_order = 0;
        let mut current = Some(settings);
        while let Some(ty) = current {
            levels.push(Level {
                level,
                sort_order,
                settings: ty,
            });
            current = ty.base().map(Arc::as_ref);
            if let Some(base) = current {
                if self.ancestors(parent).any(|a| a.settings_type.id() == base.id()) {
                    level -= 1;
                }
            }
            sort_order -= 1;
        }
        levels.sort_by_key(|l| (l.level, l.sort_order));
        levels
    }

    fn resolve_parameters(
        &self,
        parent: Option<CommandId>,
        command: &ConfiguredCommand,
    ) -> Result<Vec<CommandParameter>> {
        let mut result = Vec::new();
        let mut position = 0;

        for group in self.levels(parent, &command.settings_type) {
            let declaring = group.settings;
            let mut arguments = Vec::new();

            for decl in declaring.declared_parameters() {
                let mut parameter = CommandParameter::from_decl(PENDING, decl, declaring.id(), declaring.name())?;
                if parameter.is_option() {
                    if !self.have_parent_with_option(parent, &parameter) {
                        result.push(parameter);
                    } else if self.allow_parent_option(parent, command, &parameter) {
                        trace!("Option '{}' shadowed on '{}'", parameter.property, command.name);
                        if let ParameterRole::Option(info) = &mut parameter.role {
                            info.is_shadowed = true;
                        }
                        result.push(parameter);
                    }
                } else if !self.have_parent_with_argument(parent, &parameter) {
                    arguments.push(parameter);
                }
            }

            arguments.sort_by_key(|a| a.as_argument().map_or(0, |info| info.declared_position));
            for argument in &mut arguments {
                if let ParameterRole::Argument(info) = &mut argument.role {
                    info.position = position;
                    position += 1;
                }
            }
            result.extend(arguments);
        }

        Ok(result)
    }

    fn have_parent_with_option(&self, parent: Option<CommandId>, option: &CommandParameter) -> bool {
        self.ancestors(parent).any(|a| {
            a.parameters
                .iter()
                .any(|p| p.is_option() && option.have_same_backing_property_as(p))
        })
    }

    fn have_parent_with_argument(&self, parent: Option<CommandId>, argument: &CommandParameter) -> bool {
        self.ancestors(parent).any(|a| {
            a.parameters
                .iter()
                .any(|p| p.is_argument() && argument.have_same_backing_property_as(p))
        })
    }

    /// An inherited option may reappear on a descendant when it is marked
    /// shadowable, or when the immediate parent uses the same settings type
    /// and the option is declared directly on it.
    fn allow_parent_option(
        &self,
        parent: Option<CommandId>,
        command: &ConfiguredCommand,
        option: &CommandParameter,
    ) -> bool {
        if option.as_option().is_some_and(|info| info.shadowable) {
            return true;
        }
        let Some(parent) = parent.map(|p| &self.commands[p.0]) else {
            return false;
        };
        let own = command.settings_type.id();
        parent.settings_type.id() == own && option.declaring_type == own
    }
}
