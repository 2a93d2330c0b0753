use std::collections::{HashMap, HashSet};

use super::{CommandId, CommandInfo, CommandModel};
use crate::error::{Error, Result};
use crate::parameter::{CommandParameter, DeclRole, ParameterKind};
use crate::types::TypeShape;

/// Rejects inconsistent models before any argument is parsed.
pub(super) fn validate(model: &CommandModel) -> Result<()> {
    if model.roots.is_empty() && model.default_command.is_none() {
        return Err(Error::configuration("No commands have been configured"));
    }

    validate_siblings(model, &model.roots)?;
    for info in &model.commands {
        validate_command(model, info)?;
        validate_siblings(model, &info.children)?;
    }
    Ok(())
}

fn validate_siblings(model: &CommandModel, siblings: &[CommandId]) -> Result<()> {
    let mut seen: HashSet<String> = HashSet::new();
    for id in siblings {
        let info = model.command(*id);
        for name in std::iter::once(&info.name).chain(info.aliases.iter()) {
            if !seen.insert(name.to_lowercase()) {
                return Err(Error::configuration(format!(
                    "Two or more commands have the name or alias '{}'",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_command(model: &CommandModel, info: &CommandInfo) -> Result<()> {
    if info.is_branch() && info.children.is_empty() {
        return Err(Error::configuration(format!(
            "The branch '{}' does not define any commands",
            info.name
        )));
    }

    if let Some(parent) = model.parent(info.id) {
        if !info.settings_type.is_assignable_to(parent.settings_type.id()) {
            return Err(Error::configuration(format!(
                "Settings type {} of command '{}' does not inherit {} of '{}'",
                info.settings_type.name(),
                info.name,
                parent.settings_type.name(),
                parent.name
            )));
        }
    }

    validate_declared_positions(info)?;
    validate_arguments(info)?;
    for parameter in &info.parameters {
        validate_parameter(info, parameter)?;
    }
    validate_option_names(model, info)
}

fn validate_declared_positions(info: &CommandInfo) -> Result<()> {
    for settings in info.settings_type.hierarchy() {
        let mut positions: HashMap<usize, &str> = HashMap::new();
        for decl in settings.declared_parameters() {
            if let DeclRole::Argument { position, .. } = &decl.role {
                if let Some(existing) = positions.insert(*position, decl.property) {
                    return Err(Error::configuration(format!(
                        "Settings type {} declares '{}' and '{}' at the same argument position {}",
                        settings.name(),
                        existing,
                        decl.property,
                        position
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_arguments(info: &CommandInfo) -> Result<()> {
    let arguments = info.arguments();
    let vectors: Vec<_> = arguments
        .iter()
        .filter(|a| a.kind == ParameterKind::Vector)
        .collect();
    if vectors.len() > 1 {
        return Err(Error::configuration(format!(
            "Command '{}' has more than one vector argument",
            info.name
        )));
    }
    if let (Some(vector), Some(last)) = (vectors.first(), arguments.last()) {
        if vector.id != last.id {
            return Err(Error::configuration(format!(
                "The vector argument '{}' of command '{}' must be the last argument",
                vector.display_name(),
                info.name
            )));
        }
    }
    for argument in &arguments {
        if argument.is_required && argument.default_value.is_some() {
            return Err(Error::configuration(format!(
                "The required argument '{}' of command '{}' cannot have a default value",
                argument.display_name(),
                info.name
            )));
        }
    }
    Ok(())
}

fn validate_parameter(info: &CommandInfo, parameter: &CommandParameter) -> Result<()> {
    let name = parameter.display_name();
    if parameter.kind == ParameterKind::FlagWithValue && !parameter.param_type.is_flag_value() {
        return Err(Error::configuration(format!(
            "Option '{}' of command '{}' has an optional value but is not a FlagValue",
            name, info.name
        )));
    }
    if let Some(option) = parameter.as_option() {
        let is_flag = parameter.kind == ParameterKind::Flag;
        if option.value_name.is_none() && !is_flag {
            return Err(Error::configuration(format!(
                "Option '{}' of command '{}' is not a flag and has no value name",
                name, info.name
            )));
        }
    }
    if parameter.deconstructor.is_some() {
        if !matches!(parameter.param_type.shape(), TypeShape::Pair { .. }) {
            return Err(Error::configuration(format!(
                "Parameter '{}' of command '{}' has a pair deconstructor but is not a key/value type",
                name, info.name
            )));
        }
        if parameter.converter.is_some() {
            return Err(Error::configuration(format!(
                "Parameter '{}' of command '{}' has both a pair deconstructor and a converter",
                name, info.name
            )));
        }
    }
    Ok(())
}

/// Option names must be unique within a command, including the options it
/// inherits from ancestors.
fn validate_option_names(model: &CommandModel, info: &CommandInfo) -> Result<()> {
    let mut names: HashMap<String, &CommandParameter> = HashMap::new();
    let own = info.parameters.iter().map(|p| p.as_ref());
    let inherited = model
        .ancestors(info.id)
        .flat_map(|a| a.parameters.iter().map(|p| p.as_ref()));

    // clap adds these to every command; version only where a version is shown.
    let mut reserved = vec![("-h", "help"), ("--help", "help")];
    if model.settings.application_version.is_some() && model.default_command == Some(info.id) {
        reserved.extend([("-V", "version"), ("--version", "version")]);
    }

    for parameter in own.chain(inherited) {
        let Some(option) = parameter.as_option() else {
            continue;
        };
        let long = option.long_names.iter().map(|l| format!("--{}", l));
        let short = option.short_names.iter().map(|s| format!("-{}", s));
        for name in long.chain(short) {
            if let Some((_, purpose)) = reserved.iter().find(|(r, _)| *r == name) {
                return Err(Error::configuration(format!(
                    "Option '{}' of command '{}' is reserved for {}",
                    name, info.name, purpose
                )));
            }
            match names.get(&name) {
                Some(existing) if existing.have_same_backing_property_as(parameter) => {}
                Some(existing) => {
                    return Err(Error::configuration(format!(
                        "Option '{}' of command '{}' is declared by both {}.{} and {}.{}",
                        name,
                        info.name,
                        existing.declaring_type_name,
                        existing.property,
                        parameter.declaring_type_name,
                        parameter.property
                    )));
                }
                None => {
                    names.insert(name, parameter);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::configuration::{CommandContext, ConfiguratorScope, Configurator};
    use crate::convert::StringConverter;
    use crate::error::Error;
    use crate::model::build;
    use crate::parameter::{DefaultPairDeconstructor, ParameterDecl};
    use crate::settings::{CommandSettings, EmptySettings, SettingsType};
    use crate::types::ParamType;
    use crate::value::Value;

    fn settings_with(decls: Vec<ParameterDecl>) -> Arc<SettingsType> {
        let mut builder = SettingsType::builder::<EmptySettings>("TestSettings");
        for decl in decls {
            builder = builder.parameter(decl);
        }
        builder.default_factory().build()
    }

    fn build_with(decls: Vec<ParameterDecl>) -> crate::error::Result<crate::model::CommandModel> {
        let mut config = Configurator::new();
        let mut command = crate::configuration::ConfiguredCommand::from_delegate(
            "cmd",
            |_ctx: &CommandContext, _s: &EmptySettings| Ok(0),
        );
        command.settings_type = settings_with(decls);
        config.add_configured(command);
        build(config.configuration())
    }

    fn assert_config_error(result: crate::error::Result<crate::model::CommandModel>, fragment: &str) {
        match result {
            Err(Error::Configuration(msg)) => assert!(msg.contains(fragment), "unexpected message: {}", msg),
            Err(other) => panic!("Expected configuration error, got {:?}", other),
            Ok(_) => panic!("Expected configuration error containing '{}'", fragment),
        }
    }

    // ==================== tree shape ====================

    #[test]
    fn test_no_commands() {
        let config = Configurator::new();
        assert_config_error(build(config.configuration()), "No commands");
    }

    #[test]
    fn test_branch_without_children() {
        let mut config = Configurator::new();
        config.add_branch::<EmptySettings, _>("empty", |_| {});
        assert_config_error(build(config.configuration()), "does not define any commands");
    }

    #[test]
    fn test_sibling_alias_conflict() {
        let mut config = Configurator::new();
        config.add_delegate("add", |_ctx: &CommandContext, _s: &EmptySettings| Ok(0));
        config
            .add_delegate("append", |_ctx: &CommandContext, _s: &EmptySettings| Ok(0))
            .with_alias("ADD");
        assert_config_error(build(config.configuration()), "name or alias 'ADD'");
    }

    #[test]
    fn test_child_settings_must_inherit_branch_settings() {
        #[derive(Debug, Default)]
        struct Unrelated;
        impl CommandSettings for Unrelated {
            fn describe() -> Arc<SettingsType> {
                SettingsType::builder::<Unrelated>("Unrelated").default_factory().build()
            }
        }
        let mut config = Configurator::new();
        config.add_branch::<EmptySettings, _>("tool", |tool| {
            tool.add_delegate("run", |_ctx: &CommandContext, _s: &Unrelated| Ok(0));
        });
        assert_config_error(build(config.configuration()), "does not inherit");
    }

    // ==================== arguments ====================

    #[test]
    fn test_duplicate_declared_position() {
        let result = build_with(vec![
            ParameterDecl::argument(0, "<A>", "a", ParamType::of::<String>()),
            ParameterDecl::argument(0, "<B>", "b", ParamType::of::<String>()),
        ]);
        assert_config_error(result, "same argument position 0");
    }

    #[test]
    fn test_more_than_one_vector_argument() {
        let result = build_with(vec![
            ParameterDecl::argument(0, "<A>", "a", ParamType::vec::<String>()),
            ParameterDecl::argument(1, "<B>", "b", ParamType::vec::<String>()),
        ]);
        assert_config_error(result, "more than one vector argument");
    }

    #[test]
    fn test_vector_argument_must_be_last() {
        let result = build_with(vec![
            ParameterDecl::argument(0, "<FILES>", "files", ParamType::vec::<String>()),
            ParameterDecl::argument(1, "<TARGET>", "target", ParamType::of::<String>()),
        ]);
        assert_config_error(result, "must be the last argument");
    }

    #[test]
    fn test_required_argument_with_default() {
        let result = build_with(vec![ParameterDecl::argument(0, "<PATH>", "path", ParamType::of::<String>())
            .default_value(Value::string("."))]);
        assert_config_error(result, "cannot have a default value");
    }

    // ==================== options ====================

    #[test]
    fn test_optional_value_requires_flag_value() {
        let result = build_with(vec![ParameterDecl::option("--port [PORT]", "port", ParamType::of::<u16>())]);
        assert_config_error(result, "is not a FlagValue");
    }

    #[test]
    fn test_scalar_option_requires_value_name() {
        let result = build_with(vec![ParameterDecl::option("--name", "name", ParamType::of::<String>())]);
        assert_config_error(result, "has no value name");
    }

    #[test]
    fn test_deconstructor_on_non_pair_type() {
        let result = build_with(vec![ParameterDecl::option("--name <N>", "name", ParamType::of::<String>())
            .deconstructor(Arc::new(DefaultPairDeconstructor))]);
        assert_config_error(result, "not a key/value type");
    }

    #[test]
    fn test_pair_with_deconstructor_and_converter() {
        let result = build_with(vec![ParameterDecl::option(
            "--env <VAR>",
            "env",
            ParamType::map::<String, String>(),
        )
        .deconstructor(Arc::new(DefaultPairDeconstructor))
        .converter(Arc::new(StringConverter))]);
        assert_config_error(result, "both a pair deconstructor and a converter");
    }

    #[test]
    fn test_option_name_conflict_within_command() {
        let result = build_with(vec![
            ParameterDecl::option("-o|--output <FILE>", "output", ParamType::of::<String>()),
            ParameterDecl::option("-o|--overwrite", "overwrite", ParamType::of::<bool>()),
        ]);
        assert_config_error(result, "Option '-o'");
    }

    #[test]
    fn test_option_name_conflict_with_ancestor() {
        #[derive(Debug, Default)]
        struct Root;
        impl CommandSettings for Root {
            fn describe() -> Arc<SettingsType> {
                SettingsType::builder::<Root>("Root")
                    .parameter(ParameterDecl::option("--verbose", "verbose", ParamType::of::<bool>()))
                    .default_factory()
                    .build()
            }
        }
        #[derive(Debug, Default)]
        struct Child;
        impl CommandSettings for Child {
            fn describe() -> Arc<SettingsType> {
                SettingsType::builder::<Child>("Child")
                    .inherits(Root::describe())
                    .parameter(ParameterDecl::option("--verbose", "loud", ParamType::of::<bool>()))
                    .default_factory()
                    .build()
            }
        }
        let mut config = Configurator::new();
        config.add_branch::<Root, _>("root", |root| {
            root.add_delegate("child", |_ctx: &CommandContext, _s: &Child| Ok(0));
        });
        assert_config_error(build(config.configuration()), "Option '--verbose' of command 'child'");
    }

    #[test]
    fn test_help_option_names_are_reserved() {
        assert_config_error(
            build_with(vec![ParameterDecl::option("-h|--hidden", "hidden", ParamType::of::<bool>())]),
            "Option '-h' of command 'cmd' is reserved for help",
        );
        assert_config_error(
            build_with(vec![ParameterDecl::option("--help", "help", ParamType::of::<bool>())]),
            "reserved for help",
        );
    }

    #[test]
    fn test_version_option_names_reserved_on_root_default_command() {
        let mut config = Configurator::new();
        config.set_application_version("1.0.0");
        let mut command = crate::configuration::ConfiguredCommand::from_delegate(
            crate::configuration::DEFAULT_COMMAND_NAME,
            |_ctx: &CommandContext, _s: &EmptySettings| Ok(0),
        );
        command.is_default_command = true;
        command.settings_type =
            settings_with(vec![ParameterDecl::option("-V|--verbose", "verbose", ParamType::of::<bool>())]);
        config.set_default_configured(command);
        assert_config_error(build(config.configuration()), "reserved for version");

        // Without a version, and on named commands, -V is free.
        assert!(build_with(vec![ParameterDecl::option("-V|--verbose", "verbose", ParamType::of::<bool>())]).is_ok());
    }

    #[test]
    fn test_valid_model_passes() {
        let result = build_with(vec![
            ParameterDecl::option("-p|--pattern <PATTERN>", "pattern", ParamType::of::<String>()),
            ParameterDecl::option("--hidden", "hidden", ParamType::of::<bool>()),
            ParameterDecl::argument(0, "[PATH]", "path", ParamType::of::<String>()),
        ]);
        assert!(result.is_ok());
    }
}
