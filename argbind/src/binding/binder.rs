use std::sync::Arc;

use tracing::{debug, trace};

use super::construct;
use super::lookup::CommandValueLookup;
use crate::convert::{ConvertError, ConverterRegistry, TypeConverter};
use crate::error::{Error, Result};
use crate::model::{CommandId, CommandModel};
use crate::parameter::{
    CommandParameter, ConverterOverride, DefaultPairDeconstructor, PairDeconstructor, ParameterContext,
    ParameterKind, ParameterValidationContext,
};
use crate::resolver::TypeResolver;
use crate::settings::{CommandSettings, SettingsType};
use crate::tree::{CommandTree, MappedParameter};
use crate::types::ParamType;
use crate::value::{FlagValue, Value};

/// A settings instance bound for the leaf command of a tree, with the values
/// it was built from.
pub struct BoundSettings {
    command: CommandId,
    settings: Box<dyn CommandSettings>,
    values: CommandValueLookup,
}

impl BoundSettings {
    pub fn command(&self) -> CommandId {
        self.command
    }

    pub fn settings(&self) -> &dyn CommandSettings {
        self.settings.as_ref()
    }

    pub fn values(&self) -> &CommandValueLookup {
        &self.values
    }

    pub fn downcast_ref<T: CommandSettings>(&self) -> Option<&T> {
        self.settings().downcast_ref::<T>()
    }

    pub fn into_settings(self) -> Box<dyn CommandSettings> {
        self.settings
    }
}

impl std::fmt::Debug for BoundSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundSettings")
            .field("command", &self.command)
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

/// Turns a matched [`CommandTree`] into a settings instance.
///
/// Binding is read-only with respect to the model, the registry and the
/// resolver; every call owns its own value lookup.
pub struct Binder<'a> {
    model: &'a CommandModel,
    registry: &'a ConverterRegistry,
    resolver: &'a dyn TypeResolver,
}

impl<'a> Binder<'a> {
    pub fn new(model: &'a CommandModel, registry: &'a ConverterRegistry, resolver: &'a dyn TypeResolver) -> Self {
        Self {
            model,
            registry,
            resolver,
        }
    }

    /// Binds the tree and builds the settings type of its leaf command.
    pub fn bind(&self, tree: &CommandTree) -> Result<BoundSettings> {
        let leaf = tree.leaf().command;
        let settings_type = self.model.command(leaf).settings_type();
        self.bind_as(tree, settings_type)
    }

    /// Binds the tree into an explicit settings type.
    pub fn bind_as(&self, tree: &CommandTree, settings_type: &SettingsType) -> Result<BoundSettings> {
        let values = self.resolve_values(tree)?;
        let settings = construct::create_settings(settings_type, &values, self.resolver)?;
        debug!(
            "Bound {} for command '{}'",
            settings_type.name(),
            self.model.path(tree.leaf().command).join(" ")
        );
        Ok(BoundSettings {
            command: tree.leaf().command,
            settings,
            values,
        })
    }

    /// Fills a value lookup from every level of the tree, root to leaf.
    pub fn resolve_values(&self, tree: &CommandTree) -> Result<CommandValueLookup> {
        self.validate_required(tree)?;

        let mut lookup = CommandValueLookup::new();
        for node in tree.levels() {
            for parameter in &node.unmapped {
                self.bind_unmapped(&mut lookup, parameter)?;
            }
            for mapped in &node.mapped {
                self.bind_mapped(&mut lookup, mapped)?;
            }
        }
        Ok(lookup)
    }

    // ===================== Required parameters =====================

    fn validate_required(&self, tree: &CommandTree) -> Result<()> {
        for node in tree.levels() {
            for parameter in &node.unmapped {
                if !parameter.is_required() || parameter.default_value().is_some() {
                    continue;
                }
                let mapped_elsewhere = tree.levels().any(|level| {
                    level
                        .mapped
                        .iter()
                        .any(|m| m.parameter.have_same_backing_property_as(parameter))
                });
                if mapped_elsewhere {
                    continue;
                }
                return Err(Error::RequiredParameterMissing {
                    command: self.model.command(node.command).name().to_string(),
                    kind: if parameter.is_option() { "option" } else { "argument" },
                    parameter: parameter.display_name(),
                });
            }
        }
        Ok(())
    }

    // ===================== Unmapped =====================

    fn bind_unmapped(&self, lookup: &mut CommandValueLookup, parameter: &Arc<CommandParameter>) -> Result<()> {
        if let Some(provider) = parameter.value_provider() {
            let context = ParameterContext {
                parameter,
                resolver: self.resolver,
                raw_value: None,
            };
            if let Some(value) = provider.try_get_value(&context) {
                let value = self.convert_value(parameter, value)?;
                lookup.set_value(parameter, Some(value), false);
                return self.validate_parameter(lookup, parameter);
            }
        }

        if parameter.is_flag_value() {
            lookup.set_value(parameter, Some(Value::Flag(Box::new(FlagValue::unset()))), false);
        } else if let Some(default) = parameter.default_value() {
            let value = self.convert_value(parameter, default.clone())?;
            assign(lookup, parameter, Some(value), false);
            self.validate_parameter(lookup, parameter)?;
        } else if parameter.param_type().is_nullable() {
            lookup.set_value(parameter, None, false);
        }
        Ok(())
    }

    // ===================== Mapped =====================

    fn bind_mapped(&self, lookup: &mut CommandValueLookup, mapped: &MappedParameter) -> Result<()> {
        let parameter = &mapped.parameter;
        debug!("Binding {} from {:?}", parameter.display_name(), mapped.value);

        if parameter.want_raw_value() {
            let raw = mapped.value.clone().unwrap_or_default();
            assign(lookup, parameter, Some(Value::string(raw)), true);
        } else if parameter.is_flag_value() && mapped.value.is_none() {
            let default = match parameter.default_value() {
                Some(default) => Some(self.convert_value_to(parameter, flag_inner(parameter), default.clone())?),
                None => None,
            };
            assign(lookup, parameter, default, true);
        } else if parameter.kind() == ParameterKind::Pair {
            let pair = self.deconstruct(parameter, mapped.value.as_deref())?;
            let mut pairs = match lookup.get(parameter.id()) {
                Some(Value::Pairs(existing)) => existing.clone(),
                _ => Vec::new(),
            };
            pairs.push(pair);
            lookup.set_value(parameter, Some(Value::Pairs(pairs)), true);
        } else {
            let value = self.convert_mapped(parameter, mapped.value.as_deref().unwrap_or_default())?;
            assign(lookup, parameter, Some(value), true);
        }

        if let Some(provider) = parameter.value_provider() {
            let context = ParameterContext {
                parameter,
                resolver: self.resolver,
                raw_value: mapped.value.as_deref(),
            };
            if let Some(value) = provider.try_get_value(&context) {
                lookup.set_value(parameter, Some(value), true);
            }
        }

        self.validate_parameter(lookup, parameter)
    }

    fn convert_mapped(&self, parameter: &CommandParameter, raw: &str) -> Result<Value> {
        let target = conversion_target(parameter);
        let converter = self.converter_for(parameter, target)?.ok_or_else(|| Error::NoConverterFound {
            parameter: parameter.display_name(),
            type_name: target.name().to_string(),
        })?;
        let result = match converter.convert_from_str(raw) {
            Err(e) if e.is_not_supported() => match target.string_constructor() {
                Some(ctor) => ctor(raw).map_err(ConvertError::Other),
                None => Err(e),
            },
            other => other,
        };
        result.map_err(|source| Error::ConversionFailed {
            parameter: parameter.display_name(),
            value: raw.to_string(),
            converter: converter.name().to_string(),
            source,
        })
    }

    fn deconstruct(&self, parameter: &CommandParameter, raw: Option<&str>) -> Result<(Value, Option<Value>)> {
        let crate::types::TypeShape::Pair { key, value } = parameter.param_type().shape() else {
            return Err(Error::binding(format!(
                "{} is not a key/value parameter",
                parameter.display_name()
            )));
        };
        let result = match parameter.deconstructor() {
            Some(deconstructor) => deconstructor.deconstruct(self.registry, key, value, raw),
            None => DefaultPairDeconstructor.deconstruct(self.registry, key, value, raw),
        };
        result.map_err(|source| Error::ConversionFailed {
            parameter: parameter.display_name(),
            value: raw.unwrap_or_default().to_string(),
            converter: "PairDeconstructor".to_string(),
            source,
        })
    }

    // ===================== Conversion =====================

    /// Converter for `target`: the parameter override first, then the
    /// registry. `Ok(None)` when nothing matches.
    fn converter_for(&self, parameter: &CommandParameter, target: &ParamType) -> Result<Option<Arc<dyn TypeConverter>>> {
        let converter = match parameter.converter() {
            Some(ConverterOverride::Instance(converter)) => Some(Arc::clone(converter)),
            Some(ConverterOverride::Named(name)) => Some(self.resolver.resolve_converter(name).ok_or_else(|| {
                Error::NoConverterFound {
                    parameter: parameter.display_name(),
                    type_name: name.clone(),
                }
            })?),
            None => self.registry.converter_for(target),
        };
        if let Some(converter) = &converter {
            trace!("Using {} for {}", converter.name(), parameter.display_name());
        }
        Ok(converter)
    }

    /// Brings a provider or default value to the declared type of the
    /// parameter.
    fn convert_value(&self, parameter: &CommandParameter, value: Value) -> Result<Value> {
        let ty = parameter.param_type();
        if ty.is_flag_value() {
            if matches!(value, Value::Flag(_)) {
                return Ok(value);
            }
            let inner = self.convert_value_to(parameter, flag_inner(parameter), value)?;
            return Ok(Value::Flag(Box::new(FlagValue {
                value: Some(inner),
                is_set: false,
            })));
        }
        if let Some(element) = ty.element_type() {
            return match value {
                Value::List(items) => items
                    .into_iter()
                    .map(|item| self.convert_element(parameter, element, item))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List),
                single => self.convert_element(parameter, element, single),
            };
        }
        self.convert_value_to(parameter, ty, value)
    }

    fn convert_element(&self, parameter: &CommandParameter, element: &ParamType, item: Value) -> Result<Value> {
        if element.accepts(&item) {
            return Ok(item);
        }
        let converted = self.convert_value_to(parameter, element, item)?;
        if !element.accepts(&converted) {
            return Err(Error::ConversionFailed {
                parameter: parameter.display_name(),
                value: format!("{:?}", converted),
                converter: element.name().to_string(),
                source: ConvertError::invalid(
                    format!("{:?}", converted),
                    element.name(),
                    format!("invalid element type {}", converted.type_name()),
                ),
            });
        }
        Ok(converted)
    }

    fn convert_value_to(&self, parameter: &CommandParameter, target: &ParamType, value: Value) -> Result<Value> {
        if target.accepts(&value) || !matches!(value, Value::Single(_)) {
            return Ok(value);
        }
        let Some(converter) = self.converter_for(parameter, target)? else {
            return Err(Error::NoConverterFound {
                parameter: parameter.display_name(),
                type_name: target.name().to_string(),
            });
        };
        let result = match converter.convert_from(&value) {
            Err(e) if e.is_not_supported() => match (target.string_constructor(), value.as_str()) {
                (Some(ctor), Some(s)) => ctor(s).map_err(ConvertError::Other),
                _ => Err(e),
            },
            other => other,
        };
        result.map_err(|source| Error::ConversionFailed {
            parameter: parameter.display_name(),
            value: format!("{:?}", value),
            converter: converter.name().to_string(),
            source,
        })
    }

    // ===================== Validation =====================

    fn validate_parameter(&self, lookup: &CommandValueLookup, parameter: &CommandParameter) -> Result<()> {
        for validator in parameter.validators() {
            let context = ParameterValidationContext {
                parameter,
                value: lookup.get(parameter.id()),
                lookup,
                resolver: self.resolver,
            };
            let result = validator.validate(&context);
            if !result.is_successful() {
                let message = validator
                    .error_message()
                    .or(result.message())
                    .map_or_else(|| format!("Invalid value for {}", parameter.display_name()), str::to_string);
                return Err(Error::Validation { message });
            }
        }
        Ok(())
    }
}

/// Writes a converted value, appending for vectors and filling the container
/// for flag values.
fn assign(lookup: &mut CommandValueLookup, parameter: &Arc<CommandParameter>, value: Option<Value>, supplied: bool) {
    let bound = if parameter.is_flag_value() {
        let mut flag = match lookup.get(parameter.id()) {
            Some(Value::Flag(existing)) => (**existing).clone(),
            _ => FlagValue::unset(),
        };
        match value {
            Some(Value::Flag(given)) => flag.value = given.value,
            Some(v) => flag.value = Some(v),
            None => {}
        }
        flag.is_set = true;
        Some(Value::Flag(Box::new(flag)))
    } else if parameter.kind() == ParameterKind::Vector {
        let mut items = match lookup.get(parameter.id()) {
            Some(Value::List(existing)) => existing.clone(),
            _ => Vec::new(),
        };
        match value {
            Some(Value::List(more)) => items.extend(more),
            Some(v) => items.push(v),
            None => {}
        }
        Some(Value::List(items))
    } else {
        value
    };
    lookup.set_value(parameter, bound, supplied);
}

fn flag_inner(parameter: &CommandParameter) -> &ParamType {
    parameter.param_type().flag_inner_type().unwrap_or(parameter.param_type())
}

/// Type a raw string is converted to: the element type for vectors, the
/// inner type for flag containers.
fn conversion_target(parameter: &CommandParameter) -> &ParamType {
    let ty = parameter.param_type();
    ty.element_type().or(ty.flag_inner_type()).unwrap_or(ty)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::configuration::{Command, CommandContext, ConfiguratorScope, Configurator};
    use crate::convert::ParseConverter;
    use crate::model::{self, CommandInfo};
    use crate::parameter::{ParameterDecl, ParameterValidator, ValidationResult};
    use crate::resolver::DefaultTypeResolver;

    // ==================== fixtures ====================

    #[derive(Debug, Default, Clone)]
    struct BuildSettings {
        pattern: Option<String>,
        hidden: bool,
        path: Option<String>,
        retries: i32,
        files: Vec<String>,
        port: FlagValue<u16>,
        env: HashMap<String, String>,
    }

    fn set_build(s: &mut BuildSettings, name: &str, value: &Value) -> Result<()> {
        match name {
            "pattern" => s.pattern = Some(value.get()?),
            "hidden" => s.hidden = value.get()?,
            "path" => s.path = Some(value.get()?),
            "retries" => s.retries = value.get()?,
            "files" => s.files = value.get_vec()?,
            "port" => s.port = value.get_flag()?,
            "env" => s.env = value.get_map()?,
            other => return Err(Error::binding(format!("unknown property {}", other))),
        }
        Ok(())
    }

    impl CommandSettings for BuildSettings {
        fn describe() -> Arc<SettingsType> {
            SettingsType::builder::<BuildSettings>("BuildSettings")
                .parameter(ParameterDecl::option("-p|--pattern <PATTERN>", "pattern", ParamType::of::<String>()))
                .parameter(ParameterDecl::option("--hidden", "hidden", ParamType::of::<bool>()))
                .parameter(
                    ParameterDecl::option("-r|--retries <N>", "retries", ParamType::of::<i32>())
                        .default_value(Value::string("3")),
                )
                .parameter(ParameterDecl::option("--port [PORT]", "port", ParamType::flag::<u16>()))
                .parameter(ParameterDecl::option("-e|--env <VAR>", "env", ParamType::map::<String, String>()))
                .parameter(ParameterDecl::argument(0, "[PATH]", "path", ParamType::of::<String>()))
                .parameter(ParameterDecl::argument(1, "[FILES]", "files", ParamType::vec::<String>()))
                .default_factory()
                .setter(set_build)
                .build()
        }
    }

    struct Build;

    impl Command for Build {
        type Settings = BuildSettings;

        fn execute(&self, _context: &CommandContext, _settings: &BuildSettings) -> anyhow::Result<i32> {
            Ok(0)
        }
    }

    fn build_model() -> CommandModel {
        let mut config = Configurator::new();
        config.add_command("build", Build);
        model::build(config.configuration()).unwrap()
    }

    fn param<'m>(info: &'m CommandInfo, name: &str) -> &'m Arc<CommandParameter> {
        info.parameters().iter().find(|p| p.property_name() == name).unwrap()
    }

    fn bind(model: &CommandModel, tree: &CommandTree) -> Result<BuildSettings> {
        let resolver = DefaultTypeResolver::new();
        let binder = Binder::new(model, ConverterRegistry::shared(), &resolver);
        let bound = binder.bind(tree)?;
        Ok(bound.downcast_ref::<BuildSettings>().unwrap().clone())
    }

    // ==================== mapped values ====================

    #[test]
    fn test_bind_scalars_flags_and_arguments() {
        let model = build_model();
        let info = model.find_root("build").unwrap();
        let mut tree = CommandTree::new(info);
        tree.map(param(info, "pattern"), Some("*.cs".to_string()));
        tree.map(param(info, "hidden"), Some("true".to_string()));
        tree.map(param(info, "path"), Some("src".to_string()));

        let settings = bind(&model, &tree).unwrap();
        assert_eq!(settings.pattern.as_deref(), Some("*.cs"));
        assert!(settings.hidden);
        assert_eq!(settings.path.as_deref(), Some("src"));
    }

    #[test]
    fn test_unmapped_bool_defaults_to_false() {
        let model = build_model();
        let info = model.find_root("build").unwrap();
        let settings = bind(&model, &CommandTree::new(info)).unwrap();
        assert!(!settings.hidden);
        assert!(settings.pattern.is_none());
    }

    #[test]
    fn test_string_default_is_converted() {
        let model = build_model();
        let info = model.find_root("build").unwrap();
        let settings = bind(&model, &CommandTree::new(info)).unwrap();
        assert_eq!(settings.retries, 3);
    }

    #[test]
    fn test_vector_values_append() {
        let model = build_model();
        let info = model.find_root("build").unwrap();
        let mut tree = CommandTree::new(info);
        tree.map(param(info, "files"), Some("a.txt".to_string()));
        tree.map(param(info, "files"), Some("b.txt".to_string()));
        let settings = bind(&model, &tree).unwrap();
        assert_eq!(settings.files, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_pairs_are_collected() {
        let model = build_model();
        let info = model.find_root("build").unwrap();
        let mut tree = CommandTree::new(info);
        tree.map(param(info, "env"), Some("MODE=release".to_string()));
        tree.map(param(info, "env"), Some("TARGET=x86=64".to_string()));
        let settings = bind(&model, &tree).unwrap();
        assert_eq!(settings.env.get("MODE").map(String::as_str), Some("release"));
        assert_eq!(settings.env.get("TARGET").map(String::as_str), Some("x86=64"));
    }

    #[test]
    fn test_conversion_failure_names_parameter_and_converter() {
        let model = build_model();
        let info = model.find_root("build").unwrap();
        let mut tree = CommandTree::new(info);
        tree.map(param(info, "retries"), Some("many".to_string()));
        let err = bind(&model, &tree).unwrap_err();
        match err {
            Error::ConversionFailed {
                parameter,
                value,
                converter,
                ..
            } => {
                assert_eq!(parameter, "--retries");
                assert_eq!(value, "many");
                assert_eq!(converter, "i32Converter");
            }
            other => panic!("Expected ConversionFailed, got {:?}", other),
        }
    }

    // ==================== flag values ====================

    #[test]
    fn test_flag_value_absent_is_not_set() {
        let model = build_model();
        let info = model.find_root("build").unwrap();
        let settings = bind(&model, &CommandTree::new(info)).unwrap();
        assert!(!settings.port.is_set);
        assert!(settings.port.value.is_none());
    }

    #[test]
    fn test_flag_value_without_value_is_set() {
        let model = build_model();
        let info = model.find_root("build").unwrap();
        let mut tree = CommandTree::new(info);
        tree.map(param(info, "port"), None);
        let settings = bind(&model, &tree).unwrap();
        assert!(settings.port.is_set);
        assert!(settings.port.value.is_none());
    }

    #[test]
    fn test_flag_value_with_value() {
        let model = build_model();
        let info = model.find_root("build").unwrap();
        let mut tree = CommandTree::new(info);
        tree.map(param(info, "port"), Some("8080".to_string()));
        let settings = bind(&model, &tree).unwrap();
        assert!(settings.port.is_set);
        assert_eq!(settings.port.value, Some(8080));
    }

    // ==================== required parameters ====================

    struct CountingConverter(Arc<AtomicUsize>);

    impl TypeConverter for CountingConverter {
        fn name(&self) -> &str {
            "CountingConverter"
        }

        fn convert_from_str(&self, input: &str) -> std::result::Result<Value, ConvertError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            ParseConverter::<i32>::new().convert_from_str(input)
        }
    }

    static CALLS: once_cell::sync::Lazy<Arc<AtomicUsize>> = once_cell::sync::Lazy::new(|| Arc::new(AtomicUsize::new(0)));

    #[derive(Debug, Default)]
    struct CopySettings;

    impl CommandSettings for CopySettings {
        fn describe() -> Arc<SettingsType> {
            SettingsType::builder::<CopySettings>("CopySettings")
                .parameter(
                    ParameterDecl::option("--count <N>", "count", ParamType::of::<i32>())
                        .converter(Arc::new(CountingConverter(Arc::clone(&CALLS)))),
                )
                .parameter(ParameterDecl::argument(0, "<SOURCE>", "source", ParamType::of::<String>()))
                .default_factory()
                .setter(|_: &mut CopySettings, _, _| Ok(()))
                .build()
        }
    }

    #[test]
    fn test_required_argument_missing_before_conversion() {
        let mut config = Configurator::new();
        config.add_delegate::<CopySettings, _>("copy", |_, _| Ok(0));
        let model = model::build(config.configuration()).unwrap();
        let info = model.find_root("copy").unwrap();
        let mut tree = CommandTree::new(info);
        tree.map(param(info, "count"), Some("5".to_string()));

        let resolver = DefaultTypeResolver::new();
        let err = Binder::new(&model, ConverterRegistry::shared(), &resolver)
            .bind(&tree)
            .unwrap_err();
        match err {
            Error::RequiredParameterMissing { command, kind, parameter } => {
                assert_eq!(command, "copy");
                assert_eq!(kind, "argument");
                assert_eq!(parameter, "SOURCE");
            }
            other => panic!("Expected RequiredParameterMissing, got {:?}", other),
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    // ==================== hooks ====================

    struct MinPort;

    impl ParameterValidator for MinPort {
        fn validate(&self, context: &ParameterValidationContext<'_>) -> ValidationResult {
            match context.value.and_then(|v| v.downcast_ref::<u16>()) {
                Some(port) if *port < 1024 => ValidationResult::error("too low"),
                _ => ValidationResult::success(),
            }
        }

        fn error_message(&self) -> Option<&str> {
            Some("Port must be 1024 or above")
        }
    }

    #[derive(Debug, Default, Clone)]
    struct ServeSettings {
        port: u16,
        host: Option<String>,
    }

    impl CommandSettings for ServeSettings {
        fn describe() -> Arc<SettingsType> {
            let host_provider = |ctx: &ParameterContext<'_>| match ctx.raw_value {
                Some(raw) => Some(Value::string(raw.to_uppercase())),
                None => Some(Value::string("localhost")),
            };
            SettingsType::builder::<ServeSettings>("ServeSettings")
                .parameter(
                    ParameterDecl::option("--port <PORT>", "port", ParamType::of::<u16>())
                        .default_value(Value::new(8080u16))
                        .validator(Arc::new(MinPort)),
                )
                .parameter(
                    ParameterDecl::option("--host <HOST>", "host", ParamType::of::<String>())
                        .value_provider(Arc::new(host_provider)),
                )
                .default_factory()
                .setter(|s: &mut ServeSettings, name, value| {
                    match name {
                        "port" => s.port = value.get()?,
                        "host" => s.host = Some(value.get()?),
                        _ => {}
                    }
                    Ok(())
                })
                .build()
        }
    }

    fn serve(tree_setup: impl FnOnce(&CommandInfo, &mut CommandTree)) -> Result<ServeSettings> {
        let mut config = Configurator::new();
        config.add_delegate::<ServeSettings, _>("serve", |_, _| Ok(0));
        let model = model::build(config.configuration()).unwrap();
        let info = model.find_root("serve").unwrap();
        let mut tree = CommandTree::new(info);
        tree_setup(info, &mut tree);
        let resolver = DefaultTypeResolver::new();
        let bound = Binder::new(&model, ConverterRegistry::shared(), &resolver).bind(&tree)?;
        Ok(bound.downcast_ref::<ServeSettings>().unwrap().clone())
    }

    #[test]
    fn test_validator_error_message_wins() {
        let err = serve(|info, tree| tree.map(param(info, "port"), Some("80".to_string()))).unwrap_err();
        assert_eq!(format!("{}", err), "Port must be 1024 or above");
    }

    #[test]
    fn test_value_provider_fills_unmapped() {
        let settings = serve(|_, _| {}).unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.host.as_deref(), Some("localhost"));
    }

    #[test]
    fn test_value_provider_overrides_mapped() {
        let settings = serve(|info, tree| tree.map(param(info, "host"), Some("example.org".to_string()))).unwrap();
        assert_eq!(settings.host.as_deref(), Some("EXAMPLE.ORG"));
    }

    // ==================== conversion ====================

    #[test]
    fn test_string_constructor_fallback() {
        #[derive(Debug, Clone, PartialEq)]
        struct Token(String);
        impl From<String> for Token {
            fn from(s: String) -> Self {
                Token(s)
            }
        }

        #[derive(Debug, Default, Clone)]
        struct AuthSettings {
            token: Option<Token>,
        }
        impl CommandSettings for AuthSettings {
            fn describe() -> Arc<SettingsType> {
                SettingsType::builder::<AuthSettings>("AuthSettings")
                    .parameter(ParameterDecl::option(
                        "--token <TOKEN>",
                        "token",
                        ParamType::of::<Token>().with_string_constructor::<Token>(),
                    ))
                    .default_factory()
                    .setter(|s: &mut AuthSettings, _, value| {
                        s.token = Some(value.get()?);
                        Ok(())
                    })
                    .build()
            }
        }

        let mut config = Configurator::new();
        config.add_delegate::<AuthSettings, _>("auth", |_, _| Ok(0));
        let model = model::build(config.configuration()).unwrap();
        let info = model.find_root("auth").unwrap();
        let mut tree = CommandTree::new(info);
        tree.map(param(info, "token"), Some("abc".to_string()));
        let resolver = DefaultTypeResolver::new();
        let bound = Binder::new(&model, ConverterRegistry::shared(), &resolver).bind(&tree).unwrap();
        assert_eq!(
            bound.downcast_ref::<AuthSettings>().unwrap().token,
            Some(Token("abc".to_string()))
        );
    }

    #[test]
    fn test_no_converter_found() {
        #[derive(Debug)]
        struct Opaque;

        #[derive(Debug, Default)]
        struct OpaqueSettings;
        impl CommandSettings for OpaqueSettings {
            fn describe() -> Arc<SettingsType> {
                SettingsType::builder::<OpaqueSettings>("OpaqueSettings")
                    .parameter(ParameterDecl::option("--thing <THING>", "thing", ParamType::of::<Opaque>()))
                    .default_factory()
                    .build()
            }
        }

        let mut config = Configurator::new();
        config.add_delegate::<OpaqueSettings, _>("opaque", |_, _| Ok(0));
        let model = model::build(config.configuration()).unwrap();
        let info = model.find_root("opaque").unwrap();
        let mut tree = CommandTree::new(info);
        tree.map(param(info, "thing"), Some("x".to_string()));
        let resolver = DefaultTypeResolver::new();
        let err = Binder::new(&model, ConverterRegistry::shared(), &resolver).bind(&tree).unwrap_err();
        assert!(matches!(err, Error::NoConverterFound { .. }));
    }

    #[test]
    fn test_named_converter_resolved_through_resolver() {
        #[derive(Debug, Default)]
        struct LevelSettings {
            level: i32,
        }
        impl CommandSettings for LevelSettings {
            fn describe() -> Arc<SettingsType> {
                SettingsType::builder::<LevelSettings>("LevelSettings")
                    .parameter(
                        ParameterDecl::option("--level <LEVEL>", "level", ParamType::of::<i32>())
                            .converter_named("Doubling"),
                    )
                    .default_factory()
                    .setter(|s: &mut LevelSettings, _, value| {
                        s.level = value.get()?;
                        Ok(())
                    })
                    .build()
            }
        }

        struct Doubling;
        impl TypeConverter for Doubling {
            fn name(&self) -> &str {
                "Doubling"
            }

            fn convert_from_str(&self, input: &str) -> std::result::Result<Value, ConvertError> {
                let n: i32 = input.parse().map_err(|e| ConvertError::invalid(input, "i32", e))?;
                Ok(Value::new(n * 2))
            }
        }

        let mut config = Configurator::new();
        config.add_delegate::<LevelSettings, _>("level", |_, _| Ok(0));
        let model = model::build(config.configuration()).unwrap();
        let info = model.find_root("level").unwrap();
        let mut tree = CommandTree::new(info);
        tree.map(param(info, "level"), Some("21".to_string()));

        let mut resolver = DefaultTypeResolver::new();
        resolver.register_converter("Doubling", Arc::new(Doubling));
        let bound = Binder::new(&model, ConverterRegistry::shared(), &resolver).bind(&tree).unwrap();
        assert_eq!(bound.downcast_ref::<LevelSettings>().unwrap().level, 42);

        let empty = DefaultTypeResolver::new();
        let err = Binder::new(&model, ConverterRegistry::shared(), &empty).bind(&tree).unwrap_err();
        assert!(matches!(err, Error::NoConverterFound { .. }));
    }

    #[test]
    fn test_list_default_is_converted_element_wise() {
        #[derive(Debug, Default)]
        struct PortsSettings {
            ports: Vec<u16>,
        }
        impl CommandSettings for PortsSettings {
            fn describe() -> Arc<SettingsType> {
                SettingsType::builder::<PortsSettings>("PortsSettings")
                    .parameter(
                        ParameterDecl::option("--port <PORT>", "ports", ParamType::vec::<u16>())
                            .default_value(Value::list(vec![Value::string("80"), Value::string("443")])),
                    )
                    .default_factory()
                    .setter(|s: &mut PortsSettings, _, value| {
                        s.ports = value.get_vec()?;
                        Ok(())
                    })
                    .build()
            }
        }

        let mut config = Configurator::new();
        config.add_delegate::<PortsSettings, _>("ports", |_, _| Ok(0));
        let model = model::build(config.configuration()).unwrap();
        let info = model.find_root("ports").unwrap();
        let resolver = DefaultTypeResolver::new();
        let bound = Binder::new(&model, ConverterRegistry::shared(), &resolver)
            .bind(&CommandTree::new(info))
            .unwrap();
        assert_eq!(bound.downcast_ref::<PortsSettings>().unwrap().ports, vec![80, 443]);
    }

    // ==================== raw values and conversion failures ====================

    #[test]
    fn test_raw_option_binds_verbatim_string() {
        #[derive(Debug, Default)]
        struct ExprSettings {
            expr: String,
        }
        impl CommandSettings for ExprSettings {
            fn describe() -> Arc<SettingsType> {
                SettingsType::builder::<ExprSettings>("ExprSettings")
                    .parameter(ParameterDecl::option("--expr <EXPR>", "expr", ParamType::of::<i32>()).raw())
                    .default_factory()
                    .setter(|s: &mut ExprSettings, _, value| {
                        s.expr = value.get()?;
                        Ok(())
                    })
                    .build()
            }
        }

        let mut config = Configurator::new();
        config.add_delegate::<ExprSettings, _>("calc", |_, _| Ok(0));
        let model = model::build(config.configuration()).unwrap();
        let info = model.find_root("calc").unwrap();
        let mut tree = CommandTree::new(info);
        tree.map(param(info, "expr"), Some("1+2".to_string()));

        let resolver = DefaultTypeResolver::new();
        let bound = Binder::new(&model, ConverterRegistry::shared(), &resolver).bind(&tree).unwrap();
        assert_eq!(bound.downcast_ref::<ExprSettings>().unwrap().expr, "1+2");
    }

    #[test]
    fn test_list_default_with_wrong_element_type_fails() {
        #[derive(Debug, Default)]
        struct LevelsSettings;
        impl CommandSettings for LevelsSettings {
            fn describe() -> Arc<SettingsType> {
                SettingsType::builder::<LevelsSettings>("LevelsSettings")
                    .parameter(
                        ParameterDecl::option("--level <LEVEL>", "levels", ParamType::vec::<i32>())
                            .converter_named("Stringly")
                            .default_value(Value::list(vec![Value::string("1")])),
                    )
                    .default_factory()
                    .build()
            }
        }

        struct Stringly;
        impl TypeConverter for Stringly {
            fn name(&self) -> &str {
                "Stringly"
            }

            fn convert_from_str(&self, input: &str) -> std::result::Result<Value, ConvertError> {
                Ok(Value::string(input))
            }
        }

        let mut config = Configurator::new();
        config.add_delegate::<LevelsSettings, _>("levels", |_, _| Ok(0));
        let model = model::build(config.configuration()).unwrap();
        let info = model.find_root("levels").unwrap();
        let mut resolver = DefaultTypeResolver::new();
        resolver.register_converter("Stringly", Arc::new(Stringly));
        let err = Binder::new(&model, ConverterRegistry::shared(), &resolver)
            .bind(&CommandTree::new(info))
            .unwrap_err();
        match err {
            Error::ConversionFailed { parameter, converter, .. } => {
                assert_eq!(parameter, "--level");
                assert_eq!(converter, "i32");
            }
            other => panic!("Expected ConversionFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_default_without_converter_is_reported() {
        #[derive(Debug)]
        struct Opaque;

        #[derive(Debug, Default)]
        struct OpaqueSettings;
        impl CommandSettings for OpaqueSettings {
            fn describe() -> Arc<SettingsType> {
                SettingsType::builder::<OpaqueSettings>("OpaqueSettings")
                    .parameter(
                        ParameterDecl::option("--thing <THING>", "thing", ParamType::of::<Opaque>())
                            .default_value(Value::new(5i32)),
                    )
                    .default_factory()
                    .build()
            }
        }

        let mut config = Configurator::new();
        config.add_delegate::<OpaqueSettings, _>("opaque", |_, _| Ok(0));
        let model = model::build(config.configuration()).unwrap();
        let info = model.find_root("opaque").unwrap();
        let resolver = DefaultTypeResolver::new();
        let err = Binder::new(&model, ConverterRegistry::shared(), &resolver)
            .bind(&CommandTree::new(info))
            .unwrap_err();
        match err {
            Error::NoConverterFound { parameter, .. } => assert_eq!(parameter, "--thing"),
            other => panic!("Expected NoConverterFound, got {other:?}"),
        }
    }
}
