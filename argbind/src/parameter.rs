//! Parameter model: declarations registered on settings types and the
//! resolved, immutable descriptors the command model hands out.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::binding::CommandValueLookup;
use crate::convert::{ConvertError, ConverterRegistry, TypeConverter};
use crate::error::{Error, Result};
use crate::resolver::TypeResolver;
use crate::types::ParamType;
use crate::value::Value;

static LONG_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("long option pattern"));
static SHORT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9?]$").expect("short option pattern"));
static VALUE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(<([^<>\[\]]+)>|\[([^<>\[\]]+)\])$").expect("value name pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Scalar,
    Flag,
    FlagWithValue,
    Vector,
    Pair,
}

/// Identity of a resolved parameter, unique within one command model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterId(pub(crate) usize);

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

// =====================
// Hooks
// =====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    successful: bool,
    message: Option<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn success() -> Self {
        Self {
            successful: true,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            successful: false,
            message: Some(message.into()),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.successful
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Context handed to value providers.
pub struct ParameterContext<'a> {
    pub parameter: &'a CommandParameter,
    pub resolver: &'a dyn TypeResolver,
    /// The raw command line value, when the parameter was supplied.
    pub raw_value: Option<&'a str>,
}

/// Supplies a value for a parameter, either in place of a missing one or
/// overriding a converted one.
pub trait ParameterValueProvider: Send + Sync {
    fn try_get_value(&self, context: &ParameterContext<'_>) -> Option<Value>;
}

impl<F> ParameterValueProvider for F
where
    F: Fn(&ParameterContext<'_>) -> Option<Value> + Send + Sync,
{
    fn try_get_value(&self, context: &ParameterContext<'_>) -> Option<Value> {
        self(context)
    }
}

pub struct ParameterValidationContext<'a> {
    pub parameter: &'a CommandParameter,
    /// The currently bound value; `None` when unbound or null.
    pub value: Option<&'a Value>,
    pub lookup: &'a CommandValueLookup,
    pub resolver: &'a dyn TypeResolver,
}

pub trait ParameterValidator: Send + Sync {
    fn validate(&self, context: &ParameterValidationContext<'_>) -> ValidationResult;

    /// Replaces the message of a failed [`ValidationResult`] when set.
    fn error_message(&self) -> Option<&str> {
        None
    }
}

impl<F> ParameterValidator for F
where
    F: Fn(&ParameterValidationContext<'_>) -> ValidationResult + Send + Sync,
{
    fn validate(&self, context: &ParameterValidationContext<'_>) -> ValidationResult {
        self(context)
    }
}

/// Splits a raw `key=value` token into converted key and value.
pub trait PairDeconstructor: Send + Sync {
    fn deconstruct(
        &self,
        registry: &ConverterRegistry,
        key_type: &ParamType,
        value_type: &ParamType,
        raw: Option<&str>,
    ) -> std::result::Result<(Value, Option<Value>), ConvertError>;
}

/// Splits on the first `=`. A token without `=` yields a key with no value.
pub struct DefaultPairDeconstructor;

impl DefaultPairDeconstructor {
    fn convert(
        registry: &ConverterRegistry,
        ty: &ParamType,
        input: &str,
    ) -> std::result::Result<Value, ConvertError> {
        let converter = registry
            .converter_for(ty)
            .ok_or_else(|| ConvertError::not_supported("DefaultPairDeconstructor", ty.name()))?;
        match converter.convert_from_str(input) {
            Err(e) if e.is_not_supported() => match ty.string_constructor() {
                Some(ctor) => ctor(input).map_err(ConvertError::Other),
                None => Err(e),
            },
            other => other,
        }
    }
}

impl PairDeconstructor for DefaultPairDeconstructor {
    fn deconstruct(
        &self,
        registry: &ConverterRegistry,
        key_type: &ParamType,
        value_type: &ParamType,
        raw: Option<&str>,
    ) -> std::result::Result<(Value, Option<Value>), ConvertError> {
        let raw = raw.ok_or_else(|| ConvertError::invalid("", "key=value", "no value was given"))?;
        let (key, value) = match raw.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (raw, None),
        };
        if key.is_empty() {
            return Err(ConvertError::invalid(raw, "key=value", "the key is empty"));
        }
        let key = Self::convert(registry, key_type, key)?;
        let value = value
            .map(|v| Self::convert(registry, value_type, v))
            .transpose()?;
        Ok((key, value))
    }
}

/// Explicit converter for a single parameter.
#[derive(Clone)]
pub enum ConverterOverride {
    Instance(Arc<dyn TypeConverter>),
    /// Resolved through [`TypeResolver::resolve_converter`].
    Named(String),
}

// =====================
// Declarations
// =====================

#[derive(Clone)]
pub(crate) enum DeclRole {
    Option { template: String },
    Argument { position: usize, template: String },
}

/// A parameter as registered on a settings type, before the model builder
/// resolves it for a particular command.
#[derive(Clone)]
pub struct ParameterDecl {
    pub(crate) property: &'static str,
    pub(crate) param_type: ParamType,
    pub(crate) role: DeclRole,
    pub(crate) description: Option<String>,
    pub(crate) converter: Option<ConverterOverride>,
    pub(crate) deconstructor: Option<Arc<dyn PairDeconstructor>>,
    pub(crate) value_provider: Option<Arc<dyn ParameterValueProvider>>,
    pub(crate) validators: Vec<Arc<dyn ParameterValidator>>,
    pub(crate) default_value: Option<Value>,
    pub(crate) want_raw_value: bool,
    pub(crate) is_required: bool,
    pub(crate) is_hidden: bool,
    pub(crate) shadowable: bool,
}

impl ParameterDecl {
    fn new(property: &'static str, param_type: ParamType, role: DeclRole) -> Self {
        Self {
            property,
            param_type,
            role,
            description: None,
            converter: None,
            deconstructor: None,
            value_provider: None,
            validators: Vec::new(),
            default_value: None,
            want_raw_value: false,
            is_required: false,
            is_hidden: false,
            shadowable: false,
        }
    }

    /// An option such as `-p|--pattern <PATTERN>`; `[VALUE]` makes the value
    /// optional.
    pub fn option(template: impl Into<String>, property: &'static str, param_type: ParamType) -> Self {
        Self::new(
            property,
            param_type,
            DeclRole::Option {
                template: template.into(),
            },
        )
    }

    /// A positional argument such as `<PATH>` (required) or `[PATH]`.
    pub fn argument(
        position: usize,
        template: impl Into<String>,
        property: &'static str,
        param_type: ParamType,
    ) -> Self {
        Self::new(
            property,
            param_type,
            DeclRole::Argument {
                position,
                template: template.into(),
            },
        )
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    #[must_use]
    pub fn converter(mut self, converter: Arc<dyn TypeConverter>) -> Self {
        self.converter = Some(ConverterOverride::Instance(converter));
        self
    }

    #[must_use]
    pub fn converter_named(mut self, name: impl Into<String>) -> Self {
        self.converter = Some(ConverterOverride::Named(name.into()));
        self
    }

    #[must_use]
    pub fn deconstructor(mut self, deconstructor: Arc<dyn PairDeconstructor>) -> Self {
        self.deconstructor = Some(deconstructor);
        self
    }

    #[must_use]
    pub fn value_provider(mut self, provider: Arc<dyn ParameterValueProvider>) -> Self {
        self.value_provider = Some(provider);
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn ParameterValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Bind the raw command line string without conversion.
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.want_raw_value = true;
        self
    }

    /// Marks an option as required. Argument requiredness comes from the
    /// template.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }

    /// Lets commands below the declaring one expose this option again.
    #[must_use]
    pub fn shadowable(mut self) -> Self {
        self.shadowable = true;
        self
    }

    pub fn property(&self) -> &'static str {
        self.property
    }

    pub fn is_option(&self) -> bool {
        matches!(self.role, DeclRole::Option { .. })
    }
}

// =====================
// Resolved parameters
// =====================

#[derive(Debug, Clone)]
pub struct OptionInfo {
    pub long_names: Vec<String>,
    pub short_names: Vec<String>,
    pub value_name: Option<String>,
    pub value_is_optional: bool,
    pub is_shadowed: bool,
    pub shadowable: bool,
}

#[derive(Debug, Clone)]
pub struct ArgumentInfo {
    pub value_name: String,
    pub declared_position: usize,
    pub position: usize,
}

#[derive(Debug, Clone)]
pub enum ParameterRole {
    Option(OptionInfo),
    Argument(ArgumentInfo),
}

/// A resolved option or argument owned by one command of the model.
#[derive(Clone)]
pub struct CommandParameter {
    pub(crate) id: ParameterId,
    pub(crate) property: &'static str,
    pub(crate) declaring_type: TypeId,
    pub(crate) declaring_type_name: &'static str,
    pub(crate) param_type: ParamType,
    pub(crate) kind: ParameterKind,
    pub(crate) description: Option<String>,
    pub(crate) converter: Option<ConverterOverride>,
    pub(crate) deconstructor: Option<Arc<dyn PairDeconstructor>>,
    pub(crate) value_provider: Option<Arc<dyn ParameterValueProvider>>,
    pub(crate) validators: Vec<Arc<dyn ParameterValidator>>,
    pub(crate) default_value: Option<Value>,
    pub(crate) want_raw_value: bool,
    pub(crate) is_required: bool,
    pub(crate) is_hidden: bool,
    pub(crate) role: ParameterRole,
}

impl CommandParameter {
    /// Resolves a declaration for one command. Template errors are
    /// configuration errors.
    pub(crate) fn from_decl(
        id: ParameterId,
        decl: &ParameterDecl,
        declaring_type: TypeId,
        declaring_type_name: &'static str,
    ) -> Result<Self> {
        let (role, is_required) = match &decl.role {
            DeclRole::Option { template } => {
                let info = parse_option_template(template, decl.shadowable).map_err(|msg| {
                    Error::configuration(format!(
                        "invalid option template '{}' on {}.{}: {}",
                        template, declaring_type_name, decl.property, msg
                    ))
                })?;
                (ParameterRole::Option(info), decl.is_required)
            }
            DeclRole::Argument { position, template } => {
                let (value_name, required) = parse_argument_template(template).map_err(|msg| {
                    Error::configuration(format!(
                        "invalid argument template '{}' on {}.{}: {}",
                        template, declaring_type_name, decl.property, msg
                    ))
                })?;
                (
                    ParameterRole::Argument(ArgumentInfo {
                        value_name,
                        declared_position: *position,
                        position: *position,
                    }),
                    required,
                )
            }
        };

        let kind = match &role {
            ParameterRole::Option(info) => option_kind(&decl.param_type, info, decl),
            ParameterRole::Argument(_) => parameter_kind(&decl.param_type),
        };

        let mut default_value = decl.default_value.clone();
        if default_value.is_none() && matches!(role, ParameterRole::Option(_)) && decl.param_type.is_bool() && !decl.param_type.is_nullable() {
            default_value = Some(Value::new(false));
        }

        Ok(Self {
            id,
            property: decl.property,
            declaring_type,
            declaring_type_name,
            param_type: decl.param_type.clone(),
            kind,
            description: decl.description.clone(),
            converter: decl.converter.clone(),
            deconstructor: decl.deconstructor.clone(),
            value_provider: decl.value_provider.clone(),
            validators: decl.validators.clone(),
            default_value,
            want_raw_value: decl.want_raw_value,
            is_required,
            is_hidden: decl.is_hidden,
            role,
        })
    }

    pub fn id(&self) -> ParameterId {
        self.id
    }

    /// Logical name of the parameter: the backing property.
    pub fn property_name(&self) -> &'static str {
        self.property
    }

    pub fn declaring_type(&self) -> TypeId {
        self.declaring_type
    }

    pub fn param_type(&self) -> &ParamType {
        &self.param_type
    }

    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn converter(&self) -> Option<&ConverterOverride> {
        self.converter.as_ref()
    }

    pub fn deconstructor(&self) -> Option<&Arc<dyn PairDeconstructor>> {
        self.deconstructor.as_ref()
    }

    pub fn value_provider(&self) -> Option<&Arc<dyn ParameterValueProvider>> {
        self.value_provider.as_ref()
    }

    pub fn validators(&self) -> &[Arc<dyn ParameterValidator>] {
        &self.validators
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    pub fn want_raw_value(&self) -> bool {
        self.want_raw_value
    }

    pub fn is_required(&self) -> bool {
        self.is_required
    }

    pub fn is_hidden(&self) -> bool {
        self.is_hidden
    }

    pub fn role(&self) -> &ParameterRole {
        &self.role
    }

    pub fn as_option(&self) -> Option<&OptionInfo> {
        match &self.role {
            ParameterRole::Option(info) => Some(info),
            ParameterRole::Argument(_) => None,
        }
    }

    pub fn as_argument(&self) -> Option<&ArgumentInfo> {
        match &self.role {
            ParameterRole::Argument(info) => Some(info),
            ParameterRole::Option(_) => None,
        }
    }

    pub fn is_option(&self) -> bool {
        self.as_option().is_some()
    }

    pub fn is_argument(&self) -> bool {
        self.as_argument().is_some()
    }

    pub fn position(&self) -> Option<usize> {
        self.as_argument().map(|arg| arg.position)
    }

    pub fn is_shadowed(&self) -> bool {
        self.as_option().is_some_and(|opt| opt.is_shadowed)
    }

    /// Whether the parameter is backed by a [`crate::FlagValue`] container.
    pub fn is_flag_value(&self) -> bool {
        self.param_type.is_flag_value()
    }

    pub fn have_same_backing_property_as(&self, other: &CommandParameter) -> bool {
        self.property == other.property && self.declaring_type == other.declaring_type
    }

    /// Name used in messages: `--long`, `-s` or `<VALUE>`.
    pub fn display_name(&self) -> String {
        match &self.role {
            ParameterRole::Option(info) => info
                .long_names
                .first()
                .map(|l| format!("--{}", l))
                .or_else(|| info.short_names.first().map(|s| format!("-{}", s)))
                .unwrap_or_else(|| self.property.to_string()),
            ParameterRole::Argument(info) => info.value_name.clone(),
        }
    }
}

impl fmt::Debug for CommandParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandParameter")
            .field("id", &self.id)
            .field("property", &self.property)
            .field("kind", &self.kind)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

fn option_kind(ty: &ParamType, info: &OptionInfo, decl: &ParameterDecl) -> ParameterKind {
    if info.value_is_optional {
        return ParameterKind::FlagWithValue;
    }
    if ty.is_pair_deconstructable() && (decl.deconstructor.is_some() || decl.converter.is_none()) {
        return ParameterKind::Pair;
    }
    parameter_kind(ty)
}

fn parameter_kind(ty: &ParamType) -> ParameterKind {
    if ty.is_bool() {
        ParameterKind::Flag
    } else if ty.is_array() {
        ParameterKind::Vector
    } else {
        ParameterKind::Scalar
    }
}

fn parse_option_template(template: &str, shadowable: bool) -> std::result::Result<OptionInfo, String> {
    let mut parts = template.split_whitespace();
    let names = parts.next().ok_or("the template is empty")?;
    let value = parts.next();
    if parts.next().is_some() {
        return Err("expected names followed by at most one value name".to_string());
    }

    let mut long_names = Vec::new();
    let mut short_names = Vec::new();
    for name in names.split('|') {
        if let Some(long) = name.strip_prefix("--") {
            if !LONG_NAME.is_match(long) {
                return Err(format!("'{}' is not a valid long option name", name));
            }
            long_names.push(long.to_string());
        } else if let Some(short) = name.strip_prefix('-') {
            if !SHORT_NAME.is_match(short) {
                return Err(format!("'{}' is not a valid short option name", name));
            }
            short_names.push(short.to_string());
        } else {
            return Err(format!("option name '{}' must start with - or --", name));
        }
    }

    let (value_name, value_is_optional) = match value {
        Some(v) => {
            let (name, optional) = parse_value_name(v)?;
            (Some(name), optional)
        }
        None => (None, false),
    };

    Ok(OptionInfo {
        long_names,
        short_names,
        value_name,
        value_is_optional,
        is_shadowed: false,
        shadowable,
    })
}

fn parse_argument_template(template: &str) -> std::result::Result<(String, bool), String> {
    let trimmed = template.trim();
    let (name, optional) = parse_value_name(trimmed)?;
    Ok((name, !optional))
}

fn parse_value_name(token: &str) -> std::result::Result<(String, bool), String> {
    let caps = VALUE_NAME
        .captures(token)
        .ok_or_else(|| format!("'{}' must be written as <NAME> or [NAME]", token))?;
    match (caps.get(2), caps.get(3)) {
        (Some(required), _) => Ok((required.as_str().trim_end_matches("...").to_string(), false)),
        (_, Some(optional)) => Ok((optional.as_str().trim_end_matches("...").to_string(), true)),
        _ => Err(format!("'{}' has an empty value name", token)),
    }
}
