//! Settings construction from a filled value lookup.

use tracing::{debug, trace};

use super::lookup::CommandValueLookup;
use crate::error::{Error, Result};
use crate::resolver::TypeResolver;
use crate::settings::{CommandSettings, ConstructorArgs, SettingsConstructor, SettingsType};

/// Builds and validates a settings instance.
///
/// A registered constructor is used when every one of its parameter names
/// has an entry in the lookup; values it did not take are then assigned
/// through the property setter. Without a matching constructor the instance
/// comes from the resolver or the type's factory and every non-null value is
/// assigned through the setter.
pub(crate) fn create_settings(
    settings_type: &SettingsType,
    lookup: &CommandValueLookup,
    resolver: &dyn TypeResolver,
) -> Result<Box<dyn CommandSettings>> {
    let settings = match find_constructor(settings_type, lookup) {
        Some(constructor) => construct(settings_type, constructor, lookup)?,
        None => inject_properties(settings_type, lookup, resolver)?,
    };

    let result = settings.validate();
    if !result.is_successful() {
        return Err(Error::Validation {
            message: result
                .message()
                .map_or_else(|| format!("{} is not valid", settings_type.name()), str::to_string),
        });
    }
    Ok(settings)
}

fn find_constructor<'t>(settings_type: &'t SettingsType, lookup: &CommandValueLookup) -> Option<&'t SettingsConstructor> {
    settings_type.constructors().iter().find(|ctor| {
        !ctor.parameters.is_empty() && ctor.parameters.iter().all(|name| lookup.has_parameter_with_name(name))
    })
}

fn construct(
    settings_type: &SettingsType,
    constructor: &SettingsConstructor,
    lookup: &CommandValueLookup,
) -> Result<Box<dyn CommandSettings>> {
    debug!(
        "Constructing {} from ({})",
        settings_type.name(),
        constructor.parameters.join(", ")
    );
    let args = ConstructorArgs {
        values: constructor
            .parameters
            .iter()
            .map(|name| (*name, lookup.try_get_parameter_with_name(name).and_then(|(_, value)| value)))
            .collect(),
    };
    let mut settings = (constructor.construct)(&args)?;

    let taken = |property: &str| constructor.parameters.iter().any(|n| n.eq_ignore_ascii_case(property));
    if let Some(setter) = settings_type.setter() {
        for (parameter, value) in lookup.iter() {
            let Some(value) = value else { continue };
            if taken(parameter.property_name()) {
                continue;
            }
            trace!("Assigning {} after construction", parameter.property_name());
            setter(settings.as_mut(), parameter.property_name(), value)?;
        }
    }
    Ok(settings)
}

fn inject_properties(
    settings_type: &SettingsType,
    lookup: &CommandValueLookup,
    resolver: &dyn TypeResolver,
) -> Result<Box<dyn CommandSettings>> {
    let mut settings = settings_type.instantiate(resolver.resolve(settings_type.id()))?;

    let mut values = lookup.iter().filter_map(|(p, v)| v.map(|v| (p, v))).peekable();
    if values.peek().is_none() {
        return Ok(settings);
    }
    let setter = settings_type.setter().ok_or_else(|| {
        Error::binding(format!(
            "Could not assign values to {}: no property setter is registered",
            settings_type.name()
        ))
    })?;
    for (parameter, value) in values {
        trace!("Assigning {}", parameter.property_name());
        setter(settings.as_mut(), parameter.property_name(), value)?;
    }
    Ok(settings)
}
