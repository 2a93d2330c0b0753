//! Type conversion: turning raw strings (and provider supplied values) into
//! values of a parameter's declared type.
//!
//! Converters are looked up in a fixed order: an explicit override on the
//! parameter, the intrinsic table keyed by normalized type, a converter
//! declared on the type itself, and finally the base converter for types
//! that can be built from a single string.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::error::BoxError;
use crate::types::{EnumVariants, ParamType, TypeShape};
use crate::value::Value;

/// Failure raised by a [`TypeConverter`].
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The converter cannot handle this kind of input at all. The binder may
    /// retry through the target type's single-string constructor.
    #[error("{converter} cannot convert from {from}")]
    NotSupported { converter: String, from: String },

    /// The input was understood but is not a valid value.
    #[error("'{input}' is not a valid {target}: {reason}")]
    Invalid {
        input: String,
        target: String,
        reason: String,
    },

    /// An error raised by user supplied conversion code.
    #[error(transparent)]
    Other(BoxError),
}

impl ConvertError {
    pub fn not_supported(converter: impl Into<String>, from: impl Into<String>) -> Self {
        ConvertError::NotSupported {
            converter: converter.into(),
            from: from.into(),
        }
    }

    pub fn invalid(
        input: impl Into<String>,
        target: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        ConvertError::Invalid {
            input: input.into(),
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, ConvertError::NotSupported { .. })
    }
}

/// Converts strings, or values of another runtime type, into a target type.
pub trait TypeConverter: Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> &str;

    fn convert_from_str(&self, input: &str) -> Result<Value, ConvertError>;

    /// Converts an already typed value. Strings go through
    /// [`TypeConverter::convert_from_str`]; anything else is not supported
    /// unless the converter overrides this.
    fn convert_from(&self, value: &Value) -> Result<Value, ConvertError> {
        match value.as_str() {
            Some(s) => self.convert_from_str(s),
            None => Err(ConvertError::not_supported(self.name(), value.type_name())),
        }
    }
}

impl fmt::Debug for dyn TypeConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeConverter({})", self.name())
    }
}

// =====================
// Intrinsic converters
// =====================

/// Converter for any `FromStr` type.
pub struct ParseConverter<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ParseConverter<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: format!("{}Converter", short_type_name::<T>()),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ParseConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TypeConverter for ParseConverter<T>
where
    T: FromStr + Any + Send + Sync + fmt::Debug,
    T::Err: fmt::Display,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn convert_from_str(&self, input: &str) -> Result<Value, ConvertError> {
        input
            .trim()
            .parse::<T>()
            .map(Value::new)
            .map_err(|e| ConvertError::invalid(input, short_type_name::<T>(), e))
    }
}

/// Identity conversion for strings; untrimmed.
pub struct StringConverter;

impl TypeConverter for StringConverter {
    fn name(&self) -> &str {
        "StringConverter"
    }

    fn convert_from_str(&self, input: &str) -> Result<Value, ConvertError> {
        Ok(Value::string(input))
    }
}

/// Case-insensitive `true` / `false`.
pub struct BoolConverter;

impl TypeConverter for BoolConverter {
    fn name(&self) -> &str {
        "BooleanConverter"
    }

    fn convert_from_str(&self, input: &str) -> Result<Value, ConvertError> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            Ok(Value::new(true))
        } else if trimmed.eq_ignore_ascii_case("false") {
            Ok(Value::new(false))
        } else {
            Err(ConvertError::invalid(input, "bool", "expected 'true' or 'false'"))
        }
    }
}

/// Matches enum variants by name (ignoring case) or by ordinal.
pub struct EnumConverter {
    name: String,
    target: &'static str,
    variants: EnumVariants,
}

impl EnumConverter {
    pub fn new(ty: &ParamType, variants: EnumVariants) -> Self {
        Self {
            name: format!("EnumConverter<{}>", ty.name()),
            target: ty.name(),
            variants,
        }
    }
}

impl TypeConverter for EnumConverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn convert_from_str(&self, input: &str) -> Result<Value, ConvertError> {
        let trimmed = input.trim();
        if let Some((_, value)) = self
            .variants
            .variants
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(trimmed))
        {
            return Ok(value.clone());
        }
        if let Ok(index) = trimmed.parse::<usize>() {
            if let Some((_, value)) = self.variants.variants.get(index) {
                return Ok(value.clone());
            }
        }
        let expected: Vec<&str> = self.variants.names().collect();
        Err(ConvertError::invalid(
            input,
            self.target,
            format!("expected one of: {}", expected.join(", ")),
        ))
    }
}

/// Normalized converter for arrays and other collections: never converts
/// from a single string.
pub struct CollectionConverter {
    name: &'static str,
}

impl TypeConverter for CollectionConverter {
    fn name(&self) -> &str {
        self.name
    }

    fn convert_from_str(&self, _input: &str) -> Result<Value, ConvertError> {
        Err(ConvertError::not_supported(self.name, "string"))
    }
}

/// Fallback for types that only offer a single-string constructor.
pub struct BaseConverter;

impl TypeConverter for BaseConverter {
    fn name(&self) -> &str {
        "TypeConverter"
    }

    fn convert_from_str(&self, _input: &str) -> Result<Value, ConvertError> {
        Err(ConvertError::not_supported(self.name(), "string"))
    }
}

// =====================
// Registry
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConverterKey {
    Type(TypeId),
    Array,
    Collection,
    Enum,
}

impl ConverterKey {
    fn normalize(ty: &ParamType) -> Self {
        match ty.shape() {
            TypeShape::Array(_) => ConverterKey::Array,
            TypeShape::Collection => ConverterKey::Collection,
            TypeShape::Enum(_) => ConverterKey::Enum,
            _ => ConverterKey::Type(ty.id()),
        }
    }
}

pub type ConverterFactory = fn(&ParamType) -> Arc<dyn TypeConverter>;

/// Immutable table of intrinsic converters keyed by normalized type.
pub struct ConverterRegistry {
    factories: HashMap<ConverterKey, ConverterFactory>,
}

static INTRINSIC: Lazy<ConverterRegistry> = Lazy::new(ConverterRegistry::intrinsic);

fn parse<T>(_: &ParamType) -> Arc<dyn TypeConverter>
where
    T: FromStr + Any + Send + Sync + fmt::Debug,
    T::Err: fmt::Display,
{
    Arc::new(ParseConverter::<T>::new())
}

fn bool_converter(_: &ParamType) -> Arc<dyn TypeConverter> {
    Arc::new(BoolConverter)
}

fn string_converter(_: &ParamType) -> Arc<dyn TypeConverter> {
    Arc::new(StringConverter)
}

fn array_converter(_: &ParamType) -> Arc<dyn TypeConverter> {
    Arc::new(CollectionConverter {
        name: "ArrayConverter",
    })
}

fn collection_converter(_: &ParamType) -> Arc<dyn TypeConverter> {
    Arc::new(CollectionConverter {
        name: "CollectionConverter",
    })
}

fn enum_converter(ty: &ParamType) -> Arc<dyn TypeConverter> {
    match ty.shape() {
        TypeShape::Enum(variants) => Arc::new(EnumConverter::new(ty, variants.clone())),
        _ => Arc::new(BaseConverter),
    }
}

impl ConverterRegistry {
    /// Builds the intrinsic table.
    #[must_use]
    pub fn intrinsic() -> Self {
        let mut factories: HashMap<ConverterKey, ConverterFactory> = HashMap::new();
        let mut add = |id: TypeId, factory: ConverterFactory| {
            factories.insert(ConverterKey::Type(id), factory);
        };
        add(TypeId::of::<bool>(), bool_converter);
        add(TypeId::of::<String>(), string_converter);
        add(TypeId::of::<char>(), parse::<char>);
        add(TypeId::of::<u8>(), parse::<u8>);
        add(TypeId::of::<i8>(), parse::<i8>);
        add(TypeId::of::<u16>(), parse::<u16>);
        add(TypeId::of::<i16>(), parse::<i16>);
        add(TypeId::of::<u32>(), parse::<u32>);
        add(TypeId::of::<i32>(), parse::<i32>);
        add(TypeId::of::<u64>(), parse::<u64>);
        add(TypeId::of::<i64>(), parse::<i64>);
        add(TypeId::of::<u128>(), parse::<u128>);
        add(TypeId::of::<i128>(), parse::<i128>);
        add(TypeId::of::<usize>(), parse::<usize>);
        add(TypeId::of::<isize>(), parse::<isize>);
        add(TypeId::of::<f32>(), parse::<f32>);
        add(TypeId::of::<f64>(), parse::<f64>);
        add(TypeId::of::<PathBuf>(), parse::<PathBuf>);
        add(TypeId::of::<IpAddr>(), parse::<IpAddr>);
        add(TypeId::of::<Ipv4Addr>(), parse::<Ipv4Addr>);
        add(TypeId::of::<Ipv6Addr>(), parse::<Ipv6Addr>);
        add(TypeId::of::<chrono::NaiveDate>(), parse::<chrono::NaiveDate>);
        add(TypeId::of::<chrono::NaiveDateTime>(), parse::<chrono::NaiveDateTime>);
        add(
            TypeId::of::<chrono::DateTime<chrono::FixedOffset>>(),
            parse::<chrono::DateTime<chrono::FixedOffset>>,
        );
        add(
            TypeId::of::<chrono::DateTime<chrono::Utc>>(),
            parse::<chrono::DateTime<chrono::Utc>>,
        );
        add(TypeId::of::<uuid::Uuid>(), parse::<uuid::Uuid>);
        add(TypeId::of::<http::Uri>(), parse::<http::Uri>);

        factories.insert(ConverterKey::Array, array_converter);
        factories.insert(ConverterKey::Collection, collection_converter);
        factories.insert(ConverterKey::Enum, enum_converter);

        Self { factories }
    }

    /// Process-wide intrinsic table, built on first use.
    pub fn shared() -> &'static ConverterRegistry {
        &INTRINSIC
    }

    /// Adds or replaces the intrinsic converter for `T`.
    pub fn register<T: Any>(&mut self, factory: ConverterFactory) {
        self.factories
            .insert(ConverterKey::Type(TypeId::of::<T>()), factory);
    }

    /// Intrinsic converter for the normalized type, if any.
    pub fn intrinsic_for(&self, ty: &ParamType) -> Option<Arc<dyn TypeConverter>> {
        self.factories
            .get(&ConverterKey::normalize(ty))
            .map(|factory| factory(ty))
    }

    /// Converter for a declared type: intrinsic table, then the type's own
    /// converter, then the base converter when a single-string constructor
    /// exists. `None` means no converter can be found.
    pub fn converter_for(&self, ty: &ParamType) -> Option<Arc<dyn TypeConverter>> {
        if let Some(converter) = self.intrinsic_for(ty) {
            return Some(converter);
        }
        if let Some(converter) = ty.declared_converter() {
            return Some(Arc::clone(converter));
        }
        if ty.string_constructor().is_some() {
            return Some(Arc::new(BaseConverter));
        }
        None
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::intrinsic()
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    match full.find('<') {
        Some(generic) => full[..generic].rsplit("::").next().unwrap_or(full),
        None => full.rsplit("::").next().unwrap_or(full),
    }
}
