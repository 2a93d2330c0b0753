//! Declared parameter types.
//!
//! A [`ParamType`] stands in for the runtime type information a settings
//! field would carry: its identity, its structural shape (scalar, vector,
//! pair collection, flag container, ...) and the optional conversion hooks
//! registered for it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::Arc;

use crate::convert::TypeConverter;
use crate::error::BoxError;
use crate::value::{FlagValue, Value};

/// Constructs a value of the target type from a single string.
pub type StringConstructor = Arc<dyn Fn(&str) -> Result<Value, BoxError> + Send + Sync>;

/// Named variants of an enumeration, in declaration order.
#[derive(Clone)]
pub struct EnumVariants {
    pub(crate) variants: Vec<(&'static str, Value)>,
}

impl EnumVariants {
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.variants.iter().map(|(name, _)| *name)
    }
}

#[derive(Clone)]
pub enum TypeShape {
    Scalar,
    Bool,
    Enum(EnumVariants),
    /// `Vec<T>`; bound element by element.
    Array(Box<ParamType>),
    /// Any other collection type. Not convertible from a string.
    Collection,
    /// A key/value collection filled from `key=value` tokens.
    Pair {
        key: Box<ParamType>,
        value: Box<ParamType>,
    },
    /// [`FlagValue<T>`] container.
    Flag(Box<ParamType>),
}

#[derive(Clone)]
pub struct ParamType {
    id: TypeId,
    name: &'static str,
    shape: TypeShape,
    nullable: bool,
    string_constructor: Option<StringConstructor>,
    converter: Option<Arc<dyn TypeConverter>>,
}

impl ParamType {
    fn with_shape(id: TypeId, name: &'static str, shape: TypeShape, nullable: bool) -> Self {
        Self {
            id,
            name,
            shape,
            nullable,
            string_constructor: None,
            converter: None,
        }
    }

    /// A plain scalar type. `bool` is recognized as a flag; `String` and
    /// `PathBuf` are treated as reference-like and bind an explicit null when
    /// left unset.
    pub fn of<T: Any>() -> Self {
        let id = TypeId::of::<T>();
        let shape = if id == TypeId::of::<bool>() {
            TypeShape::Bool
        } else {
            TypeShape::Scalar
        };
        let nullable = id == TypeId::of::<String>() || id == TypeId::of::<PathBuf>();
        Self::with_shape(id, std::any::type_name::<T>(), shape, nullable)
    }

    /// `Option<T>`. The bound value is a `T`; an unset parameter binds null.
    pub fn optional<T: Any>() -> Self {
        Self {
            nullable: true,
            name: std::any::type_name::<Option<T>>(),
            ..Self::of::<T>()
        }
    }

    pub fn vec<T: Any>() -> Self {
        Self::vec_of(Self::of::<T>())
    }

    /// `Vec<_>` of an already described element type.
    pub fn vec_of(element: ParamType) -> Self {
        Self::with_shape(
            TypeId::of::<Vec<Value>>(),
            "Vec",
            TypeShape::Array(Box::new(element)),
            true,
        )
    }

    pub fn collection<C: Any>() -> Self {
        Self::with_shape(
            TypeId::of::<C>(),
            std::any::type_name::<C>(),
            TypeShape::Collection,
            true,
        )
    }

    /// A key/value collection such as `HashMap<K, V>`.
    pub fn map<K: Any + Eq + Hash, V: Any>() -> Self {
        Self::with_shape(
            TypeId::of::<HashMap<K, V>>(),
            std::any::type_name::<HashMap<K, V>>(),
            TypeShape::Pair {
                key: Box::new(Self::of::<K>()),
                value: Box::new(Self::of::<V>()),
            },
            true,
        )
    }

    /// [`FlagValue<T>`], an option whose value may be omitted.
    pub fn flag<T: Any>() -> Self {
        Self::flag_of(Self::of::<T>())
    }

    pub fn flag_of(inner: ParamType) -> Self {
        Self::with_shape(
            TypeId::of::<FlagValue<Value>>(),
            "FlagValue",
            TypeShape::Flag(Box::new(inner)),
            false,
        )
    }

    /// An enumeration with its variants in declaration order.
    pub fn enumeration<E>(variants: &[(&'static str, E)]) -> Self
    where
        E: Any + Send + Sync + Clone + fmt::Debug,
    {
        let variants = variants
            .iter()
            .map(|(name, v)| (*name, Value::new(v.clone())))
            .collect();
        Self::with_shape(
            TypeId::of::<E>(),
            std::any::type_name::<E>(),
            TypeShape::Enum(EnumVariants { variants }),
            false,
        )
    }

    /// Registers `T::from(String)` as the single-string constructor used when
    /// no converter supports the input.
    #[must_use]
    pub fn with_string_constructor<T>(mut self) -> Self
    where
        T: From<String> + Any + Send + Sync + fmt::Debug,
    {
        self.string_constructor = Some(Arc::new(|s: &str| Ok(Value::new(T::from(s.to_owned())))));
        self
    }

    /// Registers a fallible single-string constructor.
    #[must_use]
    pub fn with_try_string_constructor<F>(mut self, ctor: F) -> Self
    where
        F: Fn(&str) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.string_constructor = Some(Arc::new(ctor));
        self
    }

    /// A converter declared on the type itself, consulted after the
    /// intrinsic table.
    #[must_use]
    pub fn with_converter(mut self, converter: Arc<dyn TypeConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn shape(&self) -> &TypeShape {
        &self.shape
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.shape, TypeShape::Bool)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.shape, TypeShape::Array(_))
    }

    pub fn is_flag_value(&self) -> bool {
        matches!(self.shape, TypeShape::Flag(_))
    }

    pub fn is_pair_deconstructable(&self) -> bool {
        matches!(self.shape, TypeShape::Pair { .. })
    }

    pub fn element_type(&self) -> Option<&ParamType> {
        match &self.shape {
            TypeShape::Array(element) => Some(element),
            _ => None,
        }
    }

    pub fn flag_inner_type(&self) -> Option<&ParamType> {
        match &self.shape {
            TypeShape::Flag(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn string_constructor(&self) -> Option<&StringConstructor> {
        self.string_constructor.as_ref()
    }

    pub fn declared_converter(&self) -> Option<&Arc<dyn TypeConverter>> {
        self.converter.as_ref()
    }

    /// Whether a runtime value already has this type and needs no conversion.
    pub fn accepts(&self, value: &Value) -> bool {
        value.runtime_type() == self.id
    }
}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamType")
            .field("name", &self.name)
            .field("nullable", &self.nullable)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Level {
        Low,
        High,
    }

    #[test]
    fn test_of_bool_is_flag_shaped_scalar() {
        assert!(ParamType::of::<bool>().is_bool());
        assert!(!ParamType::of::<i32>().is_bool());
    }

    #[test]
    fn test_of_string_is_reference_like() {
        assert!(ParamType::of::<String>().is_nullable());
        assert!(ParamType::of::<PathBuf>().is_nullable());
        assert!(!ParamType::of::<u64>().is_nullable());
    }

    #[test]
    fn test_optional_keeps_inner_identity() {
        let ty = ParamType::optional::<i32>();
        assert!(ty.is_nullable());
        assert_eq!(ty.id(), TypeId::of::<i32>());
        assert!(ty.accepts(&Value::new(5i32)));
    }

    #[test]
    fn test_vec_element_type() {
        let ty = ParamType::vec::<String>();
        assert!(ty.is_array());
        assert_eq!(ty.element_type().unwrap().id(), TypeId::of::<String>());
    }

    #[test]
    fn test_map_is_pair_deconstructable() {
        let ty = ParamType::map::<String, i32>();
        assert!(ty.is_pair_deconstructable());
        assert!(!ty.is_array());
    }

    #[test]
    fn test_flag_inner_type() {
        let ty = ParamType::flag::<u16>();
        assert!(ty.is_flag_value());
        assert_eq!(ty.flag_inner_type().unwrap().id(), TypeId::of::<u16>());
    }

    #[test]
    fn test_enumeration_variant_names() {
        let ty = ParamType::enumeration(&[("low", Level::Low), ("high", Level::High)]);
        let TypeShape::Enum(variants) = ty.shape() else {
            panic!("Expected enum shape");
        };
        assert_eq!(variants.names().collect::<Vec<_>>(), vec!["low", "high"]);
    }

    #[test]
    fn test_with_string_constructor() {
        #[derive(Debug)]
        struct Name(String);
        impl From<String> for Name {
            fn from(s: String) -> Self {
                Name(s)
            }
        }
        let ty = ParamType::of::<Name>().with_string_constructor::<Name>();
        let ctor = ty.string_constructor().unwrap();
        let value = ctor("alice").unwrap();
        assert_eq!(value.downcast_ref::<Name>().unwrap().0, "alice");
    }
}
