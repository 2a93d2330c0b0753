//! Dynamically typed values flowing between the tokenizer, converters, the
//! value lookup and settings construction.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{Error, Result};

/// A bound runtime value.
///
/// Scalars are stored type-erased; vectors, pair collections and flag
/// containers keep their structure so the binder can append to them.
#[derive(Clone)]
pub enum Value {
    Single(Arc<dyn AnyValue>),
    List(Vec<Value>),
    Pairs(Vec<(Value, Option<Value>)>),
    Flag(Box<FlagValue<Value>>),
}

/// Erased scalar storage behind [`Value::Single`].
pub trait AnyValue: Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn value_type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + fmt::Debug> AnyValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn value_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl Value {
    pub fn new<T: Any + Send + Sync + fmt::Debug>(value: T) -> Self {
        Value::Single(Arc::new(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Value::new(value.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(items)
    }

    /// Runtime type of the value. Structured values report the marker type of
    /// their container.
    pub fn runtime_type(&self) -> TypeId {
        match self {
            Value::Single(inner) => {
                let handle: &dyn AnyValue = &**inner;
                handle.as_any().type_id()
            }
            Value::List(_) => TypeId::of::<Vec<Value>>(),
            Value::Pairs(_) => TypeId::of::<Vec<(Value, Option<Value>)>>(),
            Value::Flag(_) => TypeId::of::<FlagValue<Value>>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Single(inner) => {
                let handle: &dyn AnyValue = &**inner;
                handle.value_type_name()
            }
            Value::List(_) => "list",
            Value::Pairs(_) => "pairs",
            Value::Flag(_) => "flag",
        }
    }

    pub fn is<T: Any>(&self) -> bool {
        self.runtime_type() == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Single(inner) => {
                let handle: &dyn AnyValue = &**inner;
                handle.as_any().downcast_ref::<T>()
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<String>().map(String::as_str)
    }

    /// Clones the scalar out as `T`.
    pub fn get<T: Any + Clone>(&self) -> Result<T> {
        self.downcast_ref::<T>().cloned().ok_or_else(|| {
            Error::binding(format!(
                "expected a value of type {}, found {}",
                std::any::type_name::<T>(),
                self.type_name()
            ))
        })
    }

    /// Clones a vector value out as `Vec<T>`. A single scalar is accepted as a
    /// one element vector.
    pub fn get_vec<T: Any + Clone>(&self) -> Result<Vec<T>> {
        match self {
            Value::List(items) => items.iter().map(Value::get::<T>).collect(),
            Value::Single(_) => Ok(vec![self.get::<T>()?]),
            _ => Err(Error::binding(format!(
                "expected a list of {}, found {}",
                std::any::type_name::<T>(),
                self.type_name()
            ))),
        }
    }

    /// Clones a pair collection out as a map. Keys without a value map to
    /// `V::default()`; later keys replace earlier ones.
    pub fn get_map<K, V>(&self) -> Result<HashMap<K, V>>
    where
        K: Any + Clone + Eq + Hash,
        V: Any + Clone + Default,
    {
        let Value::Pairs(pairs) = self else {
            return Err(Error::binding(format!(
                "expected key/value pairs, found {}",
                self.type_name()
            )));
        };
        let mut map = HashMap::with_capacity(pairs.len());
        for (key, value) in pairs {
            let value = match value {
                Some(v) => v.get::<V>()?,
                None => V::default(),
            };
            map.insert(key.get::<K>()?, value);
        }
        Ok(map)
    }

    /// Clones a flag container out with a typed inner value.
    pub fn get_flag<T: Any + Clone>(&self) -> Result<FlagValue<T>> {
        match self {
            Value::Flag(flag) => Ok(FlagValue {
                value: flag.value.as_ref().map(Value::get::<T>).transpose()?,
                is_set: flag.is_set,
            }),
            _ => Err(Error::binding(format!(
                "expected a flag value, found {}",
                self.type_name()
            ))),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Single(inner) => write!(f, "{:?}", inner),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Pairs(pairs) => f.debug_map().entries(pairs.iter().map(|(k, v)| (k, v))).finish(),
            Value::Flag(flag) => write!(f, "{:?}", flag),
        }
    }
}

/// Value of an option whose value is optional on the command line.
///
/// `is_set` is true once the option appeared, even without a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagValue<T> {
    pub value: Option<T>,
    pub is_set: bool,
}

impl<T> Default for FlagValue<T> {
    fn default() -> Self {
        Self {
            value: None,
            is_set: false,
        }
    }
}

impl<T> FlagValue<T> {
    #[must_use]
    pub fn unset() -> Self {
        Self::default()
    }
}
