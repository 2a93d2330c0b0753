//! Resolve-by-type capability used to obtain settings instances and named
//! converters from an application's component registrations.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::convert::TypeConverter;

/// A freshly activated component.
pub type Component = Box<dyn Any + Send + Sync>;

type Activator = Arc<dyn Fn() -> Component + Send + Sync>;

/// Abstract component lookup. Implementations must be safe to call
/// repeatedly with the same type.
pub trait TypeResolver: Send + Sync {
    /// The last registration for `type_id`, activated.
    fn resolve(&self, type_id: TypeId) -> Option<Component>;

    /// Every registration for `type_id`, in registration order.
    fn resolve_all(&self, type_id: TypeId) -> Vec<Component>;

    /// A converter registered under `name`.
    fn resolve_converter(&self, name: &str) -> Option<Arc<dyn TypeConverter>> {
        let _ = name;
        None
    }
}

impl dyn TypeResolver + '_ {
    pub fn resolve_as<T: Any>(&self) -> Option<T> {
        self.resolve(TypeId::of::<T>())
            .and_then(|component| component.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn resolve_all_as<T: Any>(&self) -> Vec<T> {
        self.resolve_all(TypeId::of::<T>())
            .into_iter()
            .filter_map(|component| component.downcast::<T>().ok())
            .map(|boxed| *boxed)
            .collect()
    }
}

/// Registration-based resolver. Registrations are activated on every
/// resolve.
#[derive(Default)]
pub struct DefaultTypeResolver {
    registrations: HashMap<TypeId, Vec<Activator>>,
    converters: HashMap<String, Arc<dyn TypeConverter>>,
}

impl DefaultTypeResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `T`.
    pub fn register<T, F>(&mut self, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.registrations
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Arc::new(move || Box::new(factory()) as Component));
    }

    /// Registers an instance of `T`; each resolve hands out a clone.
    pub fn register_instance<T>(&mut self, instance: T)
    where
        T: Any + Send + Sync + Clone,
    {
        self.register(move || instance.clone());
    }

    /// Registers a converter that parameters can reference by name.
    pub fn register_converter(&mut self, name: impl Into<String>, converter: Arc<dyn TypeConverter>) {
        self.converters.insert(name.into(), converter);
    }
}

impl TypeResolver for DefaultTypeResolver {
    fn resolve(&self, type_id: TypeId) -> Option<Component> {
        self.registrations
            .get(&type_id)
            .and_then(|activators| activators.last())
            .map(|activate| activate())
    }

    fn resolve_all(&self, type_id: TypeId) -> Vec<Component> {
        self.registrations
            .get(&type_id)
            .map(|activators| activators.iter().map(|activate| activate()).collect())
            .unwrap_or_default()
    }

    fn resolve_converter(&self, name: &str) -> Option<Arc<dyn TypeConverter>> {
        self.converters.get(name).cloned()
    }
}
