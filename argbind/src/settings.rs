//! Settings types: the strongly typed objects parameters are bound into.
//!
//! A settings type is described once through [`SettingsType::builder`],
//! which registers its parameter declarations, its base type and the
//! statically known ways of creating an instance (constructors and a
//! property setter).

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::parameter::{ParameterDecl, ValidationResult};
use crate::resolver::Component;
use crate::value::Value;

/// Object-safe access to the concrete type behind a settings object.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Implemented by every settings struct.
pub trait CommandSettings: AsAny {
    /// The registered description of this settings type.
    fn describe() -> Arc<SettingsType>
    where
        Self: Sized;

    /// Whole-object validation, run once every parameter is bound.
    fn validate(&self) -> ValidationResult {
        ValidationResult::success()
    }
}

impl fmt::Debug for dyn CommandSettings + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CommandSettings")
    }
}

impl dyn CommandSettings + '_ {
    pub fn downcast_ref<T: CommandSettings>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: CommandSettings>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Settings for commands and branches that take no parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptySettings;

impl CommandSettings for EmptySettings {
    fn describe() -> Arc<SettingsType> {
        SettingsType::builder::<EmptySettings>("EmptySettings")
            .default_factory()
            .build()
    }
}

type SettingsFactory = Arc<dyn Fn() -> Box<dyn CommandSettings> + Send + Sync>;
type PropertySetter = Arc<dyn Fn(&mut dyn CommandSettings, &str, &Value) -> Result<()> + Send + Sync>;
type ConstructorFn = Arc<dyn Fn(&ConstructorArgs<'_>) -> Result<Box<dyn CommandSettings>> + Send + Sync>;
type ComponentCast = fn(Component) -> Option<Box<dyn CommandSettings>>;

/// Bound values handed to a registered constructor, by parameter name.
pub struct ConstructorArgs<'a> {
    pub(crate) values: Vec<(&'static str, Option<&'a Value>)>,
}

impl<'a> ConstructorArgs<'a> {
    /// The bound value for `name`; `None` when absent or bound to null.
    pub fn value(&self, name: &str) -> Option<&'a Value> {
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| *v)
    }

    pub fn get<T: Any + Clone>(&self, name: &str) -> Result<Option<T>> {
        self.value(name).map(Value::get::<T>).transpose()
    }

    /// Like [`ConstructorArgs::get`], falling back to `T::default()`.
    pub fn get_or_default<T: Any + Clone + Default>(&self, name: &str) -> Result<T> {
        Ok(self.get::<T>(name)?.unwrap_or_default())
    }
}

#[derive(Clone)]
pub(crate) struct SettingsConstructor {
    pub(crate) parameters: Vec<&'static str>,
    pub(crate) construct: ConstructorFn,
}

/// Registered description of a settings struct.
pub struct SettingsType {
    id: TypeId,
    name: &'static str,
    base: Option<Arc<SettingsType>>,
    parameters: Vec<ParameterDecl>,
    constructors: Vec<SettingsConstructor>,
    factory: Option<SettingsFactory>,
    setter: Option<PropertySetter>,
    from_component: ComponentCast,
}

impl SettingsType {
    pub fn builder<T: CommandSettings>(name: &'static str) -> SettingsTypeBuilder<T> {
        SettingsTypeBuilder {
            name,
            base: None,
            parameters: Vec::new(),
            constructors: Vec::new(),
            factory: None,
            setter: None,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn base(&self) -> Option<&Arc<SettingsType>> {
        self.base.as_ref()
    }

    /// Parameters declared directly on this type, excluding its bases.
    pub fn declared_parameters(&self) -> &[ParameterDecl] {
        &self.parameters
    }

    /// This type followed by its bases, most derived first.
    pub fn hierarchy(&self) -> impl Iterator<Item = &SettingsType> + '_ {
        std::iter::successors(Some(self), |current| current.base.as_deref())
    }

    /// Whether a value of this type may stand in for `other`.
    pub fn is_assignable_to(&self, other: TypeId) -> bool {
        self.hierarchy().any(|t| t.id == other)
    }

    pub(crate) fn constructors(&self) -> &[SettingsConstructor] {
        &self.constructors
    }

    pub(crate) fn setter(&self) -> Option<&PropertySetter> {
        self.setter.as_ref()
    }

    /// A fresh instance: the resolver's registration when `component` is
    /// given, otherwise the registered factory.
    pub(crate) fn instantiate(&self, component: Option<Component>) -> Result<Box<dyn CommandSettings>> {
        if let Some(settings) = component.and_then(self.from_component) {
            return Ok(settings);
        }
        match &self.factory {
            Some(factory) => Ok(factory()),
            None => Err(Error::binding(format!(
                "Could not create settings of type {}: no factory is registered",
                self.name
            ))),
        }
    }
}

impl fmt::Debug for SettingsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsType")
            .field("name", &self.name)
            .field("base", &self.base.as_ref().map(|b| b.name))
            .field("parameters", &self.parameters.len())
            .finish_non_exhaustive()
    }
}

pub struct SettingsTypeBuilder<T> {
    name: &'static str,
    base: Option<Arc<SettingsType>>,
    parameters: Vec<ParameterDecl>,
    constructors: Vec<SettingsConstructor>,
    factory: Option<SettingsFactory>,
    setter: Option<PropertySetter>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: CommandSettings> SettingsTypeBuilder<T> {
    /// Declares `base` as the parent settings type. Its parameters are
    /// resolved as a separate inheritance level.
    #[must_use]
    pub fn inherits(mut self, base: Arc<SettingsType>) -> Self {
        self.base = Some(base);
        self
    }

    #[must_use]
    pub fn parameter(mut self, decl: ParameterDecl) -> Self {
        self.parameters.push(decl);
        self
    }

    #[must_use]
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(move || Box::new(factory()) as Box<dyn CommandSettings>));
        self
    }

    #[must_use]
    pub fn default_factory(self) -> Self
    where
        T: Default,
    {
        self.factory(T::default)
    }

    /// Assigns one bound value by property name. Used for property injection
    /// and for bound values a constructor did not take.
    #[must_use]
    pub fn setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&mut T, &str, &Value) -> Result<()> + Send + Sync + 'static,
    {
        let name = self.name;
        self.setter = Some(Arc::new(move |settings: &mut dyn CommandSettings, property: &str, value: &Value| {
            let typed = settings.downcast_mut::<T>().ok_or_else(|| {
                Error::binding(format!("settings instance is not a {}", name))
            })?;
            setter(typed, property, value)
        }));
        self
    }

    /// Registers a constructor taking the named parameters. Constructor
    /// injection is used when every name has a bound entry.
    #[must_use]
    pub fn constructor<F>(mut self, parameters: &[&'static str], construct: F) -> Self
    where
        F: Fn(&ConstructorArgs<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.constructors.push(SettingsConstructor {
            parameters: parameters.to_vec(),
            construct: Arc::new(move |args: &ConstructorArgs<'_>| {
                construct(args).map(|settings| Box::new(settings) as Box<dyn CommandSettings>)
            }),
        });
        self
    }

    pub fn build(self) -> Arc<SettingsType> {
        Arc::new(SettingsType {
            id: TypeId::of::<T>(),
            name: self.name,
            base: self.base,
            parameters: self.parameters,
            constructors: self.constructors,
            factory: self.factory,
            setter: self.setter,
            from_component: cast_component::<T>,
        })
    }
}

fn cast_component<T: CommandSettings>(component: Component) -> Option<Box<dyn CommandSettings>> {
    component
        .downcast::<T>()
        .ok()
        .map(|settings| settings as Box<dyn CommandSettings>)
}
