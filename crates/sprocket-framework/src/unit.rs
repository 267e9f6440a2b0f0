//! Units: independently loadable groups of commands.
//!
//! A unit is described by a [`UnitDefinition`] in the [`Catalogue`]. Loading a
//! unit calls its factory with a [`UnitContext`], asks the new instance to
//! [`register`](Unit::register) its commands into a [`Registrar`], and commits
//! the staged commands to the registry in one step. Unloading removes the
//! commands and runs [`teardown`](Unit::teardown).
//!
//! # Static registration
//!
//! Units compiled into the binary can contribute a [`UnitDescriptor`] to the
//! [`UNITS`] distributed slice and be picked up by [`Catalogue::linked`]:
//!
//! ```rust,ignore
//! use sprocket_framework::linkme::distributed_slice;
//!
//! #[distributed_slice(sprocket_framework::UNITS)]
//! #[linkme(crate = sprocket_framework::linkme)]
//! static FUN: UnitDescriptor = UnitDescriptor {
//!     name: "fun",
//!     description: "Dice and coins",
//!     create: |_| Ok(Box::new(FunUnit)),
//! };
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use linkme::distributed_slice;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::BoxError;
use tracing::warn;

use crate::handler::Command;
use crate::lifecycle::LifecycleManager;
use crate::state::Services;

// =============================================================================
// Unit trait
// =============================================================================

/// A live unit instance.
#[async_trait]
pub trait Unit: Send + Sync {
    /// Declares the unit's commands.
    ///
    /// Returning an error aborts the load; none of the staged commands become
    /// visible.
    async fn register(&self, registrar: &mut Registrar) -> Result<(), BoxError>;

    /// Releases resources before the unit is dropped.
    ///
    /// Failures are logged and never prevent the unload.
    async fn teardown(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Collects the commands a unit declares during [`Unit::register`].
#[derive(Debug)]
pub struct Registrar {
    unit: String,
    commands: Vec<Command>,
}

impl Registrar {
    pub(crate) fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            commands: Vec::new(),
        }
    }

    /// Name of the unit being registered.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Stages a command.
    pub fn command(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub(crate) fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

// =============================================================================
// UnitContext
// =============================================================================

/// Everything a unit factory may draw on.
#[derive(Clone)]
pub struct UnitContext {
    name: String,
    config: Value,
    services: Services,
    manager: Weak<LifecycleManager>,
}

impl UnitContext {
    pub fn new(
        name: impl Into<String>,
        config: Value,
        services: Services,
        manager: Weak<LifecycleManager>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            services,
            manager,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw `[units.<name>]` config section (`Null` when absent).
    pub fn config_value(&self) -> &Value {
        &self.config
    }

    /// Deserializes the unit's config section, falling back to
    /// `T::default()` when the section is absent.
    pub fn config<T: DeserializeOwned + Default>(&self) -> Result<T, serde_json::Error> {
        if self.config.is_null() {
            Ok(T::default())
        } else {
            serde_json::from_value(self.config.clone())
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The lifecycle manager, if it is still alive.
    pub fn manager(&self) -> Option<Arc<LifecycleManager>> {
        self.manager.upgrade()
    }
}

impl fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Definitions & descriptors
// =============================================================================

/// Builds a fresh unit instance.
pub type UnitFactory = Arc<dyn Fn(&UnitContext) -> Result<Box<dyn Unit>, BoxError> + Send + Sync>;

/// A named, pre-linked unit.
#[derive(Clone)]
pub struct UnitDefinition {
    name: String,
    description: String,
    factory: UnitFactory,
}

impl UnitDefinition {
    pub fn new<F, U>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&UnitContext) -> Result<U, BoxError> + Send + Sync + 'static,
        U: Unit + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            factory: Arc::new(move |ctx: &UnitContext| {
                factory(ctx).map(|unit| Box::new(unit) as Box<dyn Unit>)
            }),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.description
    }

    /// Runs the factory.
    pub fn instantiate(&self, ctx: &UnitContext) -> Result<Box<dyn Unit>, BoxError> {
        (self.factory)(ctx)
    }
}

impl fmt::Debug for UnitDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A static, `Copy` descriptor for a unit linked into the binary.
#[derive(Debug, Clone, Copy)]
pub struct UnitDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub create: fn(&UnitContext) -> Result<Box<dyn Unit>, BoxError>,
}

impl UnitDescriptor {
    pub fn definition(&self) -> UnitDefinition {
        let create = self.create;
        UnitDefinition {
            name: self.name.to_string(),
            description: self.description.to_string(),
            factory: Arc::new(create),
        }
    }
}

impl From<UnitDescriptor> for UnitDefinition {
    fn from(descriptor: UnitDescriptor) -> Self {
        descriptor.definition()
    }
}

/// Units contributed at link time.
#[distributed_slice]
pub static UNITS: [UnitDescriptor];

// =============================================================================
// Catalogue
// =============================================================================

/// Ordered set of known units, unique by name.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    definitions: Vec<UnitDefinition>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalogue of every descriptor in [`UNITS`], sorted by name.
    pub fn linked() -> Self {
        let mut descriptors: Vec<&UnitDescriptor> = UNITS.iter().collect();
        descriptors.sort_by_key(|d| d.name);
        descriptors
            .into_iter()
            .fold(Self::new(), |catalogue, d| catalogue.with(d.definition()))
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, definition: impl Into<UnitDefinition>) -> Self {
        self.add(definition);
        self
    }

    /// Appends a definition. Returns `false`, keeping the existing entry, if
    /// the name is taken.
    pub fn add(&mut self, definition: impl Into<UnitDefinition>) -> bool {
        let definition = definition.into();
        if self.contains(definition.name()) {
            warn!(unit = %definition.name(), "Duplicate unit definition ignored");
            return false;
        }
        self.definitions.push(definition);
        true
    }

    pub fn get(&self, name: &str) -> Option<&UnitDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Unit names in catalogue order.
    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnitDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    struct Empty;

    #[async_trait]
    impl Unit for Empty {
        async fn register(&self, _registrar: &mut Registrar) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[test]
    fn catalogue_keeps_first_definition() {
        let mut catalogue = Catalogue::new()
            .with(UnitDefinition::new("fun", |_| Ok(Empty)).description("first"))
            .with(UnitDefinition::new("utility", |_| Ok(Empty)));

        assert!(!catalogue.add(UnitDefinition::new("fun", |_| Ok(Empty)).description("second")));
        assert_eq!(catalogue.names(), vec!["fun", "utility"]);
        assert_eq!(catalogue.get("fun").unwrap().help(), "first");
    }

    #[test]
    fn descriptor_converts_to_definition() {
        let descriptor = UnitDescriptor {
            name: "static",
            description: "linked",
            create: |_| Ok(Box::new(Empty) as Box<dyn Unit>),
        };
        let definition = UnitDefinition::from(descriptor);
        let ctx = UnitContext::new("static", Value::Null, Services::new(), Weak::new());

        assert_eq!(definition.name(), "static");
        assert!(definition.instantiate(&ctx).is_ok());
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct DiceConfig {
        #[serde(default)]
        max_sides: u32,
    }

    #[test]
    fn typed_config_section() {
        let absent = UnitContext::new("fun", Value::Null, Services::new(), Weak::new());
        assert_eq!(absent.config::<DiceConfig>().unwrap(), DiceConfig::default());

        let present = UnitContext::new(
            "fun",
            serde_json::json!({ "max_sides": 100 }),
            Services::new(),
            Weak::new(),
        );
        assert_eq!(present.config::<DiceConfig>().unwrap().max_sides, 100);
        assert!(present.manager().is_none());
    }
}
