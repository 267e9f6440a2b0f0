//! Unit lifecycle management.
//!
//! [`LifecycleManager`] activates and deactivates units from a static
//! [`Catalogue`] at runtime:
//!
//! ```text
//!            load()                       unload()
//! Unloaded ─────────▶ Loading ─▶ Loaded ─────────▶ Unloading ─▶ Unloaded
//!                        │
//!                        └─ factory / register / registry failure ─▶ Unloaded
//! ```
//!
//! # Concurrency
//!
//! Two locks order every operation:
//!
//! - a **sweep gate**: single-unit operations hold it shared, while
//!   [`reload_all`](LifecycleManager::reload_all),
//!   [`load_all`](LifecycleManager::load_all) and
//!   [`shutdown`](LifecycleManager::shutdown) hold it exclusively;
//! - one **per-unit mutex**, so concurrent operations on the same unit are
//!   serialized while different units proceed independently.
//!
//! # Host unit
//!
//! The unit that hosts the lifecycle commands (see [`builtin::manage`]) is
//! never unloaded by a single-unit operation or by `reload_all`; only
//! `shutdown` removes it.
//!
//! [`builtin::manage`]: crate::builtin::manage

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::{Instrument, Level, error, info, span, warn};

use crate::error::{LifecycleError, panic_message};
use crate::registry::HandlerRegistry;
use crate::state::Services;
use crate::unit::{Catalogue, Registrar, Unit, UnitContext, UnitDefinition};

/// Lifecycle state of a catalogue unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
        }
    }
}

/// Outcome of a multi-unit sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Units that ended the sweep loaded, in catalogue order.
    pub reloaded: Vec<String>,
    /// Units that failed at either phase.
    pub failed: BTreeMap<String, LifecycleError>,
}

impl ReloadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Operator-facing summary.
    pub fn summary(&self) -> String {
        let mut out = String::from("Unit reload finished.\n");
        if !self.reloaded.is_empty() {
            out.push_str(&format!(
                "Successfully loaded/reloaded: `{}`\n",
                self.reloaded.join("`, `")
            ));
        }
        if !self.failed.is_empty() {
            out.push_str("Failed operations:\n");
            for (unit, err) in &self.failed {
                out.push_str(&format!("- `{unit}`: {err}\n"));
            }
        }
        out
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Configures a [`LifecycleManager`].
#[derive(Debug)]
pub struct LifecycleBuilder {
    catalogue: Catalogue,
    registry: Option<Arc<HandlerRegistry>>,
    services: Services,
    unit_configs: HashMap<String, Value>,
    host: Option<String>,
    disabled: HashSet<String>,
}

impl LifecycleBuilder {
    /// Shares an existing registry instead of creating a fresh one.
    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Per-unit config sections, keyed by unit name.
    pub fn unit_configs(mut self, configs: HashMap<String, Value>) -> Self {
        self.unit_configs = configs;
        self
    }

    /// Names the unit that hosts the lifecycle commands.
    pub fn host(mut self, name: impl Into<String>) -> Self {
        self.host = Some(name.into());
        self
    }

    /// Units skipped by [`load_all`](LifecycleManager::load_all) and
    /// [`reload_all`](LifecycleManager::reload_all).
    pub fn disabled<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Arc<LifecycleManager> {
        let states = self
            .catalogue
            .names()
            .into_iter()
            .map(|name| (name.to_string(), UnitState::Unloaded))
            .collect();

        Arc::new_cyclic(|me| LifecycleManager {
            me: me.clone(),
            catalogue: self.catalogue,
            registry: self.registry.unwrap_or_default(),
            services: self.services,
            unit_configs: self.unit_configs,
            host: self.host,
            disabled: self.disabled,
            sweep: AsyncRwLock::new(()),
            unit_locks: Mutex::new(HashMap::new()),
            states: RwLock::new(states),
            instances: Mutex::new(HashMap::new()),
        })
    }
}

// =============================================================================
// LifecycleManager
// =============================================================================

/// Loads, unloads and reloads units at runtime.
pub struct LifecycleManager {
    me: Weak<LifecycleManager>,
    catalogue: Catalogue,
    registry: Arc<HandlerRegistry>,
    services: Services,
    unit_configs: HashMap<String, Value>,
    host: Option<String>,
    disabled: HashSet<String>,
    sweep: AsyncRwLock<()>,
    unit_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    states: RwLock<HashMap<String, UnitState>>,
    instances: Mutex<HashMap<String, Arc<dyn Unit>>>,
}

impl LifecycleManager {
    pub fn builder(catalogue: Catalogue) -> LifecycleBuilder {
        LifecycleBuilder {
            catalogue,
            registry: None,
            services: Services::new(),
            unit_configs: HashMap::new(),
            host: None,
            disabled: HashSet::new(),
        }
    }

    // ─── Single-unit operations ──────────────────────────────────────────────

    /// Activates `name`.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotFound`] if the catalogue has no such unit.
    /// - [`LifecycleError::AlreadyLoaded`] if it is loaded.
    /// - [`LifecycleError::LoadFailed`] if the factory fails or panics, if
    ///   registration fails, or if a command name conflicts. The unit is left
    ///   unloaded with none of its commands visible.
    pub async fn load(&self, name: &str) -> Result<(), LifecycleError> {
        let span = span!(Level::DEBUG, "lifecycle", op = "load", unit = %name);
        async {
            let _sweep = self.sweep.read().await;
            let lock = self.unit_lock(name)?;
            let _unit = lock.lock().await;
            self.load_locked(name).await
        }
        .instrument(span)
        .await
    }

    /// Deactivates `name`.
    ///
    /// The host unit is refused with [`LifecycleError::SelfUnloadRefused`]
    /// and the registry is left untouched.
    pub async fn unload(&self, name: &str) -> Result<(), LifecycleError> {
        let span = span!(Level::DEBUG, "lifecycle", op = "unload", unit = %name);
        async {
            if self.is_host(name) {
                warn!(unit = %name, "Refusing to unload the host unit");
                return Err(LifecycleError::SelfUnloadRefused(name.to_string()));
            }
            let _sweep = self.sweep.read().await;
            let lock = self.unit_lock(name)?;
            let _unit = lock.lock().await;
            self.unload_locked(name).await
        }
        .instrument(span)
        .await
    }

    /// Unloads then loads `name` under one per-unit lock.
    ///
    /// Not atomic: if loading fails after a successful unload the unit stays
    /// unloaded and [`LifecycleError::ReloadLeftUnloaded`] is returned.
    pub async fn reload(&self, name: &str) -> Result<(), LifecycleError> {
        let span = span!(Level::DEBUG, "lifecycle", op = "reload", unit = %name);
        async {
            if self.is_host(name) {
                return Err(LifecycleError::SelfUnloadRefused(name.to_string()));
            }
            let _sweep = self.sweep.read().await;
            let lock = self.unit_lock(name)?;
            let _unit = lock.lock().await;

            self.unload_locked(name).await?;
            self.load_locked(name).await.map_err(|err| match err {
                LifecycleError::LoadFailed { name, cause } => {
                    error!(unit = %name, %cause, "Unit left unloaded after failed reload");
                    LifecycleError::ReloadLeftUnloaded { name, cause }
                }
                other => other,
            })
        }
        .instrument(span)
        .await
    }

    // ─── Sweeps ──────────────────────────────────────────────────────────────

    /// Reloads every unit except the host.
    ///
    /// Runs exclusively: no other lifecycle operation interleaves. Every
    /// loaded unit is unloaded first, then every catalogue unit is loaded;
    /// failures in either phase are collected, never short-circuit.
    /// `disabled_units` only applies to [`load_all`](Self::load_all), so a
    /// disabled unit loaded by hand comes back too.
    pub async fn reload_all(&self) -> ReloadReport {
        let span = span!(Level::DEBUG, "lifecycle", op = "reload_all");
        async {
            let _sweep = self.sweep.write().await;
            let mut report = ReloadReport::default();

            for name in self.loaded() {
                if self.is_host(&name) {
                    continue;
                }
                if let Err(err) = self.unload_locked(&name).await {
                    report.failed.insert(name, err);
                }
            }

            for definition in self.catalogue.iter() {
                let name = definition.name();
                if self.is_host(name) {
                    continue;
                }
                match self.load_locked(name).await {
                    Ok(()) => report.reloaded.push(name.to_string()),
                    Err(err) => {
                        report.failed.entry(name.to_string()).or_insert(err);
                    }
                }
            }

            info!(
                reloaded = report.reloaded.len(),
                failed = report.failed.len(),
                "Reload sweep finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Startup sweep: loads every enabled catalogue unit, host included.
    pub async fn load_all(&self) -> ReloadReport {
        let span = span!(Level::DEBUG, "lifecycle", op = "load_all");
        async {
            let _sweep = self.sweep.write().await;
            let mut report = ReloadReport::default();

            for definition in self.catalogue.iter() {
                let name = definition.name();
                if self.disabled.contains(name) {
                    info!(unit = %name, "Unit disabled by configuration, skipping");
                    continue;
                }
                if self.state(name) == Some(UnitState::Loaded) {
                    continue;
                }
                match self.load_locked(name).await {
                    Ok(()) => report.reloaded.push(name.to_string()),
                    Err(err) => {
                        report.failed.insert(name.to_string(), err);
                    }
                }
            }
            report
        }
        .instrument(span)
        .await
    }

    /// Unloads every loaded unit, host included, in reverse catalogue order.
    pub async fn shutdown(&self) -> Vec<String> {
        let span = span!(Level::DEBUG, "lifecycle", op = "shutdown");
        async {
            let _sweep = self.sweep.write().await;
            let mut unloaded = Vec::new();
            for name in self.loaded().into_iter().rev() {
                if self.unload_locked(&name).await.is_ok() {
                    unloaded.push(name);
                }
            }
            info!(count = unloaded.len(), "All units unloaded");
            unloaded
        }
        .instrument(span)
        .await
    }

    // ─── Introspection ───────────────────────────────────────────────────────

    /// State of `name`, or `None` if the catalogue has no such unit.
    pub fn state(&self, name: &str) -> Option<UnitState> {
        self.states.read().get(name).copied()
    }

    /// Loaded units in catalogue order.
    pub fn loaded(&self) -> Vec<String> {
        let states = self.states.read();
        self.catalogue
            .names()
            .into_iter()
            .filter(|name| states.get(*name) == Some(&UnitState::Loaded))
            .map(str::to_string)
            .collect()
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Name of the host unit, if one is configured.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn is_host(&self, name: &str) -> bool {
        self.host.as_deref() == Some(name)
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    /// Per-unit lock. Only catalogue units get one.
    fn unit_lock(&self, name: &str) -> Result<Arc<AsyncMutex<()>>, LifecycleError> {
        if !self.catalogue.contains(name) {
            return Err(LifecycleError::NotFound(name.to_string()));
        }
        Ok(Arc::clone(
            self.unit_locks
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        ))
    }

    fn set_state(&self, name: &str, state: UnitState) {
        self.states.write().insert(name.to_string(), state);
    }

    async fn load_locked(&self, name: &str) -> Result<(), LifecycleError> {
        let definition = self
            .catalogue
            .get(name)
            .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?;
        if self.state(name) == Some(UnitState::Loaded) {
            return Err(LifecycleError::AlreadyLoaded(name.to_string()));
        }

        self.set_state(name, UnitState::Loading);
        match self.activate(definition).await {
            Ok(instance) => {
                self.instances.lock().insert(name.to_string(), instance);
                self.set_state(name, UnitState::Loaded);
                info!(
                    unit = %name,
                    commands = self.registry.commands_of(name).len(),
                    "Unit loaded"
                );
                Ok(())
            }
            Err(cause) => {
                self.set_state(name, UnitState::Unloaded);
                error!(unit = %name, %cause, "Failed to load unit");
                Err(LifecycleError::LoadFailed {
                    name: name.to_string(),
                    cause,
                })
            }
        }
    }

    /// Instantiates, registers and commits a unit. Nothing is left behind on
    /// failure.
    async fn activate(&self, definition: &UnitDefinition) -> Result<Arc<dyn Unit>, String> {
        let name = definition.name();
        let ctx = UnitContext::new(
            name,
            self.unit_configs.get(name).cloned().unwrap_or(Value::Null),
            self.services.clone(),
            self.me.clone(),
        );

        let instance: Arc<dyn Unit> =
            match panic::catch_unwind(AssertUnwindSafe(|| definition.instantiate(&ctx))) {
                Ok(Ok(unit)) => Arc::from(unit),
                Ok(Err(err)) => return Err(err.to_string()),
                Err(payload) => {
                    return Err(format!("factory panicked: {}", panic_message(&*payload)));
                }
            };

        let mut registrar = Registrar::new(name);
        let registered = AssertUnwindSafe(instance.register(&mut registrar))
            .catch_unwind()
            .await;
        let cause = match registered {
            Ok(Ok(())) => match self.registry.insert_unit(name, registrar.into_commands()) {
                Ok(()) => return Ok(instance),
                Err(err) => err.to_string(),
            },
            Ok(Err(err)) => err.to_string(),
            Err(payload) => format!("registration panicked: {}", panic_message(&*payload)),
        };

        run_teardown(name, instance.as_ref()).await;
        Err(cause)
    }

    async fn unload_locked(&self, name: &str) -> Result<(), LifecycleError> {
        if !self.catalogue.contains(name) {
            return Err(LifecycleError::NotFound(name.to_string()));
        }
        if self.state(name) != Some(UnitState::Loaded) {
            return Err(LifecycleError::NotLoaded(name.to_string()));
        }

        self.set_state(name, UnitState::Unloading);
        let removed = self.registry.remove_unit(name);
        let instance = self.instances.lock().remove(name);
        if let Some(instance) = instance {
            run_teardown(name, instance.as_ref()).await;
        }
        self.set_state(name, UnitState::Unloaded);
        info!(unit = %name, commands = removed.len(), "Unit unloaded");
        Ok(())
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("catalogue", &self.catalogue.names())
            .field("host", &self.host)
            .field("loaded", &self.loaded())
            .finish_non_exhaustive()
    }
}

/// Runs a unit's teardown hook. Failures and panics are logged only.
async fn run_teardown(name: &str, instance: &dyn Unit) {
    match AssertUnwindSafe(instance.teardown()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(unit = %name, error = %err, "Unit teardown failed"),
        Err(payload) => {
            warn!(unit = %name, panic = %panic_message(&*payload), "Unit teardown panicked");
        }
    }
}
