//! HandlerRegistry — the units a managed server binds at start time.
//!
//! Registration is open while the server is stopped. Starting freezes the
//! registry and hands the engine a snapshot; anything registered later would
//! not be served, so it is rejected until the server stops again.

use std::sync::Arc;

use runner_protocol::RunnerError;
use runner_transport::{HandlerPackage, HandlerSet, HandlerUnit};
use tracing::info;

#[derive(Default)]
pub struct HandlerRegistry {
    units: Vec<Arc<dyn HandlerUnit>>,
    frozen: bool,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler unit.
    pub fn register<U: HandlerUnit>(&mut self, unit: U) -> Result<(), RunnerError> {
        self.register_shared(Arc::new(unit))
    }

    /// Register a unit that is shared with other owners.
    pub fn register_shared(&mut self, unit: Arc<dyn HandlerUnit>) -> Result<(), RunnerError> {
        self.ensure_open(unit.name())?;
        if self.contains(unit.name()) {
            return Err(RunnerError::configuration(format!(
                "handler unit '{}' is already registered",
                unit.name()
            )));
        }

        info!("Registering handler unit: {}", unit.name());
        self.units.push(unit);
        Ok(())
    }

    /// Register every unit a package provides. Either all units are added or none.
    pub fn register_package(&mut self, package: &dyn HandlerPackage) -> Result<(), RunnerError> {
        self.register_packages(&[package])
    }

    /// Register the units of several packages. If any unit clashes with an
    /// existing unit or with another unit in the batch, nothing is added.
    pub fn register_packages(&mut self, packages: &[&dyn HandlerPackage]) -> Result<(), RunnerError> {
        let mut batch: Vec<(&str, Vec<Arc<dyn HandlerUnit>>)> = Vec::with_capacity(packages.len());

        for package in packages {
            self.ensure_open(package.name())?;

            let units = package.units();
            for (i, unit) in units.iter().enumerate() {
                let repeated = units[..i].iter().any(|u| u.name() == unit.name())
                    || batch
                        .iter()
                        .flat_map(|(_, earlier)| earlier.iter())
                        .any(|u| u.name() == unit.name());
                if repeated || self.contains(unit.name()) {
                    return Err(RunnerError::configuration(format!(
                        "handler unit '{}' from package '{}' is already registered",
                        unit.name(),
                        package.name()
                    )));
                }
            }
            batch.push((package.name(), units));
        }

        for (name, units) in batch {
            info!("Registering package {name} ({} units)", units.len());
            for unit in units {
                info!("Registering handler unit: {}", unit.name());
                self.units.push(unit);
            }
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.iter().any(|u| u.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Close registration and snapshot the current units.
    pub(crate) fn freeze(&mut self) -> HandlerSet {
        self.frozen = true;
        HandlerSet::new(self.units.clone())
    }

    /// Reopen registration once the server is stopped again.
    pub(crate) fn thaw(&mut self) {
        self.frozen = false;
    }

    fn ensure_open(&self, what: &str) -> Result<(), RunnerError> {
        if self.frozen {
            return Err(RunnerError::configuration(format!(
                "cannot register '{what}': handlers must be registered before the server starts"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("units", &self.names())
            .field("frozen", &self.frozen)
            .finish()
    }
}
