//! The handler registry: command name → owning unit and command.
//!
//! Lookups happen on every request and take a shared lock; writes only happen
//! on unit load and unload. A unit's commands are committed as one batch, so a
//! reader never observes half a unit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::RegistryError;
use crate::handler::Command;

/// A registry entry.
#[derive(Debug, Clone)]
pub struct RegisteredCommand {
    /// Name of the unit that owns the command.
    pub unit: String,
    pub command: Arc<Command>,
}

#[derive(Debug, Default)]
pub struct HandlerRegistry {
    commands: RwLock<HashMap<String, RegisteredCommand>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits every command of `unit` at once.
    ///
    /// # Errors
    ///
    /// Rejects the whole batch, inserting nothing, if a name repeats within
    /// the batch or is already owned by another unit.
    pub fn insert_unit(&self, unit: &str, commands: Vec<Command>) -> Result<(), RegistryError> {
        let mut map = self.commands.write();

        let mut seen = HashSet::with_capacity(commands.len());
        for command in &commands {
            if !seen.insert(command.name()) {
                return Err(RegistryError::Duplicate(command.name().to_string()));
            }
            if let Some(existing) = map.get(command.name()) {
                return Err(RegistryError::Conflict {
                    command: command.name().to_string(),
                    owner: existing.unit.clone(),
                });
            }
        }

        for command in commands {
            map.insert(
                command.name().to_string(),
                RegisteredCommand {
                    unit: unit.to_string(),
                    command: Arc::new(command),
                },
            );
        }
        Ok(())
    }

    /// Removes every command owned by `unit`, returning their names.
    pub fn remove_unit(&self, unit: &str) -> Vec<String> {
        let mut map = self.commands.write();
        let names: Vec<String> = map
            .iter()
            .filter(|(_, entry)| entry.unit == unit)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            map.remove(name);
        }
        names
    }

    pub fn get(&self, name: &str) -> Option<RegisteredCommand> {
        self.commands.read().get(name).cloned()
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted names of the commands owned by `unit`.
    pub fn commands_of(&self, unit: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .commands
            .read()
            .iter()
            .filter(|(_, entry)| entry.unit == unit)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Command {
        Command::from_fn(name, |_, _| async { Ok(()) })
    }

    #[test]
    fn insert_and_remove_by_unit() {
        let registry = HandlerRegistry::new();
        registry
            .insert_unit("fun", vec![noop("roll"), noop("coinflip")])
            .unwrap();
        registry.insert_unit("utility", vec![noop("ping")]).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("roll").unwrap().unit, "fun");
        assert_eq!(registry.commands_of("fun"), vec!["coinflip", "roll"]);

        let mut removed = registry.remove_unit("fun");
        removed.sort();
        assert_eq!(removed, vec!["coinflip", "roll"]);
        assert_eq!(registry.names(), vec!["ping"]);
    }

    #[test]
    fn conflicting_batch_inserts_nothing() {
        let registry = HandlerRegistry::new();
        registry.insert_unit("utility", vec![noop("ping")]).unwrap();

        let err = registry
            .insert_unit("fun", vec![noop("roll"), noop("ping")])
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Conflict {
                command: "ping".into(),
                owner: "utility".into(),
            }
        );
        assert!(registry.get("roll").is_none());
        assert!(registry.commands_of("fun").is_empty());
    }

    #[test]
    fn duplicate_within_batch_is_rejected() {
        let registry = HandlerRegistry::new();
        let err = registry
            .insert_unit("fun", vec![noop("roll"), noop("ROLL")])
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("roll".into()));
        assert!(registry.is_empty());
    }
}
