//! Alias-to-factory table for update tasks.

use std::collections::HashMap;

use tracing::debug;

use super::error::{TaskError, TaskResult};
use super::{FileUpdateTask, StartProcessTask, StopProcessTask, UpdateTask};
use crate::feed::TaskDescriptor;

/// Creates a task from its descriptor, validating the descriptor's fields.
pub type TaskFactory =
    Box<dyn Fn(&TaskDescriptor) -> TaskResult<Box<dyn UpdateTask>> + Send + Sync>;

/// Maps task aliases to factories.
///
/// New task kinds are registered at startup; an alias that is not
/// registered is rejected when the feed is loaded.
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::with_builtin_tasks()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("aliases", &self.aliases())
            .finish()
    }
}

impl TaskRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with `startProcess`, `stopProcess` and `fileUpdate`.
    pub fn with_builtin_tasks() -> Self {
        let mut registry = Self::new();
        registry.register(StartProcessTask::ALIAS, |d| {
            Ok(Box::new(StartProcessTask::from_descriptor(d)?))
        });
        registry.register(StopProcessTask::ALIAS, |d| {
            Ok(Box::new(StopProcessTask::from_descriptor(d)?))
        });
        registry.register(FileUpdateTask::ALIAS, |d| {
            Ok(Box::new(FileUpdateTask::from_descriptor(d)?))
        });
        registry
    }

    /// Register (or replace) the factory for `alias`.
    pub fn register<F>(&mut self, alias: impl Into<String>, factory: F)
    where
        F: Fn(&TaskDescriptor) -> TaskResult<Box<dyn UpdateTask>> + Send + Sync + 'static,
    {
        let alias = alias.into();
        debug!(alias = %alias, "Registered task kind");
        self.factories.insert(alias, Box::new(factory));
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.factories.contains_key(alias)
    }

    /// Registered aliases, sorted.
    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        aliases.sort_unstable();
        aliases
    }

    /// Create a task from its descriptor.
    pub fn create(&self, descriptor: &TaskDescriptor) -> TaskResult<Box<dyn UpdateTask>> {
        let factory = self.factories.get(&descriptor.alias).ok_or_else(|| {
            TaskError::Configuration(format!("unknown task alias '{}'", descriptor.alias))
        })?;
        factory(descriptor)
    }
}
