//! Registry of agent constructors, keyed by class name

use crate::agent::basic_factory;
use crate::{Agent, PlatformError, Result};
use magique_proto::AgentName;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Class name of the built-in [`BasicAgent`](crate::BasicAgent)
pub const BASIC_AGENT_CLASS: &str = "basic";

/// Builds an agent from its qualified name and positional arguments
pub type AgentFactory =
    Arc<dyn Fn(AgentName, Vec<Value>) -> std::result::Result<Box<dyn Agent>, String> + Send + Sync>;

/// Class name → constructor
#[derive(Clone, Default)]
pub struct AgentFactories {
    factories: HashMap<String, AgentFactory>,
}

impl AgentFactories {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in classes
    pub fn with_defaults() -> Self {
        let mut factories = Self::new();
        factories.register(BASIC_AGENT_CLASS, basic_factory);
        factories
    }

    /// Register or replace the constructor for `class_name`
    pub fn register<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn(AgentName, Vec<Value>) -> std::result::Result<Box<dyn Agent>, String> + Send + Sync + 'static,
    {
        self.factories.insert(class_name.into(), Arc::new(factory));
    }

    /// Whether `class_name` can be instantiated
    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }

    /// Known class names, sorted
    pub fn classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.factories.keys().cloned().collect();
        classes.sort();
        classes
    }

    /// Construct an agent of class `class_name`
    pub fn instantiate(&self, class_name: &str, name: AgentName, args: Vec<Value>) -> Result<Box<dyn Agent>> {
        let failure = |reason: String| PlatformError::DynamicInstantiation {
            class_name: class_name.to_string(),
            name: name.to_string(),
            reason,
        };

        let factory = self
            .factories
            .get(class_name)
            .ok_or_else(|| failure("unknown agent class".to_string()))?;

        factory(name.clone(), args).map_err(failure)
    }
}

impl fmt::Debug for AgentFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentFactories")
            .field("classes", &self.classes())
            .finish()
    }
}
