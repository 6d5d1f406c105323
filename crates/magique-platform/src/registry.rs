//! Agents hosted by the local platform

use crate::{Agent, PlatformError, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Qualified agent name → locally hosted agent
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<String, Arc<dyn Agent>>>>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent` under `name`; an existing entry is left untouched
    pub async fn insert(&self, name: String, agent: Arc<dyn Agent>) -> Result<()> {
        self.insert_while(name, agent, || true).await
    }

    /// [`insert`](Self::insert), refused with `PlatformStopped` unless
    /// `open()` holds while the write lock is held
    pub async fn insert_while<F>(&self, name: String, agent: Arc<dyn Agent>, open: F) -> Result<()>
    where
        F: FnOnce() -> bool,
    {
        let mut agents = self.agents.write().await;
        if !open() {
            return Err(PlatformError::PlatformStopped);
        }
        match agents.entry(name) {
            Entry::Occupied(entry) => Err(PlatformError::DuplicateAgent(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(agent);
                Ok(())
            }
        }
    }

    /// Whether `name` is registered
    pub async fn contains(&self, name: &str) -> bool {
        self.agents.read().await.contains_key(name)
    }

    /// Look up an agent
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().await.get(name).cloned()
    }

    /// Remove an agent, if present
    pub async fn remove(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.write().await.remove(name)
    }

    /// Number of registered agents
    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Whether no agent is registered
    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Copy of every entry, so callers can act on agents without holding the lock
    pub async fn snapshot(&self) -> Vec<(String, Arc<dyn Agent>)> {
        self.agents
            .read()
            .await
            .iter()
            .map(|(name, agent)| (name.clone(), Arc::clone(agent)))
            .collect()
    }

    /// Remove every agent
    pub async fn clear(&self) {
        self.agents.write().await.clear();
    }
}
