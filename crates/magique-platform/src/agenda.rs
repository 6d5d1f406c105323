//! Cache of outbound connections, one per remote platform

use crate::ConnectionOutbound;
use magique_proto::PlatformName;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Platform name → outbound connection.
///
/// The first connection stored for a name stays until it is removed or its
/// writer fails; later insertions for the same name get the stored one back.
#[derive(Clone, Default)]
pub struct Agenda {
    entries: Arc<RwLock<HashMap<PlatformName, Arc<ConnectionOutbound>>>>,
}

impl Agenda {
    /// Empty agenda
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection cached for `name`
    pub async fn get(&self, name: &PlatformName) -> Option<Arc<ConnectionOutbound>> {
        self.entries.read().await.get(name).cloned()
    }

    /// Whether a connection is cached for `name`
    pub async fn contains(&self, name: &PlatformName) -> bool {
        self.entries.read().await.contains_key(name)
    }

    /// Cached connection for `name`, or the one built by `create`.
    ///
    /// The flag is `true` when `create` ran and its result was stored.
    pub async fn get_or_insert_with<F>(&self, name: PlatformName, create: F) -> (Arc<ConnectionOutbound>, bool)
    where
        F: FnOnce() -> Arc<ConnectionOutbound>,
    {
        if let Some(existing) = self.get(&name).await {
            return (existing, false);
        }

        let mut entries = self.entries.write().await;
        match entries.entry(name) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => (Arc::clone(entry.insert(create())), true),
        }
    }

    /// Remove the entry for `name`, whichever connection it holds
    pub async fn remove(&self, name: &PlatformName) -> Option<Arc<ConnectionOutbound>> {
        self.entries.write().await.remove(name)
    }

    /// Remove the entry for `name` only if it is still the connection `id`
    pub async fn evict(&self, name: &PlatformName, id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(name) {
            Some(current) if current.id() == id => {
                entries.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Cached platform names, sorted
    pub async fn names(&self) -> Vec<PlatformName> {
        let mut names: Vec<PlatformName> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of cached connections
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is cached
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Empty the agenda, returning what it held
    pub async fn drain(&self) -> Vec<Arc<ConnectionOutbound>> {
        self.entries.write().await.drain().map(|(_, connection)| connection).collect()
    }
}
