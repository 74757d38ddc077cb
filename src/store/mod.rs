//! Node stores receiving normalized records
//!
//! A store is a set of named collections; `add_node` upserts by record id.

mod filesystem;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::error::{IngestionError, Result};
use crate::normalize::NormalizedRecord;

pub use filesystem::FileSystemNodeStore;

#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Declares a collection; called once per run before any node is added
    async fn declare_collection(&self, name: &str) -> Result<()>;

    /// Inserts or replaces the node with the same id
    async fn add_node(&self, collection: &str, node: NormalizedRecord) -> Result<()>;
}

#[derive(Debug, Default)]
struct Collection {
    order: Vec<String>,
    nodes: HashMap<String, NormalizedRecord>,
}

/// In-process store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    adds: AtomicUsize,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collections(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Nodes of a collection in first-insertion order
    pub fn nodes(&self, collection: &str) -> Vec<NormalizedRecord> {
        let collections = self.collections.read();
        collections
            .get(collection)
            .map(|c| c.order.iter().filter_map(|id| c.nodes.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<NormalizedRecord> {
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.nodes.get(id).cloned())
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.nodes.len())
            .unwrap_or(0)
    }

    /// Number of `add_node` calls, including upserts of existing ids
    pub fn add_count(&self) -> usize {
        self.adds.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn declare_collection(&self, name: &str) -> Result<()> {
        self.collections.write().entry(name.to_string()).or_default();
        debug!(collection = %name, "Declared collection");
        Ok(())
    }

    async fn add_node(&self, collection: &str, node: NormalizedRecord) -> Result<()> {
        let mut collections = self.collections.write();
        let target = collections.get_mut(collection).ok_or_else(|| {
            IngestionError::StorageError(format!("collection {} was not declared", collection))
        })?;

        let id = node.id().to_string();
        if target.nodes.insert(id.clone(), node).is_none() {
            target.order.push(id);
        }
        self.adds.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
