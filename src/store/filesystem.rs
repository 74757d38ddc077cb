//! JSON-lines node store on the local filesystem
//!
//! Each collection is one `{name}.jsonl` file under the base directory.
//! Declaring a collection starts it empty; nodes are appended and reading a
//! collection replays the file with last-write-wins per id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::NodeStore;
use crate::error::{IngestionError, Result};
use crate::normalize::NormalizedRecord;

pub struct FileSystemNodeStore {
    base_path: PathBuf,
}

impl FileSystemNodeStore {
    /// Creates the store, creating `base_path` if needed
    pub async fn new(base_path: &Path) -> Result<Self> {
        fs::create_dir_all(base_path)
            .await
            .map_err(|e| IngestionError::StorageError(format!("Failed to create store dir: {}", e)))?;

        info!(path = %base_path.display(), "Initialized filesystem node store");

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    fn collection_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(IngestionError::StorageError(format!(
                "invalid collection name: {:?}",
                name
            )));
        }
        Ok(self.base_path.join(format!("{}.jsonl", name)))
    }

    /// Reads a collection back, one node per id in first-seen order
    pub async fn load_collection(&self, name: &str) -> Result<Vec<NormalizedRecord>> {
        let path = self.collection_path(name)?;
        let text = fs::read_to_string(&path)
            .await
            .map_err(|e| IngestionError::StorageError(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut order: Vec<String> = Vec::new();
        let mut nodes: HashMap<String, NormalizedRecord> = HashMap::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let node: NormalizedRecord = serde_json::from_str(line)?;
            let id = node.id().to_string();
            if nodes.insert(id.clone(), node).is_none() {
                order.push(id);
            }
        }

        Ok(order.into_iter().filter_map(|id| nodes.remove(&id)).collect())
    }

    /// Names of all collections present on disk
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| IngestionError::StorageError(format!("Failed to read store dir: {}", e)))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| IngestionError::StorageError(format!("Failed to read dir entry: {}", e)))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(collection) = name.strip_suffix(".jsonl") {
                    names.push(collection.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl NodeStore for FileSystemNodeStore {
    async fn declare_collection(&self, name: &str) -> Result<()> {
        let path = self.collection_path(name)?;
        fs::write(&path, b"")
            .await
            .map_err(|e| IngestionError::StorageError(format!("Failed to create collection: {}", e)))?;

        debug!(collection = %name, path = %path.display(), "Declared collection");
        Ok(())
    }

    async fn add_node(&self, collection: &str, node: NormalizedRecord) -> Result<()> {
        let path = self.collection_path(collection)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(IngestionError::StorageError(format!(
                "collection {} was not declared",
                collection
            )));
        }

        let line = format!("{}\n", serde_json::to_string(&node)?);

        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| IngestionError::StorageError(format!("Failed to open collection: {}", e)))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| IngestionError::StorageError(format!("Failed to write node: {}", e)))?;

        file.flush()
            .await
            .map_err(|e| IngestionError::StorageError(format!("Failed to flush collection: {}", e)))?;

        debug!(collection = %collection, id = %node.id(), "Appended node");
        Ok(())
    }
}
