//! Folder get-or-create against the storage provider
//!
//! The provider is the source of truth; nothing is cached. Concurrent
//! resolutions of the same `(name, parent)` pair inside this process are
//! serialised so only one of them can create the folder.

use std::collections::HashMap;
use std::sync::Arc;

use dossier_common::metrics::record_folder_created;
use dossier_common::storage::{StorageError, StorageProvider};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

type FolderKey = (String, String);

pub struct FolderResolver {
    storage: Arc<dyn StorageProvider>,
    locks: Mutex<HashMap<FolderKey, Arc<Mutex<()>>>>,
}

impl FolderResolver {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Return the id of folder `name` under `parent_id`, creating it if absent
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, name: &str, parent_id: &str) -> Result<String, StorageError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::provider("Folder name must not be empty"));
        }

        let key = (name.to_string(), parent_id.to_string());
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };

        let result = {
            let _guard = lock.lock().await;
            self.find_or_create(name, parent_id).await
        };

        // Nobody else holds or waits on this key once only the map and we
        // reference it
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }

        result
    }

    async fn find_or_create(&self, name: &str, parent_id: &str) -> Result<String, StorageError> {
        if let Some(id) = self.storage.find_folder(name, parent_id).await? {
            debug!(folder_id = %id, "Reusing existing folder");
            return Ok(id);
        }

        let id = self.storage.create_folder(name, parent_id).await?;
        record_folder_created();
        info!(folder_id = %id, provider = self.storage.name(), "Folder created");
        Ok(id)
    }

    #[cfg(test)]
    async fn pending_locks(&self) -> usize {
        self.locks.lock().await.len()
    }
}
