//! Process-local storage provider
//!
//! Behaves like the remote drive for the operations the pipeline uses:
//! unknown parents are rejected, links are issued on upload, and a specific
//! upload can be made to fail.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{FileUpload, StorageError, StorageProvider, UploadedFile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFolder {
    pub id: String,
    pub name: String,
    pub parent_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub parent_id: String,
    pub mime_type: String,
    pub size: usize,
}

#[derive(Default)]
struct State {
    roots: HashSet<String>,
    folders: Vec<StoredFolder>,
    files: Vec<StoredFile>,
    upload_attempts: usize,
    fail_upload_at: Option<usize>,
    next_id: u64,
}

impl State {
    fn parent_exists(&self, parent_id: &str) -> bool {
        self.roots.contains(parent_id) || self.folders.iter().any(|f| f.id == parent_id)
    }

    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:06}", prefix, self.next_id)
    }
}

#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<State>,
}

impl InMemoryStorage {
    /// Create a store where `root_id` is an existing, accessible folder
    pub fn with_root(root_id: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(State {
                roots: HashSet::from([root_id.into()]),
                ..State::default()
            }),
        }
    }

    /// Make the `n`-th upload (1-based, counted across all calls) fail
    pub async fn fail_upload_at(&self, n: usize) {
        self.state.lock().await.fail_upload_at = Some(n);
    }

    pub async fn folders(&self) -> Vec<StoredFolder> {
        self.state.lock().await.folders.clone()
    }

    pub async fn files(&self) -> Vec<StoredFile> {
        self.state.lock().await.files.clone()
    }

    /// Folders named `name` directly under `parent_id`
    pub async fn folders_named(&self, name: &str, parent_id: &str) -> Vec<StoredFolder> {
        self.state
            .lock()
            .await
            .folders
            .iter()
            .filter(|f| f.name == name && f.parent_id == parent_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorage {
    async fn find_folder(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<Option<String>, StorageError> {
        let found = {
            let state = self.state.lock().await;
            if !state.parent_exists(parent_id) {
                return Err(StorageError::ParentNotFound {
                    parent_id: parent_id.to_string(),
                });
            }
            state
                .folders
                .iter()
                .find(|f| f.name == name && f.parent_id == parent_id)
                .map(|f| f.id.clone())
        };

        // Lookup and creation are separate round trips on a real provider
        tokio::task::yield_now().await;
        Ok(found)
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, StorageError> {
        let mut state = self.state.lock().await;
        if !state.parent_exists(parent_id) {
            return Err(StorageError::ParentNotFound {
                parent_id: parent_id.to_string(),
            });
        }

        let id = state.allocate_id("folder");
        state.folders.push(StoredFolder {
            id: id.clone(),
            name: name.to_string(),
            parent_id: parent_id.to_string(),
        });
        Ok(id)
    }

    async fn create_file(
        &self,
        file: FileUpload<'_>,
        parent_id: &str,
    ) -> Result<UploadedFile, StorageError> {
        let mut state = self.state.lock().await;
        state.upload_attempts += 1;

        if state.fail_upload_at == Some(state.upload_attempts) {
            return Err(StorageError::UploadFailed {
                file_name: file.name.to_string(),
                message: "injected upload failure".to_string(),
            });
        }
        if !state.parent_exists(parent_id) {
            return Err(StorageError::ParentNotFound {
                parent_id: parent_id.to_string(),
            });
        }

        let id = state.allocate_id("file");
        state.files.push(StoredFile {
            id: id.clone(),
            name: file.name.to_string(),
            parent_id: parent_id.to_string(),
            mime_type: file.mime_type.to_string(),
            size: file.bytes.len(),
        });

        Ok(UploadedFile {
            shareable_url: format!("https://drive.example/file/d/{}/view", id),
            id,
        })
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
