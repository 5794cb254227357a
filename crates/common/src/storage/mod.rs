//! Storage provider abstraction
//!
//! The pipeline only needs three operations from the cloud drive: look a
//! folder up by name under a parent, create a folder, and create a file that
//! comes back with a shareable link.
//!
//! Implementations:
//! - `DriveClient`: Google Drive v3 REST with a service-account credential
//! - `InMemoryStorage`: process-local provider for tests (`test-util` feature)

mod auth;
mod drive;
#[cfg(any(test, feature = "test-util"))]
mod memory;

pub use auth::ServiceAccountAuth;
pub use drive::DriveClient;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{InMemoryStorage, StoredFile, StoredFolder};

use async_trait::async_trait;
use thiserror::Error;

/// Storage provider errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Parent folder {parent_id} not found or not accessible")]
    ParentNotFound { parent_id: String },

    #[error("Upload of {file_name} failed: {message}")]
    UploadFailed { file_name: String, message: String },

    #[error("Storage provider error: {message}")]
    Provider { message: String },

    #[error("Storage authentication failed: {message}")]
    Auth { message: String },
}

impl StorageError {
    pub fn provider(message: impl Into<String>) -> Self {
        StorageError::Provider {
            message: message.into(),
        }
    }
}

/// A file accepted by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: String,
    pub shareable_url: String,
}

/// File contents plus the metadata the provider needs to store it
#[derive(Debug, Clone, Copy)]
pub struct FileUpload<'a> {
    pub name: &'a str,
    pub mime_type: &'a str,
    pub bytes: &'a [u8],
}

/// Remote folder/file store the pipeline writes into
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// First non-trashed folder named `name` directly under `parent_id`
    async fn find_folder(&self, name: &str, parent_id: &str)
        -> Result<Option<String>, StorageError>;

    /// Create a folder named `name` under `parent_id`, returning its id
    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, StorageError>;

    /// Create a file whose only parent is `parent_id`.
    ///
    /// Fails with `UploadFailed` unless the provider returns both an id and a
    /// shareable link.
    async fn create_file(
        &self,
        file: FileUpload<'_>,
        parent_id: &str,
    ) -> Result<UploadedFile, StorageError>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
