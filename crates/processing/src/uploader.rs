//! File uploads into a resolved destination folder

use std::sync::Arc;

use dossier_common::metrics::record_files_uploaded;
use dossier_common::storage::{FileUpload, StorageError, StorageProvider, UploadedFile};
use tracing::{info, instrument};

/// A PDF received at intake, held in memory until it is uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl SubmittedFile {
    pub fn pdf(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: "application/pdf".to_string(),
            bytes,
        }
    }

    fn as_upload(&self) -> FileUpload<'_> {
        FileUpload {
            name: &self.name,
            mime_type: &self.mime_type,
            bytes: &self.bytes,
        }
    }
}

pub struct FileUploader {
    storage: Arc<dyn StorageProvider>,
}

impl FileUploader {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self { storage }
    }

    /// Upload one file with `folder_id` as its only parent
    pub async fn upload(
        &self,
        file: &SubmittedFile,
        folder_id: &str,
    ) -> Result<UploadedFile, StorageError> {
        self.storage.create_file(file.as_upload(), folder_id).await
    }

    /// Upload a batch in order, returning the shareable URLs in the same order.
    ///
    /// Stops at the first failure; files already uploaded stay in storage.
    #[instrument(skip(self, files), fields(count = files.len()))]
    pub async fn upload_all(
        &self,
        files: &[SubmittedFile],
        folder_id: &str,
    ) -> Result<Vec<String>, StorageError> {
        let mut urls = Vec::with_capacity(files.len());
        for file in files {
            let uploaded = self.upload(file, folder_id).await?;
            urls.push(uploaded.shareable_url);
        }

        record_files_uploaded(urls.len());
        info!(uploaded = urls.len(), "Files uploaded");
        Ok(urls)
    }
}
