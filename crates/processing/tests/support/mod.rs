#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use dossier_common::config::CrmFieldMap;
use dossier_common::crm::InMemoryCrm;
use dossier_common::db::{
    DocumentNature, InMemorySubmissionStore, NewSubmission, SubmissionStore, SubmissionType,
};
use dossier_common::storage::{
    FileUpload, InMemoryStorage, StorageError, StorageProvider, UploadedFile,
};
use dossier_processing::{ProcessorSettings, SubmissionProcessor, SubmittedFile};
use tokio::sync::Semaphore;
use uuid::Uuid;

pub const ROOT: &str = "1RootFolderId";

pub struct Harness {
    pub store: Arc<InMemorySubmissionStore>,
    pub storage: Arc<InMemoryStorage>,
    pub crm: Arc<InMemoryCrm>,
    pub processor: Arc<SubmissionProcessor>,
}

pub fn settings() -> ProcessorSettings {
    ProcessorSettings {
        root_folder_id: ROOT.to_string(),
        max_attachment_bytes: 3_000_000,
        crm_fields: CrmFieldMap::default(),
    }
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemorySubmissionStore::new());
        let storage = Arc::new(InMemoryStorage::with_root(ROOT));
        let crm = Arc::new(InMemoryCrm::new());
        let processor = Arc::new(SubmissionProcessor::new(
            store.clone(),
            storage.clone(),
            crm.clone(),
            settings(),
        ));

        Self {
            store,
            storage,
            crm,
            processor,
        }
    }

    pub async fn submit(&self, submission: NewSubmission) -> Uuid {
        self.store.create(submission).await.unwrap().id
    }
}

pub fn applicant(nature: Option<DocumentNature>) -> NewSubmission {
    NewSubmission {
        user_id: "314".into(),
        location: "Lisbon".into(),
        submission_type: SubmissionType::Applicant,
        document_type: "Passport".into(),
        document_nature: nature,
        family_id: Some("F-100".into()),
        family_name: Some("Silva".into()),
        applicant_id: Some("A-7".into()),
        applicant_name: Some("Ana Silva".into()),
    }
}

pub fn family() -> NewSubmission {
    NewSubmission {
        user_id: "314".into(),
        location: "Porto".into(),
        submission_type: SubmissionType::Family,
        document_type: "Marriage certificate".into(),
        document_nature: None,
        family_id: Some("F-200".into()),
        family_name: Some("Costa".into()),
        applicant_id: None,
        applicant_name: None,
    }
}

pub fn pdfs(count: usize) -> Vec<SubmittedFile> {
    (1..=count)
        .map(|n| SubmittedFile::pdf(format!("document-{}.pdf", n), format!("%PDF-1.{}", n).into_bytes()))
        .collect()
}

/// Storage that panics on the first call
pub struct PanickingStorage;

#[async_trait]
impl StorageProvider for PanickingStorage {
    async fn find_folder(&self, _: &str, _: &str) -> Result<Option<String>, StorageError> {
        panic!("storage client poisoned");
    }

    async fn create_folder(&self, _: &str, _: &str) -> Result<String, StorageError> {
        panic!("storage client poisoned");
    }

    async fn create_file(&self, _: FileUpload<'_>, _: &str) -> Result<UploadedFile, StorageError> {
        panic!("storage client poisoned");
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

/// Storage whose folder lookups wait until the test releases them
pub struct GatedStorage {
    pub inner: InMemoryStorage,
    pub gate: Semaphore,
}

impl GatedStorage {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStorage::with_root(ROOT),
            gate: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl StorageProvider for GatedStorage {
    async fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>, StorageError> {
        let _permit = self.gate.acquire().await.unwrap();
        self.inner.find_folder(name, parent_id).await
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, StorageError> {
        self.inner.create_folder(name, parent_id).await
    }

    async fn create_file(
        &self,
        file: FileUpload<'_>,
        parent_id: &str,
    ) -> Result<UploadedFile, StorageError> {
        self.inner.create_file(file, parent_id).await
    }

    fn name(&self) -> &str {
        "gated"
    }
}
