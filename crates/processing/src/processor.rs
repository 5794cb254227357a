//! Submission processor
//!
//! Drives one submission from `PENDING` to a terminal status: folder
//! resolution, uploads, then the CRM upsert. Every phase change is persisted
//! before the phase starts, and any failure ends in `FAILED`.

use std::sync::Arc;

use dossier_common::config::{AppConfig, CrmFieldMap};
use dossier_common::crm::CrmClient;
use dossier_common::db::{StatusEvent, Submission, SubmissionStore, SubmissionType};
use dossier_common::metrics::{Outcome, SubmissionTimer};
use dossier_common::storage::{StorageError, StorageProvider};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::deal::{build_deal_fields, natural_key, DealUpserter, UpsertOutcome};
use crate::errors::ProcessingError;
use crate::folders::FolderResolver;
use crate::uploader::{FileUploader, SubmittedFile};

pub const DETAILS_STARTING: &str = "Starting processing";
pub const DETAILS_UPLOADING: &str = "Uploading files to storage";
pub const DETAILS_SENDING_TO_CRM: &str = "Sending to CRM";
pub const DETAILS_DEAL_CREATED: &str = "Deal created";
pub const DETAILS_DEAL_UPDATED: &str = "Deal updated";

/// Settings the pipeline reads from configuration
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub root_folder_id: String,
    pub max_attachment_bytes: u64,
    pub crm_fields: CrmFieldMap,
}

impl ProcessorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            root_folder_id: config.storage.root_folder_id.clone(),
            max_attachment_bytes: config.crm.max_attachment_bytes,
            crm_fields: config.crm.fields.clone(),
        }
    }
}

pub struct SubmissionProcessor {
    store: Arc<dyn SubmissionStore>,
    folders: FolderResolver,
    uploader: FileUploader,
    deals: DealUpserter,
    root_folder_id: String,
    max_attachment_bytes: u64,
}

/// Trimmed value of an optional field, if it has any content
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Folder name for a family or applicant: `"{name} ({id})"`, or the id alone
fn folder_label(name: &Option<String>, id: &str) -> String {
    match present(name) {
        Some(name) => format!("{} ({})", name, id),
        None => id.to_string(),
    }
}

impl SubmissionProcessor {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        storage: Arc<dyn StorageProvider>,
        crm: Arc<dyn CrmClient>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            folders: FolderResolver::new(storage.clone()),
            uploader: FileUploader::new(storage),
            deals: DealUpserter::new(crm, settings.crm_fields),
            root_folder_id: settings.root_folder_id,
            max_attachment_bytes: settings.max_attachment_bytes,
        }
    }

    pub fn store(&self) -> &Arc<dyn SubmissionStore> {
        &self.store
    }

    /// Run the whole pipeline for one submission.
    ///
    /// Failures are persisted as `FAILED` before being returned; callers only
    /// need the result for logging.
    #[instrument(skip(self, files), fields(submission_id = %id, files = files.len()))]
    pub async fn process(
        &self,
        id: Uuid,
        files: Vec<SubmittedFile>,
    ) -> Result<UpsertOutcome, ProcessingError> {
        let timer = SubmissionTimer::start();

        match self.run(id, &files).await {
            Ok(outcome) => {
                timer.finish(Outcome::Completed);
                info!(deal_id = %outcome.deal_id, updated = outcome.was_updated, "Submission completed");
                Ok(outcome)
            }
            Err(e) => {
                timer.finish(Outcome::Failed);
                error!(error = %e, "Submission processing failed");
                self.mark_failed(id, &e.status_details()).await;
                Err(e)
            }
        }
    }

    /// Best-effort move to `FAILED`; returns whether it was persisted
    pub async fn mark_failed(&self, id: Uuid, details: &str) -> bool {
        match self
            .store
            .record_transition(id, StatusEvent::Fail, details, None)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(submission_id = %id, error = %e, "Could not record submission failure");
                false
            }
        }
    }

    async fn run(&self, id: Uuid, files: &[SubmittedFile]) -> Result<UpsertOutcome, ProcessingError> {
        let submission = self
            .store
            .find(id)
            .await?
            .ok_or(ProcessingError::SubmissionNotFound(id))?;

        self.store
            .record_transition(id, StatusEvent::Start, DETAILS_STARTING, None)
            .await?;

        self.store
            .record_transition(id, StatusEvent::BeginUpload, DETAILS_UPLOADING, None)
            .await?;
        let folder_id = self.resolve_destination(&submission).await?;
        let file_urls = self.uploader.upload_all(files, &folder_id).await?;
        self.store.set_file_urls(id, file_urls.clone()).await?;

        self.store
            .record_transition(id, StatusEvent::BeginCrm, DETAILS_SENDING_TO_CRM, None)
            .await?;
        let deal = build_deal_fields(&submission, file_urls, files, self.max_attachment_bytes);
        let outcome = self
            .deals
            .upsert_deal(&natural_key(&submission), &deal)
            .await?;

        let details = if outcome.was_updated {
            DETAILS_DEAL_UPDATED
        } else {
            DETAILS_DEAL_CREATED
        };
        self.store
            .record_transition(
                id,
                StatusEvent::DealUpserted,
                details,
                Some(outcome.deal_id.clone()),
            )
            .await?;

        Ok(outcome)
    }

    /// Folder the submission's files go into.
    ///
    /// Family folder under the root (or the root itself without a family id),
    /// then either a document-type folder for family submissions, or the
    /// applicant folder plus an optional nature folder for applicant ones.
    pub async fn resolve_destination(&self, submission: &Submission) -> Result<String, StorageError> {
        let family_folder = match present(&submission.family_id) {
            Some(family_id) => {
                let label = folder_label(&submission.family_name, family_id);
                self.folders.get_or_create(&label, &self.root_folder_id).await?
            }
            None => self.root_folder_id.clone(),
        };

        match submission.kind() {
            SubmissionType::Family => {
                self.folders
                    .get_or_create(&submission.document_type, &family_folder)
                    .await
            }
            SubmissionType::Applicant => {
                let applicant_folder = match present(&submission.applicant_id) {
                    Some(applicant_id) => {
                        let label = folder_label(&submission.applicant_name, applicant_id);
                        self.folders.get_or_create(&label, &family_folder).await?
                    }
                    None => family_folder,
                };

                match submission.nature().folder_name() {
                    Some(nature_folder) => {
                        self.folders
                            .get_or_create(nature_folder, &applicant_folder)
                            .await
                    }
                    None => Ok(applicant_folder),
                }
            }
        }
    }
}
