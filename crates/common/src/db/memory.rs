//! In-process submission store
//!
//! Used for local runs without Postgres (`database.url = "memory://"`) and as
//! the store behind pipeline tests. Keeps the ordered list of persisted
//! statuses per submission so status sequences can be asserted.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::{
    deal_id_for, parse_status, NewSubmission, StatusEvent, Submission, SubmissionStatus,
    SubmissionStore,
};
use crate::errors::{AppError, Result};

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, Submission>,
    history: HashMap<Uuid, Vec<SubmissionStatus>>,
}

#[derive(Default)]
pub struct InMemorySubmissionStore {
    inner: RwLock<Inner>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status persisted for a submission, starting with `PENDING`
    pub async fn history(&self, id: Uuid) -> Vec<SubmissionStatus> {
        self.inner
            .read()
            .await
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn create(&self, submission: NewSubmission) -> Result<Submission> {
        let submission = submission.normalized();
        let now = Utc::now().into();

        let record = Submission {
            id: Uuid::new_v4(),
            user_id: submission.user_id,
            location: submission.location,
            submission_type: submission.submission_type.as_str().to_string(),
            document_type: submission.document_type,
            document_nature: submission.document_nature.map(|n| n.as_str().to_string()),
            family_id: submission.family_id,
            family_name: submission.family_name,
            applicant_id: submission.applicant_id,
            applicant_name: submission.applicant_name,
            file_urls: serde_json::json!([]),
            status: SubmissionStatus::Pending.as_str().to_string(),
            status_details: "Submission received".to_string(),
            crm_deal_id: None,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner
            .history
            .insert(record.id, vec![SubmissionStatus::Pending]);
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Submission>> {
        Ok(self.inner.read().await.records.get(&id).cloned())
    }

    async fn record_transition(
        &self,
        id: Uuid,
        event: StatusEvent,
        details: &str,
        crm_deal_id: Option<String>,
    ) -> Result<Submission> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| AppError::SubmissionNotFound { id: id.to_string() })?;

        let next = parse_status(record)?.advance(event)?;
        record.status = next.as_str().to_string();
        record.status_details = details.to_string();
        if let Some(deal_id) = deal_id_for(event, crm_deal_id) {
            record.crm_deal_id = Some(deal_id);
        }
        record.updated_at = Utc::now().into();

        let updated = record.clone();
        inner.history.entry(id).or_default().push(next);
        Ok(updated)
    }

    async fn set_file_urls(&self, id: Uuid, urls: Vec<String>) -> Result<Submission> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| AppError::SubmissionNotFound { id: id.to_string() })?;

        parse_status(record)?.advance(StatusEvent::FilesUploaded)?;
        record.file_urls = serde_json::to_value(urls)?;
        record.updated_at = Utc::now().into();
        Ok(record.clone())
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Submission>> {
        let inner = self.inner.read().await;
        let mut stale: Vec<Submission> = inner
            .records
            .values()
            .filter(|record| !record.is_terminal() && record.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|record| record.updated_at);
        Ok(stale)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DocumentNature, SubmissionType};
    use chrono::Duration;

    fn applicant_submission() -> NewSubmission {
        NewSubmission {
            user_id: "12".into(),
            location: "Porto".into(),
            submission_type: SubmissionType::Applicant,
            document_type: "Passport".into(),
            document_nature: Some(DocumentNature::Translated),
            family_id: Some("F-9".into()),
            family_name: Some("Costa".into()),
            applicant_id: Some("A-3".into()),
            applicant_name: Some("Rui".into()),
        }
    }

    #[tokio::test]
    async fn test_created_submission_is_pending_and_visible() {
        let store = InMemorySubmissionStore::new();
        let created = store.create(applicant_submission()).await.unwrap();

        let found = store.find(created.id).await.unwrap().unwrap();
        assert_eq!(found.submission_status(), Ok(SubmissionStatus::Pending));
        assert!(found.file_urls().is_empty());
        assert_eq!(found.crm_deal_id, None);
        assert_eq!(found.nature(), DocumentNature::Translated);
    }

    #[tokio::test]
    async fn test_transition_updates_details_and_history() {
        let store = InMemorySubmissionStore::new();
        let id = store.create(applicant_submission()).await.unwrap().id;

        let record = store
            .record_transition(id, StatusEvent::Start, "Starting processing", None)
            .await
            .unwrap();
        assert_eq!(record.status, "PROCESSING");
        assert_eq!(record.status_details, "Starting processing");

        assert_eq!(
            store.history(id).await,
            vec![SubmissionStatus::Pending, SubmissionStatus::Processing]
        );
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected() {
        let store = InMemorySubmissionStore::new();
        let id = store.create(applicant_submission()).await.unwrap().id;

        let err = store
            .record_transition(id, StatusEvent::DealUpserted, "Deal created", Some("1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        let record = store.find(id).await.unwrap().unwrap();
        assert_eq!(record.status, "PENDING");
        assert_eq!(record.crm_deal_id, None);
    }

    #[tokio::test]
    async fn test_file_urls_require_upload_phase() {
        let store = InMemorySubmissionStore::new();
        let id = store.create(applicant_submission()).await.unwrap().id;

        assert!(store
            .set_file_urls(id, vec!["https://files/1".into()])
            .await
            .is_err());

        store
            .record_transition(id, StatusEvent::Start, "Starting processing", None)
            .await
            .unwrap();
        store
            .record_transition(id, StatusEvent::BeginUpload, "Uploading files to storage", None)
            .await
            .unwrap();
        let record = store
            .set_file_urls(id, vec!["https://files/1".into(), "https://files/2".into()])
            .await
            .unwrap();

        assert_eq!(record.file_urls(), vec!["https://files/1", "https://files/2"]);
        assert_eq!(record.status, "UPLOADING_FILES");
        assert_eq!(store.history(id).await.len(), 3);
    }

    #[tokio::test]
    async fn test_find_stale_skips_terminal_records() {
        let store = InMemorySubmissionStore::new();
        let stuck = store.create(applicant_submission()).await.unwrap().id;
        let failed = store.create(applicant_submission()).await.unwrap().id;
        store
            .record_transition(failed, StatusEvent::Fail, "boom", None)
            .await
            .unwrap();

        let future_cutoff = Utc::now() + Duration::hours(1);
        let stale = store.find_stale(future_cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, stuck);

        let past_cutoff = Utc::now() - Duration::hours(1);
        assert!(store.find_stale(past_cutoff).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_submission() {
        let store = InMemorySubmissionStore::new();
        assert!(store.find(Uuid::new_v4()).await.unwrap().is_none());
        let err = store
            .record_transition(Uuid::new_v4(), StatusEvent::Start, "Starting processing", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SubmissionNotFound { .. }));
    }
}
