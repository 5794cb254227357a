//! Repository pattern for database operations
//!
//! Provides the Postgres-backed `SubmissionStore` with proper error handling.

use crate::db::models::*;
use crate::db::{deal_id_for, parse_status, DbPool, NewSubmission, SubmissionStore};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    async fn load(&self, id: Uuid) -> Result<Submission> {
        SubmissionEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::SubmissionNotFound { id: id.to_string() })
    }
}

#[async_trait]
impl SubmissionStore for Repository {
    async fn create(&self, submission: NewSubmission) -> Result<Submission> {
        let submission = submission.normalized();
        let now = Utc::now();

        let model = SubmissionActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(submission.user_id),
            location: Set(submission.location),
            submission_type: Set(submission.submission_type.as_str().to_string()),
            document_type: Set(submission.document_type),
            document_nature: Set(submission.document_nature.map(|n| n.as_str().to_string())),
            family_id: Set(submission.family_id),
            family_name: Set(submission.family_name),
            applicant_id: Set(submission.applicant_id),
            applicant_name: Set(submission.applicant_name),
            file_urls: Set(serde_json::json!([])),
            status: Set(SubmissionStatus::Pending.as_str().to_string()),
            status_details: Set("Submission received".to_string()),
            crm_deal_id: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        model.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Submission>> {
        // Primary: a submission must be readable the instant intake returns
        SubmissionEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn record_transition(
        &self,
        id: Uuid,
        event: StatusEvent,
        details: &str,
        crm_deal_id: Option<String>,
    ) -> Result<Submission> {
        let current = self.load(id).await?;
        let next = parse_status(&current)?.advance(event)?;

        let mut model: SubmissionActiveModel = current.into();
        model.status = Set(next.as_str().to_string());
        model.status_details = Set(details.to_string());
        if let Some(deal_id) = deal_id_for(event, crm_deal_id) {
            model.crm_deal_id = Set(Some(deal_id));
        }
        model.updated_at = Set(Utc::now().into());

        model.update(self.write_conn()).await.map_err(Into::into)
    }

    async fn set_file_urls(&self, id: Uuid, urls: Vec<String>) -> Result<Submission> {
        let current = self.load(id).await?;
        parse_status(&current)?.advance(StatusEvent::FilesUploaded)?;

        let mut model: SubmissionActiveModel = current.into();
        model.file_urls = Set(serde_json::to_value(urls)?);
        model.updated_at = Set(Utc::now().into());

        model.update(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Submission>> {
        let in_flight = SubmissionStatus::IN_FLIGHT.iter().map(|s| s.as_str());
        let cutoff: DateTimeWithTimeZone = cutoff.into();

        SubmissionEntity::find()
            .filter(SubmissionColumn::Status.is_in(in_flight))
            .filter(SubmissionColumn::UpdatedAt.lt(cutoff))
            .order_by_asc(SubmissionColumn::UpdatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
