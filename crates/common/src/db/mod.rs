//! Database layer for Dossier
//!
//! Provides:
//! - SeaORM entity models and the submission status machine
//! - The `SubmissionStore` seam used by the processing pipeline
//! - A Postgres-backed repository and an in-memory store
//! - Connection pool management

mod memory;
pub mod models;
mod repository;

pub use memory::InMemorySubmissionStore;
pub use models::{
    DocumentNature, InvalidTransition, StatusEvent, Submission, SubmissionStatus, SubmissionType,
};
pub use repository::Repository;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Classification fields captured at intake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubmission {
    pub user_id: String,
    pub location: String,
    pub submission_type: SubmissionType,
    pub document_type: String,
    pub document_nature: Option<DocumentNature>,
    pub family_id: Option<String>,
    pub family_name: Option<String>,
    pub applicant_id: Option<String>,
    pub applicant_name: Option<String>,
}

impl NewSubmission {
    /// Applicant fields only make sense for applicant-scoped submissions
    pub fn normalized(mut self) -> Self {
        if self.submission_type == SubmissionType::Family {
            self.applicant_id = None;
            self.applicant_name = None;
        }
        self
    }
}

/// Persistence operations the submission pipeline depends on.
///
/// Records are created once, mutated only by their own background task, and
/// never deleted. Every status change goes through `record_transition`, which
/// validates it against the persisted status.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert a new submission in `PENDING` with no file URLs
    async fn create(&self, submission: NewSubmission) -> Result<Submission>;

    /// Find a submission by id
    async fn find(&self, id: Uuid) -> Result<Option<Submission>>;

    /// Apply a status event and overwrite the status details.
    ///
    /// `crm_deal_id` is only written on `DealUpserted`.
    async fn record_transition(
        &self,
        id: Uuid,
        event: StatusEvent,
        details: &str,
        crm_deal_id: Option<String>,
    ) -> Result<Submission>;

    /// Persist the shareable URLs of the uploaded batch
    async fn set_file_urls(&self, id: Uuid, urls: Vec<String>) -> Result<Submission>;

    /// Non-terminal submissions whose last update is older than `cutoff`
    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Submission>>;

    /// Check the backing store is reachable
    async fn ping(&self) -> Result<()>;
}

pub(crate) fn deal_id_for(event: StatusEvent, crm_deal_id: Option<String>) -> Option<String> {
    match event {
        StatusEvent::DealUpserted => crm_deal_id,
        _ => None,
    }
}

pub(crate) fn parse_status(submission: &Submission) -> Result<SubmissionStatus> {
    submission
        .submission_status()
        .map_err(|e| AppError::Internal {
            message: format!("Submission {} has corrupt status: {}", submission.id, e),
        })
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = Self::connect(&config.url, config, "primary").await?;

        // Connect to replica if configured
        let replica = match config.read_url {
            Some(ref read_url) => {
                info!("Connecting to read replica...");
                Some(Self::connect(read_url, config, "replica").await?)
            }
            None => None,
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    async fn connect(
        url: &str,
        config: &DatabaseConfig,
        role: &str,
    ) -> Result<DatabaseConnection> {
        let mut opts = ConnectOptions::new(url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to {}: {}", role, e),
            })
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }
}
