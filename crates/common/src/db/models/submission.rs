//! Submission entity and its status machine

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processing status of a submission.
///
/// Progression is strictly forward:
/// `Pending -> Processing -> UploadingFiles -> CreatingDeal -> Completed`,
/// with `Failed` reachable from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Processing,
    UploadingFiles,
    CreatingDeal,
    Completed,
    Failed,
}

/// Something that happened to a submission while it was processed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEvent {
    /// Background task picked the submission up
    Start,
    /// Folder resolution and upload phase begins
    BeginUpload,
    /// Every file of the batch is uploaded
    FilesUploaded,
    /// CRM phase begins
    BeginCrm,
    /// CRM upsert succeeded
    DealUpserted,
    /// Any step failed
    Fail,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Illegal status transition: {event:?} from {from}")]
pub struct InvalidTransition {
    pub from: SubmissionStatus,
    pub event: StatusEvent,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown submission status: {0}")]
pub struct UnknownStatus(pub String);

impl SubmissionStatus {
    /// Statuses a submission can still leave
    pub const IN_FLIGHT: [SubmissionStatus; 4] = [
        SubmissionStatus::Pending,
        SubmissionStatus::Processing,
        SubmissionStatus::UploadingFiles,
        SubmissionStatus::CreatingDeal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "PENDING",
            SubmissionStatus::Processing => "PROCESSING",
            SubmissionStatus::UploadingFiles => "UPLOADING_FILES",
            SubmissionStatus::CreatingDeal => "CREATING_DEAL",
            SubmissionStatus::Completed => "COMPLETED",
            SubmissionStatus::Failed => "FAILED",
        }
    }

    /// Check if no further transition can occur
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Failed)
    }

    /// Apply an event, returning the next status.
    pub fn advance(self, event: StatusEvent) -> Result<SubmissionStatus, InvalidTransition> {
        use StatusEvent::*;
        use SubmissionStatus::*;

        match (self, event) {
            (Pending, Start) => Ok(Processing),
            (Processing, BeginUpload) => Ok(UploadingFiles),
            (UploadingFiles, FilesUploaded) => Ok(UploadingFiles),
            (UploadingFiles, BeginCrm) => Ok(CreatingDeal),
            (CreatingDeal, DealUpserted) => Ok(Completed),
            (from, Fail) if !from.is_terminal() => Ok(Failed),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SubmissionStatus::Pending),
            "PROCESSING" => Ok(SubmissionStatus::Processing),
            "UPLOADING_FILES" => Ok(SubmissionStatus::UploadingFiles),
            "CREATING_DEAL" => Ok(SubmissionStatus::CreatingDeal),
            "COMPLETED" => Ok(SubmissionStatus::Completed),
            "FAILED" => Ok(SubmissionStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Whether a submission belongs to a whole family or a single applicant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionType {
    Family,
    Applicant,
}

impl SubmissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionType::Family => "family",
            SubmissionType::Applicant => "applicant",
        }
    }
}

impl FromStr for SubmissionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "family" => Ok(SubmissionType::Family),
            "applicant" => Ok(SubmissionType::Applicant),
            other => Err(format!("unknown submission type '{}'", other)),
        }
    }
}

/// Physical nature of the submitted documents
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentNature {
    Translated,
    Apostilled,
    #[default]
    Plain,
}

impl DocumentNature {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentNature::Translated => "translated",
            DocumentNature::Apostilled => "apostilled",
            DocumentNature::Plain => "plain",
        }
    }

    /// Name of the nested storage folder, if the nature gets one
    pub fn folder_name(&self) -> Option<&'static str> {
        match self {
            DocumentNature::Translated => Some("Translated"),
            DocumentNature::Apostilled => Some("Apostilled"),
            DocumentNature::Plain => None,
        }
    }
}

impl FromStr for DocumentNature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "translated" => Ok(DocumentNature::Translated),
            "apostilled" => Ok(DocumentNature::Apostilled),
            "" | "plain" | "none" => Ok(DocumentNature::Plain),
            other => Err(format!("unknown document nature '{}'", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "submissions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub user_id: String,

    #[sea_orm(column_type = "Text")]
    pub location: String,

    #[sea_orm(column_type = "Text")]
    pub submission_type: String,

    #[sea_orm(column_type = "Text")]
    pub document_type: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub document_nature: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub family_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub family_name: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub applicant_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub applicant_name: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub file_urls: Json,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text")]
    pub status_details: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub crm_deal_id: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the status as an enum
    pub fn submission_status(&self) -> Result<SubmissionStatus, UnknownStatus> {
        self.status.parse()
    }

    /// Check if the submission is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.submission_status()
            .map(|status| status.is_terminal())
            .unwrap_or(false)
    }

    pub fn kind(&self) -> SubmissionType {
        self.submission_type
            .parse()
            .unwrap_or(SubmissionType::Applicant)
    }

    pub fn nature(&self) -> DocumentNature {
        self.document_nature
            .as_deref()
            .and_then(|nature| nature.parse().ok())
            .unwrap_or_default()
    }

    /// Shareable URLs of the uploaded files, in submission order
    pub fn file_urls(&self) -> Vec<String> {
        serde_json::from_value(self.file_urls.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
