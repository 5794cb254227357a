//! Submission intake and status handlers
//!
//! Intake validates the multipart request synchronously, persists a
//! `PENDING` record, hands the files to the supervisor, and answers `202`
//! without waiting for storage or the CRM. Clients then poll the status
//! endpoint until the record reaches `COMPLETED` or `FAILED`.

use axum::{
    body::Bytes,
    extract::{
        multipart::{Field, MultipartError},
        Multipart, Path, State,
    },
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::AppState;
use dossier_common::{
    config::UploadLimits,
    db::{DocumentNature, NewSubmission, Submission, SubmissionType},
    errors::{AppError, Result},
    metrics,
};
use dossier_processing::{ProcessingError, SubmittedFile};

const PDF_MIME: &str = "application/pdf";
const PDF_MAGIC: &[u8] = b"%PDF";

/// Classification fields read from the multipart form
#[derive(Debug, Default, Validate)]
pub struct IntakeForm {
    pub user_id: Option<String>,

    #[validate(length(min = 1, message = "location is required"))]
    pub location: String,

    #[validate(length(min = 1, message = "submissionType is required"))]
    pub submission_type: String,

    #[validate(length(min = 1, message = "documentType is required"))]
    pub document_type: String,

    pub document_nature: Option<String>,
    pub family_id: Option<String>,
    pub family_name: Option<String>,
    pub applicant_id: Option<String>,
    pub applicant_name: Option<String>,
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl IntakeForm {
    /// Store a text field under its wire name; unknown fields are ignored
    pub fn set(&mut self, name: &str, value: String) {
        match name {
            "userId" | "submittingUserId" => self.user_id = non_empty(value),
            "location" => self.location = value.trim().to_string(),
            "submissionType" => self.submission_type = value.trim().to_string(),
            "documentType" => self.document_type = value.trim().to_string(),
            "documentNature" => self.document_nature = non_empty(value),
            "familyId" => self.family_id = non_empty(value),
            "familyName" => self.family_name = non_empty(value),
            "applicantId" => self.applicant_id = non_empty(value),
            "applicantName" => self.applicant_name = non_empty(value),
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }

    pub fn into_submission(self) -> Result<NewSubmission> {
        let user_id = self.user_id.clone().ok_or_else(|| AppError::MissingField {
            field: "userId".into(),
        })?;

        self.validate().map_err(validation_error)?;

        let submission_type: SubmissionType =
            self.submission_type
                .parse()
                .map_err(|message| AppError::Validation {
                    message,
                    field: Some("submissionType".into()),
                })?;

        let document_nature = self
            .document_nature
            .as_deref()
            .map(str::parse::<DocumentNature>)
            .transpose()
            .map_err(|message| AppError::Validation {
                message,
                field: Some("documentNature".into()),
            })?;

        Ok(NewSubmission {
            user_id,
            location: self.location,
            submission_type,
            document_type: self.document_type,
            document_nature,
            family_id: self.family_id,
            family_name: self.family_name,
            applicant_id: self.applicant_id,
            applicant_name: self.applicant_name,
        }
        .normalized())
    }
}

/// Report the first failing field in camelCase, matching the form's wire names
fn validation_error(errors: ValidationErrors) -> AppError {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    match fields.first() {
        Some((field, failures)) => AppError::Validation {
            message: failures
                .first()
                .and_then(|failure| failure.message.as_ref())
                .map(|message| message.to_string())
                .unwrap_or_else(|| format!("{} is invalid", field)),
            field: Some(camel_case(field)),
        },
        None => AppError::Validation {
            message: errors.to_string(),
            field: None,
        },
    }
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for c in snake.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// A file is accepted as PDF by declared content type or by its magic bytes
pub fn is_pdf(content_type: Option<&str>, bytes: &[u8]) -> bool {
    let declared = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().eq_ignore_ascii_case(PDF_MIME))
        .unwrap_or(false);

    declared || bytes.starts_with(PDF_MAGIC)
}

fn multipart_error(err: MultipartError, limits: &UploadLimits) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::BodyTooLarge {
            limit: limits.max_request_bytes,
        }
    } else {
        AppError::InvalidFormat {
            message: err.body_text(),
        }
    }
}

/// A file part as received, before any content checks
struct UploadedPart {
    file_name: String,
    content_type: Option<String>,
    bytes: Bytes,
}

async fn read_part(
    field: Field<'_>,
    position: usize,
    limits: &UploadLimits,
) -> Result<UploadedPart> {
    let file_name = field
        .file_name()
        .and_then(|name| non_empty(name.to_string()))
        .unwrap_or_else(|| format!("document-{}.pdf", position));
    let content_type = field.content_type().map(str::to_string);

    let bytes = field
        .bytes()
        .await
        .map_err(|e| multipart_error(e, limits))?;

    Ok(UploadedPart {
        file_name,
        content_type,
        bytes,
    })
}

fn check_file(part: UploadedPart, limits: &UploadLimits) -> Result<SubmittedFile> {
    let UploadedPart {
        file_name,
        content_type,
        bytes,
    } = part;

    if bytes.is_empty() {
        return Err(AppError::Validation {
            message: format!("{} is empty", file_name),
            field: Some("files".into()),
        });
    }

    if bytes.len() > limits.max_file_bytes {
        return Err(AppError::PayloadTooLarge {
            size: bytes.len(),
            limit: limits.max_file_bytes,
        });
    }

    if !is_pdf(content_type.as_deref(), &bytes) {
        return Err(AppError::UnsupportedMediaType {
            message: format!("{} is not a PDF", file_name),
        });
    }

    Ok(SubmittedFile::pdf(file_name, bytes.to_vec()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionAccepted {
    pub success: bool,
    pub submission_id: Uuid,
}

/// Accept a multipart submission and start processing it in the background
///
/// POST /submissions
#[instrument(skip_all)]
pub async fn create_submission(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmissionAccepted>)> {
    let limits = &state.config.uploads;
    let mut form = IntakeForm::default();
    let mut parts = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limits))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if field.file_name().is_some() || name == "files" {
            parts.push(read_part(field, parts.len() + 1, limits).await?);
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| multipart_error(e, limits))?;
            form.set(&name, value);
        }
    }

    // Form fields are judged before file contents
    let submission = form.into_submission()?;

    if parts.is_empty() {
        return Err(AppError::Validation {
            message: "At least one PDF file is required".into(),
            field: Some("files".into()),
        });
    }

    if parts.len() > limits.max_files {
        return Err(AppError::Validation {
            message: format!("At most {} files per submission", limits.max_files),
            field: Some("files".into()),
        });
    }

    let files = parts
        .into_iter()
        .map(|part| check_file(part, limits))
        .collect::<Result<Vec<_>>>()?;

    let file_count = files.len();
    let record = state.store.create(submission).await?;
    metrics::record_submission_accepted(&record.submission_type);

    state
        .supervisor
        .spawn(record.id, files)
        .await
        .map_err(|e| match e {
            ProcessingError::AlreadyInFlight(id) => AppError::AlreadyProcessing {
                id: id.to_string(),
            },
            other => AppError::Internal {
                message: other.to_string(),
            },
        })?;

    info!(
        submission_id = %record.id,
        submission_type = %record.submission_type,
        files = file_count,
        "Submission accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmissionAccepted {
            success: true,
            submission_id: record.id,
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStatusView {
    pub id: Uuid,
    pub status: String,
    pub status_details: String,
    pub crm_deal_id: Option<String>,
    pub file_urls: Vec<String>,
}

impl From<Submission> for SubmissionStatusView {
    fn from(record: Submission) -> Self {
        let file_urls = record.file_urls();
        Self {
            id: record.id,
            status: record.status,
            status_details: record.status_details,
            crm_deal_id: record.crm_deal_id,
            file_urls,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub data: SubmissionStatusView,
}

/// Current status of a submission
///
/// GET /submissions/{id}/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let not_found = || AppError::SubmissionNotFound { id: id.clone() };

    let submission_id = Uuid::parse_str(id.trim()).map_err(|_| not_found())?;
    let record = state
        .store
        .find(submission_id)
        .await?
        .ok_or_else(not_found)?;

    Ok(Json(StatusResponse {
        success: true,
        data: record.into(),
    }))
}
