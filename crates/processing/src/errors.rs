//! Processing pipeline error types

use dossier_common::crm::CrmError;
use dossier_common::errors::AppError;
use dossier_common::storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Details recorded when a failure carries no usable message
pub const FALLBACK_FAILURE_MESSAGE: &str = "Submission processing failed";

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crm(#[from] CrmError),

    #[error(transparent)]
    Store(#[from] AppError),

    #[error("Submission not found: {0}")]
    SubmissionNotFound(Uuid),

    #[error("Submission {0} is already being processed")]
    AlreadyInFlight(Uuid),
}

impl ProcessingError {
    /// Human-readable text persisted as the submission's status details
    pub fn status_details(&self) -> String {
        failure_details(&self.to_string())
    }
}

pub fn failure_details(message: &str) -> String {
    let message = message.trim();
    if message.is_empty() {
        FALLBACK_FAILURE_MESSAGE.to_string()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_details_use_error_message() {
        let err: ProcessingError = StorageError::ParentNotFound {
            parent_id: "root".into(),
        }
        .into();
        assert_eq!(
            err.status_details(),
            "Parent folder root not found or not accessible"
        );
    }

    #[test]
    fn test_blank_message_falls_back() {
        let err: ProcessingError = CrmError::Provider {
            message: String::new(),
        }
        .into();
        assert_eq!(err.status_details(), "CRM rejected the request: ");
        assert_eq!(failure_details("   "), FALLBACK_FAILURE_MESSAGE);
    }
}
