//! Dossier submission pipeline
//!
//! Takes an accepted submission through folder resolution, file upload, and
//! the CRM deal upsert, persisting each status change along the way.

pub mod deal;
pub mod errors;
pub mod folders;
pub mod processor;
pub mod supervisor;
pub mod sweeper;
pub mod uploader;

pub use deal::{DealFields, DealUpserter, UpsertOutcome};
pub use errors::ProcessingError;
pub use folders::FolderResolver;
pub use processor::{ProcessorSettings, SubmissionProcessor};
pub use supervisor::SubmissionSupervisor;
pub use sweeper::StaleSweeper;
pub use uploader::{FileUploader, SubmittedFile};
