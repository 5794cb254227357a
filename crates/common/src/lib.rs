//! Dossier Common Library
//!
//! Shared code for the Dossier submission service including:
//! - Submission entity, status machine, and store implementations
//! - Storage provider (cloud drive) client abstraction
//! - CRM client abstraction with bounded retry
//! - Credential normalization for environment-supplied secrets
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod credentials;
pub mod crm;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod storage;

// Re-export commonly used types
pub use config::AppConfig;
pub use crm::CrmClient;
pub use db::{SubmissionStore, SubmissionStatus};
pub use errors::{AppError, Result};
pub use storage::StorageProvider;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
