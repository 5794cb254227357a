//! Shared fixtures for handler tests

use std::sync::Arc;

use dossier_common::{
    config::AppConfig, crm::InMemoryCrm, db::SubmissionStore, storage::InMemoryStorage,
};
use dossier_processing::{ProcessorSettings, SubmissionProcessor, SubmissionSupervisor};

use crate::AppState;

pub const ROOT_FOLDER: &str = "1RootFolderId";

const TEST_CONFIG: &str = r#"
    [database]
    url = "memory://"

    [storage]
    private_key = "unused"
    client_email = "uploader@project.iam.gserviceaccount.com"
    root_folder_id = "1RootFolderId"

    [crm]
    webhook_url = "https://crm.example.com/rest/1/secret"

    [uploads]
    max_files = 2
    max_file_bytes = 64
    max_request_bytes = 4096
"#;

pub fn test_config() -> AppConfig {
    config::Config::builder()
        .add_source(config::File::from_str(TEST_CONFIG, config::FileFormat::Toml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap()
}

/// State over the given store, with in-memory storage and CRM behind the pipeline
pub fn app_state(store: Arc<dyn SubmissionStore>) -> AppState {
    let config = Arc::new(test_config());
    let processor = Arc::new(SubmissionProcessor::new(
        store.clone(),
        Arc::new(InMemoryStorage::with_root(ROOT_FOLDER)),
        Arc::new(InMemoryCrm::new()),
        ProcessorSettings::from_config(&config),
    ));

    AppState {
        config,
        store,
        supervisor: Arc::new(SubmissionSupervisor::new(processor)),
    }
}
