//! Google Drive v3 storage provider

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{FileUpload, ServiceAccountAuth, StorageError, StorageProvider, UploadedFile};
use crate::config::StorageConfig;

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const UPLOAD_BOUNDARY: &str = "dossier_upload_boundary";

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileRef>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    id: Option<String>,
    #[serde(rename = "webViewLink")]
    web_view_link: Option<String>,
}

/// Drive REST client authenticated as a service account
pub struct DriveClient {
    http: reqwest::Client,
    auth: ServiceAccountAuth,
    api_base: String,
    upload_base: String,
}

impl DriveClient {
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| StorageError::provider(format!("Failed to build HTTP client: {}", e)))?;
        let auth = ServiceAccountAuth::new(http.clone(), config)?;

        Ok(Self {
            http,
            auth,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, request: RequestBuilder, parent_id: &str) -> Result<Response, StorageError> {
        let token = self.auth.token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StorageError::provider(format!("Request failed: {}", e)))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StorageError::ParentNotFound {
                parent_id: parent_id.to_string(),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StorageError::provider(format!("HTTP {}: {}", status, body)))
            }
        }
    }
}

/// Escape a value for use inside a single-quoted Drive query literal
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn folder_query(name: &str, parent_id: &str) -> String {
    format!(
        "name = '{}' and '{}' in parents and mimeType = '{}' and trashed = false",
        escape_query(name),
        escape_query(parent_id),
        FOLDER_MIME_TYPE
    )
}

/// Body of a `multipart/related` upload: JSON metadata, then the media
fn multipart_body(metadata: &serde_json::Value, file: &FileUpload<'_>) -> Vec<u8> {
    let mut body = Vec::with_capacity(file.bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: {mime}\r\n\r\n",
            b = UPLOAD_BOUNDARY,
            meta = metadata,
            mime = file.mime_type,
        )
        .as_bytes(),
    );
    body.extend_from_slice(file.bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", UPLOAD_BOUNDARY).as_bytes());
    body
}

#[async_trait]
impl StorageProvider for DriveClient {
    #[instrument(skip(self))]
    async fn find_folder(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<Option<String>, StorageError> {
        let query = folder_query(name, parent_id);
        let request = self.http.get(format!("{}/files", self.api_base)).query(&[
            ("q", query.as_str()),
            ("fields", "files(id, name)"),
            ("spaces", "drive"),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ]);

        let list: FileList = self
            .send(request, parent_id)
            .await?
            .json()
            .await
            .map_err(|e| StorageError::provider(format!("Malformed file list: {}", e)))?;

        Ok(list.files.into_iter().find_map(|file| file.id))
    }

    #[instrument(skip(self))]
    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, StorageError> {
        let request = self
            .http
            .post(format!("{}/files", self.api_base))
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }));

        let created: FileRef = self
            .send(request, parent_id)
            .await?
            .json()
            .await
            .map_err(|e| StorageError::provider(format!("Malformed folder response: {}", e)))?;

        let id = created
            .id
            .ok_or_else(|| StorageError::provider("Folder created without an id"))?;
        debug!(folder_id = %id, "Created folder");
        Ok(id)
    }

    #[instrument(skip(self, file), fields(file_name = file.name, size = file.bytes.len()))]
    async fn create_file(
        &self,
        file: FileUpload<'_>,
        parent_id: &str,
    ) -> Result<UploadedFile, StorageError> {
        let metadata = json!({
            "name": file.name,
            "mimeType": file.mime_type,
            "parents": [parent_id],
        });

        let request = self
            .http
            .post(format!("{}/files", self.upload_base))
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id,webViewLink"),
                ("supportsAllDrives", "true"),
            ])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", UPLOAD_BOUNDARY),
            )
            .body(multipart_body(&metadata, &file));

        let upload_failed = |message: String| StorageError::UploadFailed {
            file_name: file.name.to_string(),
            message,
        };

        let created: FileRef = match self.send(request, parent_id).await {
            Ok(response) => response
                .json()
                .await
                .map_err(|e| upload_failed(format!("Malformed upload response: {}", e)))?,
            Err(StorageError::Provider { message }) => return Err(upload_failed(message)),
            Err(other) => return Err(other),
        };

        match (created.id, created.web_view_link) {
            (Some(id), Some(shareable_url)) => Ok(UploadedFile { id, shareable_url }),
            _ => Err(upload_failed(
                "Provider did not return both an id and a link".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "google-drive"
    }
}
