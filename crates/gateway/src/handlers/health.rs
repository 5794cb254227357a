//! Liveness and readiness endpoints

use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub status: &'static str,
    pub store: StoreCheck,
    pub in_flight_submissions: usize,
}

/// Outcome of pinging the submission store
#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StoreCheck {
    Up {
        #[serde(rename = "latencyMs")]
        latency_ms: u64,
    },
    Down {
        error: String,
    },
}

impl StoreCheck {
    async fn run(state: &AppState) -> Self {
        let start = Instant::now();
        match state.store.ping().await {
            Ok(()) => StoreCheck::Up {
                latency_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => StoreCheck::Down {
                error: e.to_string(),
            },
        }
    }

    fn is_up(&self) -> bool {
        matches!(self, StoreCheck::Up { .. })
    }
}

/// Liveness: the process is up and serving requests
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: dossier_common::VERSION,
    })
}

/// Readiness: 200 while the submission store answers, 503 otherwise
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let store = StoreCheck::run(&state).await;
    let in_flight_submissions = state.supervisor.in_flight_count().await;

    let (code, status) = if store.is_up() {
        (StatusCode::OK, "ready")
    } else {
        tracing::warn!("Readiness check failed: submission store unreachable");
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        code,
        Json(ReadyResponse {
            status,
            store,
            in_flight_submissions,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use chrono::{DateTime, Utc};
    use dossier_common::{
        db::{
            InMemorySubmissionStore, NewSubmission, StatusEvent, Submission, SubmissionStore,
        },
        errors::{AppError, Result},
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    /// Store whose connection is gone; everything but `ping` still works
    struct UnreachableStore(InMemorySubmissionStore);

    #[async_trait]
    impl SubmissionStore for UnreachableStore {
        async fn create(&self, submission: NewSubmission) -> Result<Submission> {
            self.0.create(submission).await
        }

        async fn find(&self, id: Uuid) -> Result<Option<Submission>> {
            self.0.find(id).await
        }

        async fn record_transition(
            &self,
            id: Uuid,
            event: StatusEvent,
            details: &str,
            crm_deal_id: Option<String>,
        ) -> Result<Submission> {
            self.0.record_transition(id, event, details, crm_deal_id).await
        }

        async fn set_file_urls(&self, id: Uuid, urls: Vec<String>) -> Result<Submission> {
            self.0.set_file_urls(id, urls).await
        }

        async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Submission>> {
            self.0.find_stale(cutoff).await
        }

        async fn ping(&self) -> Result<()> {
            Err(AppError::DatabaseConnection {
                message: "connection refused".to_string(),
            })
        }
    }

    async fn get(store: Arc<dyn SubmissionStore>, uri: &str) -> (StatusCode, Value) {
        let router = crate::create_router(test_support::app_state(store));
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_version() {
        let (status, body) = get(Arc::new(InMemorySubmissionStore::new()), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], dossier_common::VERSION);
    }

    #[tokio::test]
    async fn test_ready_when_store_answers() {
        let (status, body) = get(Arc::new(InMemorySubmissionStore::new()), "/ready").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["store"]["status"], "up");
        assert!(body["store"]["latencyMs"].is_u64());
        assert_eq!(body["inFlightSubmissions"], 0);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_service_unavailable() {
        let store = UnreachableStore(InMemorySubmissionStore::new());
        let (status, body) = get(Arc::new(store), "/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["store"]["status"], "down");
        assert!(body["store"]["error"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
    }
}
