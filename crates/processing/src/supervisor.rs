//! Background task supervision
//!
//! One task per submission id. A task that panics still leaves its
//! submission in `FAILED`, and shutdown can wait for running tasks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{ProcessingError, FALLBACK_FAILURE_MESSAGE};
use crate::processor::SubmissionProcessor;
use crate::uploader::SubmittedFile;

pub struct SubmissionSupervisor {
    processor: Arc<SubmissionProcessor>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    idle: Arc<Notify>,
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(error) => error.to_string(),
    }
}

impl SubmissionSupervisor {
    pub fn new(processor: Arc<SubmissionProcessor>) -> Self {
        Self {
            processor,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Start processing `id` in the background.
    ///
    /// Refuses an id that already has a running task.
    pub async fn spawn(&self, id: Uuid, files: Vec<SubmittedFile>) -> Result<(), ProcessingError> {
        let mut in_flight = self.in_flight.lock().await;
        if !in_flight.insert(id) {
            return Err(ProcessingError::AlreadyInFlight(id));
        }

        let processor = self.processor.clone();
        let registry = self.in_flight.clone();
        let idle = self.idle.clone();

        tokio::spawn(async move {
            let work = tokio::spawn({
                let processor = processor.clone();
                async move { processor.process(id, files).await }
            });

            if let Err(join_error) = work.await {
                let panicked = join_error.is_panic();
                let message = panic_message(join_error);
                error!(submission_id = %id, panicked, error = %message, "Submission task aborted");
                processor.mark_failed(id, FALLBACK_FAILURE_MESSAGE).await;
            }

            registry.lock().await.remove(&id);
            idle.notify_waiters();
        });

        Ok(())
    }

    pub async fn is_in_flight(&self, id: Uuid) -> bool {
        self.in_flight.lock().await.contains(&id)
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Wait for every running task to finish, up to `timeout`.
    ///
    /// Returns `false` if tasks were still running when the timeout hit.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait_idle = async {
            loop {
                let notified = self.idle.notified();
                let remaining = self.in_flight_count().await;
                if remaining == 0 {
                    return;
                }
                info!(remaining, "Waiting for submission tasks to finish");
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, wait_idle).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.in_flight_count().await,
                    "Shutdown timeout reached with submissions still processing"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let message = runtime.block_on(async {
            let err = tokio::spawn(async { panic!("storage exploded") })
                .await
                .unwrap_err();
            panic_message(err)
        });
        assert_eq!(message, "storage exploded");
    }
}
