//! Stale submission sweep
//!
//! A submission whose task died with the process stays in a non-terminal
//! status forever. The sweep flags such records as `FAILED`; it never resumes
//! them, since the uploaded file buffers only ever lived in memory.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dossier_common::db::{StatusEvent, SubmissionStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::ProcessingError;
use crate::supervisor::SubmissionSupervisor;

pub const DETAILS_INTERRUPTED: &str = "Processing interrupted";

pub struct StaleSweeper {
    store: Arc<dyn SubmissionStore>,
    supervisor: Arc<SubmissionSupervisor>,
    stale_after: Duration,
    interval: Duration,
}

impl StaleSweeper {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        supervisor: Arc<SubmissionSupervisor>,
        stale_after: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            supervisor,
            stale_after,
            interval,
        }
    }

    /// Flag every stale submission not running in this process; returns how
    /// many were flagged
    pub async fn sweep_once(&self) -> Result<usize, ProcessingError> {
        let cutoff = match chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        {
            Some(cutoff) => cutoff,
            None => return Ok(0),
        };

        let mut flagged = 0;
        for record in self.store.find_stale(cutoff).await? {
            if self.supervisor.is_in_flight(record.id).await {
                debug!(submission_id = %record.id, "Stale-looking submission is still running");
                continue;
            }

            match self
                .store
                .record_transition(record.id, StatusEvent::Fail, DETAILS_INTERRUPTED, None)
                .await
            {
                Ok(_) => {
                    warn!(
                        submission_id = %record.id,
                        last_status = %record.status,
                        "Flagged interrupted submission as failed"
                    );
                    flagged += 1;
                }
                Err(e) => {
                    error!(submission_id = %record.id, error = %e, "Could not flag stale submission");
                }
            }
        }

        Ok(flagged)
    }

    /// Run the sweep every `interval` until `shutdown` flips to `true`
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if self.interval.is_zero() {
                info!("Stale submission sweep disabled");
                return;
            }

            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep_once().await {
                            Ok(0) => {}
                            Ok(flagged) => info!(flagged, "Stale submission sweep finished"),
                            Err(e) => error!(error = %e, "Stale submission sweep failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Stale submission sweep stopped");
        })
    }
}
