mod support;

use std::sync::Arc;
use std::time::Duration;

use dossier_common::db::{StatusEvent, SubmissionStatus, SubmissionStore};
use dossier_processing::errors::FALLBACK_FAILURE_MESSAGE;
use dossier_processing::sweeper::DETAILS_INTERRUPTED;
use dossier_processing::{
    ProcessingError, StaleSweeper, SubmissionProcessor, SubmissionSupervisor,
};
use support::{applicant, family, pdfs, settings, GatedStorage, Harness, PanickingStorage};

#[tokio::test]
async fn test_supervised_submission_completes_and_drains() {
    let harness = Harness::new();
    let supervisor = SubmissionSupervisor::new(harness.processor.clone());
    let id = harness.submit(family()).await;

    supervisor.spawn(id, pdfs(2)).await.unwrap();
    assert!(supervisor.drain(Duration::from_secs(5)).await);

    let record = harness.store.find(id).await.unwrap().unwrap();
    assert_eq!(record.submission_status(), Ok(SubmissionStatus::Completed));
    assert!(!supervisor.is_in_flight(id).await);
}

#[tokio::test]
async fn test_second_spawn_for_same_id_is_refused() {
    let harness = Harness::new();
    let storage = Arc::new(GatedStorage::new());
    let processor = Arc::new(SubmissionProcessor::new(
        harness.store.clone(),
        storage.clone(),
        harness.crm.clone(),
        settings(),
    ));
    let supervisor = SubmissionSupervisor::new(processor);
    let id = harness.submit(applicant(None)).await;

    supervisor.spawn(id, pdfs(1)).await.unwrap();
    let err = supervisor.spawn(id, pdfs(1)).await.unwrap_err();
    assert!(matches!(err, ProcessingError::AlreadyInFlight(refused) if refused == id));
    assert!(supervisor.is_in_flight(id).await);

    storage.open();
    assert!(supervisor.drain(Duration::from_secs(5)).await);
    assert_eq!(supervisor.in_flight_count().await, 0);
    assert_eq!(storage.inner.files().await.len(), 1);
}

#[tokio::test]
async fn test_drain_times_out_on_stuck_task() {
    let harness = Harness::new();
    let storage = Arc::new(GatedStorage::new());
    let processor = Arc::new(SubmissionProcessor::new(
        harness.store.clone(),
        storage.clone(),
        harness.crm.clone(),
        settings(),
    ));
    let supervisor = SubmissionSupervisor::new(processor);
    let id = harness.submit(family()).await;

    supervisor.spawn(id, pdfs(1)).await.unwrap();
    assert!(!supervisor.drain(Duration::from_millis(50)).await);

    storage.open();
    assert!(supervisor.drain(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_panicking_task_is_recorded_as_failed() {
    let harness = Harness::new();
    let processor = Arc::new(SubmissionProcessor::new(
        harness.store.clone(),
        Arc::new(PanickingStorage),
        harness.crm.clone(),
        settings(),
    ));
    let supervisor = SubmissionSupervisor::new(processor);
    let id = harness.submit(family()).await;

    supervisor.spawn(id, pdfs(1)).await.unwrap();
    assert!(supervisor.drain(Duration::from_secs(5)).await);

    let record = harness.store.find(id).await.unwrap().unwrap();
    assert_eq!(record.status, "FAILED");
    assert_eq!(record.status_details, FALLBACK_FAILURE_MESSAGE);
}

#[tokio::test]
async fn test_sweep_flags_interrupted_submissions() {
    let harness = Harness::new();
    let supervisor = Arc::new(SubmissionSupervisor::new(harness.processor.clone()));

    let stuck = harness.submit(applicant(None)).await;
    harness
        .store
        .record_transition(stuck, StatusEvent::Start, "Starting processing", None)
        .await
        .unwrap();
    let finished = harness.submit(family()).await;
    harness.processor.process(finished, pdfs(1)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let sweeper = StaleSweeper::new(
        harness.store.clone(),
        supervisor,
        Duration::from_millis(10),
        Duration::from_secs(60),
    );
    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

    let record = harness.store.find(stuck).await.unwrap().unwrap();
    assert_eq!(record.status, "FAILED");
    assert_eq!(record.status_details, DETAILS_INTERRUPTED);

    let done = harness.store.find(finished).await.unwrap().unwrap();
    assert_eq!(done.status, "COMPLETED");

    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_sweep_skips_running_submissions() {
    let harness = Harness::new();
    let storage = Arc::new(GatedStorage::new());
    let processor = Arc::new(SubmissionProcessor::new(
        harness.store.clone(),
        storage.clone(),
        harness.crm.clone(),
        settings(),
    ));
    let supervisor = Arc::new(SubmissionSupervisor::new(processor));
    let id = harness.submit(family()).await;

    supervisor.spawn(id, pdfs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let sweeper = StaleSweeper::new(
        harness.store.clone(),
        supervisor.clone(),
        Duration::from_millis(1),
        Duration::from_secs(60),
    );
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

    storage.open();
    assert!(supervisor.drain(Duration::from_secs(5)).await);
    let record = harness.store.find(id).await.unwrap().unwrap();
    assert_eq!(record.status, "COMPLETED");
}

#[tokio::test]
async fn test_sweep_loop_stops_on_shutdown() {
    let harness = Harness::new();
    let supervisor = Arc::new(SubmissionSupervisor::new(harness.processor.clone()));
    let sweeper = Arc::new(StaleSweeper::new(
        harness.store.clone(),
        supervisor,
        Duration::from_secs(60),
        Duration::from_millis(10),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = sweeper.spawn(shutdown_rx);
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
