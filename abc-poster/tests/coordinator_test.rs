mod common;

use abc_poster::coordinator::{generation_status, validate_transition};
use abc_poster::{
    Alphabet, CardStatus, CheckpointStore, Coordinator, CoordinatorOptions, CoordinatorState,
    ImageBackendError, MetadataLog, RunState,
};
use common::*;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn coordinator(
    backend: Arc<MockImageBackend>,
    storage: &Path,
    options: CoordinatorOptions,
    config: abc_poster::GenerationConfig,
) -> Coordinator {
    let ocr = Arc::new(QuotedTextOcr::new());
    Coordinator::new(
        Alphabet::english(),
        generator(backend, ocr, storage, config),
        MetadataLog::in_dir(storage),
        CheckpointStore::in_dir(storage),
        options,
    )
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_run_resumes_where_it_stopped() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let first_backend = Arc::new(MockImageBackend::echo());
    let mut first = coordinator(
        first_backend.clone(),
        dir.path(),
        CoordinatorOptions {
            limit: Some(10),
            ..Default::default()
        },
        test_config(),
    );

    let summary = first.run().await.unwrap();
    info!("First run: {:?}", summary);
    assert_eq!(summary.final_state, CoordinatorState::Aborted);
    assert_eq!(summary.processed_this_run, 10);
    assert_eq!(summary.remaining, 16);
    assert_eq!(first_backend.call_count(), 10);

    let checkpoint = CheckpointStore::in_dir(dir.path()).load().unwrap().unwrap();
    assert_eq!(checkpoint.processed_letters.len(), 10);
    assert_eq!(checkpoint.remaining_letters.first().map(String::as_str), Some("K"));

    let second_backend = Arc::new(MockImageBackend::echo());
    let mut second = coordinator(
        second_backend.clone(),
        dir.path(),
        CoordinatorOptions {
            resume: true,
            ..Default::default()
        },
        test_config(),
    );

    let summary = second.run().await.unwrap();
    assert_eq!(summary.final_state, CoordinatorState::Completed);
    assert_eq!(summary.run_id, checkpoint.run_id);
    assert_eq!(summary.processed_this_run, 16);
    assert_eq!(summary.validated, 16);
    assert_eq!(second.state(), CoordinatorState::Completed);

    // Letters A-J were never sent to the backend again
    assert_eq!(second_backend.call_count(), 16);
    for letter in ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"] {
        let fragment = format!("letter \"{}\"", letter);
        assert!(second_backend.calls().iter().all(|c| !c.prompt.contains(&fragment)));
    }

    let log = MetadataLog::in_dir(dir.path());
    assert_eq!(log.read_all().unwrap().len(), 26);
    assert_eq!(log.latest_by_letter().unwrap().len(), 26);
    assert!(!CheckpointStore::in_dir(dir.path()).path().exists());
}

#[tokio::test(start_paused = true)]
async fn test_one_failing_letter_does_not_stop_the_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let backend = Arc::new(
        MockImageBackend::echo().failing_for("letter \"C\"", ImageBackendError::InvalidKey),
    );
    let mut coordinator = coordinator(backend, dir.path(), CoordinatorOptions::default(), test_config());

    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.final_state, CoordinatorState::Completed);
    assert_eq!(summary.validated, 25);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.remaining, 0);

    let latest = MetadataLog::in_dir(dir.path()).latest_by_letter().unwrap();
    assert_eq!(latest["C"].final_status, CardStatus::Failed);
    assert_eq!(latest["D"].final_status, CardStatus::Validated);
}

#[tokio::test(start_paused = true)]
async fn test_backend_calls_respect_rate_limit_across_letters() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let backend = Arc::new(MockImageBackend::echo());
    let config = abc_poster::GenerationConfig {
        rate_limit_ms: 2000,
        ..test_config()
    };
    let mut coordinator = coordinator(
        backend.clone(),
        dir.path(),
        CoordinatorOptions {
            limit: Some(4),
            ..Default::default()
        },
        config,
    );

    coordinator.run().await.unwrap();

    let calls = backend.calls();
    assert_eq!(calls.len(), 4);
    for pair in calls.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(2000));
    }
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_before_first_entry_leaves_everything_pending() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let backend = Arc::new(MockImageBackend::echo());
    let mut coordinator = coordinator(backend.clone(), dir.path(), CoordinatorOptions::default(), test_config());
    coordinator.interrupt_handle().store(true, Ordering::SeqCst);

    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.final_state, CoordinatorState::Aborted);
    assert_eq!(summary.processed_this_run, 0);
    assert_eq!(backend.call_count(), 0);

    let checkpoint = CheckpointStore::in_dir(dir.path()).load().unwrap().unwrap();
    assert_eq!(checkpoint.remaining_letters.len(), 26);
}

#[tokio::test(start_paused = true)]
async fn test_resume_without_checkpoint_starts_fresh() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let backend = Arc::new(MockImageBackend::echo());
    let mut coordinator = coordinator(
        backend.clone(),
        dir.path(),
        CoordinatorOptions {
            resume: true,
            limit: Some(2),
            ..Default::default()
        },
        test_config(),
    );

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.processed_this_run, 2);
    assert_eq!(summary.remaining, 24);
}

#[tokio::test(start_paused = true)]
async fn test_resume_of_finished_run_completes_without_calls() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let alphabet = Alphabet::english();
    let mut finished = RunState::fresh(alphabet.entries());
    for entry in alphabet.entries() {
        finished = finished.complete_entry(&entry.letter, chrono::Utc::now());
    }
    CheckpointStore::in_dir(dir.path()).save(&finished).unwrap();

    let backend = Arc::new(MockImageBackend::echo());
    let mut coordinator = coordinator(
        backend.clone(),
        dir.path(),
        CoordinatorOptions {
            resume: true,
            ..Default::default()
        },
        test_config(),
    );

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.final_state, CoordinatorState::Completed);
    assert_eq!(backend.call_count(), 0);
}

#[test]
fn test_run_state_resume_follows_configured_alphabet() {
    let alphabet = Alphabet::english();
    let mut persisted = RunState::fresh(alphabet.entries());
    persisted.processed_letters = ["A", "C", "Ж"].iter().map(|s| s.to_string()).collect();
    persisted.remaining_letters = vec!["Z".to_string()];

    let resumed = RunState::resume(persisted.clone(), alphabet.entries());

    assert_eq!(resumed.run_id, persisted.run_id);
    let expected: BTreeSet<String> = ["A", "C"].iter().map(|s| s.to_string()).collect();
    assert_eq!(resumed.processed_letters, expected);
    assert_eq!(resumed.remaining_letters.len(), 24);
    assert_eq!(resumed.next_pending(), Some("B"));
    assert_eq!(resumed.remaining_letters[1], "D");
}

#[test]
fn test_state_machine_transitions() {
    use CoordinatorState::*;

    assert!(validate_transition(Idle, LoadingState).is_ok());
    assert!(validate_transition(LoadingState, Processing).is_ok());
    assert!(validate_transition(Processing, Checkpointing).is_ok());
    assert!(validate_transition(Checkpointing, Processing).is_ok());
    assert!(validate_transition(Checkpointing, Completed).is_ok());
    assert!(validate_transition(Processing, Aborted).is_ok());

    assert!(validate_transition(Idle, Processing).is_err());
    assert!(validate_transition(Processing, Completed).is_err());
    assert!(validate_transition(Completed, Processing).is_err());
    assert!(validate_transition(Aborted, LoadingState).is_err());
    assert!(Completed.is_terminal() && Aborted.is_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_generation_status_after_partial_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let backend = Arc::new(
        MockImageBackend::echo().failing_for("letter \"B\"", ImageBackendError::InvalidKey),
    );
    let mut coordinator = coordinator(
        backend,
        dir.path(),
        CoordinatorOptions {
            limit: Some(3),
            ..Default::default()
        },
        test_config(),
    );
    coordinator.run().await.unwrap();

    let status = generation_status(
        &Alphabet::english(),
        &abc_poster::CardStore::new(dir.path()),
        &MetadataLog::in_dir(dir.path()),
    )
    .unwrap();

    assert_eq!(status.total, 26);
    assert_eq!(status.validated, vec!["A".to_string(), "C".to_string()]);
    assert_eq!(status.failed, vec!["B".to_string()]);
    assert_eq!(status.missing.len(), 23);
    assert!((status.completion_percent() - 200.0 / 26.0).abs() < 1e-9);
}
