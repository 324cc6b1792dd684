use super::*;
use crate::config::{RecordingMode, SentrycamConfig};
use crate::events::SentrycamEvent;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::time::timeout;

fn test_config(dir: &TempDir, mode: RecordingMode) -> SentrycamConfig {
    let mut config = SentrycamConfig::default();
    config.recording.mode = mode;
    config.recording.storage_directory = dir.path().display().to_string();
    // Nothing listens here; the pipeline just retries connecting
    config.source.url = "http://127.0.0.1:1/video".to_string();
    config.source.reconnect_delay_seconds = 1;
    config.notify.url = "http://127.0.0.1:1/clips".to_string();
    config.notify.shutdown_grace_seconds = 1;
    config.system.shutdown_timeout_seconds = 5;
    config
}

#[tokio::test]
async fn test_initialize_creates_storage_directory_and_states() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, RecordingMode::Continuous);
    let storage = dir.path().join("clips");
    config.recording.storage_directory = storage.display().to_string();

    let mut orchestrator = SentrycamOrchestrator::new(config).unwrap();
    orchestrator.initialize().await.unwrap();

    assert!(storage.is_dir());
    assert_eq!(
        orchestrator.get_component_state("pipeline").await,
        Some(ComponentState::Stopped)
    );
    assert_eq!(
        orchestrator.get_component_state("sweeper").await,
        Some(ComponentState::Stopped)
    );
    // Continuous mode has no dispatcher
    assert_eq!(orchestrator.get_component_state("dispatcher").await, None);
}

#[tokio::test]
async fn test_activity_mode_registers_dispatcher() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, RecordingMode::Activity);

    let mut orchestrator = SentrycamOrchestrator::new(config).unwrap();
    orchestrator.initialize().await.unwrap();

    assert_eq!(
        orchestrator.get_component_state("dispatcher").await,
        Some(ComponentState::Stopped)
    );

    assert_eq!(orchestrator.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_start_then_shutdown_cleanly() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, RecordingMode::Activity);

    let mut orchestrator = SentrycamOrchestrator::new(config).unwrap();
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    assert_eq!(
        orchestrator.get_component_state("pipeline").await,
        Some(ComponentState::Running)
    );
    assert_eq!(
        orchestrator.get_component_state("sweeper").await,
        Some(ComponentState::Running)
    );

    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);
    assert_eq!(
        orchestrator.get_component_state("pipeline").await,
        Some(ComponentState::Stopped)
    );
    assert_eq!(
        orchestrator.get_component_state("sweeper").await,
        Some(ComponentState::Stopped)
    );
    assert_eq!(
        orchestrator.get_component_state("dispatcher").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_shutdown_without_start_is_clean() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, RecordingMode::Continuous);

    let mut orchestrator = SentrycamOrchestrator::new(config).unwrap();
    orchestrator.initialize().await.unwrap();

    assert_eq!(orchestrator.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_second_start_fails() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, RecordingMode::Continuous);

    let mut orchestrator = SentrycamOrchestrator::new(config).unwrap();
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    assert!(orchestrator.start().await.is_err());

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_requested_event_stops_the_system() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, RecordingMode::Continuous);

    let mut orchestrator = SentrycamOrchestrator::new(config).unwrap();
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    let event_bus = orchestrator.event_bus();
    let runner = tokio::spawn(async move { orchestrator.run().await });

    // Give the trigger listener a moment to subscribe
    tokio::time::sleep(Duration::from_millis(50)).await;
    event_bus
        .publish(SentrycamEvent::ShutdownRequested {
            timestamp: SystemTime::now(),
            reason: "test".to_string(),
        })
        .await
        .unwrap();

    let exit_code = timeout(Duration::from_secs(10), runner)
        .await
        .expect("run() returned in time")
        .unwrap()
        .unwrap();
    assert_eq!(exit_code, 0);
}
