//! Remote job protocol integration tests.
//!
//! Tests verify:
//! - Stage order and state transitions
//! - Upload stops at the first failed write
//! - Polling cadence, timeout and cancellation
//! - Cancelling a running command aborts the session
//! - Download, cleanup and sub-channel release

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use widu::error::{JobError, RemoteError};
use widu::job::{CancelHandle, JobClient, JobOptions, JobState, JobStore, PollOptions};
use widu::remote::RemoteSession;
use widu::tile::{TileKey, Tiler};

use super::test_utils::{unscaled_stack, MockSession, Processor, BASE, COMMAND};

fn options() -> JobOptions {
    JobOptions::new(BASE, COMMAND)
}

/// A store of ten small raw tiles that the mock can echo back.
fn store_with_ten_tiles() -> JobStore {
    let store = JobStore::new();
    for i in 0..10u32 {
        let key = TileKey::new(1, (i / 5) * 224, (i % 5) * 224).unwrap();
        store.put_raw(key, Bytes::from(format!("tile {}", i)));
    }
    store
}

/// A tiled 300x300 image: 2 x 2 tiles.
fn tiled_store() -> JobStore {
    Tiler::default().tile(&unscaled_stack(300, 300, 1, 1)).unwrap()
}

fn client(mock: &MockSession, store: &JobStore) -> JobClient<MockSession> {
    JobClient::new(mock.clone(), options(), store.id())
}

// =============================================================================
// Full Protocol
// =============================================================================

#[tokio::test]
async fn test_full_protocol() {
    let mock = MockSession::new();
    let store = tiled_store();
    let mut job = client(&mock, &store);
    let job_dir = format!("{}/{}", BASE, store.id());

    let output = job.run(&store).await.unwrap();
    assert!(output.success());
    assert_eq!(output.output, "processed 4 tiles\n");
    assert_eq!(job.state(), JobState::Downloading);

    assert_eq!(mock.commands(), vec![format!("{} {}/", COMMAND, job_dir)]);
    assert_eq!(mock.uploaded().len(), 4);
    assert_eq!(mock.reads(), 4);
    assert_eq!(store.result_len(), 4);
    for key in store.raw_keys() {
        assert_eq!(store.get_result(&key), store.get_raw(&key));
    }

    job.cleanup().await.unwrap();
    assert_eq!(
        job.history(),
        &[
            JobState::Idle,
            JobState::Uploading,
            JobState::Executing,
            JobState::Polling,
            JobState::Downloading,
            JobState::CleaningUp,
            JobState::Done,
        ]
    );
    assert!(mock.paths_under(&job_dir).is_empty());
    assert!(mock.exists(BASE));
}

#[tokio::test]
async fn test_state_changes_are_published() {
    let mock = MockSession::new();
    let store = tiled_store();
    let mut job = client(&mock, &store);
    let mut states = job.subscribe();

    assert_eq!(*states.borrow(), JobState::Idle);
    job.upload(&store).await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), JobState::Uploading);

    job.execute().await.unwrap();
    job.wait_for_completion().await.unwrap();
    assert_eq!(*states.borrow_and_update(), JobState::Polling);
}

#[tokio::test]
async fn test_stages_out_of_order() {
    let mock = MockSession::new();
    let store = tiled_store();
    let mut job = client(&mock, &store);

    match job.execute().await {
        Err(JobError::InvalidState { expected, actual }) => {
            assert_eq!(expected, JobState::Uploading);
            assert_eq!(actual, JobState::Idle);
        }
        other => panic!("Expected InvalidState, got {:?}", other),
    }
    assert!(matches!(
        job.download(&store).await,
        Err(JobError::InvalidState { .. })
    ));

    // Misuse does not abort the job
    assert_eq!(job.state(), JobState::Idle);
    assert!(mock.commands().is_empty());
    job.upload(&store).await.unwrap();
}

// =============================================================================
// Upload
// =============================================================================

#[tokio::test]
async fn test_upload_failure_on_third_of_ten_tiles() {
    let mock = MockSession::new().failing_write(3);
    let store = store_with_ten_tiles();
    let mut job = client(&mock, &store);

    let err = job.upload(&store).await.unwrap_err();
    let third = store.raw_keys()[2];
    match err {
        JobError::Transfer { path, source } => {
            assert!(path.ends_with(&third.file_name()));
            assert!(matches!(source, RemoteError::Sftp { .. }));
        }
        other => panic!("Expected Transfer error, got {:?}", other),
    }

    assert_eq!(job.state(), JobState::Aborted);
    assert_eq!(mock.write_attempts(), 3);
    assert_eq!(mock.uploaded().len(), 2);

    // Partial remote state is left in place
    let job_dir = format!("{}/{}", BASE, store.id());
    assert!(mock.exists(&job_dir));

    // An aborted job accepts no further stage
    assert!(matches!(
        job.execute().await,
        Err(JobError::InvalidState {
            actual: JobState::Aborted,
            ..
        })
    ));
    assert_eq!(mock.write_attempts(), 3);
    assert_eq!(mock.open_channels(), 0);
}

#[tokio::test]
async fn test_upload_writes_in_key_order() {
    let mock = MockSession::new();
    let store = store_with_ten_tiles();
    let mut job = client(&mock, &store);

    assert_eq!(job.upload(&store).await.unwrap(), 10);
    let expected: Vec<String> = store.raw_keys().iter().map(|k| k.file_name()).collect();
    assert_eq!(mock.uploaded(), expected);
    assert_eq!(mock.uploaded()[0], "0001-0000-0000.png");
}

#[tokio::test]
async fn test_upload_into_missing_base_folder() {
    let mock = MockSession::new();
    let store = tiled_store();
    let mut job = JobClient::new(
        mock.clone(),
        JobOptions::new("/nonexistent", COMMAND),
        store.id(),
    );

    assert!(matches!(
        job.upload(&store).await,
        Err(JobError::Transfer {
            source: RemoteError::NotFound(_),
            ..
        })
    ));
    assert_eq!(job.state(), JobState::Aborted);
    assert_eq!(mock.write_attempts(), 0);
}

// =============================================================================
// Execute
// =============================================================================

#[tokio::test]
async fn test_exec_failure_aborts() {
    let mock = MockSession::new().failing_exec();
    let store = tiled_store();
    let mut job = client(&mock, &store);

    job.upload(&store).await.unwrap();
    assert!(matches!(
        job.execute().await,
        Err(JobError::Execution(RemoteError::Channel(_)))
    ));
    assert_eq!(job.state(), JobState::Aborted);
}

#[tokio::test]
async fn test_nonzero_exit_status_is_not_fatal() {
    let mock = MockSession::new().with_exit_status(3);
    let store = tiled_store();
    let mut job = client(&mock, &store);

    let output = job.run(&store).await.unwrap();
    assert_eq!(output.exit_status, 3);
    assert_eq!(job.state(), JobState::Downloading);
}

// =============================================================================
// Polling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_poll_three_missing_then_found() {
    let mock = MockSession::new().sentinel_hidden_for(3);
    let store = tiled_store();
    let mut job = client(&mock, &store);

    job.upload(&store).await.unwrap();
    job.execute().await.unwrap();

    let started = Instant::now();
    let attempts = job.wait_for_completion().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(attempts, 4);
    assert_eq!(mock.sentinel_stats(), 4);
    assert!(elapsed >= Duration::from_secs(15), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(16), "{:?}", elapsed);

    job.download(&store).await.unwrap();
    assert_eq!(job.state(), JobState::Downloading);
}

#[tokio::test(start_paused = true)]
async fn test_poll_uses_configured_interval() {
    let mock = MockSession::new().sentinel_hidden_for(2);
    let store = tiled_store();
    let poll = PollOptions {
        interval: Duration::from_millis(250),
        timeout: None,
    };
    let mut job = JobClient::new(mock.clone(), options().with_poll(poll), store.id());

    job.upload(&store).await.unwrap();
    job.execute().await.unwrap();

    let started = Instant::now();
    assert_eq!(job.wait_for_completion().await.unwrap(), 3);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_poll_error_is_fatal() {
    let mock = MockSession::new().failing_stat();
    let store = tiled_store();
    let mut job = client(&mock, &store);

    job.upload(&store).await.unwrap();
    job.execute().await.unwrap();

    match job.wait_for_completion().await {
        Err(JobError::Poll { path, source }) => {
            assert!(path.ends_with("/done.txt"));
            assert!(matches!(source, RemoteError::Sftp { .. }));
        }
        other => panic!("Expected Poll error, got {:?}", other),
    }
    assert_eq!(job.state(), JobState::Aborted);
    assert_eq!(mock.reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_timeout() {
    let mock = MockSession::new().with_processor(Processor::NoSentinel);
    let store = tiled_store();
    let poll = PollOptions {
        interval: Duration::from_secs(5),
        timeout: Some(Duration::from_secs(12)),
    };
    let mut job = JobClient::new(mock.clone(), options().with_poll(poll), store.id());

    job.upload(&store).await.unwrap();
    job.execute().await.unwrap();

    let started = Instant::now();
    match job.wait_for_completion().await {
        Err(JobError::Timeout { path, waited }) => {
            assert!(path.ends_with("/done.txt"));
            assert!(waited >= Duration::from_secs(12));
        }
        other => panic!("Expected Timeout, got {:?}", other),
    }

    // Checks at 0s, 5s, 10s and a last one at the deadline
    assert_eq!(mock.sentinel_stats(), 4);
    assert!(started.elapsed() < Duration::from_secs(13));
    assert_eq!(job.state(), JobState::Aborted);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_polling() {
    let mock = MockSession::new().with_processor(Processor::NoSentinel);
    let store = tiled_store();
    let cancel = CancelHandle::new();
    let mut job = client(&mock, &store).with_cancellation(cancel.token());

    job.upload(&store).await.unwrap();
    job.execute().await.unwrap();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    assert!(matches!(
        job.wait_for_completion().await,
        Err(JobError::Cancelled)
    ));
    let elapsed = started.elapsed();

    // Woken in the middle of the second pause
    assert_eq!(mock.sentinel_stats(), 2);
    assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(10));
    assert_eq!(job.state(), JobState::Aborted);
    assert_eq!(mock.open_channels(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_command_runs() {
    let mock = MockSession::new().with_processor(Processor::Hang);
    let store = tiled_store();
    let cancel = CancelHandle::new();
    let mut job = client(&mock, &store).with_cancellation(cancel.token());

    job.upload(&store).await.unwrap();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        canceller.cancel();
    });

    assert!(matches!(job.execute().await, Err(JobError::Cancelled)));
    assert!(mock.aborted());
    assert_eq!(job.state(), JobState::Aborted);

    // The aborted session no longer blocks a disconnect
    let closed = tokio::time::timeout(Duration::from_secs(5), job.close()).await;
    assert!(matches!(closed, Ok(Ok(JobState::Aborted))));
    assert!(mock.closed());
}

#[tokio::test]
async fn test_cancel_before_upload() {
    let mock = MockSession::new();
    let store = store_with_ten_tiles();
    let cancel = CancelHandle::new();
    cancel.cancel();
    let mut job = client(&mock, &store).with_cancellation(cancel.token());

    assert!(matches!(job.upload(&store).await, Err(JobError::Cancelled)));
    assert_eq!(mock.write_attempts(), 0);
    assert_eq!(job.state(), JobState::Aborted);
}

// =============================================================================
// Download
// =============================================================================

#[tokio::test]
async fn test_missing_result_aborts_download() {
    let store = tiled_store();
    let dropped = store.raw_keys()[1].file_name();
    let mock = MockSession::new().with_processor(Processor::DropResult(dropped.clone()));
    let mut job = client(&mock, &store);

    match job.run(&store).await {
        Err(JobError::Transfer { path, source }) => {
            assert!(path.ends_with(&format!("/results/{}", dropped)));
            assert!(matches!(source, RemoteError::NotFound(_)));
        }
        other => panic!("Expected Transfer error, got {:?}", other),
    }

    // Stops at the failing key
    assert_eq!(mock.reads(), 2);
    assert_eq!(store.result_len(), 1);
    assert_eq!(job.state(), JobState::Aborted);
}

// =============================================================================
// Cleanup
// =============================================================================

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let mock = MockSession::new();
    let store = tiled_store();
    let mut job = client(&mock, &store);
    let job_dir = format!("{}/{}", BASE, store.id());

    job.run(&store).await.unwrap();
    job.cleanup().await.unwrap();
    assert!(!mock.exists(&job_dir));

    // Running it again once done is a no-op
    job.cleanup().await.unwrap();
    assert_eq!(job.state(), JobState::Done);
    assert_eq!(job.history().last(), Some(&JobState::Done));
    assert_eq!(
        job.history()
            .iter()
            .filter(|s| **s == JobState::Done)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_cleanup_of_already_removed_directory() {
    let mock = MockSession::new();
    let store = tiled_store();
    let mut job = client(&mock, &store);
    let job_dir = format!("{}/{}", BASE, store.id());

    job.run(&store).await.unwrap();
    mock.remove_tree(&job_dir);

    job.cleanup().await.unwrap();
    assert_eq!(job.state(), JobState::Done);
}

#[tokio::test]
async fn test_cleanup_removes_nested_directories() {
    let mock = MockSession::new();
    let store = tiled_store();
    let mut job = client(&mock, &store);
    let job_dir = format!("{}/{}", BASE, store.id());

    job.run(&store).await.unwrap();
    mock.put_file(&format!("{}/results/logs/deep/run.log", job_dir), b"epoch 1");
    mock.put_file(&format!("{}/empty/.keep", job_dir), b"");

    job.cleanup().await.unwrap();
    assert!(mock.paths_under(&job_dir).is_empty());
    assert!(mock.exists(BASE));
}

#[tokio::test]
async fn test_cleanup_requires_download() {
    let mock = MockSession::new();
    let store = tiled_store();
    let mut job = client(&mock, &store);

    job.upload(&store).await.unwrap();
    assert!(matches!(
        job.cleanup().await,
        Err(JobError::InvalidState {
            expected: JobState::Downloading,
            actual: JobState::Uploading,
        })
    ));
}

#[tokio::test]
async fn test_cleanup_failure_is_reported_but_job_is_done() {
    let mock = MockSession::new();
    let store = tiled_store();
    let mut job = client(&mock, &store);

    job.run(&store).await.unwrap();
    mock.close().await.unwrap();

    let err = job.cleanup().await.unwrap_err();
    assert!(err.is_cleanup());
    assert!(matches!(
        err,
        JobError::Cleanup {
            source: RemoteError::Closed,
            ..
        }
    ));
    assert_eq!(job.state(), JobState::Done);
}

// =============================================================================
// Session
// =============================================================================

#[tokio::test]
async fn test_subchannels_are_released() {
    let mock = MockSession::new();
    let store = tiled_store();
    let mut job = client(&mock, &store);

    job.run(&store).await.unwrap();
    assert_eq!(mock.open_channels(), 0);
    job.cleanup().await.unwrap();
    assert_eq!(mock.open_channels(), 0);

    // upload, execute, poll, download, cleanup
    assert_eq!(mock.opened_channels(), 5);
}

#[tokio::test]
async fn test_close_returns_final_state() {
    let mock = MockSession::new();
    let store = tiled_store();
    let mut job = client(&mock, &store);

    job.run(&store).await.unwrap();
    job.cleanup().await.unwrap();

    assert_eq!(job.close().await.unwrap(), JobState::Done);
    assert!(mock.closed());
    assert_eq!(mock.close_calls(), 1);
}
