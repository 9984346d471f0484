//! Batch dispatch through the factory's event loop.
//!
//! Every test owns the process-wide event loop, so they run serially.

mod mock_server;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use serial_test::serial;
use tempfile::TempDir;

use mock_server::{MockBehavior, MockWatson};
use watson_streaming::{
    AuthConfig, ClientConfig, ConnectionState, FailurePolicy, InputSource, OutputSink,
    SessionCallback, SessionFactory, SessionOptions, SpeechToText, StreamError, WorkItem,
};

fn config_for(mock: &MockWatson) -> ClientConfig {
    ClientConfig {
        stt_url: Some(mock.url()),
        tts_url: Some(mock.url()),
        chunk_size: 1024,
        chunk_interval: Duration::ZERO,
        ..Default::default()
    }
}

fn options() -> SessionOptions {
    SessionOptions::builder("audio/wav").build().unwrap()
}

fn write_inputs(dir: &Path, contents: &[&[u8]]) -> Vec<PathBuf> {
    contents
        .iter()
        .enumerate()
        .map(|(i, data)| {
            let path = dir.join(format!("clip-{i}.wav"));
            fs::write(&path, data).unwrap();
            path
        })
        .collect()
}

/// Takes its time reporting a failure.
struct SlowErrorHandler;

#[async_trait]
impl SessionCallback for SlowErrorHandler {
    async fn on_error(&self, _error: &StreamError) {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn slow_mock() -> MockWatson {
    MockWatson::start_with(MockBehavior {
        result_delay: Duration::from_millis(150),
        ..Default::default()
    })
}

#[test]
#[serial]
fn test_live_sessions_never_exceed_worker_count() {
    let mock = slow_mock();
    let dir = TempDir::new().unwrap();
    let inputs = vec![&b"RIFF audio"[..]; 6];
    let files = write_inputs(dir.path(), &inputs);
    let out = dir.path().join("out");

    let report = SpeechToText::new(config_for(&mock))
        .unwrap()
        .recognize_batch(files, options(), 2, &out)
        .unwrap();

    assert!(report.is_success(), "report: {report:?}");
    assert_eq!(report.outcomes.len(), 6);
    assert_eq!(mock.stats.handshakes(), 6);
    // Both slots fill while results are delayed, never more
    assert_eq!(mock.stats.peak(), 2);
}

#[test]
#[serial]
fn test_next_session_opens_only_after_a_close() {
    let mock = slow_mock();
    let dir = TempDir::new().unwrap();
    let inputs = vec![&b"RIFF audio"[..]; 3];
    let files = write_inputs(dir.path(), &inputs);

    SpeechToText::new(config_for(&mock))
        .unwrap()
        .recognize_batch(files, options(), 2, &dir.path().join("out"))
        .unwrap();

    let records = mock.wait_for_records(3, Duration::from_secs(5));
    assert_eq!(records.len(), 3);
    let first_close = records[..2]
        .iter()
        .filter_map(|r| r.close_received_at)
        .min()
        .unwrap();
    assert!(records[2].opened_at >= first_close);
}

#[test]
#[serial]
fn test_transcripts_written_per_input() {
    let mock = MockWatson::start();
    let dir = TempDir::new().unwrap();
    let files = write_inputs(dir.path(), &[b"RIFF one", b"RIFF two"]);
    let out = dir.path().join("transcripts");

    // A stale transcript is overwritten
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("clip-0.json"), "stale").unwrap();

    let report = SpeechToText::new(config_for(&mock))
        .unwrap()
        .recognize_batch(files, options(), 2, &out)
        .unwrap();
    assert!(report.is_success());

    for name in ["clip-0.json", "clip-1.json"] {
        let doc: Value = serde_json::from_str(&fs::read_to_string(out.join(name)).unwrap()).unwrap();
        assert_eq!(doc["transcript"], "hello world");
        assert_eq!(doc["results"].as_array().unwrap().len(), 1);
        assert!(doc.get("error").is_none());
    }
}

#[test]
#[serial]
fn test_failure_aborts_rest_of_batch() {
    let mock = slow_mock();
    let dir = TempDir::new().unwrap();
    let files = write_inputs(
        dir.path(),
        &[b"FAIL first", b"RIFF slow", b"RIFF never", b"RIFF never"],
    );
    let out = dir.path().join("out");

    let report = SpeechToText::new(config_for(&mock))
        .unwrap()
        .recognize_batch(files, options(), 2, &out)
        .unwrap();

    assert!(report.aborted);
    assert!(!report.is_success());
    assert!(report.outcome(0).unwrap().is_failed());

    // The in-flight sibling is cancelled, queued items never dispatch
    let sibling = report.outcome(1).unwrap();
    assert!(sibling.is_failed());
    assert!(matches!(sibling.error, Some(StreamError::Aborted(_))));
    assert_eq!(report.cancelled, vec![2, 3]);
    assert!(mock.stats.handshakes() <= 2);

    // Failed sessions write nothing
    assert!(!out.join("clip-0.json").exists());
    assert!(!out.join("clip-2.json").exists());
}

#[test]
#[serial]
fn test_batch_stops_before_a_slow_error_handler_returns() {
    let mock = slow_mock();
    let memory = |data: &'static [u8]| InputSource::Memory(Bytes::from_static(data));
    let items = vec![
        WorkItem::new(0, memory(b"FAIL first"), OutputSink::Handler(Arc::new(SlowErrorHandler))),
        WorkItem::new(1, memory(b"RIFF slow"), OutputSink::Discard),
        WorkItem::new(2, memory(b"RIFF queued"), OutputSink::Discard),
    ];

    let report = SessionFactory::new(config_for(&mock))
        .unwrap()
        .submit(items, options(), 2)
        .unwrap();

    // The free worker slot must not pick up item 2 while item 0 reports
    assert!(report.aborted);
    assert_eq!(report.cancelled, vec![2]);
    assert!(report.outcome(2).is_none());
    assert!(matches!(report.outcome(1).unwrap().error, Some(StreamError::Aborted(_))));
    assert!(mock.stats.handshakes() <= 2);
    assert!(mock.stats.records().iter().all(|r| r.audio != b"RIFF queued"));
}

#[test]
#[serial]
fn test_rejected_handshake_aborts_batch_without_connecting() {
    let mock = MockWatson::start_with(MockBehavior {
        required_auth: Some("Bearer right".to_string()),
        ..Default::default()
    });
    let dir = TempDir::new().unwrap();
    let files = write_inputs(dir.path(), &[b"RIFF a", b"RIFF b", b"RIFF c"]);
    let config = ClientConfig {
        auth: AuthConfig::Bearer {
            token: "wrong".to_string(),
        },
        ..config_for(&mock)
    };

    let report = SpeechToText::new(config)
        .unwrap()
        .recognize_batch(files, options(), 1, &dir.path().join("out"))
        .unwrap();

    assert!(report.aborted);
    assert_eq!(report.cancelled, vec![1, 2]);
    assert_eq!(report.outcomes.len(), 1);
    let failed = report.outcome(0).unwrap();
    assert!(matches!(failed.error, Some(StreamError::AuthenticationFailed(_))));
    assert_eq!(
        failed.history,
        vec![
            ConnectionState::Unconnected,
            ConnectionState::Handshaking,
            ConnectionState::Failed,
        ]
    );
    assert_eq!(mock.stats.handshakes(), 0);
    assert_eq!(mock.stats.rejected.load(Ordering::SeqCst), 1);
}

#[test]
#[serial]
fn test_refused_connection_aborts_batch() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = ClientConfig {
        stt_url: Some(format!("ws://127.0.0.1:{port}")),
        chunk_interval: Duration::ZERO,
        ..Default::default()
    };
    let memory = |id| {
        WorkItem::new(id, InputSource::Memory(Bytes::from_static(b"RIFF")), OutputSink::Discard)
    };

    let report = SessionFactory::new(config)
        .unwrap()
        .submit((0..3).map(memory).collect(), options(), 1)
        .unwrap();

    assert!(report.aborted);
    assert_eq!(report.cancelled, vec![1, 2]);
    let failed = report.outcome(0).unwrap();
    assert!(matches!(failed.error, Some(StreamError::ConnectionFailed(_))));
    assert_eq!(failed.history.last(), Some(&ConnectionState::Failed));
}

#[test]
#[serial]
fn test_isolate_policy_keeps_going() {
    let mock = MockWatson::start();
    let dir = TempDir::new().unwrap();
    let files = write_inputs(dir.path(), &[b"FAIL first", b"RIFF a", b"RIFF b", b"RIFF c"]);
    let out = dir.path().join("out");

    let report = SpeechToText::new(config_for(&mock))
        .unwrap()
        .with_failure_policy(FailurePolicy::Isolate)
        .recognize_batch(files, options(), 1, &out)
        .unwrap();

    assert!(!report.aborted);
    assert!(report.cancelled.is_empty());
    assert_eq!(report.failed().count(), 1);
    assert_eq!(report.completed().count(), 3);
    assert!(out.join("clip-3.json").exists());
}

#[test]
#[serial]
fn test_server_error_does_not_abort_batch() {
    let mock = MockWatson::start();
    let dir = TempDir::new().unwrap();
    let files = write_inputs(dir.path(), &[b"ERROR bad model", b"RIFF fine"]);
    let out = dir.path().join("out");

    let report = SpeechToText::new(config_for(&mock))
        .unwrap()
        .recognize_batch(files, options(), 1, &out)
        .unwrap();

    assert!(!report.aborted);
    assert_eq!(report.completed().count(), 2);
    let errored = report.outcome(0).unwrap();
    assert!(matches!(errored.server_error, Some(StreamError::ProviderError(_))));

    let doc: Value = serde_json::from_str(&fs::read_to_string(out.join("clip-0.json")).unwrap()).unwrap();
    assert!(doc["error"].as_str().unwrap().contains("not found"));
}

#[test]
#[serial]
fn test_factory_runs_memory_items_with_handlers() {
    let mock = MockWatson::start();
    let (callback, mut rx) = watson_streaming::ChannelCallback::channel(64);
    let callback = std::sync::Arc::new(callback);
    let items = (0..3)
        .map(|id| {
            WorkItem::new(
                id,
                InputSource::Memory(bytes::Bytes::from_static(b"RIFF memory")),
                OutputSink::Handler(callback.clone()),
            )
        })
        .collect();

    let report = SessionFactory::new(config_for(&mock))
        .unwrap()
        .submit(items, options(), 3)
        .unwrap();
    assert!(report.is_success());

    let mut closed = 0;
    while let Ok(event) = rx.try_recv() {
        if event == watson_streaming::SessionEvent::Closed {
            closed += 1;
        }
    }
    assert_eq!(closed, 3);
}
