//! Synthesis sessions against the mock websocket server.

mod mock_server;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use mock_server::{MockBehavior, MockWatson};
use watson_streaming::{
    ChannelCallback, ClientConfig, ConnectionState, OutputFormat, SessionEvent, SessionEvents,
    SynthesizeOptions,
    TextToSpeech, Timing,
};

fn client_for(mock: &MockWatson) -> TextToSpeech {
    TextToSpeech::new(ClientConfig {
        tts_url: Some(mock.url()),
        ..Default::default()
    })
    .unwrap()
}

fn drain(rx: &mut SessionEvents) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_audio_chunks_delivered_in_order() {
    let mock = MockWatson::start_with(MockBehavior {
        synth_chunks: 4,
        ..Default::default()
    });
    let options = SynthesizeOptions::builder()
        .voice("en-GB_KateV3Voice")
        .format(OutputFormat::Wav)
        .timings([Timing::Words])
        .build()
        .unwrap();
    let (callback, mut rx) = ChannelCallback::channel(64);

    let outcome = client_for(&mock)
        .synthesize_using_websocket("Hello world", options, Arc::new(callback))
        .await
        .unwrap();

    assert!(outcome.is_success(), "outcome: {outcome:?}");
    assert_eq!(outcome.history.last(), Some(&ConnectionState::Closed));
    assert!(!outcome.history.contains(&ConnectionState::Failed));

    let events = drain(&mut rx);
    assert_eq!(events.first(), Some(&SessionEvent::Connected));
    assert!(matches!(&events[1], SessionEvent::ContentType(ct) if ct.starts_with("audio/wav")));
    let timing = events.iter().find_map(|e| match e {
        SessionEvent::Timing(info) => Some(info.clone()),
        _ => None,
    });
    assert_eq!(timing.unwrap().words[1].0, "world");

    let sequences: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Audio(chunk) => Some(chunk.sequence),
            _ => None,
        })
        .collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
    assert_eq!(events.last(), Some(&SessionEvent::Closed));

    let records = mock.wait_for_records(1, Duration::from_secs(5));
    let record = &records[0];
    assert_eq!(record.path, "/v1/synthesize");
    assert!(record.query.as_deref().unwrap_or("").contains("voice=en-GB_KateV3Voice"));
    assert_eq!(record.text_frames.len(), 1);
    assert_eq!(record.text_frames[0]["text"], "Hello world");
    assert!(record.binary_sizes.is_empty());
}

#[tokio::test]
async fn test_dropped_socket_fails_synthesis() {
    let mock = MockWatson::start();
    let (callback, mut rx) = ChannelCallback::channel(16);

    let outcome = client_for(&mock)
        .synthesize_using_websocket("FAIL", SynthesizeOptions::default(), Arc::new(callback))
        .await
        .unwrap();

    assert!(outcome.is_failed());
    let events = drain(&mut rx);
    assert!(matches!(events.last(), Some(SessionEvent::Error(_))));
    assert!(!events.contains(&SessionEvent::Closed));
}

#[test]
#[serial]
fn test_batch_writes_one_audio_file_per_text() {
    let mock = MockWatson::start_with(MockBehavior {
        synth_chunks: 3,
        ..Default::default()
    });
    let dir = TempDir::new().unwrap();
    let jobs = vec![
        ("First line".to_string(), dir.path().join("one.ogg")),
        ("Second line".to_string(), dir.path().join("two.ogg")),
    ];

    let report = client_for(&mock)
        .synthesize_batch(jobs, SynthesizeOptions::default(), 2)
        .unwrap();
    assert!(report.is_success(), "report: {report:?}");

    for name in ["one.ogg", "two.ogg"] {
        let audio = fs::read(dir.path().join(name)).unwrap();
        assert_eq!(audio.len(), 3 * 64);
        assert_eq!(&audio[..64], &[0u8; 64][..]);
        assert_eq!(&audio[128..], &[2u8; 64][..]);
        assert!(!dir.path().join(format!("{name}.part")).exists());
    }
}

#[test]
#[serial]
fn test_failed_synthesis_leaves_existing_file_alone() {
    let mock = MockWatson::start();
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("greeting.ogg");
    fs::write(&target, b"previous take").unwrap();

    let report = client_for(&mock)
        .synthesize_batch(
            vec![("FAIL".to_string(), target.clone())],
            SynthesizeOptions::default(),
            1,
        )
        .unwrap();

    assert!(report.outcome(0).unwrap().is_failed());
    assert_eq!(fs::read(&target).unwrap(), b"previous take");
    assert!(!dir.path().join("greeting.ogg.part").exists());
}
