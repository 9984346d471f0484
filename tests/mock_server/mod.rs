//! In-process mock of the Watson recognize and synthesize websockets.
//!
//! The server runs on its own thread and runtime so it works both under
//! `#[tokio::test]` and next to the library's own event loop.
//!
//! Recognize behavior is keyed on the audio it receives:
//! - audio starting with `ERROR` gets an error frame
//! - audio starting with `INACTIVE` gets an inactivity timeout frame
//! - audio starting with `FAIL` gets the socket dropped without a close
//! - anything else gets one final result and a second `listening`
//!
//! Synthesize returns `binary_streams`, optional word timings, a fixed number
//! of audio chunks, then closes with 1000. Text `FAIL` drops the socket.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Knobs for one mock instance.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Reject handshakes whose Authorization header differs.
    pub required_auth: Option<String>,
    /// Delay between the end of audio and the reply. `FAIL` audio is never delayed.
    pub result_delay: Duration,
    /// Audio chunks per synthesis.
    pub synth_chunks: usize,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            required_auth: None,
            result_delay: Duration::ZERO,
            synth_chunks: 3,
        }
    }
}

/// What one accepted connection saw.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub opt_out_header: Option<String>,
    pub text_frames: Vec<Value>,
    /// Sizes of every binary frame, in arrival order.
    pub binary_sizes: Vec<usize>,
    pub audio: Vec<u8>,
    pub opened_at: Instant,
    pub close_received_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct MockStats {
    pub handshakes: AtomicUsize,
    pub rejected: AtomicUsize,
    pub active: AtomicUsize,
    pub peak_active: AtomicUsize,
    pub records: Mutex<Vec<ConnectionRecord>>,
}

impl MockStats {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Completed connections, ordered by when they opened.
    pub fn records(&self) -> Vec<ConnectionRecord> {
        let mut records = self.records.lock().clone();
        records.sort_by_key(|r| r.opened_at);
        records
    }
}

pub struct MockWatson {
    pub addr: SocketAddr,
    pub stats: Arc<MockStats>,
}

impl MockWatson {
    pub fn start() -> Self {
        Self::start_with(MockBehavior::default())
    }

    pub fn start_with(behavior: MockBehavior) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("local addr");
        let stats = Arc::new(MockStats::default());

        let thread_stats = Arc::clone(&stats);
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("mock runtime");
            runtime.block_on(async move {
                let listener = TcpListener::from_std(listener).expect("tokio listener");
                let behavior = Arc::new(behavior);
                while let Ok((stream, _)) = listener.accept().await {
                    let stats = Arc::clone(&thread_stats);
                    let behavior = Arc::clone(&behavior);
                    tokio::spawn(async move {
                        handle_connection(stream, stats, behavior).await;
                    });
                }
            });
        });

        Self { addr, stats }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait until `n` connections have finished, or give up after `timeout`.
    pub fn wait_for_records(&self, n: usize, timeout: Duration) -> Vec<ConnectionRecord> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.stats.records.lock().len() >= n {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.stats.records()
    }
}

struct Handshake {
    path: String,
    query: Option<String>,
    authorization: Option<String>,
    opt_out_header: Option<String>,
}

async fn handle_connection(stream: TcpStream, stats: Arc<MockStats>, behavior: Arc<MockBehavior>) {
    let captured: Arc<Mutex<Option<Handshake>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&captured);
    let required = behavior.required_auth.clone();

    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let authorization = header("authorization");
        *slot.lock() = Some(Handshake {
            path: req.uri().path().to_string(),
            query: req.uri().query().map(str::to_string),
            authorization: authorization.clone(),
            opt_out_header: header("x-watson-learning-opt-out"),
        });
        match required {
            Some(expected) if authorization.as_deref() != Some(expected.as_str()) => {
                let mut reject = ErrorResponse::new(Some("Unauthorized".to_string()));
                *reject.status_mut() = StatusCode::UNAUTHORIZED;
                Err(reject)
            }
            _ => Ok(resp),
        }
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => {
            stats.rejected.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    let Some(handshake) = captured.lock().take() else {
        return;
    };
    stats.handshakes.fetch_add(1, Ordering::SeqCst);
    stats.enter();

    let mut record = ConnectionRecord {
        path: handshake.path,
        query: handshake.query,
        authorization: handshake.authorization,
        opt_out_header: handshake.opt_out_header,
        text_frames: Vec::new(),
        binary_sizes: Vec::new(),
        audio: Vec::new(),
        opened_at: Instant::now(),
        close_received_at: None,
    };

    let synthesize = record.path.starts_with("/v1/synthesize");
    let (mut write, mut read) = ws.split();
    let mut left = false;

    while let Some(frame) = read.next().await {
        let Ok(frame) = frame else { break };
        match frame {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                record.text_frames.push(value.clone());

                if synthesize {
                    if value["text"] == "FAIL" {
                        break;
                    }
                    if synthesize_reply(&mut write, &value, behavior.synth_chunks).await.is_err() {
                        break;
                    }
                } else if value["action"] == "start" {
                    let _ = write.send(text_frame(json!({"state": "listening"}))).await;
                }
            }
            Message::Binary(data) => {
                record.binary_sizes.push(data.len());
                if !data.is_empty() {
                    record.audio.extend_from_slice(&data);
                    continue;
                }
                if record.audio.starts_with(b"FAIL") {
                    break;
                }
                if !behavior.result_delay.is_zero() {
                    tokio::time::sleep(behavior.result_delay).await;
                }
                let replies = if record.audio.starts_with(b"ERROR") {
                    vec![json!({"error": "Model en-US_Bogus not found", "code": 404})]
                } else if record.audio.starts_with(b"INACTIVE") {
                    vec![json!({"error": "Session timed out due to inactivity after 30 seconds."})]
                } else {
                    vec![
                        json!({
                            "result_index": 0,
                            "results": [{
                                "final": true,
                                "alternatives": [{"transcript": "hello world ", "confidence": 0.93}]
                            }]
                        }),
                        json!({"state": "listening"}),
                    ]
                };
                for reply in replies {
                    let _ = write.send(text_frame(reply)).await;
                }
            }
            Message::Close(_) => {
                record.close_received_at = Some(Instant::now());
                if !left {
                    stats.leave();
                    left = true;
                }
            }
            _ => {}
        }
    }

    if !left {
        stats.leave();
    }
    stats.records.lock().push(record);
}

fn text_frame(value: Value) -> Message {
    Message::Text(value.to_string().into())
}

async fn synthesize_reply<S>(write: &mut S, request: &Value, chunks: usize) -> Result<(), S::Error>
where
    S: futures::Sink<Message> + Unpin,
{
    let accept = request["accept"].as_str().unwrap_or("audio/ogg;codecs=opus").to_string();
    write
        .send(text_frame(json!({"binary_streams": [{"content_type": accept}]})))
        .await?;

    let wants_words = request["timings"]
        .as_array()
        .is_some_and(|t| t.iter().any(|v| v == "words"));
    if wants_words {
        write
            .send(text_frame(json!({"words": [["hello", 0.0, 0.4], ["world", 0.4, 0.9]]})))
            .await?;
    }

    for i in 0..chunks {
        write.send(Message::Binary(vec![i as u8; 64].into())).await?;
    }
    write
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: String::new().into(),
        })))
        .await
}
