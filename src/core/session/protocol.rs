//! One websocket exchange, driven from handshake to close.
//!
//! Outbound chunks, inbound frames and batch cancellation are multiplexed in
//! a single `select!` loop. Audio is read and paced by a pump task that feeds
//! the loop through a small channel, so a slow producer never stalls inbound
//! processing.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::item::{ChunkReader, InputSource, WorkItemId};
use super::state::{ConnectionState, StateTracker};
use crate::config::ClientConfig;
use crate::core::auth::Authenticator;
use crate::core::callback::{AudioEvent, SessionCallback};
use crate::core::error::{StreamError, StreamResult};
use crate::core::stt::SessionOptions;
use crate::core::stt::messages::RecognizeMessage;
use crate::core::transport::{self, WsStream};
use crate::core::tts::SynthesizeOptions;
use crate::core::tts::messages::SynthesizeMessage;

// =============================================================================
// Constants
// =============================================================================

/// Chunks buffered between the pump task and the send loop.
const PUMP_DEPTH: usize = 4;

/// Upper bound on the best-effort close after a failure.
const FORCE_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on flushing our reply to a server-initiated close.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Called synchronously the moment a session enters `Failed`, before any
/// teardown or callback is awaited.
pub(crate) type FailureHook = Arc<dyn Fn(WorkItemId) + Send + Sync>;

// =============================================================================
// Inputs and outcome
// =============================================================================

/// Connection settings shared by every session of a batch.
#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub url: Url,
    pub authenticator: Authenticator,
    pub headers: Vec<(String, String)>,
    pub connect_timeout: Duration,
    pub chunk_size: usize,
    pub chunk_interval: Duration,
}

impl SessionSettings {
    pub fn new(config: &ClientConfig, authenticator: Authenticator, url: Url) -> Self {
        Self {
            url,
            authenticator,
            headers: config.request_headers(),
            connect_timeout: config.connect_timeout,
            chunk_size: config.chunk_size,
            chunk_interval: config.chunk_interval,
        }
    }
}

/// What a session sends after the handshake.
#[derive(Debug)]
pub(crate) enum Payload {
    Audio {
        options: Arc<SessionOptions>,
        input: InputSource,
    },
    Text {
        options: Arc<SynthesizeOptions>,
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Recognize,
    Synthesize,
}

/// Final report of one session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub item_id: WorkItemId,
    pub session_id: Uuid,
    /// `Closed` or `Failed`.
    pub state: ConnectionState,
    /// Every state visited, starting with `Unconnected`.
    pub history: Vec<ConnectionState>,
    /// Why the session failed.
    pub error: Option<StreamError>,
    /// Error the service reported before an orderly close.
    pub server_error: Option<StreamError>,
}

impl SessionOutcome {
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn is_failed(&self) -> bool {
        self.state == ConnectionState::Failed
    }

    /// Closed without the service reporting an error.
    pub fn is_success(&self) -> bool {
        self.is_closed() && self.server_error.is_none()
    }

    /// The failure cause, or the server-reported error.
    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref().or(self.server_error.as_ref())
    }
}

// =============================================================================
// Session
// =============================================================================

/// State and callback of one exchange. Consumed by [`Session::run`].
pub(crate) struct Session {
    item_id: WorkItemId,
    session_id: Uuid,
    mode: Mode,
    state: StateTracker,
    callback: Arc<dyn SessionCallback>,
    on_failed: Option<FailureHook>,
    listening_acks: u32,
    audio_chunks: u64,
    server_error: Option<StreamError>,
}

impl Session {
    pub fn new(item_id: WorkItemId, callback: Arc<dyn SessionCallback>) -> Self {
        Self {
            item_id,
            session_id: Uuid::new_v4(),
            mode: Mode::Recognize,
            state: StateTracker::default(),
            callback,
            on_failed: None,
            listening_acks: 0,
            audio_chunks: 0,
            server_error: None,
        }
    }

    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.on_failed = Some(hook);
        self
    }

    /// Drive the exchange to `Closed` or `Failed`.
    pub async fn run(
        mut self,
        settings: &SessionSettings,
        payload: Payload,
        cancel: &CancellationToken,
    ) -> SessionOutcome {
        self.mode = match payload {
            Payload::Audio { .. } => Mode::Recognize,
            Payload::Text { .. } => Mode::Synthesize,
        };
        info!(
            item_id = self.item_id,
            session_id = %self.session_id,
            mode = ?self.mode,
            "Starting session"
        );

        let error = match self.drive(settings, payload, cancel).await {
            Ok(()) => None,
            Err(err) => {
                self.enter_failed(&err);
                self.report_failure(&err).await;
                Some(err)
            }
        };

        SessionOutcome {
            item_id: self.item_id,
            session_id: self.session_id,
            state: self.state.current(),
            history: self.state.into_history(),
            error,
            server_error: self.server_error,
        }
    }

    /// Fail a session that cannot start, without touching the network.
    pub async fn reject(mut self, err: StreamError) -> SessionOutcome {
        self.enter_failed(&err);
        self.report_failure(&err).await;
        SessionOutcome {
            item_id: self.item_id,
            session_id: self.session_id,
            state: self.state.current(),
            history: self.state.into_history(),
            error: Some(err),
            server_error: None,
        }
    }

    async fn drive(
        &mut self,
        settings: &SessionSettings,
        payload: Payload,
        cancel: &CancellationToken,
    ) -> StreamResult<()> {
        // Open the input before connecting so a missing file never costs a handshake
        let (opening, reader) = match payload {
            Payload::Audio { options, input } => {
                let reader = ChunkReader::open(input, settings.chunk_size).await?;
                (options.build_start_message(), Some(reader))
            }
            Payload::Text { options, text } => (options.build_text_message(&text), None),
        };

        self.advance(ConnectionState::Handshaking)?;
        let authorization = settings.authenticator.authorization().await?;
        let request =
            transport::build_request(&settings.url, authorization.as_deref(), &settings.headers)?;

        let socket = tokio::select! {
            _ = cancel.cancelled() => return Err(aborted()),
            result = transport::connect(request, settings.connect_timeout) => result?,
        };
        self.advance(ConnectionState::Open)?;
        self.callback.on_connected().await;

        let (mut sink, mut stream) = socket.split();
        let result = self
            .exchange(&mut sink, &mut stream, opening, reader, settings.chunk_interval, cancel)
            .await;
        if let Err(err) = &result {
            self.enter_failed(err);
            force_close(&mut sink).await;
        }
        result
    }

    async fn exchange(
        &mut self,
        sink: &mut WsSink,
        stream: &mut WsSource,
        opening: Value,
        reader: Option<ChunkReader>,
        chunk_interval: Duration,
        cancel: &CancellationToken,
    ) -> StreamResult<()> {
        self.advance(ConnectionState::Streaming)?;
        sink.send(Message::Text(opening.to_string().into())).await?;
        debug!(item_id = self.item_id, "Opening frame sent");

        let (mut chunks, _pump) = match reader {
            Some(reader) => {
                let (rx, pump) = spawn_pump(reader, chunk_interval);
                (Some(rx), Some(pump))
            }
            None => {
                // The whole text went out in the opening frame
                self.advance(ConnectionState::AwaitingFinalResult)?;
                (None, None)
            }
        };

        loop {
            if self.state.current() == ConnectionState::Closed {
                return Ok(());
            }
            let streaming = self.state.current() == ConnectionState::Streaming;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(aborted()),

                chunk = next_chunk(&mut chunks), if streaming => match chunk {
                    Some(Ok(data)) => sink.send(Message::Binary(data)).await?,
                    Some(Err(e)) => return Err(e),
                    None => {
                        // Zero-length binary frame marks the end of audio
                        sink.send(Message::Binary(Bytes::new())).await?;
                        self.advance(ConnectionState::AwaitingFinalResult)?;
                        debug!(item_id = self.item_id, "End of audio sent");
                    }
                },

                frame = stream.next() => match frame {
                    Some(Ok(message)) => self.handle_message(message, sink).await?,
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        return Err(StreamError::NetworkError(
                            "Connection closed without a close frame".to_string(),
                        ));
                    }
                },
            }
        }
    }

    async fn handle_message(&mut self, message: Message, sink: &mut WsSink) -> StreamResult<()> {
        match message {
            Message::Text(text) => match self.mode {
                Mode::Recognize => self.handle_recognize_frame(text.as_str(), sink).await,
                Mode::Synthesize => self.handle_synthesize_frame(text.as_str(), sink).await,
            },
            Message::Binary(data) => match self.mode {
                Mode::Synthesize => {
                    let event = AudioEvent {
                        data,
                        sequence: self.audio_chunks,
                    };
                    self.audio_chunks += 1;
                    self.callback.on_audio_chunk(&event).await;
                    Ok(())
                }
                Mode::Recognize => Err(StreamError::ProtocolError(format!(
                    "Unexpected {}-byte binary frame from the recognize service",
                    data.len()
                ))),
            },
            Message::Close(frame) => self.handle_close(frame, sink).await,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(()),
        }
    }

    async fn handle_recognize_frame(&mut self, text: &str, sink: &mut WsSink) -> StreamResult<()> {
        match RecognizeMessage::parse(text)? {
            message if message.is_listening() => {
                self.listening_acks += 1;
                if self.listening_acks == 1 {
                    self.callback.on_listening().await;
                } else if self.state.current() == ConnectionState::AwaitingFinalResult {
                    // Second acknowledgement: every result for our audio has arrived
                    self.callback.on_transcription_complete().await;
                    self.begin_close(sink).await?;
                } else {
                    debug!(item_id = self.item_id, "Ignoring extra listening acknowledgement");
                }
            }
            RecognizeMessage::State(state) => {
                debug!(item_id = self.item_id, state = %state, "Service state");
            }
            RecognizeMessage::Results(event) => {
                self.callback.on_transcript(&event).await;
                for hypothesis in event.final_transcripts() {
                    self.callback.on_hypothesis(hypothesis).await;
                }
            }
            RecognizeMessage::Error(err) => {
                self.handle_server_error(err.to_stream_error(), sink).await?;
            }
            RecognizeMessage::Metrics(metrics) => {
                debug!(item_id = self.item_id, metrics = %metrics, "Service metrics");
            }
        }
        Ok(())
    }

    async fn handle_synthesize_frame(&mut self, text: &str, sink: &mut WsSink) -> StreamResult<()> {
        match SynthesizeMessage::parse(text)? {
            SynthesizeMessage::ContentType(content_type) => {
                self.callback.on_content_type(&content_type).await;
            }
            SynthesizeMessage::Timings(info) => self.callback.on_timing_info(&info).await,
            SynthesizeMessage::Warnings(warning) => {
                warn!(item_id = self.item_id, warning = %warning, "Service warning");
            }
            SynthesizeMessage::Error(err) => {
                self.handle_server_error(err.to_stream_error(), sink).await?;
            }
        }
        Ok(())
    }

    /// A well-formed error frame: report it, then close in order.
    async fn handle_server_error(&mut self, error: StreamError, sink: &mut WsSink) -> StreamResult<()> {
        warn!(item_id = self.item_id, error = %error, "Service reported an error");
        match &error {
            StreamError::InactivityTimeout(_) => self.callback.on_inactivity_timeout(&error).await,
            _ => self.callback.on_error(&error).await,
        }
        self.server_error = Some(error);
        if self.state.current() != ConnectionState::Closing {
            self.begin_close(sink).await?;
        }
        Ok(())
    }

    async fn begin_close(&mut self, sink: &mut WsSink) -> StreamResult<()> {
        self.advance(ConnectionState::Closing)?;
        sink.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: String::new().into(),
        })))
        .await?;
        Ok(())
    }

    async fn handle_close(&mut self, frame: Option<CloseFrame>, sink: &mut WsSink) -> StreamResult<()> {
        let code = frame.as_ref().map(|f| f.code);
        if self.state.current() != ConnectionState::Closing {
            if code != Some(CloseCode::Normal) {
                return Err(StreamError::ConnectionFailed(match frame {
                    Some(f) => format!("Service closed the connection ({}: {})", f.code, f.reason.as_str()),
                    None => "Service closed the connection without a status code".to_string(),
                }));
            }
            debug!(item_id = self.item_id, "Service closed the session");
            self.advance(ConnectionState::Closing)?;
            // Our close reply is queued by the websocket; push it out
            match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, sink.flush()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(item_id = self.item_id, error = %e, "Failed to flush close reply"),
                Err(_) => debug!(item_id = self.item_id, "Timed out flushing close reply"),
            }
        }
        self.finish().await
    }

    async fn finish(&mut self) -> StreamResult<()> {
        self.advance(ConnectionState::Closed)?;
        info!(
            item_id = self.item_id,
            session_id = %self.session_id,
            server_error = self.server_error.is_some(),
            "Session closed"
        );
        self.callback.on_close().await;
        Ok(())
    }

    /// Move to `Failed` and fire the failure hook. No-op once terminal.
    fn enter_failed(&mut self, err: &StreamError) {
        let from = self.state.current();
        if from.is_terminal() {
            return;
        }
        let _ = self.state.advance(ConnectionState::Failed);
        error!(
            item_id = self.item_id,
            session_id = %self.session_id,
            from = %from,
            had_socket = from.has_socket(),
            error = %err,
            "Session failed"
        );
        if let Some(hook) = &self.on_failed {
            hook(self.item_id);
        }
    }

    async fn report_failure(&self, err: &StreamError) {
        if self.state.current() == ConnectionState::Failed {
            self.callback.on_error(err).await;
        }
    }

    fn advance(&mut self, next: ConnectionState) -> StreamResult<()> {
        self.state.advance(next).map_err(|(from, to)| {
            StreamError::ProtocolError(format!("Illegal state transition {from} -> {to}"))
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn aborted() -> StreamError {
    StreamError::Aborted("Batch cancelled".to_string())
}

async fn force_close(sink: &mut WsSink) {
    if tokio::time::timeout(FORCE_CLOSE_TIMEOUT, sink.close()).await.is_err() {
        debug!("Timed out closing failed websocket");
    }
}

/// Aborts the pump task when the session ends.
struct PumpGuard(JoinHandle<()>);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Read and pace audio on its own task.
fn spawn_pump(
    mut reader: ChunkReader,
    interval: Duration,
) -> (mpsc::Receiver<StreamResult<Bytes>>, PumpGuard) {
    let (tx, rx) = mpsc::channel(PUMP_DEPTH);
    let handle = tokio::spawn(async move {
        let mut ticker = (!interval.is_zero()).then(|| {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        loop {
            if let Some(ticker) = ticker.as_mut() {
                ticker.tick().await;
            }
            match reader.next_chunk().await {
                Ok(Some(chunk)) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });
    (rx, PumpGuard(handle))
}

async fn next_chunk(
    chunks: &mut Option<mpsc::Receiver<StreamResult<Bytes>>>,
) -> Option<StreamResult<Bytes>> {
    match chunks {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
