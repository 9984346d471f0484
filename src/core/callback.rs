//! Consumer-supplied event sinks.
//!
//! A [`SessionCallback`] receives every event of one session in the order it
//! happened. Methods run on the event loop thread and must return quickly;
//! long work should be handed off (see [`ChannelCallback`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

use super::error::StreamError;
use super::stt::messages::TranscriptEvent;
use super::tts::messages::TimingInfo;

/// A chunk of synthesized audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEvent {
    pub data: Bytes,
    /// Zero-based index of the chunk within the session.
    pub sequence: u64,
}

/// Receiver of session events. Every method has a no-op default.
///
/// Exactly one terminal notification is delivered per session: `on_close`
/// after an orderly close, or `on_error` when the session fails.
#[async_trait]
pub trait SessionCallback: Send + Sync {
    /// The websocket upgrade succeeded.
    async fn on_connected(&self) {}

    async fn on_error(&self, _error: &StreamError) {}

    async fn on_inactivity_timeout(&self, _error: &StreamError) {}

    /// The service acknowledged the start frame.
    async fn on_listening(&self) {}

    async fn on_transcript(&self, _event: &TranscriptEvent) {}

    /// Best transcript of a final result.
    async fn on_hypothesis(&self, _hypothesis: &str) {}

    /// The service acknowledged end of audio.
    async fn on_transcription_complete(&self) {}

    async fn on_content_type(&self, _content_type: &str) {}

    async fn on_audio_chunk(&self, _chunk: &AudioEvent) {}

    async fn on_timing_info(&self, _info: &TimingInfo) {}

    async fn on_close(&self) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

#[async_trait]
impl SessionCallback for NoopCallback {}

// =============================================================================
// Logging sink
// =============================================================================

/// Logs every event through `tracing`; the default diagnostics sink.
#[derive(Debug, Clone)]
pub struct LoggingCallback {
    label: String,
}

impl LoggingCallback {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl SessionCallback for LoggingCallback {
    async fn on_connected(&self) {
        debug!(session = %self.label, "Connected");
    }

    async fn on_error(&self, err: &StreamError) {
        error!(session = %self.label, error = %err, "Session error");
    }

    async fn on_inactivity_timeout(&self, err: &StreamError) {
        warn!(session = %self.label, error = %err, "Inactivity timeout");
    }

    async fn on_listening(&self) {
        debug!(session = %self.label, "Service listening");
    }

    async fn on_transcript(&self, event: &TranscriptEvent) {
        debug!(
            session = %self.label,
            result_index = event.result_index,
            results = event.results.len(),
            is_final = event.is_final(),
            "Transcript"
        );
    }

    async fn on_hypothesis(&self, hypothesis: &str) {
        info!(session = %self.label, hypothesis = %hypothesis, "Final hypothesis");
    }

    async fn on_transcription_complete(&self) {
        debug!(session = %self.label, "Transcription complete");
    }

    async fn on_content_type(&self, content_type: &str) {
        debug!(session = %self.label, content_type = %content_type, "Audio content type");
    }

    async fn on_audio_chunk(&self, chunk: &AudioEvent) {
        debug!(session = %self.label, sequence = chunk.sequence, bytes = chunk.data.len(), "Audio chunk");
    }

    async fn on_close(&self) {
        info!(session = %self.label, "Session closed");
    }
}

// =============================================================================
// Channel sink
// =============================================================================

/// Owned copy of a callback event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Error(StreamError),
    InactivityTimeout(StreamError),
    Listening,
    Transcript(TranscriptEvent),
    Hypothesis(String),
    TranscriptionComplete,
    ContentType(String),
    Audio(AudioEvent),
    Timing(TimingInfo),
    Closed,
}

impl SessionEvent {
    /// True for the events that end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error(_))
    }

    /// Payload events; the only ones a full [`ChannelCallback`] drops.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Self::Transcript(_) | Self::Hypothesis(_) | Self::Audio(_) | Self::Timing(_)
        )
    }
}

/// Forwards events into a channel without blocking the event loop.
///
/// At most `capacity` data events wait in the channel; further ones are
/// dropped with a warning. Lifecycle events are always delivered, so the
/// receiver sees every session's terminal event.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<SessionEvent>,
    queued_data: Arc<AtomicUsize>,
    data_capacity: usize,
}

/// Receiving end of a [`ChannelCallback`].
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    queued_data: Arc<AtomicUsize>,
}

impl ChannelCallback {
    /// Callback plus the receiving end of a fresh channel.
    pub fn channel(capacity: usize) -> (Self, SessionEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued_data = Arc::new(AtomicUsize::new(0));
        let callback = Self {
            tx,
            queued_data: Arc::clone(&queued_data),
            data_capacity: capacity.max(1),
        };
        (callback, SessionEvents { rx, queued_data })
    }

    fn forward(&self, event: SessionEvent) {
        let data = event.is_data();
        if data && self.queued_data.fetch_add(1, Ordering::AcqRel) >= self.data_capacity {
            self.queued_data.fetch_sub(1, Ordering::AcqRel);
            warn!("Dropping session event: channel full");
            return;
        }
        if self.tx.send(event).is_err() {
            if data {
                self.queued_data.fetch_sub(1, Ordering::AcqRel);
            }
            debug!("Session event receiver dropped");
        }
    }
}

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        let event = self.rx.recv().await?;
        self.release(&event);
        Some(event)
    }

    pub fn try_recv(&mut self) -> Result<SessionEvent, TryRecvError> {
        let event = self.rx.try_recv()?;
        self.release(&event);
        Ok(event)
    }

    fn release(&self, event: &SessionEvent) {
        if event.is_data() {
            self.queued_data.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

#[async_trait]
impl SessionCallback for ChannelCallback {
    async fn on_connected(&self) {
        self.forward(SessionEvent::Connected);
    }

    async fn on_error(&self, err: &StreamError) {
        self.forward(SessionEvent::Error(err.clone()));
    }

    async fn on_inactivity_timeout(&self, err: &StreamError) {
        self.forward(SessionEvent::InactivityTimeout(err.clone()));
    }

    async fn on_listening(&self) {
        self.forward(SessionEvent::Listening);
    }

    async fn on_transcript(&self, event: &TranscriptEvent) {
        self.forward(SessionEvent::Transcript(event.clone()));
    }

    async fn on_hypothesis(&self, hypothesis: &str) {
        self.forward(SessionEvent::Hypothesis(hypothesis.to_string()));
    }

    async fn on_transcription_complete(&self) {
        self.forward(SessionEvent::TranscriptionComplete);
    }

    async fn on_content_type(&self, content_type: &str) {
        self.forward(SessionEvent::ContentType(content_type.to_string()));
    }

    async fn on_audio_chunk(&self, chunk: &AudioEvent) {
        self.forward(SessionEvent::Audio(chunk.clone()));
    }

    async fn on_timing_info(&self, info: &TimingInfo) {
        self.forward(SessionEvent::Timing(info.clone()));
    }

    async fn on_close(&self) {
        self.forward(SessionEvent::Closed);
    }
}

// =============================================================================
// Fan-out
// =============================================================================

/// Delivers each event to several sinks, in order.
#[derive(Clone, Default)]
pub struct TeeCallback {
    sinks: Vec<Arc<dyn SessionCallback>>,
}

impl TeeCallback {
    pub fn new(sinks: Vec<Arc<dyn SessionCallback>>) -> Self {
        Self { sinks }
    }

}

impl std::fmt::Debug for TeeCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeeCallback")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[async_trait]
impl SessionCallback for TeeCallback {
    async fn on_connected(&self) {
        for sink in &self.sinks {
            sink.on_connected().await;
        }
    }

    async fn on_error(&self, err: &StreamError) {
        for sink in &self.sinks {
            sink.on_error(err).await;
        }
    }

    async fn on_inactivity_timeout(&self, err: &StreamError) {
        for sink in &self.sinks {
            sink.on_inactivity_timeout(err).await;
        }
    }

    async fn on_listening(&self) {
        for sink in &self.sinks {
            sink.on_listening().await;
        }
    }

    async fn on_transcript(&self, event: &TranscriptEvent) {
        for sink in &self.sinks {
            sink.on_transcript(event).await;
        }
    }

    async fn on_hypothesis(&self, hypothesis: &str) {
        for sink in &self.sinks {
            sink.on_hypothesis(hypothesis).await;
        }
    }

    async fn on_transcription_complete(&self) {
        for sink in &self.sinks {
            sink.on_transcription_complete().await;
        }
    }

    async fn on_content_type(&self, content_type: &str) {
        for sink in &self.sinks {
            sink.on_content_type(content_type).await;
        }
    }

    async fn on_audio_chunk(&self, chunk: &AudioEvent) {
        for sink in &self.sinks {
            sink.on_audio_chunk(chunk).await;
        }
    }

    async fn on_timing_info(&self, info: &TimingInfo) {
        for sink in &self.sinks {
            sink.on_timing_info(info).await;
        }
    }

    async fn on_close(&self) {
        for sink in &self.sinks {
            sink.on_close().await;
        }
    }
}
