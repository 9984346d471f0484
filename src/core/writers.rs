//! File sinks used for `OutputSink::File` items.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use super::callback::{AudioEvent, SessionCallback};
use super::error::StreamError;
use super::stt::messages::{RecognitionResult, SpeakerLabel, TranscriptEvent};

/// Path of the transcript written for `input` inside `output_dir`.
///
/// `dir/audio.flac` becomes `output_dir/audio.json`.
pub fn transcript_path(output_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transcript".to_string());
    output_dir.join(format!("{stem}.json"))
}

// =============================================================================
// Transcript writer
// =============================================================================

/// JSON document written for one recognized input.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptDocument {
    pub input: String,
    /// Best final transcripts joined by spaces.
    pub transcript: String,
    pub results: Vec<RecognitionResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub speaker_labels: Vec<SpeakerLabel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Collects final results and writes them as JSON once the session closes.
///
/// Existing files are overwritten. Nothing is written for a failed session.
#[derive(Debug)]
pub struct TranscriptFileWriter {
    path: PathBuf,
    document: Mutex<TranscriptDocument>,
}

impl TranscriptFileWriter {
    pub fn new(input: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Mutex::new(TranscriptDocument {
                input: input.into(),
                ..Default::default()
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionCallback for TranscriptFileWriter {
    async fn on_transcript(&self, event: &TranscriptEvent) {
        let mut doc = self.document.lock();
        for result in event.results.iter().filter(|r| r.is_final) {
            if let Some(best) = result.best() {
                let text = best.transcript.trim();
                if !text.is_empty() {
                    if !doc.transcript.is_empty() {
                        doc.transcript.push(' ');
                    }
                    doc.transcript.push_str(text);
                }
            }
            doc.results.push(result.clone());
        }
        doc.speaker_labels
            .extend(event.speaker_labels.iter().filter(|l| l.is_final).cloned());
    }

    async fn on_error(&self, err: &StreamError) {
        self.document.lock().error = Some(err.to_string());
    }

    async fn on_inactivity_timeout(&self, err: &StreamError) {
        self.document.lock().error = Some(err.to_string());
    }

    async fn on_close(&self) {
        let body = {
            let doc = self.document.lock();
            serde_json::to_vec_pretty(&*doc)
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to serialize transcript");
                return;
            }
        };
        match tokio::fs::write(&self.path, body).await {
            Ok(()) => info!(path = %self.path.display(), "Transcript written"),
            Err(e) => error!(path = %self.path.display(), error = %e, "Failed to write transcript"),
        }
    }
}

// =============================================================================
// Audio writer
// =============================================================================

/// Streams synthesized audio chunks into a file.
///
/// Chunks go to `<path>.part`, which replaces `path` only after an orderly
/// close. A failed session removes the part file and leaves `path` as it was.
#[derive(Debug)]
pub struct AudioFileWriter {
    path: PathBuf,
    part_path: PathBuf,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl AudioFileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut part = path.clone().into_os_string();
        part.push(".part");
        Self {
            path,
            part_path: PathBuf::from(part),
            file: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where audio is staged until the session closes.
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    async fn discard(&self) {
        let had_file = self.file.lock().await.take().is_some();
        if !had_file {
            return;
        }
        match tokio::fs::remove_file(&self.part_path).await {
            Ok(()) => debug!(path = %self.part_path.display(), "Discarded partial audio"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.part_path.display(), error = %e, "Failed to remove partial audio"),
        }
    }
}

#[async_trait]
impl SessionCallback for AudioFileWriter {
    async fn on_connected(&self) {
        match tokio::fs::File::create(&self.part_path).await {
            Ok(file) => *self.file.lock().await = Some(file),
            Err(e) => error!(path = %self.part_path.display(), error = %e, "Failed to create audio file"),
        }
    }

    async fn on_audio_chunk(&self, chunk: &AudioEvent) {
        let written = match self.file.lock().await.as_mut() {
            Some(file) => file.write_all(&chunk.data).await,
            None => return,
        };
        if let Err(e) = written {
            error!(path = %self.part_path.display(), error = %e, "Failed to write audio chunk");
            self.discard().await;
        }
    }

    async fn on_close(&self) {
        let Some(mut file) = self.file.lock().await.take() else {
            return;
        };
        if let Err(e) = file.flush().await {
            error!(path = %self.part_path.display(), error = %e, "Failed to flush audio");
            return;
        }
        drop(file);
        match tokio::fs::rename(&self.part_path, &self.path).await {
            Ok(()) => info!(path = %self.path.display(), "Audio written"),
            Err(e) => error!(path = %self.path.display(), error = %e, "Failed to move audio into place"),
        }
    }

    async fn on_error(&self, _err: &StreamError) {
        self.discard().await;
    }
}
