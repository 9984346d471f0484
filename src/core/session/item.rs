//! Work items: one input payload plus where its events go.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::core::callback::SessionCallback;
use crate::core::error::{StreamError, StreamResult};

/// Identifier of a work item within one batch.
pub type WorkItemId = u64;

/// Where the payload of a session comes from.
#[derive(Debug)]
pub enum InputSource {
    /// Audio file read in fixed-size chunks.
    File(PathBuf),
    /// Audio already in memory.
    Memory(Bytes),
    /// Live audio pushed through an [`AudioFeeder`].
    Feed(AudioFeed),
    /// Text to synthesize.
    Text(String),
}

impl InputSource {
    pub fn is_audio(&self) -> bool {
        !matches!(self, Self::Text(_))
    }

    /// Short human label used in logs and output file names.
    pub fn label(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory(data) => format!("<memory:{} bytes>", data.len()),
            Self::Feed(_) => "<feed>".to_string(),
            Self::Text(text) => format!("<text:{} bytes>", text.len()),
        }
    }
}

/// Where the events of a session go.
#[derive(Clone)]
pub enum OutputSink {
    /// Write the artifact (transcript JSON or audio) to this path.
    File(PathBuf),
    /// Consumer-supplied sink.
    Handler(Arc<dyn SessionCallback>),
    /// Log only.
    Discard,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Handler(_) => f.write_str("Handler(..)"),
            Self::Discard => f.write_str("Discard"),
        }
    }
}

/// One unit of batch work.
#[derive(Debug)]
pub struct WorkItem {
    id: WorkItemId,
    input: InputSource,
    output: OutputSink,
}

impl WorkItem {
    pub fn new(id: WorkItemId, input: InputSource, output: OutputSink) -> Self {
        Self { id, input, output }
    }

    pub fn id(&self) -> WorkItemId {
        self.id
    }

    pub fn input(&self) -> &InputSource {
        &self.input
    }

    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    pub fn into_parts(self) -> (WorkItemId, InputSource, OutputSink) {
        (self.id, self.input, self.output)
    }
}

// =============================================================================
// Live audio feed
// =============================================================================

/// Producer half of a live audio feed. Dropping every feeder ends the input.
#[derive(Debug, Clone)]
pub struct AudioFeeder {
    tx: mpsc::Sender<Bytes>,
}

/// Consumer half of a live audio feed, placed in [`InputSource::Feed`].
#[derive(Debug)]
pub struct AudioFeed {
    rx: mpsc::Receiver<Bytes>,
}

/// Create a bounded live audio feed.
pub fn audio_feed(capacity: usize) -> (AudioFeeder, AudioFeed) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AudioFeeder { tx }, AudioFeed { rx })
}

impl AudioFeeder {
    pub async fn send(&self, chunk: impl Into<Bytes>) -> StreamResult<()> {
        self.tx
            .send(chunk.into())
            .await
            .map_err(|_| StreamError::Aborted("Audio feed receiver dropped".to_string()))
    }

    /// For producers running outside the event loop.
    pub fn blocking_send(&self, chunk: impl Into<Bytes>) -> StreamResult<()> {
        self.tx
            .blocking_send(chunk.into())
            .map_err(|_| StreamError::Aborted("Audio feed receiver dropped".to_string()))
    }
}

// =============================================================================
// Chunk reader
// =============================================================================

/// Yields the non-empty payload chunks of an audio input.
///
/// A zero-length chunk is the end-of-input marker on the wire, so the reader
/// never yields one.
#[derive(Debug)]
pub(crate) enum ChunkReader {
    File {
        file: tokio::fs::File,
        chunk_size: usize,
    },
    Memory {
        data: Bytes,
        chunk_size: usize,
    },
    Feed {
        rx: mpsc::Receiver<Bytes>,
        pending: Bytes,
        chunk_size: usize,
    },
}

impl ChunkReader {
    pub async fn open(input: InputSource, chunk_size: usize) -> StreamResult<Self> {
        let chunk_size = chunk_size.max(1);
        match input {
            InputSource::File(path) => {
                let file = open_audio(&path).await?;
                Ok(Self::File { file, chunk_size })
            }
            InputSource::Memory(data) => Ok(Self::Memory { data, chunk_size }),
            InputSource::Feed(feed) => Ok(Self::Feed {
                rx: feed.rx,
                pending: Bytes::new(),
                chunk_size,
            }),
            InputSource::Text(_) => Err(StreamError::ConfigurationError(
                "Text input cannot be streamed as audio".to_string(),
            )),
        }
    }

    /// Next chunk, or `None` once the input is exhausted.
    pub async fn next_chunk(&mut self) -> StreamResult<Option<Bytes>> {
        match self {
            Self::File { file, chunk_size } => {
                let mut buf = vec![0u8; *chunk_size];
                let mut filled = 0;
                while filled < buf.len() {
                    let n = file.read(&mut buf[filled..]).await?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                if filled == 0 {
                    return Ok(None);
                }
                buf.truncate(filled);
                Ok(Some(Bytes::from(buf)))
            }
            Self::Memory { data, chunk_size } => {
                if data.is_empty() {
                    return Ok(None);
                }
                let take = (*chunk_size).min(data.len());
                Ok(Some(data.split_to(take)))
            }
            Self::Feed {
                rx,
                pending,
                chunk_size,
            } => {
                while pending.is_empty() {
                    match rx.recv().await {
                        Some(chunk) => *pending = chunk,
                        None => return Ok(None),
                    }
                }
                let take = (*chunk_size).min(pending.len());
                Ok(Some(pending.split_to(take)))
            }
        }
    }
}

async fn open_audio(path: &Path) -> StreamResult<tokio::fs::File> {
    tokio::fs::File::open(path)
        .await
        .map_err(|e| StreamError::Io(format!("Failed to open {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn drain(mut reader: ChunkReader) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_memory_reader_splits_into_fixed_chunks() {
        let data = Bytes::from(vec![7u8; 2500]);
        let reader = ChunkReader::open(InputSource::Memory(data), 1000).await.unwrap();
        let sizes: Vec<usize> = drain(reader).await.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[tokio::test]
    async fn test_empty_memory_yields_nothing() {
        let reader = ChunkReader::open(InputSource::Memory(Bytes::new()), 1000).await.unwrap();
        assert!(drain(reader).await.is_empty());
    }

    #[tokio::test]
    async fn test_file_reader_preserves_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        file.write_all(&payload).unwrap();

        let reader = ChunkReader::open(InputSource::File(file.path().to_path_buf()), 1000)
            .await
            .unwrap();
        let chunks = drain(reader).await;
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| !c.is_empty()));
        assert_eq!(chunks.concat(), payload);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = ChunkReader::open(InputSource::File("/definitely/not/here.wav".into()), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Io(msg) if msg.contains("not/here.wav")));
    }

    #[tokio::test]
    async fn test_feed_skips_empty_pushes_and_resplits() {
        let (feeder, feed) = audio_feed(8);
        feeder.send(Bytes::from_static(b"abcde")).await.unwrap();
        feeder.send(Bytes::new()).await.unwrap();
        feeder.send(Bytes::from_static(b"fg")).await.unwrap();
        drop(feeder);

        let reader = ChunkReader::open(InputSource::Feed(feed), 2).await.unwrap();
        let chunks = drain(reader).await;
        assert_eq!(
            chunks,
            vec![
                Bytes::from_static(b"ab"),
                Bytes::from_static(b"cd"),
                Bytes::from_static(b"e"),
                Bytes::from_static(b"fg"),
            ]
        );
    }

    #[tokio::test]
    async fn test_text_input_is_not_audio() {
        assert!(!InputSource::Text("hi".into()).is_audio());
        assert!(ChunkReader::open(InputSource::Text("hi".into()), 10).await.is_err());
    }
}
