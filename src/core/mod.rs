pub mod auth;
pub mod callback;
pub mod error;
pub mod region;
pub mod session;
pub mod stt;
pub mod transport;
pub mod tts;
pub mod writers;

// Re-export commonly used types for convenience
pub use auth::{AuthConfig, Authenticator, IBM_IAM_URL};
pub use callback::{
    AudioEvent, ChannelCallback, LoggingCallback, NoopCallback, SessionCallback, SessionEvent,
    SessionEvents, TeeCallback,
};
pub use error::{StreamError, StreamResult};
pub use region::IbmRegion;

pub use session::{
    AudioFeed, AudioFeeder, BatchReport, ConnectionState, EventLoop, ExchangeOptions,
    FailurePolicy, InputSource, OutputSink, SessionFactory, SessionOutcome, StateTracker,
    WorkItem, WorkItemId, audio_feed,
};

pub use stt::{
    AudioEncoding, RecognitionResult, SessionOptions, SessionOptionsBuilder, SpeechToText,
    TranscriptEvent,
};

pub use tts::{OutputFormat, SynthesizeOptions, SynthesizeOptionsBuilder, TextToSpeech, Timing, TimingInfo};

pub use writers::{AudioFileWriter, TranscriptDocument, TranscriptFileWriter, transcript_path};
