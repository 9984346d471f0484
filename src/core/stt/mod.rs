//! IBM Watson Speech-to-Text over the `/v1/recognize` websocket.
//!
//! A recognition session sends one `start` frame carrying the
//! [`SessionOptions`], streams the audio as binary frames, and terminates the
//! audio with an empty binary frame. The service answers with `listening`,
//! any number of `results` frames, and a second `listening` once the final
//! result has been delivered.

pub mod client;
pub mod messages;
pub mod options;

pub use client::SpeechToText;
pub use messages::{
    ErrorMessage, RecognitionResult, RecognizeMessage, SpeakerLabel, TranscriptEvent,
    TranscriptionAlternative, WordAlternative, WordAlternatives, WordConfidence, WordTimestamp,
};
pub use options::{AudioEncoding, SessionOptions, SessionOptionsBuilder};
