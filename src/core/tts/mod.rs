//! IBM Watson Text-to-Speech over the `/v1/synthesize` websocket.

pub mod client;
pub mod messages;
pub mod options;

pub use client::TextToSpeech;
pub use messages::{SynthesizeMessage, TimingInfo};
pub use options::{
    DEFAULT_SAMPLE_RATE, DEFAULT_VOICE, MAX_TEXT_LENGTH, OutputFormat, SynthesizeOptions,
    SynthesizeOptionsBuilder, Timing,
};
