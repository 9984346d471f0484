//! Synthesis options for the synthesize websocket.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::error::{StreamError, StreamResult};

/// Default voice when none is configured.
pub const DEFAULT_VOICE: &str = "en-US_AllisonV3Voice";

/// Maximum text length per synthesis request (bytes).
pub const MAX_TEXT_LENGTH: usize = 5120;

/// Default sample rate for formats that need one.
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

// =============================================================================
// Output Format
// =============================================================================

/// Audio formats the synthesize endpoint can stream back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// OGG with Opus codec.
    #[default]
    OggOpus,
    OggVorbis,
    Wav,
    Mp3,
    Flac,
    /// WebM with Opus codec.
    Webm,
    /// Raw 16-bit PCM.
    L16,
    /// μ-law companded audio (telephony).
    Mulaw,
    /// A-law companded audio (telephony).
    Alaw,
}

impl OutputFormat {
    /// Get the `accept` value for this format.
    pub fn accept(&self, sample_rate: Option<u32>) -> String {
        let with_rate = |base: &str| match sample_rate {
            Some(rate) => format!("{base};rate={rate}"),
            None => base.to_string(),
        };
        match self {
            Self::OggOpus => with_rate("audio/ogg;codecs=opus"),
            Self::OggVorbis => "audio/ogg;codecs=vorbis".to_string(),
            Self::Wav => with_rate("audio/wav"),
            Self::Mp3 => "audio/mp3".to_string(),
            Self::Flac => "audio/flac".to_string(),
            Self::Webm => with_rate("audio/webm;codecs=opus"),
            Self::L16 => format!("audio/l16;rate={}", sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)),
            Self::Mulaw => format!("audio/mulaw;rate={}", sample_rate.unwrap_or(8000)),
            Self::Alaw => format!("audio/alaw;rate={}", sample_rate.unwrap_or(8000)),
        }
    }

    /// Get the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::OggOpus | Self::OggVorbis => "ogg",
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
            Self::Webm => "webm",
            Self::L16 | Self::Mulaw | Self::Alaw => "raw",
        }
    }

    /// Parse from a short name or MIME type, falling back to OGG/Opus.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "wav" | "audio/wav" => Self::Wav,
            "mp3" | "audio/mp3" | "mpeg" => Self::Mp3,
            "ogg-vorbis" | "vorbis" | "audio/ogg;codecs=vorbis" => Self::OggVorbis,
            "flac" | "audio/flac" => Self::Flac,
            "webm" | "audio/webm" | "audio/webm;codecs=opus" => Self::Webm,
            "l16" | "pcm" | "linear16" | "audio/l16" => Self::L16,
            "mulaw" | "ulaw" | "audio/mulaw" => Self::Mulaw,
            "alaw" | "audio/alaw" => Self::Alaw,
            _ => Self::default(),
        }
    }
}

/// Timing metadata the service may interleave with audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timing {
    Words,
    Marks,
}

// =============================================================================
// Synthesize Options
// =============================================================================

/// Validated synthesis parameters shared by every item of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizeOptions {
    voice: String,
    format: OutputFormat,
    sample_rate: Option<u32>,
    customization_id: Option<String>,
    timings: Vec<Timing>,
}

impl Default for SynthesizeOptions {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            format: OutputFormat::default(),
            sample_rate: None,
            customization_id: None,
            timings: Vec::new(),
        }
    }
}

impl SynthesizeOptions {
    pub fn builder() -> SynthesizeOptionsBuilder {
        SynthesizeOptionsBuilder {
            options: Self::default(),
        }
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn accept(&self) -> String {
        self.format.accept(self.sample_rate)
    }

    /// Query parameters appended to the synthesize URL.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("voice", self.voice.clone())];
        if let Some(id) = &self.customization_id {
            params.push(("customization_id", id.clone()));
        }
        params
    }

    /// Check a text payload before any connection is opened.
    pub fn validate_text(text: &str) -> StreamResult<()> {
        if text.trim().is_empty() {
            return Err(StreamError::ConfigurationError(
                "Synthesis text must not be empty".to_string(),
            ));
        }
        if text.len() > MAX_TEXT_LENGTH {
            return Err(StreamError::ConfigurationError(format!(
                "Synthesis text is {} bytes; the limit is {MAX_TEXT_LENGTH}",
                text.len()
            )));
        }
        Ok(())
    }

    /// Build the single text frame that starts synthesis.
    pub fn build_text_message(&self, text: &str) -> Value {
        let mut msg = json!({
            "text": text,
            "accept": self.accept(),
        });
        if !self.timings.is_empty() {
            msg["timings"] = json!(self.timings);
        }
        msg
    }
}

/// Builder for [`SynthesizeOptions`].
#[derive(Debug, Clone)]
pub struct SynthesizeOptionsBuilder {
    options: SynthesizeOptions,
}

impl SynthesizeOptionsBuilder {
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.options.voice = voice.into();
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.options.format = format;
        self
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.options.sample_rate = Some(rate);
        self
    }

    pub fn customization_id(mut self, id: impl Into<String>) -> Self {
        self.options.customization_id = Some(id.into());
        self
    }

    pub fn timings(mut self, timings: impl IntoIterator<Item = Timing>) -> Self {
        self.options.timings = timings.into_iter().collect();
        self.options.timings.dedup();
        self
    }

    pub fn build(self) -> StreamResult<SynthesizeOptions> {
        if self.options.voice.trim().is_empty() {
            return Err(StreamError::ConfigurationError(
                "voice must not be empty".to_string(),
            ));
        }
        if let Some(rate) = self.options.sample_rate
            && !(8000..=48000).contains(&rate)
        {
            return Err(StreamError::ConfigurationError(format!(
                "sample_rate must be between 8000 and 48000, got {rate}"
            )));
        }
        Ok(self.options)
    }
}
