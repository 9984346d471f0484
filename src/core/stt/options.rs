//! Recognition options shared by every session of a batch.
//!
//! Options are validated once when built and are immutable afterwards; the
//! factory hands the same `Arc<SessionOptions>` to every worker.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::core::error::{StreamError, StreamResult};

// =============================================================================
// Audio Encoding
// =============================================================================

/// Audio encoding formats accepted by the recognize endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioEncoding {
    /// Linear PCM 16-bit little-endian signed integer.
    #[default]
    Linear16,
    Mulaw,
    Alaw,
    Flac,
    /// Opus in an OGG container.
    OggOpus,
    /// Opus in a WebM container.
    WebmOpus,
    Mp3,
    /// WAV container; rate and channels come from the header.
    Wav,
}

impl AudioEncoding {
    /// Get the content-type MIME string for this encoding.
    pub fn content_type(&self, sample_rate: u32) -> String {
        match self {
            Self::Linear16 => format!("audio/l16;rate={sample_rate};channels=1"),
            Self::Mulaw => format!("audio/mulaw;rate={sample_rate}"),
            Self::Alaw => format!("audio/alaw;rate={sample_rate}"),
            Self::Flac => "audio/flac".to_string(),
            Self::OggOpus => "audio/ogg;codecs=opus".to_string(),
            Self::WebmOpus => "audio/webm;codecs=opus".to_string(),
            Self::Mp3 => "audio/mp3".to_string(),
            Self::Wav => "audio/wav".to_string(),
        }
    }
}

// =============================================================================
// Session Options
// =============================================================================

/// Validated recognition parameters.
///
/// Connection-level identifiers (`model`, customization ids) travel in the
/// upgrade URL; everything else is sent in the opening `start` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    content_type: String,
    model: Option<String>,
    language_customization_id: Option<String>,
    acoustic_customization_id: Option<String>,
    base_model_version: Option<String>,
    customization_weight: Option<f64>,
    interim_results: bool,
    timestamps: bool,
    word_confidence: bool,
    speaker_labels: bool,
    smart_formatting: bool,
    profanity_filter: bool,
    redaction: bool,
    max_alternatives: u32,
    inactivity_timeout: i32,
    keywords: Vec<String>,
    keywords_threshold: Option<f64>,
    word_alternatives_threshold: Option<f64>,
    processing_metrics: bool,
    processing_metrics_interval: Option<f64>,
    audio_metrics: bool,
    end_of_phrase_silence_time: Option<f64>,
    split_transcript_at_phrase_end: bool,
    speech_detector_sensitivity: Option<f64>,
    background_audio_suppression: Option<f64>,
    low_latency: Option<bool>,
}

impl SessionOptions {
    pub fn builder(content_type: impl Into<String>) -> SessionOptionsBuilder {
        SessionOptionsBuilder::new(content_type)
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn interim_results(&self) -> bool {
        self.interim_results
    }

    /// Query parameters appended to the recognize URL.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(model) = &self.model {
            params.push(("model", model.clone()));
        }
        if let Some(id) = &self.language_customization_id {
            params.push(("language_customization_id", id.clone()));
        }
        if let Some(id) = &self.acoustic_customization_id {
            params.push(("acoustic_customization_id", id.clone()));
        }
        if let Some(version) = &self.base_model_version {
            params.push(("base_model_version", version.clone()));
        }
        params
    }

    /// Build the opening `start` frame.
    pub fn build_start_message(&self) -> Value {
        let mut msg = json!({
            "action": "start",
            "content-type": self.content_type,
            "interim_results": self.interim_results,
            "timestamps": self.timestamps,
            "word_confidence": self.word_confidence,
            "speaker_labels": self.speaker_labels,
            "smart_formatting": self.smart_formatting,
            "profanity_filter": self.profanity_filter,
            "redaction": self.redaction,
            "max_alternatives": self.max_alternatives,
            "inactivity_timeout": self.inactivity_timeout,
        });

        if let Value::Object(map) = &mut msg {
            if !self.keywords.is_empty() {
                map.insert("keywords".into(), json!(self.keywords));
            }
            insert_opt(map, "keywords_threshold", self.keywords_threshold);
            insert_opt(map, "word_alternatives_threshold", self.word_alternatives_threshold);
            insert_opt(map, "customization_weight", self.customization_weight);
            if self.processing_metrics {
                map.insert("processing_metrics".into(), json!(true));
                insert_opt(map, "processing_metrics_interval", self.processing_metrics_interval);
            }
            if self.audio_metrics {
                map.insert("audio_metrics".into(), json!(true));
            }
            insert_opt(map, "end_of_phrase_silence_time", self.end_of_phrase_silence_time);
            if self.split_transcript_at_phrase_end {
                map.insert("split_transcript_at_phrase_end".into(), json!(true));
            }
            insert_opt(map, "speech_detector_sensitivity", self.speech_detector_sensitivity);
            insert_opt(map, "background_audio_suppression", self.background_audio_suppression);
            insert_opt(map, "low_latency", self.low_latency);
        }

        msg
    }
}

fn insert_opt<T: Into<Value>>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value.into());
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SessionOptions`]; `build` performs all validation.
#[derive(Debug, Clone)]
pub struct SessionOptionsBuilder {
    options: SessionOptions,
}

impl SessionOptionsBuilder {
    fn new(content_type: impl Into<String>) -> Self {
        Self {
            options: SessionOptions {
                content_type: content_type.into(),
                model: None,
                language_customization_id: None,
                acoustic_customization_id: None,
                base_model_version: None,
                customization_weight: None,
                interim_results: false,
                timestamps: false,
                word_confidence: false,
                speaker_labels: false,
                smart_formatting: false,
                profanity_filter: true,
                redaction: false,
                max_alternatives: 1,
                inactivity_timeout: 30,
                keywords: Vec::new(),
                keywords_threshold: None,
                word_alternatives_threshold: None,
                processing_metrics: false,
                processing_metrics_interval: None,
                audio_metrics: false,
                end_of_phrase_silence_time: None,
                split_transcript_at_phrase_end: false,
                speech_detector_sensitivity: None,
                background_audio_suppression: None,
                low_latency: None,
            },
        }
    }

    /// Content type derived from an encoding and sample rate.
    pub fn encoding(mut self, encoding: AudioEncoding, sample_rate: u32) -> Self {
        self.options.content_type = encoding.content_type(sample_rate);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    pub fn language_customization_id(mut self, id: impl Into<String>) -> Self {
        self.options.language_customization_id = Some(id.into());
        self
    }

    pub fn acoustic_customization_id(mut self, id: impl Into<String>) -> Self {
        self.options.acoustic_customization_id = Some(id.into());
        self
    }

    pub fn base_model_version(mut self, version: impl Into<String>) -> Self {
        self.options.base_model_version = Some(version.into());
        self
    }

    pub fn customization_weight(mut self, weight: f64) -> Self {
        self.options.customization_weight = Some(weight);
        self
    }

    pub fn interim_results(mut self, enabled: bool) -> Self {
        self.options.interim_results = enabled;
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.options.timestamps = enabled;
        self
    }

    pub fn word_confidence(mut self, enabled: bool) -> Self {
        self.options.word_confidence = enabled;
        self
    }

    pub fn speaker_labels(mut self, enabled: bool) -> Self {
        self.options.speaker_labels = enabled;
        self
    }

    pub fn smart_formatting(mut self, enabled: bool) -> Self {
        self.options.smart_formatting = enabled;
        self
    }

    pub fn profanity_filter(mut self, enabled: bool) -> Self {
        self.options.profanity_filter = enabled;
        self
    }

    pub fn redaction(mut self, enabled: bool) -> Self {
        self.options.redaction = enabled;
        self
    }

    pub fn max_alternatives(mut self, count: u32) -> Self {
        self.options.max_alternatives = count;
        self
    }

    /// Seconds of silence before the server ends the session; `-1` disables.
    pub fn inactivity_timeout(mut self, seconds: i32) -> Self {
        self.options.inactivity_timeout = seconds;
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I, threshold: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.keywords = keywords.into_iter().map(Into::into).collect();
        self.options.keywords_threshold = Some(threshold);
        self
    }

    pub fn word_alternatives_threshold(mut self, threshold: f64) -> Self {
        self.options.word_alternatives_threshold = Some(threshold);
        self
    }

    pub fn processing_metrics(mut self, interval_secs: Option<f64>) -> Self {
        self.options.processing_metrics = true;
        self.options.processing_metrics_interval = interval_secs;
        self
    }

    pub fn audio_metrics(mut self, enabled: bool) -> Self {
        self.options.audio_metrics = enabled;
        self
    }

    pub fn end_of_phrase_silence_time(mut self, seconds: f64) -> Self {
        self.options.end_of_phrase_silence_time = Some(seconds);
        self
    }

    pub fn split_transcript_at_phrase_end(mut self, enabled: bool) -> Self {
        self.options.split_transcript_at_phrase_end = enabled;
        self
    }

    pub fn speech_detector_sensitivity(mut self, value: f64) -> Self {
        self.options.speech_detector_sensitivity = Some(value);
        self
    }

    pub fn background_audio_suppression(mut self, value: f64) -> Self {
        self.options.background_audio_suppression = Some(value);
        self
    }

    pub fn low_latency(mut self, enabled: bool) -> Self {
        self.options.low_latency = Some(enabled);
        self
    }

    pub fn build(self) -> StreamResult<SessionOptions> {
        let o = &self.options;

        if o.content_type.trim().is_empty() {
            return Err(invalid("content_type is required"));
        }
        if o.max_alternatives < 1 {
            return Err(invalid("max_alternatives must be at least 1"));
        }
        if o.inactivity_timeout < -1 {
            return Err(invalid("inactivity_timeout must be -1 (disabled) or a non-negative number of seconds"));
        }
        match (o.keywords.is_empty(), o.keywords_threshold) {
            (false, Some(threshold)) => check_unit("keywords_threshold", threshold)?,
            (false, None) => return Err(invalid("keywords require keywords_threshold")),
            (true, Some(_)) => return Err(invalid("keywords_threshold requires at least one keyword")),
            (true, None) => {}
        }
        if o.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(invalid("keywords must not be empty strings"));
        }
        if let Some(value) = o.word_alternatives_threshold {
            check_unit("word_alternatives_threshold", value)?;
        }
        if let Some(value) = o.customization_weight {
            check_unit("customization_weight", value)?;
            if o.language_customization_id.is_none() {
                return Err(invalid("customization_weight requires language_customization_id"));
            }
        }
        if let Some(value) = o.speech_detector_sensitivity {
            check_unit("speech_detector_sensitivity", value)?;
        }
        if let Some(value) = o.background_audio_suppression {
            check_unit("background_audio_suppression", value)?;
        }
        if let Some(value) = o.end_of_phrase_silence_time
            && !(0.0..=120.0).contains(&value)
        {
            return Err(invalid("end_of_phrase_silence_time must be between 0.0 and 120.0 seconds"));
        }
        if let Some(value) = o.processing_metrics_interval
            && value <= 0.0
        {
            return Err(invalid("processing_metrics_interval must be positive"));
        }

        Ok(self.options)
    }
}

fn invalid(message: &str) -> StreamError {
    StreamError::ConfigurationError(message.to_string())
}

fn check_unit(name: &str, value: f64) -> StreamResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(StreamError::ConfigurationError(format!(
            "{name} must be between 0.0 and 1.0, got {value}"
        )))
    }
}
