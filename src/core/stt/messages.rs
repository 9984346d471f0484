//! Inbound message types of the recognize websocket.
//!
//! Every text frame is a JSON object. The shape is detected from the keys it
//! carries: `error`, `state`, `results`/`speaker_labels`, or one of the
//! metrics keys. Anything else is a protocol violation.

use serde::{Deserialize, Serialize};

use crate::core::error::{StreamError, StreamResult};

// =============================================================================
// Main Response Types
// =============================================================================

/// A classified frame from the recognize service.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizeMessage {
    /// `{"state": "listening"}` and friends.
    State(String),
    /// Interim or final hypotheses and/or speaker labels.
    Results(TranscriptEvent),
    /// Error reported by the service.
    Error(ErrorMessage),
    /// Processing or audio metrics, passed through untouched.
    Metrics(serde_json::Value),
}

/// Union of all keys the service may send; used only for classification.
#[derive(Debug, Default, Deserialize)]
struct RawFrame {
    state: Option<String>,
    error: Option<String>,
    code: Option<i32>,
    #[serde(default)]
    warnings: Option<Vec<String>>,
    results: Option<Vec<RecognitionResult>>,
    #[serde(default)]
    result_index: i32,
    speaker_labels: Option<Vec<SpeakerLabel>>,
    processing_metrics: Option<serde_json::Value>,
    audio_metrics: Option<serde_json::Value>,
}

impl RecognizeMessage {
    /// Parse and classify a text frame.
    pub fn parse(text: &str) -> StreamResult<Self> {
        let raw: RawFrame = serde_json::from_str(text).map_err(|e| {
            StreamError::ProtocolError(format!("Malformed recognize frame: {e}"))
        })?;

        if let Some(error) = raw.error {
            return Ok(Self::Error(ErrorMessage {
                error,
                code: raw.code,
                warnings: raw.warnings,
            }));
        }
        if let Some(state) = raw.state {
            return Ok(Self::State(state));
        }
        if raw.results.is_some() || raw.speaker_labels.is_some() {
            return Ok(Self::Results(TranscriptEvent {
                results: raw.results.unwrap_or_default(),
                result_index: raw.result_index,
                speaker_labels: raw.speaker_labels.unwrap_or_default(),
                warnings: raw.warnings.unwrap_or_default(),
            }));
        }
        if let Some(metrics) = raw.processing_metrics.or(raw.audio_metrics) {
            return Ok(Self::Metrics(metrics));
        }

        Err(StreamError::ProtocolError(format!(
            "Unrecognized recognize frame: {}",
            truncate(text, 200)
        )))
    }

    pub fn is_listening(&self) -> bool {
        matches!(self, Self::State(state) if state == "listening")
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// =============================================================================
// Recognition Results
// =============================================================================

/// One results frame, delivered to `on_transcript`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    #[serde(default)]
    pub results: Vec<RecognitionResult>,
    /// Index of the first result in the overall session.
    #[serde(default)]
    pub result_index: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub speaker_labels: Vec<SpeakerLabel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TranscriptEvent {
    /// True when every result in the frame is final.
    pub fn is_final(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.is_final)
    }

    /// Best transcript of each final result, trimmed.
    pub fn final_transcripts(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|r| r.is_final)
            .filter_map(|r| r.best())
            .map(|alt| alt.transcript.trim())
    }
}

/// Single recognition result within a results message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Whether this is a final result (not subject to change).
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Alternative transcription hypotheses, best first.
    pub alternatives: Vec<TranscriptionAlternative>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords_result: Option<serde_json::Value>,
    /// Word alternatives (confusion networks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_alternatives: Option<Vec<WordAlternatives>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_of_utterance: Option<String>,
}

impl RecognitionResult {
    pub fn best(&self) -> Option<&TranscriptionAlternative> {
        self.alternatives.first()
    }

    /// Get word-level timing information.
    pub fn word_timestamps(&self) -> Vec<WordTimestamp> {
        self.best()
            .and_then(|alt| alt.timestamps.clone())
            .unwrap_or_default()
    }
}

/// Transcription alternative (hypothesis).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionAlternative {
    pub transcript: String,
    /// Confidence score (0.0 to 1.0); only present on final results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Word-level timestamps: [[word, start_time, end_time], ...]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<WordTimestamp>>,
    /// Word-level confidence scores: [[word, confidence], ...]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_confidence: Option<Vec<WordConfidence>>,
}

/// Word-level timestamp [word, start_time, end_time].
pub type WordTimestamp = (String, f64, f64);

/// Word-level confidence [word, confidence].
pub type WordConfidence = (String, f64);

/// Word alternatives (confusion network entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordAlternatives {
    pub start_time: f64,
    pub end_time: f64,
    pub alternatives: Vec<WordAlternative>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordAlternative {
    pub confidence: f64,
    pub word: String,
}

// =============================================================================
// Speaker Labels
// =============================================================================

/// Individual speaker label entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerLabel {
    /// Start time of the segment in seconds.
    pub from: f64,
    /// End time of the segment in seconds.
    pub to: f64,
    /// Speaker identifier (0, 1, 2, ...).
    pub speaker: i32,
    pub confidence: f64,
    #[serde(rename = "final")]
    pub is_final: bool,
}

// =============================================================================
// Error Messages
// =============================================================================

/// Error message from the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

impl ErrorMessage {
    /// Check if this is an inactivity timeout error.
    pub fn is_inactivity_timeout(&self) -> bool {
        let lowered = self.error.to_lowercase();
        lowered.contains("inactivity") || lowered.contains("no speech") || self.code == Some(408)
    }

    /// Convert into the error handed to callbacks.
    pub fn to_stream_error(&self) -> StreamError {
        if self.is_inactivity_timeout() {
            StreamError::InactivityTimeout(self.error.clone())
        } else {
            StreamError::ProviderError(self.error.clone())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listening_message() {
        let msg = RecognizeMessage::parse(r#"{"state": "listening"}"#).unwrap();
        assert!(msg.is_listening());
    }

    #[test]
    fn test_parse_final_results() {
        let json = r#"{
            "result_index": 0,
            "results": [{
                "final": true,
                "alternatives": [
                    {"transcript": "hello world ", "confidence": 0.94},
                    {"transcript": "hello word "}
                ]
            }]
        }"#;
        let RecognizeMessage::Results(event) = RecognizeMessage::parse(json).unwrap() else {
            panic!("expected results");
        };
        assert!(event.is_final());
        assert_eq!(event.final_transcripts().collect::<Vec<_>>(), vec!["hello world"]);
        assert_eq!(event.results[0].best().unwrap().confidence, Some(0.94));
    }

    #[test]
    fn test_interim_results_have_no_final_transcripts() {
        let json = r#"{"result_index": 1, "results": [{"final": false, "alternatives": [{"transcript": "hel"}]}]}"#;
        let RecognizeMessage::Results(event) = RecognizeMessage::parse(json).unwrap() else {
            panic!("expected results");
        };
        assert!(!event.is_final());
        assert_eq!(event.final_transcripts().count(), 0);
        assert_eq!(event.result_index, 1);
    }

    #[test]
    fn test_parse_timestamps() {
        let json = r#"{"results": [{"final": true, "alternatives": [{
            "transcript": "hi there",
            "timestamps": [["hi", 0.1, 0.3], ["there", 0.3, 0.7]]
        }]}]}"#;
        let RecognizeMessage::Results(event) = RecognizeMessage::parse(json).unwrap() else {
            panic!("expected results");
        };
        let stamps = event.results[0].word_timestamps();
        assert_eq!(stamps.len(), 2);
        assert_eq!(stamps[1], ("there".to_string(), 0.3, 0.7));
    }

    #[test]
    fn test_parse_speaker_labels_only() {
        let json = r#"{"speaker_labels": [{"from": 0.1, "to": 0.5, "speaker": 1, "confidence": 0.8, "final": true}]}"#;
        let RecognizeMessage::Results(event) = RecognizeMessage::parse(json).unwrap() else {
            panic!("expected results");
        };
        assert!(event.results.is_empty());
        assert_eq!(event.speaker_labels[0].speaker, 1);
    }

    #[test]
    fn test_parse_error_and_inactivity() {
        let RecognizeMessage::Error(err) =
            RecognizeMessage::parse(r#"{"error": "Session timed out due to inactivity after 30 seconds."}"#)
                .unwrap()
        else {
            panic!("expected error");
        };
        assert!(err.is_inactivity_timeout());
        assert!(matches!(err.to_stream_error(), StreamError::InactivityTimeout(_)));

        let RecognizeMessage::Error(err) =
            RecognizeMessage::parse(r#"{"error": "unable to transcode data stream", "code": 400}"#).unwrap()
        else {
            panic!("expected error");
        };
        assert!(!err.is_inactivity_timeout());
        assert!(matches!(err.to_stream_error(), StreamError::ProviderError(_)));
    }

    #[test]
    fn test_parse_metrics() {
        let msg = RecognizeMessage::parse(r#"{"processing_metrics": {"wall_clock_since_first_byte_received": 1.2}}"#).unwrap();
        assert!(matches!(msg, RecognizeMessage::Metrics(_)));
    }

    #[test]
    fn test_malformed_and_unknown_frames_are_protocol_errors() {
        assert!(matches!(
            RecognizeMessage::parse("not json"),
            Err(StreamError::ProtocolError(_))
        ));
        assert!(matches!(
            RecognizeMessage::parse(r#"{"surprise": 1}"#),
            Err(StreamError::ProtocolError(_))
        ));
    }
}
