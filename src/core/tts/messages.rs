//! Text frames of the synthesize websocket.
//!
//! Audio arrives as binary frames; text frames carry the negotiated content
//! type, word/mark timings, warnings and errors.

use serde::{Deserialize, Serialize};

use crate::core::error::{StreamError, StreamResult};
use crate::core::stt::messages::ErrorMessage;

/// A classified text frame from the synthesize service.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesizeMessage {
    /// `{"binary_streams": [{"content_type": "audio/ogg;codecs=opus"}]}`
    ContentType(String),
    Timings(TimingInfo),
    Warnings(String),
    Error(ErrorMessage),
}

/// Word or mark timings for the audio streamed so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    /// `[word, start_time, end_time]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<(String, f64, f64)>,
    /// `[mark, time]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<(String, f64)>,
}

#[derive(Debug, Deserialize)]
struct BinaryStream {
    content_type: String,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    binary_streams: Option<Vec<BinaryStream>>,
    words: Option<Vec<(String, f64, f64)>>,
    marks: Option<Vec<(String, f64)>>,
    warnings: Option<serde_json::Value>,
    error: Option<String>,
    code: Option<i32>,
}

impl SynthesizeMessage {
    pub fn parse(text: &str) -> StreamResult<Self> {
        let raw: RawFrame = serde_json::from_str(text).map_err(|e| {
            StreamError::ProtocolError(format!("Malformed synthesize frame: {e}"))
        })?;

        if let Some(error) = raw.error {
            return Ok(Self::Error(ErrorMessage {
                error,
                code: raw.code,
                warnings: None,
            }));
        }
        if let Some(streams) = raw.binary_streams {
            let content_type = streams
                .into_iter()
                .next()
                .map(|s| s.content_type)
                .ok_or_else(|| StreamError::ProtocolError("Empty binary_streams frame".to_string()))?;
            return Ok(Self::ContentType(content_type));
        }
        if raw.words.is_some() || raw.marks.is_some() {
            return Ok(Self::Timings(TimingInfo {
                words: raw.words.unwrap_or_default(),
                marks: raw.marks.unwrap_or_default(),
            }));
        }
        if let Some(warnings) = raw.warnings {
            let text = match warnings {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            return Ok(Self::Warnings(text));
        }

        Err(StreamError::ProtocolError(
            "Unrecognized synthesize frame".to_string(),
        ))
    }
}
