use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional so a file may set only what it needs; anything it
/// leaves out falls back to the environment, then to defaults.
///
/// # Example YAML structure
/// ```yaml
/// service:
///   region: "eu-de"
///   instance_id: "0123-abcd"
///   stt_url: "https://api.eu-de.speech-to-text.watson.cloud.ibm.com/instances/0123-abcd"
///   tts_url: "https://api.eu-de.text-to-speech.watson.cloud.ibm.com/instances/0123-abcd"
///
/// auth:
///   type: "iam"            # iam | bearer | basic | none
///   api_key: "your-api-key"
///   iam_url: "https://iam.cloud.ibm.com/identity/token"
///
/// streaming:
///   connect_timeout_seconds: 30
///   chunk_size: 2000
///   chunk_interval_ms: 10
///   learning_opt_out: true
///   headers:
///     X-Request-Source: "batch"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub service: Option<ServiceYaml>,
    pub auth: Option<AuthYaml>,
    pub streaming: Option<StreamingYaml>,
}

/// Service location from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServiceYaml {
    pub region: Option<String>,
    pub instance_id: Option<String>,
    pub stt_url: Option<String>,
    pub tts_url: Option<String>,
}

/// Credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    #[serde(rename = "type")]
    pub auth_type: Option<String>,
    pub api_key: Option<String>,
    pub iam_url: Option<String>,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Streaming behaviour from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StreamingYaml {
    pub connect_timeout_seconds: Option<u64>,
    pub chunk_size: Option<usize>,
    pub chunk_interval_ms: Option<u64>,
    pub learning_opt_out: Option<bool>,
    pub headers: Option<BTreeMap<String, String>>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }
}
