//! Client configuration.
//!
//! Configuration is layered. Environment variables (including a `.env` file
//! loaded at startup) form the base; a YAML file may override any value.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `WATSON_REGION` | Region code, e.g. `us-south` |
//! | `WATSON_INSTANCE_ID` | Service instance id |
//! | `WATSON_STT_URL` / `WATSON_TTS_URL` | Full service URL, overrides region + instance |
//! | `WATSON_AUTH_TYPE` | `iam`, `bearer`, `basic` or `none` (inferred when unset) |
//! | `WATSON_API_KEY`, `WATSON_IAM_URL` | IAM credentials |
//! | `WATSON_BEARER_TOKEN` | Pre-issued token |
//! | `WATSON_USERNAME`, `WATSON_PASSWORD` | Basic credentials |
//! | `WATSON_CONNECT_TIMEOUT_SECONDS` | Handshake timeout |
//! | `WATSON_CHUNK_SIZE` | Bytes per outbound audio frame |
//! | `WATSON_CHUNK_INTERVAL_MS` | Delay between outbound audio frames |
//! | `WATSON_LEARNING_OPT_OUT` | Send `X-Watson-Learning-Opt-Out: true` |

pub mod yaml;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::core::auth::{AuthConfig, IBM_IAM_URL};
use crate::core::error::{StreamError, StreamResult};
use crate::core::region::IbmRegion;
use crate::core::transport::LEARNING_OPT_OUT_HEADER;
use yaml::{AuthYaml, ServiceYaml, StreamingYaml, YamlConfig};

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bytes per outbound audio frame.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// Default delay between outbound audio frames.
pub const DEFAULT_CHUNK_INTERVAL: Duration = Duration::from_millis(10);

/// Largest accepted chunk size.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse YAML config: {0}")]
    YamlParse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("Missing configuration: {0}")]
    Missing(String),
}

impl From<ConfigError> for StreamError {
    fn from(err: ConfigError) -> Self {
        StreamError::ConfigurationError(err.to_string())
    }
}

/// Everything a client needs to open sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub region: IbmRegion,
    pub instance_id: Option<String>,
    /// Overrides `region` + `instance_id` for speech-to-text.
    pub stt_url: Option<String>,
    /// Overrides `region` + `instance_id` for text-to-speech.
    pub tts_url: Option<String>,
    pub auth: AuthConfig,
    pub connect_timeout: Duration,
    pub chunk_size: usize,
    pub chunk_interval: Duration,
    pub learning_opt_out: bool,
    /// Extra headers sent with every upgrade request.
    pub headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: IbmRegion::default(),
            instance_id: None,
            stt_url: None,
            tts_url: None,
            auth: AuthConfig::None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_interval: DEFAULT_CHUNK_INTERVAL,
            learning_opt_out: false,
            headers: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Note: the `.env` file is loaded in `main.rs` at startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = resolve(env_layer(&lookup)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables
    /// 3. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_file_with_lookup(path, |key| std::env::var(key).ok())
    }

    pub fn from_file_with_lookup<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = resolve(overlay(env_layer(&lookup)?, yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(invalid(
                "chunk_size",
                format!("must be between 1 and {MAX_CHUNK_SIZE}, got {}", self.chunk_size),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect_timeout", "must be positive".to_string()));
        }
        for (key, url) in [("stt_url", &self.stt_url), ("tts_url", &self.tts_url)] {
            if let Some(url) = url {
                url::Url::parse(url).map_err(|e| invalid(key, format!("'{url}': {e}")))?;
            }
        }
        if let Some(id) = &self.instance_id
            && id.trim().is_empty()
        {
            return Err(invalid("instance_id", "must not be empty".to_string()));
        }
        self.auth
            .validate()
            .map_err(|e| invalid("auth", e.to_string()))?;
        Ok(())
    }

    /// Base websocket URL of the speech-to-text instance.
    pub fn stt_base_url(&self) -> StreamResult<String> {
        self.base_url(self.stt_url.as_deref(), self.region.stt_hostname(), "stt_url")
    }

    /// Base websocket URL of the text-to-speech instance.
    pub fn tts_base_url(&self) -> StreamResult<String> {
        self.base_url(self.tts_url.as_deref(), self.region.tts_hostname(), "tts_url")
    }

    fn base_url(&self, explicit: Option<&str>, host: String, key: &str) -> StreamResult<String> {
        if let Some(url) = explicit {
            return Ok(url.to_string());
        }
        match &self.instance_id {
            Some(id) => Ok(format!("wss://{host}/instances/{id}")),
            None => Err(StreamError::ConfigurationError(format!(
                "Either {key} or instance_id must be configured"
            ))),
        }
    }

    /// Headers attached to every upgrade request.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if self.learning_opt_out {
            headers.push((LEARNING_OPT_OUT_HEADER.to_string(), "true".to_string()));
        }
        headers
    }
}

// =============================================================================
// Layering
// =============================================================================

fn invalid(key: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason,
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, format!("'{raw}': {e}"))),
        _ => Ok(None),
    }
}

fn parse_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(invalid(key, format!("'{v}' is not a boolean"))),
        },
    }
}

/// Environment variables expressed in the YAML shape so both layers merge uniformly.
fn env_layer<F>(lookup: &F) -> Result<YamlConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    Ok(YamlConfig {
        service: Some(ServiceYaml {
            region: get("WATSON_REGION"),
            instance_id: get("WATSON_INSTANCE_ID"),
            stt_url: get("WATSON_STT_URL"),
            tts_url: get("WATSON_TTS_URL"),
        }),
        auth: Some(AuthYaml {
            auth_type: get("WATSON_AUTH_TYPE"),
            api_key: get("WATSON_API_KEY"),
            iam_url: get("WATSON_IAM_URL"),
            token: get("WATSON_BEARER_TOKEN"),
            username: get("WATSON_USERNAME"),
            password: get("WATSON_PASSWORD"),
        }),
        streaming: Some(StreamingYaml {
            connect_timeout_seconds: parse_var(lookup, "WATSON_CONNECT_TIMEOUT_SECONDS")?,
            chunk_size: parse_var(lookup, "WATSON_CHUNK_SIZE")?,
            chunk_interval_ms: parse_var(lookup, "WATSON_CHUNK_INTERVAL_MS")?,
            learning_opt_out: parse_bool(lookup, "WATSON_LEARNING_OPT_OUT")?,
            headers: None,
        }),
    })
}

/// Field-wise overlay; values present in `top` win.
fn overlay(base: YamlConfig, top: YamlConfig) -> YamlConfig {
    let service = match (base.service, top.service) {
        (Some(b), Some(t)) => Some(ServiceYaml {
            region: t.region.or(b.region),
            instance_id: t.instance_id.or(b.instance_id),
            stt_url: t.stt_url.or(b.stt_url),
            tts_url: t.tts_url.or(b.tts_url),
        }),
        (b, t) => t.or(b),
    };
    let auth = match (base.auth, top.auth) {
        // An explicit scheme in the file replaces the environment's credentials wholesale
        (Some(_), Some(t)) if t.auth_type.is_some() => Some(t),
        (Some(b), Some(t)) => Some(AuthYaml {
            auth_type: b.auth_type,
            api_key: t.api_key.or(b.api_key),
            iam_url: t.iam_url.or(b.iam_url),
            token: t.token.or(b.token),
            username: t.username.or(b.username),
            password: t.password.or(b.password),
        }),
        (b, t) => t.or(b),
    };
    let streaming = match (base.streaming, top.streaming) {
        (Some(b), Some(t)) => Some(StreamingYaml {
            connect_timeout_seconds: t.connect_timeout_seconds.or(b.connect_timeout_seconds),
            chunk_size: t.chunk_size.or(b.chunk_size),
            chunk_interval_ms: t.chunk_interval_ms.or(b.chunk_interval_ms),
            learning_opt_out: t.learning_opt_out.or(b.learning_opt_out),
            headers: t.headers.or(b.headers),
        }),
        (b, t) => t.or(b),
    };
    YamlConfig {
        service,
        auth,
        streaming,
    }
}

fn resolve(layer: YamlConfig) -> Result<ClientConfig, ConfigError> {
    let service = layer.service.unwrap_or_default();
    let streaming = layer.streaming.unwrap_or_default();
    let defaults = ClientConfig::default();

    let region = match service.region {
        Some(code) => IbmRegion::from_str(&code).map_err(|e| invalid("region", e.to_string()))?,
        None => defaults.region,
    };

    Ok(ClientConfig {
        region,
        instance_id: service.instance_id,
        stt_url: service.stt_url,
        tts_url: service.tts_url,
        auth: resolve_auth(layer.auth.unwrap_or_default())?,
        connect_timeout: streaming
            .connect_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout),
        chunk_size: streaming.chunk_size.unwrap_or(defaults.chunk_size),
        chunk_interval: streaming
            .chunk_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.chunk_interval),
        learning_opt_out: streaming.learning_opt_out.unwrap_or(defaults.learning_opt_out),
        headers: streaming
            .headers
            .map(|h| h.into_iter().collect())
            .unwrap_or_default(),
    })
}

fn resolve_auth(auth: AuthYaml) -> Result<AuthConfig, ConfigError> {
    let scheme = match auth.auth_type.as_deref().map(str::to_lowercase) {
        Some(scheme) => scheme,
        None if auth.api_key.is_some() => "iam".to_string(),
        None if auth.token.is_some() => "bearer".to_string(),
        None if auth.username.is_some() => "basic".to_string(),
        None => "none".to_string(),
    };

    match scheme.as_str() {
        "iam" => Ok(AuthConfig::Iam {
            api_key: auth
                .api_key
                .ok_or_else(|| ConfigError::Missing("api_key for iam authentication".to_string()))?,
            iam_url: auth.iam_url.unwrap_or_else(|| IBM_IAM_URL.to_string()),
        }),
        "bearer" => Ok(AuthConfig::Bearer {
            token: auth
                .token
                .ok_or_else(|| ConfigError::Missing("token for bearer authentication".to_string()))?,
        }),
        "basic" => Ok(AuthConfig::Basic {
            username: auth
                .username
                .ok_or_else(|| ConfigError::Missing("username for basic authentication".to_string()))?,
            password: auth.password.unwrap_or_default(),
        }),
        "none" => Ok(AuthConfig::None),
        other => Err(invalid(
            "auth type",
            format!("'{other}' is not one of iam, bearer, basic, none"),
        )),
    }
}
