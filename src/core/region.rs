//! IBM Cloud regions hosting the speech services.

use serde::{Deserialize, Serialize};

use super::error::StreamError;

/// IBM Watson speech service regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IbmRegion {
    /// Dallas, Texas (US South)
    #[default]
    UsSouth,
    /// Washington, D.C. (US East)
    UsEast,
    /// Frankfurt, Germany (EU Central)
    EuDe,
    /// London, UK (EU GB)
    EuGb,
    /// Sydney, Australia (AU SYD)
    AuSyd,
    /// Tokyo, Japan (JP TOK)
    JpTok,
    /// Seoul, South Korea (KR SEO)
    KrSeo,
}

impl IbmRegion {
    pub const ALL: [IbmRegion; 7] = [
        Self::UsSouth,
        Self::UsEast,
        Self::EuDe,
        Self::EuGb,
        Self::AuSyd,
        Self::JpTok,
        Self::KrSeo,
    ];

    /// Get the Speech-to-Text API hostname for this region.
    pub fn stt_hostname(&self) -> String {
        format!("api.{}.speech-to-text.watson.cloud.ibm.com", self.as_str())
    }

    /// Get the Text-to-Speech API hostname for this region.
    pub fn tts_hostname(&self) -> String {
        format!("api.{}.text-to-speech.watson.cloud.ibm.com", self.as_str())
    }

    /// Get the region code string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsSouth => "us-south",
            Self::UsEast => "us-east",
            Self::EuDe => "eu-de",
            Self::EuGb => "eu-gb",
            Self::AuSyd => "au-syd",
            Self::JpTok => "jp-tok",
            Self::KrSeo => "kr-seo",
        }
    }
}

impl std::fmt::Display for IbmRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IbmRegion {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|region| region.as_str() == normalized)
            .ok_or_else(|| {
                StreamError::ConfigurationError(format!(
                    "Unsupported region: {s}. Supported regions: us-south, us-east, eu-de, eu-gb, au-syd, jp-tok, kr-seo"
                ))
            })
    }
}
