use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AnyVideoError;

const URL_PATTERN: &str = r"^((http|https)://)(www.)?[a-zA-Z0-9@:%._\+~#?&/=]{1,256}\.[a-z]{2,6}\b([-a-zA-Z0-9@:%._\+~#?&/=]*)";

pub const AUDIO_ONLY: &str = "audio only";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoUrl(String);

impl VideoUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VideoUrl {
    type Err = AnyVideoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let pattern =
            Regex::new(URL_PATTERN).map_err(|err| AnyVideoError::InvalidUrl(err.to_string()))?;
        if !pattern.is_match(trimmed) {
            return Err(AnyVideoError::InvalidUrl(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Parsed `resolution` field of a stream format.
///
/// Audio-only streams order below every video resolution; video resolutions
/// compare by `(width, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Resolution {
    AudioOnly,
    Video { width: u32, height: u32 },
}

impl Resolution {
    pub fn is_audio_only(&self) -> bool {
        matches!(self, Resolution::AudioOnly)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::AudioOnly => write!(f, "{AUDIO_ONLY}"),
            Resolution::Video { width, height } => write!(f, "{width}x{height}"),
        }
    }
}

impl FromStr for Resolution {
    type Err = AnyVideoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed == AUDIO_ONLY {
            return Ok(Resolution::AudioOnly);
        }
        let (width, height) = trimmed
            .split_once('x')
            .ok_or_else(|| AnyVideoError::InvalidResolution(value.to_string()))?;
        let width = width
            .parse::<u32>()
            .map_err(|_| AnyVideoError::InvalidResolution(value.to_string()))?;
        let height = height
            .parse::<u32>()
            .map_err(|_| AnyVideoError::InvalidResolution(value.to_string()))?;
        Ok(Resolution::Video { width, height })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Resolution,
    #[value(name = "filesize")]
    FileSize,
    Bitrate,
    Fps,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Resolution => write!(f, "resolution"),
            SortKey::FileSize => write!(f, "filesize"),
            SortKey::Bitrate => write!(f, "bitrate"),
            SortKey::Fps => write!(f, "fps"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    ArchiveBundle,
    ExtractedBinaryPair,
    SelfUpdatingBinary,
    VersionedLibrary,
}

/// Non-failure reasons that accompany an ok outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    SetupInProgress,
    ExtractionPending,
    AlreadyReady,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SetupInProgress => write!(f, "setup in progress"),
            Notice::ExtractionPending => write!(f, "archive valid, extraction pending"),
            Notice::AlreadyReady => write!(f, "already ready"),
        }
    }
}

/// Result of a provisioning step. Steps never fail across the component
/// boundary; they report through this value instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    Ready,
    ReadyWith(Notice),
    Failed(AnyVideoError),
}

impl ProvisioningOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, ProvisioningOutcome::Failed(_))
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            ProvisioningOutcome::Ready => None,
            ProvisioningOutcome::ReadyWith(notice) => Some(notice.to_string()),
            ProvisioningOutcome::Failed(err) => Some(err.to_string()),
        }
    }

    pub fn error(&self) -> Option<&AnyVideoError> {
        match self {
            ProvisioningOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<Result<(), AnyVideoError>> for ProvisioningOutcome {
    fn from(value: Result<(), AnyVideoError>) -> Self {
        match value {
            Ok(()) => ProvisioningOutcome::Ready,
            Err(err) => ProvisioningOutcome::Failed(err),
        }
    }
}
