use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::domain::VideoUrl;
use crate::error::AnyVideoError;
use crate::process::{run_with_timeout, stderr_summary};

pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);

/// Metadata returned by the extraction tool for one URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

/// Stream format as reported by the extraction tool. Every field but the id
/// may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub filesize: Option<f64>,
    #[serde(default)]
    pub filesize_approx: Option<f64>,
    #[serde(default)]
    pub ext: Option<String>,
}

/// Black-box metadata extraction. Failures come back as values.
pub trait MediaExtractor: Send + Sync {
    fn try_extract_info(&self, url: &VideoUrl) -> Result<MediaInfo, AnyVideoError>;
}

/// Runs the primary binary in JSON dump mode.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: PathBuf,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            timeout: EXTRACT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl MediaExtractor for YtDlpExtractor {
    fn try_extract_info(&self, url: &VideoUrl) -> Result<MediaInfo, AnyVideoError> {
        debug!(url = %url, "extracting media info");
        let output = run_with_timeout(
            Command::new(&self.binary)
                .arg("-J")
                .arg("--no-warnings")
                .arg("--no-playlist")
                .arg(url.as_str()),
            self.timeout,
        )
        .map_err(|err| match err {
            AnyVideoError::Process(reason) => AnyVideoError::MediaExtraction(reason),
            other => other,
        })?;
        if !output.status.success() {
            return Err(AnyVideoError::MediaExtraction(stderr_summary(
                &output, "yt-dlp",
            )));
        }
        serde_json::from_slice::<MediaInfo>(&output.stdout)
            .map_err(|err| AnyVideoError::MediaExtraction(format!("unreadable metadata: {err}")))
    }
}
