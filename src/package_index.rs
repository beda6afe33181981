use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::error::AnyVideoError;
use crate::fetch::{DOWNLOAD_TIMEOUT, download_to_file, map_reqwest_error};

pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageIndex {
    #[serde(default)]
    pub info: PackageInfo,
    #[serde(default)]
    pub urls: Vec<Distributable>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageInfo {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Distributable {
    #[serde(default)]
    pub filename: String,
    pub url: String,
}

impl PackageIndex {
    /// First distributable whose filename ends with `suffix`.
    pub fn select_distributable(&self, suffix: &str) -> Option<&Distributable> {
        self.urls.iter().find(|dist| dist.filename.ends_with(suffix))
    }
}

pub trait PackageIndexClient: Send + Sync {
    fn fetch_index(&self, url: &str) -> Result<PackageIndex, AnyVideoError>;
    fn download(&self, url: &str, destination: &Path) -> Result<(), AnyVideoError>;
}

#[derive(Clone)]
pub struct PackageIndexHttpClient {
    metadata: Client,
    downloads: Client,
}

impl PackageIndexHttpClient {
    pub fn new() -> Result<Self, AnyVideoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("anyvideo/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AnyVideoError::PackageIndex(err.to_string()))?,
        );
        let metadata = Client::builder()
            .default_headers(headers.clone())
            .timeout(METADATA_TIMEOUT)
            .build()
            .map_err(|err| AnyVideoError::PackageIndex(err.to_string()))?;
        let downloads = Client::builder()
            .default_headers(headers)
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|err| AnyVideoError::PackageIndex(err.to_string()))?;
        Ok(Self {
            metadata,
            downloads,
        })
    }
}

impl PackageIndexClient for PackageIndexHttpClient {
    fn fetch_index(&self, url: &str) -> Result<PackageIndex, AnyVideoError> {
        let response = self.metadata.get(url).send().map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            return Err(AnyVideoError::PackageIndex(format!(
                "{url} returned status {}",
                response.status().as_u16()
            )));
        }
        response
            .json::<PackageIndex>()
            .map_err(|err| AnyVideoError::PackageIndex(err.to_string()))
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), AnyVideoError> {
        download_to_file(&self.downloads, url, destination)
    }
}
