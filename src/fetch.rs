use std::fs::{self, File};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{info, warn};

use crate::domain::ProvisioningOutcome;
use crate::error::AnyVideoError;

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// One way of copying a remote file to a local path.
pub trait ArchiveTransport: Send + Sync {
    fn name(&self) -> &'static str;
    fn download(&self, url: &str, destination: &Path) -> Result<(), AnyVideoError>;
}

pub trait ArchiveFetcher: Send + Sync {
    fn fetch(&self, url: &str, destination: &Path) -> ProvisioningOutcome;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, AnyVideoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("anyvideo/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AnyVideoError::Network(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| AnyVideoError::Network(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl ArchiveTransport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), AnyVideoError> {
        download_to_file(&self.client, url, destination)
    }
}

/// Streams `url` into `destination` through a sibling `.part` file so a
/// concurrent reader never sees a half-written archive under the final name.
pub fn download_to_file(client: &Client, url: &str, destination: &Path) -> Result<(), AnyVideoError> {
    let mut response = client.get(url).send().map_err(map_reqwest_error)?;
    if !response.status().is_success() {
        return Err(AnyVideoError::Network(format!(
            "{url} returned status {}",
            response.status().as_u16()
        )));
    }

    let partial = destination.with_extension("part");
    if let Some(parent) = partial.parent() {
        fs::create_dir_all(parent).map_err(|err| AnyVideoError::Filesystem(err.to_string()))?;
    }
    let mut file = File::create(&partial).map_err(|err| AnyVideoError::Filesystem(err.to_string()))?;
    if let Err(err) = std::io::copy(&mut response, &mut file) {
        drop(file);
        let _ = fs::remove_file(&partial);
        return Err(AnyVideoError::Network(err.to_string()));
    }
    drop(file);
    fs::rename(&partial, destination).map_err(|err| AnyVideoError::Filesystem(err.to_string()))
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> AnyVideoError {
    if err.is_timeout() {
        AnyVideoError::OperationTimeout(err.to_string())
    } else {
        AnyVideoError::Network(err.to_string())
    }
}

/// Fallback transport that shells out to `curl`.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    timeout: Duration,
}

impl CurlTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ArchiveTransport for CurlTransport {
    fn name(&self) -> &'static str {
        "curl"
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), AnyVideoError> {
        let partial = destination.with_extension("part");
        let output = Command::new("curl")
            .arg("--location")
            .arg("--fail")
            .arg("--silent")
            .arg("--show-error")
            .arg("--max-time")
            .arg(self.timeout.as_secs().to_string())
            .arg("--output")
            .arg(&partial)
            .arg(url)
            .output()
            .map_err(|err| AnyVideoError::Network(format!("curl: {err}")))?;
        if !output.status.success() {
            let _ = fs::remove_file(&partial);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(if output.status.code() == Some(28) {
                AnyVideoError::OperationTimeout(format!("curl: {stderr}"))
            } else {
                AnyVideoError::Network(format!("curl: {stderr}"))
            });
        }
        fs::rename(&partial, destination).map_err(|err| AnyVideoError::Filesystem(err.to_string()))
    }
}

/// Tries the primary transport once, then the fallback once.
pub struct FallbackFetcher {
    primary: Box<dyn ArchiveTransport>,
    fallback: Box<dyn ArchiveTransport>,
}

impl FallbackFetcher {
    pub fn new(primary: Box<dyn ArchiveTransport>, fallback: Box<dyn ArchiveTransport>) -> Self {
        Self { primary, fallback }
    }

    pub fn standard() -> Result<Self, AnyVideoError> {
        Ok(Self::new(
            Box::new(HttpTransport::new(DOWNLOAD_TIMEOUT)?),
            Box::new(CurlTransport::new(DOWNLOAD_TIMEOUT)),
        ))
    }
}

impl ArchiveFetcher for FallbackFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> ProvisioningOutcome {
        let primary_err = match self.primary.download(url, destination) {
            Ok(()) => {
                info!(transport = self.primary.name(), path = %destination.display(), "archive fetched");
                return ProvisioningOutcome::Ready;
            }
            Err(err) => err,
        };
        warn!(
            transport = self.primary.name(),
            error = %primary_err,
            "primary transport failed, trying {}",
            self.fallback.name()
        );
        match self.fallback.download(url, destination) {
            Ok(()) => {
                info!(transport = self.fallback.name(), path = %destination.display(), "archive fetched");
                ProvisioningOutcome::Ready
            }
            Err(fallback_err) => {
                let reason = format!(
                    "{}: {primary_err}; {}: {fallback_err}",
                    self.primary.name(),
                    self.fallback.name()
                );
                let both_timed_out = matches!(primary_err, AnyVideoError::OperationTimeout(_))
                    && matches!(fallback_err, AnyVideoError::OperationTimeout(_));
                ProvisioningOutcome::Failed(if both_timed_out {
                    AnyVideoError::OperationTimeout(reason)
                } else {
                    AnyVideoError::Network(reason)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;

    use super::*;

    struct FakeTransport {
        name: &'static str,
        body: Option<&'static [u8]>,
        calls: Mutex<usize>,
    }

    impl FakeTransport {
        fn new(name: &'static str, body: Option<&'static [u8]>) -> Self {
            Self {
                name,
                body,
                calls: Mutex::new(0),
            }
        }
    }

    impl ArchiveTransport for Arc<FakeTransport> {
        fn name(&self) -> &'static str {
            self.name
        }

        fn download(&self, _url: &str, destination: &Path) -> Result<(), AnyVideoError> {
            *self.calls.lock().unwrap() += 1;
            match self.body {
                Some(body) => {
                    fs::write(destination, body).unwrap();
                    Ok(())
                }
                None => Err(AnyVideoError::Network(format!("{} unreachable", self.name))),
            }
        }
    }

    fn shared(transport: FakeTransport) -> Arc<FakeTransport> {
        Arc::new(transport)
    }

    #[test]
    fn falls_back_when_primary_fails() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("ffmpeg.zip");
        let primary = shared(FakeTransport::new("http", None));
        let fallback = shared(FakeTransport::new("curl", Some(&b"PK"[..])));
        let fetcher = FallbackFetcher::new(Box::new(primary.clone()), Box::new(fallback.clone()));

        assert_eq!(fetcher.fetch("https://example.com/a.zip", &dest), ProvisioningOutcome::Ready);
        assert_eq!(*primary.calls.lock().unwrap(), 1);
        assert_eq!(*fallback.calls.lock().unwrap(), 1);
        assert_eq!(fs::read(&dest).unwrap(), b"PK");
    }

    #[test]
    fn primary_success_skips_fallback() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("ffmpeg.zip");
        fs::write(&dest, b"stale partial").unwrap();
        let primary = shared(FakeTransport::new("http", Some(&b"fresh"[..])));
        let fallback = shared(FakeTransport::new("curl", Some(&b"unused"[..])));
        let fetcher = FallbackFetcher::new(Box::new(primary.clone()), Box::new(fallback.clone()));

        assert!(fetcher.fetch("https://example.com/a.zip", &dest).is_ok());
        assert_eq!(*fallback.calls.lock().unwrap(), 0);
        assert_eq!(fs::read(&dest).unwrap(), b"fresh");
    }

    #[test]
    fn both_transports_failing_is_a_network_error() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("ffmpeg.zip");
        let primary = shared(FakeTransport::new("http", None));
        let fallback = shared(FakeTransport::new("curl", None));
        let fetcher = FallbackFetcher::new(Box::new(primary.clone()), Box::new(fallback.clone()));

        let outcome = fetcher.fetch("https://example.com/a.zip", &dest);
        assert_matches!(outcome, ProvisioningOutcome::Failed(AnyVideoError::Network(_)));
        assert_eq!(*primary.calls.lock().unwrap(), 1);
        assert_eq!(*fallback.calls.lock().unwrap(), 1);
    }
}
