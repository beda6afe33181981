use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::SystemTime;

use tracing::info;

use crate::error::AnyVideoError;
use crate::update::binary_update_due;

/// One download handed to the primary binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub format_id: String,
    pub destination: PathBuf,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, format_id: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            format_id: format_id.into(),
            destination: destination.into(),
        }
    }

    /// Prefers the chosen stream merged with the best audio, falling back to
    /// the stream alone.
    pub fn format_selector(&self) -> String {
        format!("{id}+ba/{id}", id = self.format_id)
    }

    pub fn args(&self, binaries_dir: &Path, self_update: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.url.clone().into(),
            "-f".into(),
            self.format_selector().into(),
            "-P".into(),
            self.destination.clone().into(),
            "--windows-filenames".into(),
            "--restrict-filenames".into(),
            "--trim-filenames".into(),
            "50".into(),
            "--quiet".into(),
            "--progress".into(),
            "--no-mtime".into(),
            "--force-overwrites".into(),
            "--no-part".into(),
            "--ffmpeg-location".into(),
            binaries_dir.as_os_str().to_os_string(),
        ];
        if self_update {
            args.push("-U".into());
        }
        args
    }
}

/// Runs downloads through the primary binary, asking it to self-update when
/// it is older than the update interval.
pub struct Downloader {
    binary: PathBuf,
    binaries_dir: PathBuf,
    interval_days: u32,
}

impl Downloader {
    pub fn new(binary: PathBuf, binaries_dir: PathBuf, interval_days: u32) -> Self {
        Self {
            binary,
            binaries_dir,
            interval_days,
        }
    }

    pub fn command(&self, request: &DownloadRequest, now: SystemTime) -> Command {
        let self_update = binary_update_due(&self.binary, self.interval_days, now);
        let mut command = Command::new(&self.binary);
        command.args(request.args(&self.binaries_dir, self_update));
        command
    }

    pub fn run(&self, request: &DownloadRequest) -> Result<(), AnyVideoError> {
        if !self.binary.is_file() {
            return Err(AnyVideoError::BinaryMissing {
                missing: vec![self.binary.display().to_string()],
                empty: Vec::new(),
            });
        }
        info!(url = %request.url, format = %request.format_id, "starting download");
        let status = self
            .command(request, SystemTime::now())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|err| AnyVideoError::Process(err.to_string()))?;
        if !status.success() {
            return Err(AnyVideoError::Process(format!(
                "download exited with {}",
                status
                    .code()
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "signal".to_string())
            )));
        }
        Ok(())
    }
}
