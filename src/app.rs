use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::domain::{Notice, ProvisioningOutcome, VideoUrl};
use crate::download::{DownloadRequest, Downloader};
use crate::error::AnyVideoError;
use crate::formats::{FormatCandidate, filter_eligible, select_best_audio, select_best_video, sort_by};
use crate::lock::AdvisoryLock;
use crate::media::{MediaExtractor, MediaInfo};
use crate::process::{DetachedTask, Launcher};
use crate::provision::Extractor;
use crate::store::Store;
use crate::update::UpdateScheduler;
use crate::verify::{DependencyState, DependencyVerifier};

pub const APP_ICON: &str = "Images/app.png";
pub const ERROR_ICON: &str = "Images/error.png";

pub const METHOD_QUERY: &str = "query";
pub const METHOD_DOWNLOAD: &str = "download";
pub const METHOD_DOWNLOAD_ARCHIVE: &str = "download_archive_binaries";
pub const METHOD_LAUNCH_UPDATE: &str = "launch_library_update";
pub const METHOD_SKIP_UPDATE: &str = "skip_library_update";

/// Deferred host action: a method name plus positional parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub method: String,
    pub parameters: Vec<String>,
}

impl Action {
    pub fn new(method: &str, parameters: Vec<String>) -> Self {
        Self {
            method: method.to_string(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultEntry {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "SubTitle", skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(rename = "IcoPath")]
    pub icon: String,
    #[serde(rename = "JsonRPCAction", skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

impl ResultEntry {
    fn advisory(title: impl Into<String>, subtitle: Option<String>, icon: &str) -> Self {
        Self {
            title: title.into(),
            subtitle,
            icon: icon.to_string(),
            action: None,
        }
    }

    fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub result: Vec<ResultEntry>,
}

impl QueryResult {
    fn single(entry: ResultEntry) -> Self {
        Self {
            result: vec![entry],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    pub ok: bool,
    pub reason: Option<String>,
}

impl From<&ProvisioningOutcome> for OutcomeReport {
    fn from(outcome: &ProvisioningOutcome) -> Self {
        Self {
            ok: outcome.is_ok(),
            reason: outcome.reason(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub dependency: String,
    pub ready: bool,
    pub reason: Option<String>,
    pub plugin_root: String,
    pub library_root: String,
    pub download_path: String,
    pub update_due: bool,
    pub update_in_progress: bool,
}

/// Host-facing operations. Every action is safe to invoke redundantly.
pub struct App<E: MediaExtractor, L: Launcher> {
    store: Store,
    extractor: E,
    launcher: L,
}

impl<E: MediaExtractor, L: Launcher> App<E, L> {
    pub fn new(store: Store, extractor: E, launcher: L) -> Self {
        Self {
            store,
            extractor,
            launcher,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn query(&self, text: &str, config: &ResolvedConfig) -> QueryResult {
        if let Some(advisory) = self.ensure_dependency(config) {
            return QueryResult::single(advisory);
        }

        if text.trim().is_empty() {
            return QueryResult::single(ResultEntry::advisory(
                "Please input the URL of the video",
                Some(format!("Downloads go to {}", config.download_path)),
                APP_ICON,
            ));
        }

        let url = match text.parse::<VideoUrl>() {
            Ok(url) => url,
            Err(_) => {
                return QueryResult::single(ResultEntry::advisory(
                    "Please check the URL for errors.",
                    None,
                    ERROR_ICON,
                ));
            }
        };

        let info = match self.extractor.try_extract_info(&url) {
            Ok(info) => info,
            Err(err) => {
                warn!(url = %url, error = %err, "media extraction failed");
                return QueryResult::single(ResultEntry::advisory(
                    "Something went wrong!",
                    Some(format!("Couldn't extract video information: {err}")),
                    ERROR_ICON,
                ));
            }
        };

        let candidates = filter_eligible(&info.formats);
        if candidates.is_empty() {
            return QueryResult::single(ResultEntry::advisory(
                "Couldn't find any video formats.",
                None,
                ERROR_ICON,
            ));
        }

        let download_path = config.download_path.to_string();
        let mut result = Vec::new();
        if config.query.highlight_best {
            if let Some(best) = select_best_video(&candidates) {
                result.push(format_entry(&url, &info, best, &download_path, Some("Best video")));
            }
            if let Some(best) = select_best_audio(&candidates) {
                result.push(format_entry(&url, &info, best, &download_path, Some("Best audio")));
            }
        }
        let ranked = sort_by(candidates, config.query.sort);
        result.extend(
            ranked
                .iter()
                .map(|format| format_entry(&url, &info, format, &download_path, None)),
        );
        result.extend(self.update_entries(config));
        QueryResult { result }
    }

    /// `Some(advisory)` when the binary pair is not usable yet. A pending
    /// extraction is completed inline; a missing dependency optionally starts
    /// a detached setup.
    fn ensure_dependency(&self, config: &ResolvedConfig) -> Option<ResultEntry> {
        let verifier = DependencyVerifier::new(&self.store, &config.provision);
        let retry = Action::new(METHOD_DOWNLOAD_ARCHIVE, Vec::new());
        match verifier.state() {
            DependencyState::Ready => None,
            DependencyState::SetupInProgress => Some(ResultEntry::advisory(
                "Setting up dependencies...",
                Some(Notice::SetupInProgress.to_string()),
                APP_ICON,
            )),
            DependencyState::ExtractionPending => {
                match Extractor::new(&self.store, &config.provision).extract_pending() {
                    ProvisioningOutcome::Failed(err) => Some(
                        ResultEntry::advisory(
                            "Couldn't set up dependencies",
                            Some(format!("{err}. Select to retry.")),
                            ERROR_ICON,
                        )
                        .with_action(retry),
                    ),
                    _ => None,
                }
            }
            DependencyState::Missing(err) => {
                let subtitle = if config.query.auto_provision {
                    match self.launcher.launch(DetachedTask::Setup) {
                        ProvisioningOutcome::Failed(launch_err) => {
                            format!("{err}; background setup failed to start: {launch_err}. Select to retry.")
                        }
                        _ => format!("{err}. Downloading in the background, select to retry."),
                    }
                } else {
                    format!("{err}. Select to download.")
                };
                Some(
                    ResultEntry::advisory("Required binaries are missing", Some(subtitle), ERROR_ICON)
                        .with_action(retry),
                )
            }
        }
    }

    /// Update and skip entries, offered after the ranked formats while a
    /// library update is due and none is running.
    fn update_entries(&self, config: &ResolvedConfig) -> Vec<ResultEntry> {
        let scheduler = UpdateScheduler::for_library(&self.store, &config.update);
        let lock = AdvisoryLock::new(self.store.update_lock_path());
        if lock.is_active(config.update.lock_staleness) || !scheduler.is_update_due() {
            return Vec::new();
        }
        vec![
            ResultEntry::advisory(
                "A yt-dlp update is available",
                Some("Select to update in the background".to_string()),
                APP_ICON,
            )
            .with_action(Action::new(METHOD_LAUNCH_UPDATE, Vec::new())),
            ResultEntry::advisory(
                "Skip this update",
                Some(format!(
                    "Ask again in {} days",
                    config.update.interval_days
                )),
                APP_ICON,
            )
            .with_action(Action::new(METHOD_SKIP_UPDATE, Vec::new())),
        ]
    }

    /// Runs the download in the foreground. An unusable `download_path`
    /// falls back to the configured one.
    pub fn download(
        &self,
        url: &str,
        format_id: &str,
        download_path: Option<&str>,
        config: &ResolvedConfig,
    ) -> Result<(), AnyVideoError> {
        let url = url.parse::<VideoUrl>()?;
        let destination = download_path
            .map(PathBuf::from)
            .filter(|path| path.is_dir())
            .unwrap_or_else(|| config.download_path.clone().into_std_path_buf());
        let request = DownloadRequest::new(url.as_str(), format_id, destination);
        let downloader = Downloader::new(
            self.store.primary_binary().into_std_path_buf(),
            self.store.plugin_root().as_std_path().to_path_buf(),
            config.update.interval_days,
        );
        downloader.run(&request)
    }

    pub fn download_archive_binaries(&self, config: &ResolvedConfig) -> ProvisioningOutcome {
        let verifier = DependencyVerifier::new(&self.store, &config.provision);
        match verifier.state() {
            DependencyState::Ready => ProvisioningOutcome::ReadyWith(Notice::AlreadyReady),
            DependencyState::SetupInProgress => {
                ProvisioningOutcome::ReadyWith(Notice::SetupInProgress)
            }
            DependencyState::ExtractionPending | DependencyState::Missing(_) => {
                info!("starting background setup");
                self.launcher.launch(DetachedTask::Setup)
            }
        }
    }

    pub fn launch_library_update(&self, config: &ResolvedConfig) -> ProvisioningOutcome {
        let scheduler = UpdateScheduler::for_library(&self.store, &config.update);
        let lock = AdvisoryLock::new(self.store.update_lock_path());
        scheduler.launch_detached_update(&self.launcher, &lock, config.update.lock_staleness)
    }

    pub fn skip_library_update(&self, config: &ResolvedConfig) -> ProvisioningOutcome {
        UpdateScheduler::for_library(&self.store, &config.update).record_skip()
    }

    pub fn status(&self, config: &ResolvedConfig) -> StatusReport {
        let outcome = DependencyVerifier::new(&self.store, &config.provision).verify_dependency();
        let dependency = match &outcome {
            ProvisioningOutcome::Ready => "ready",
            ProvisioningOutcome::ReadyWith(Notice::SetupInProgress) => "setup-in-progress",
            ProvisioningOutcome::ReadyWith(Notice::ExtractionPending) => "extraction-pending",
            ProvisioningOutcome::ReadyWith(Notice::AlreadyReady) => "ready",
            ProvisioningOutcome::Failed(_) => "missing",
        };
        let update_lock = AdvisoryLock::new(self.store.update_lock_path());
        StatusReport {
            dependency: dependency.to_string(),
            ready: outcome.is_ok(),
            reason: outcome.reason(),
            plugin_root: self.store.plugin_root().to_string(),
            library_root: self.store.library_root().to_string(),
            download_path: config.download_path.to_string(),
            update_due: UpdateScheduler::for_library(&self.store, &config.update).is_update_due(),
            update_in_progress: update_lock.is_active(config.update.lock_staleness),
        }
    }
}

fn format_entry(
    url: &VideoUrl,
    info: &MediaInfo,
    format: &FormatCandidate,
    download_path: &str,
    label: Option<&str>,
) -> ResultEntry {
    let title = match label {
        Some(label) => format!("{label}: {}", info.title),
        None => info.title.clone(),
    };
    ResultEntry {
        title,
        subtitle: Some(format_subtitle(format)),
        icon: info
            .thumbnail
            .clone()
            .filter(|thumbnail| !thumbnail.is_empty())
            .unwrap_or_else(|| APP_ICON.to_string()),
        action: Some(Action::new(
            METHOD_DOWNLOAD,
            vec![
                url.as_str().to_string(),
                format.format_id.clone(),
                download_path.to_string(),
            ],
        )),
    }
}

pub fn format_subtitle(format: &FormatCandidate) -> String {
    let mut subtitle = format!("{} ({} kbps)", format.resolution, format.bitrate.round() as i64);
    if let Some(container) = format.container.as_deref().filter(|ext| !ext.is_empty()) {
        subtitle.push_str(&format!(" ┃ Format: {container}"));
    }
    if let Some(fps) = format.fps.filter(|fps| *fps > 0.0) {
        subtitle.push_str(&format!(" ┃ FPS: {fps}"));
    }
    subtitle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Resolution;

    #[test]
    fn subtitle_omits_absent_parts() {
        let mut format = FormatCandidate {
            format_id: "137".to_string(),
            resolution: Resolution::Video {
                width: 1920,
                height: 1080,
            },
            bitrate: 4400.6,
            fps: Some(30.0),
            filesize: None,
            container: Some("mp4".to_string()),
        };
        assert_eq!(
            format_subtitle(&format),
            "1920x1080 (4401 kbps) ┃ Format: mp4 ┃ FPS: 30"
        );
        format.fps = None;
        format.container = None;
        assert_eq!(format_subtitle(&format), "1920x1080 (4401 kbps)");
    }

    #[test]
    fn entries_serialize_with_host_field_names() {
        let entry = ResultEntry::advisory("Title", None, APP_ICON)
            .with_action(Action::new(METHOD_DOWNLOAD, vec!["u".to_string()]));
        let json = serde_json::to_value(QueryResult::single(entry)).unwrap();
        assert_eq!(json["result"][0]["Title"], "Title");
        assert_eq!(json["result"][0]["IcoPath"], APP_ICON);
        assert_eq!(json["result"][0]["JsonRPCAction"]["method"], "download");
        assert!(json["result"][0].get("SubTitle").is_none());
    }
}
