use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, SystemTime};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::archive::check_archive;
use crate::config::UpdateSettings;
use crate::domain::{AssetKind, ProvisioningOutcome};
use crate::error::AnyVideoError;
use crate::fs_util::{self, write_atomic};
use crate::lock::AdvisoryLock;
use crate::package_index::PackageIndexClient;
use crate::process::{DetachedTask, Launcher, run_with_timeout, stderr_summary};
use crate::store::Store;

pub const SELF_UPDATE_TIMEOUT: Duration = Duration::from_secs(120);

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerStatus {
    Updated,
    Skipped,
}

/// Contents of the update marker file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMarker {
    pub status: MarkerStatus,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Decides whether a versioned asset needs refreshing from its marker file.
#[derive(Debug, Clone)]
pub struct UpdateScheduler {
    marker: Utf8PathBuf,
    artifact: Utf8PathBuf,
    interval_days: u32,
}

impl UpdateScheduler {
    pub fn new(marker: Utf8PathBuf, artifact: Utf8PathBuf, interval_days: u32) -> Self {
        Self {
            marker,
            artifact,
            interval_days,
        }
    }

    pub fn for_library(store: &Store, settings: &UpdateSettings) -> Self {
        Self::new(
            store.update_marker_path(),
            store.asset_path(AssetKind::VersionedLibrary, &settings.library_package),
            settings.interval_days,
        )
    }

    /// Reads the marker. A marker that is not JSON (e.g. touched by hand)
    /// counts as an update recorded at its modification time.
    pub fn read_marker(&self) -> Option<UpdateMarker> {
        let path = self.marker.as_std_path();
        let content = fs::read_to_string(path).ok()?;
        if let Ok(marker) = serde_json::from_str::<UpdateMarker>(&content) {
            return Some(marker);
        }
        let modified = fs::metadata(path).and_then(|meta| meta.modified()).ok()?;
        Some(UpdateMarker {
            status: MarkerStatus::Updated,
            recorded_at: DateTime::<Utc>::from(modified),
            version: None,
        })
    }

    pub fn is_update_due(&self) -> bool {
        self.is_update_due_at(Utc::now())
    }

    /// Due when the artifact is absent, the marker is absent, or the marker
    /// (update or skip) is older than the interval.
    pub fn is_update_due_at(&self, now: DateTime<Utc>) -> bool {
        if !self.artifact.as_std_path().exists() {
            return true;
        }
        let Some(marker) = self.read_marker() else {
            return true;
        };
        let interval = chrono::Duration::seconds(i64::from(self.interval_days) * SECONDS_PER_DAY);
        now.signed_duration_since(marker.recorded_at) > interval
    }

    pub fn record_skip(&self) -> ProvisioningOutcome {
        self.record(MarkerStatus::Skipped, None)
    }

    pub fn record_updated(&self, version: Option<String>) -> ProvisioningOutcome {
        self.record(MarkerStatus::Updated, version)
    }

    fn record(&self, status: MarkerStatus, version: Option<String>) -> ProvisioningOutcome {
        let marker = UpdateMarker {
            status,
            recorded_at: Utc::now(),
            version,
        };
        let result = serde_json::to_vec_pretty(&marker)
            .map_err(|err| AnyVideoError::Filesystem(err.to_string()))
            .and_then(|content| write_atomic(self.marker.as_std_path(), &content));
        if result.is_ok() {
            info!(marker = %self.marker, ?status, "update marker written");
        }
        result.into()
    }

    /// Hands the update to a detached worker unless one is already running.
    pub fn launch_detached_update<L: Launcher + ?Sized>(
        &self,
        launcher: &L,
        update_lock: &AdvisoryLock,
        staleness: Duration,
    ) -> ProvisioningOutcome {
        if update_lock.is_active(staleness) {
            return ProvisioningOutcome::Failed(AnyVideoError::LockContention {
                name: update_lock.path().file_name().unwrap_or("update").to_string(),
                stale: false,
            });
        }
        launcher.launch(DetachedTask::Update)
    }
}

/// True when the self-updating binary was last modified more than
/// `interval_days` before `now`. A missing or unreadable binary is not due.
pub fn binary_update_due(binary: &Path, interval_days: u32, now: SystemTime) -> bool {
    let Ok(modified) = fs::metadata(binary).and_then(|meta| meta.modified()) else {
        return false;
    };
    let interval = Duration::from_secs(u64::from(interval_days) * SECONDS_PER_DAY as u64);
    now.duration_since(modified)
        .map(|age| age > interval)
        .unwrap_or(false)
}

/// Replaces the extracted library package with the latest universal
/// distributable from the package index.
pub struct LibraryUpdater<'a, C: PackageIndexClient> {
    store: &'a Store,
    settings: &'a UpdateSettings,
    client: C,
}

impl<'a, C: PackageIndexClient> LibraryUpdater<'a, C> {
    pub fn new(store: &'a Store, settings: &'a UpdateSettings, client: C) -> Self {
        Self {
            store,
            settings,
            client,
        }
    }

    /// Returns the installed version as reported by the index.
    pub fn update(&self) -> Result<String, AnyVideoError> {
        self.store.ensure_library_root()?;
        let root = self.store.library_root().as_std_path();
        let package = &self.settings.library_package;

        let index = self.client.fetch_index(&self.settings.package_index_url)?;
        let distributable = index
            .select_distributable(&self.settings.distributable_suffix)
            .ok_or_else(|| {
                AnyVideoError::NoCompatibleDistributable(self.settings.distributable_suffix.clone())
            })?;
        info!(file = %distributable.filename, "downloading library distributable");

        let download = tempfile::Builder::new()
            .prefix(&format!(".{package}-"))
            .suffix(".whl")
            .tempfile_in(root)
            .map_err(|err| AnyVideoError::Filesystem(err.to_string()))?;
        self.client.download(&distributable.url, download.path())?;
        check_archive(download.path(), &[])?;

        let staging = tempfile::Builder::new()
            .prefix(".anyvideo-stage")
            .tempdir_in(root)
            .map_err(|err| AnyVideoError::ExtractionFailed(err.to_string()))?;
        fs_util::extract_zip(download.path(), staging.path())?;
        if !staging.path().join(package).is_dir() {
            return Err(AnyVideoError::ArchiveIncomplete {
                missing: vec![package.clone()],
            });
        }

        swap_installed(root, package, staging.path(), |from, to| fs::rename(from, to))?;

        let version = index
            .info
            .version
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        info!(%version, "library updated");
        Ok(version)
    }
}

/// Moves the staged tree into `root`. The installed package, its
/// `<package>-*.dist-info` directories and anything a staged entry would
/// overwrite are set aside first, then dropped on success or moved back if
/// any move fails.
fn swap_installed<M>(
    root: &Path,
    package: &str,
    staging: &Path,
    mut move_entry: M,
) -> Result<(), AnyVideoError>
where
    M: FnMut(&Path, &Path) -> io::Result<()>,
{
    let staged =
        entry_names(staging).map_err(|err| AnyVideoError::ExtractionFailed(err.to_string()))?;
    let dist_info_prefix = format!("{package}-");
    let displaced: Vec<OsString> = entry_names(root)
        .map_err(|err| AnyVideoError::Filesystem(err.to_string()))?
        .into_iter()
        .filter(|name| {
            let text = name.to_string_lossy();
            let is_installed = text == package
                || (text.starts_with(&dist_info_prefix) && text.ends_with(".dist-info"));
            (is_installed && root.join(name).is_dir()) || staged.contains(name)
        })
        .collect();

    let previous = tempfile::Builder::new()
        .prefix(".anyvideo-previous")
        .tempdir_in(root)
        .map_err(|err| AnyVideoError::Filesystem(err.to_string()))?;
    let mut set_aside = Vec::new();
    for name in &displaced {
        if let Err(err) = fs::rename(root.join(name), previous.path().join(name)) {
            restore_previous(root, previous.path(), &set_aside, &[]);
            return Err(AnyVideoError::Filesystem(err.to_string()));
        }
        set_aside.push(name.clone());
    }

    let mut installed = Vec::new();
    for name in &staged {
        if let Err(err) = move_entry(&staging.join(name), &root.join(name)) {
            warn!(error = %err, "library swap failed, restoring previous install");
            restore_previous(root, previous.path(), &set_aside, &installed);
            return Err(AnyVideoError::ExtractionFailed(err.to_string()));
        }
        installed.push(name.clone());
    }
    Ok(())
}

fn restore_previous(root: &Path, previous: &Path, set_aside: &[OsString], installed: &[OsString]) {
    for name in installed {
        let path = root.join(name);
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(err) = removed {
            warn!(entry = %path.display(), error = %err, "could not remove partial install");
        }
    }
    for name in set_aside {
        if let Err(err) = fs::rename(previous.join(name), root.join(name)) {
            warn!(entry = %name.to_string_lossy(), error = %err, "could not restore previous install");
        }
    }
}

fn entry_names(dir: &Path) -> io::Result<Vec<OsString>> {
    fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect()
}

/// Runs the primary binary's built-in updater (`-U`).
pub fn self_update_binary(binary: &Path, timeout: Duration) -> Result<String, AnyVideoError> {
    if !binary.is_file() {
        return Err(AnyVideoError::BinaryMissing {
            missing: vec![binary.display().to_string()],
            empty: Vec::new(),
        });
    }
    let output = run_with_timeout(Command::new(binary).arg("-U"), timeout)?;
    if !output.status.success() {
        return Err(AnyVideoError::Process(stderr_summary(
            &output,
            &binary.display().to_string(),
        )));
    }
    let summary = String::from_utf8_lossy(&output.stdout)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("binary up to date")
        .to_string();
    Ok(summary)
}

/// Body of the detached update worker.
pub struct UpdateRunner<'a, C: PackageIndexClient> {
    store: &'a Store,
    settings: &'a UpdateSettings,
    library: LibraryUpdater<'a, C>,
    binary_timeout: Duration,
}

impl<'a, C: PackageIndexClient> UpdateRunner<'a, C> {
    pub fn new(store: &'a Store, settings: &'a UpdateSettings, client: C) -> Self {
        Self {
            store,
            settings,
            library: LibraryUpdater::new(store, settings, client),
            binary_timeout: SELF_UPDATE_TIMEOUT,
        }
    }

    pub fn with_binary_timeout(mut self, timeout: Duration) -> Self {
        self.binary_timeout = timeout;
        self
    }

    /// Updates the library and the primary binary independently under the
    /// update lock. The marker is written only when the library step succeeds.
    pub fn run(&self) -> ProvisioningOutcome {
        let lock = AdvisoryLock::new(self.store.update_lock_path());
        let _guard = match lock.lock(self.settings.lock_staleness) {
            Ok(guard) => guard,
            Err(err) => return ProvisioningOutcome::Failed(err),
        };

        let library = self.library.update();
        let binary = self
            .store
            .asset_path(AssetKind::SelfUpdatingBinary, &self.settings.library_package);
        let binary = self_update_binary(binary.as_std_path(), self.binary_timeout);

        let mut marker_failure = None;
        match &library {
            Ok(version) => {
                let scheduler = UpdateScheduler::for_library(self.store, self.settings);
                if let ProvisioningOutcome::Failed(err) = scheduler.record_updated(Some(version.clone())) {
                    marker_failure = Some(err.to_string());
                }
            }
            Err(err) => warn!(error = %err, "library update failed"),
        }
        match &binary {
            Ok(summary) => info!(%summary, "binary self-update finished"),
            Err(err) => warn!(error = %err, "binary self-update failed"),
        }

        let library_failure = library.err().map(|err| err.to_string()).or(marker_failure);
        let binary_failure = binary.err().map(|err| err.to_string());
        if library_failure.is_none() && binary_failure.is_none() {
            return ProvisioningOutcome::Ready;
        }
        ProvisioningOutcome::Failed(AnyVideoError::PartialUpdateFailure {
            library: library_failure,
            binary: binary_failure,
        })
    }
}
