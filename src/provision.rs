use std::path::Path;

use tracing::{info, warn};

use crate::archive::check_archive;
use crate::config::ProvisionSettings;
use crate::domain::{Notice, ProvisioningOutcome};
use crate::error::AnyVideoError;
use crate::fetch::ArchiveFetcher;
use crate::fs_util::{self, entry_file_name, remove_quietly};
use crate::lock::AdvisoryLock;
use crate::store::Store;
use crate::verify::DependencyVerifier;

/// Unpacks a validated archive into the plugin root.
pub struct Extractor<'a> {
    store: &'a Store,
    settings: &'a ProvisionSettings,
}

impl<'a> Extractor<'a> {
    pub fn new(store: &'a Store, settings: &'a ProvisionSettings) -> Self {
        Self { store, settings }
    }

    fn verifier(&self) -> DependencyVerifier<'a> {
        DependencyVerifier::new(self.store, self.settings)
    }

    /// Extraction under the setup lock. Used when a valid archive is already
    /// on disk.
    pub fn extract_pending(&self) -> ProvisioningOutcome {
        let lock = AdvisoryLock::new(self.store.setup_lock_path());
        let _guard = match lock.lock(self.settings.lock_staleness) {
            Ok(guard) => guard,
            Err(err) => return ProvisioningOutcome::Failed(err),
        };
        self.extract()
    }

    /// Unpacks the archive into the plugin root and deletes it. The caller is
    /// responsible for holding the setup lock.
    pub fn extract(&self) -> ProvisioningOutcome {
        let archive = self.store.archive_path();
        let archive = archive.as_std_path();
        if !archive.exists() {
            return match self.verifier().check_binaries() {
                Ok(()) => ProvisioningOutcome::ReadyWith(Notice::AlreadyReady),
                Err(_) => {
                    ProvisioningOutcome::Failed(AnyVideoError::ArchiveMissing(archive.to_path_buf()))
                }
            };
        }

        if let Err(err) = check_archive(archive, &self.settings.required_binaries) {
            warn!(error = %err, "discarding invalid archive");
            remove_quietly(archive);
            return ProvisioningOutcome::Failed(err);
        }

        if let Err(err) = self.unpack(archive) {
            warn!(error = %err, "extraction failed");
            remove_quietly(archive);
            return ProvisioningOutcome::Failed(err);
        }
        remove_quietly(archive);
        info!(root = %self.store.plugin_root(), "binaries extracted");

        self.verifier().verify_binaries()
    }

    /// Extracts into a staging directory inside the plugin root, then renames
    /// each file into place. Required binaries land directly in the plugin
    /// root whatever their path inside the archive. Other entries keep their
    /// relative path unless it starts with a reserved plugin file name.
    fn unpack(&self, archive: &Path) -> Result<(), AnyVideoError> {
        let root = self.store.plugin_root().as_std_path();
        let staging = tempfile::Builder::new()
            .prefix(".anyvideo-extract")
            .tempdir_in(root)
            .map_err(|err| AnyVideoError::ExtractionFailed(err.to_string()))?;

        let reserved = self.store.reserved_names();
        let files = fs_util::extract_zip(archive, staging.path())?;
        for file in files {
            let relative = file
                .strip_prefix(staging.path())
                .map_err(|err| AnyVideoError::ExtractionFailed(err.to_string()))?;
            let name = entry_file_name(&relative.to_string_lossy()).to_string();
            let is_required = self.settings.required_binaries.contains(&name);
            let target = if is_required {
                root.join(&name)
            } else {
                let top = relative
                    .components()
                    .next()
                    .map(|part| part.as_os_str().to_string_lossy().to_string());
                if top.is_some_and(|top| reserved.contains(&top)) {
                    warn!(entry = %relative.display(), "skipping archive entry that shadows a plugin file");
                    continue;
                }
                root.join(relative)
            };
            fs_util::replace_path(&file, &target)
                .map_err(|err| AnyVideoError::ExtractionFailed(err.to_string()))?;
            if is_required {
                fs_util::mark_executable(&target)?;
            }
        }
        Ok(())
    }
}

/// Fetch → validate → extract pipeline for the archive-distributed binary pair.
pub struct Provisioner<'a, F: ArchiveFetcher> {
    store: &'a Store,
    settings: &'a ProvisionSettings,
    fetcher: F,
}

impl<'a, F: ArchiveFetcher> Provisioner<'a, F> {
    pub fn new(store: &'a Store, settings: &'a ProvisionSettings, fetcher: F) -> Self {
        Self {
            store,
            settings,
            fetcher,
        }
    }

    /// Full provisioning under the setup lock. Safe to call redundantly: a
    /// ready dependency is left untouched and a valid archive is not fetched
    /// again.
    pub fn provision(&self) -> ProvisioningOutcome {
        let lock = AdvisoryLock::new(self.store.setup_lock_path());
        let _guard = match lock.lock(self.settings.lock_staleness) {
            Ok(guard) => guard,
            Err(err) => return ProvisioningOutcome::Failed(err),
        };
        if let Err(err) = self.store.ensure_plugin_root() {
            return ProvisioningOutcome::Failed(err);
        }

        let verifier = DependencyVerifier::new(self.store, self.settings);
        if verifier.check_binaries().is_ok() {
            return ProvisioningOutcome::ReadyWith(Notice::AlreadyReady);
        }

        let archive = self.store.archive_path();
        if check_archive(archive.as_std_path(), &self.settings.required_binaries).is_err() {
            info!(url = %self.settings.archive_url, "fetching binary archive");
            let fetched = self
                .fetcher
                .fetch(&self.settings.archive_url, archive.as_std_path());
            if !fetched.is_ok() {
                return fetched;
            }
        }
        Extractor::new(self.store, self.settings).extract()
    }
}
