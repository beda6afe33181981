use crate::archive::check_archive;
use crate::config::ProvisionSettings;
use crate::domain::{Notice, ProvisioningOutcome};
use crate::error::AnyVideoError;
use crate::fs_util::file_size;
use crate::lock::AdvisoryLock;
use crate::store::Store;

/// Readiness of the archive-distributed binary pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyState {
    Ready,
    /// Another invocation holds the setup lock.
    SetupInProgress,
    /// Binaries unusable, but a valid archive is waiting to be extracted.
    ExtractionPending,
    Missing(AnyVideoError),
}

/// Read-only view over the dependency files. Never mutates anything.
pub struct DependencyVerifier<'a> {
    store: &'a Store,
    settings: &'a ProvisionSettings,
}

impl<'a> DependencyVerifier<'a> {
    pub fn new(store: &'a Store, settings: &'a ProvisionSettings) -> Self {
        Self { store, settings }
    }

    pub fn verify_binaries(&self) -> ProvisioningOutcome {
        self.check_binaries().into()
    }

    pub fn check_binaries(&self) -> Result<(), AnyVideoError> {
        let mut missing = Vec::new();
        let mut empty = Vec::new();
        for name in &self.settings.required_binaries {
            match file_size(self.store.binary_path(name).as_std_path()) {
                None => missing.push(name.clone()),
                Some(0) => empty.push(name.clone()),
                Some(_) => {}
            }
        }
        if !missing.is_empty() {
            return Err(AnyVideoError::BinaryMissing { missing, empty });
        }
        if !empty.is_empty() {
            return Err(AnyVideoError::BinaryEmpty { empty });
        }
        Ok(())
    }

    pub fn state(&self) -> DependencyState {
        let lock = AdvisoryLock::new(self.store.setup_lock_path());
        if lock.is_active(self.settings.lock_staleness) {
            return DependencyState::SetupInProgress;
        }

        let binaries = match self.check_binaries() {
            Ok(()) => return DependencyState::Ready,
            Err(err) => err,
        };

        let archive = self.store.archive_path();
        match check_archive(archive.as_std_path(), &self.settings.required_binaries) {
            Ok(()) => DependencyState::ExtractionPending,
            // No archive at all: the binaries explain the problem best.
            Err(AnyVideoError::ArchiveMissing(_)) => DependencyState::Missing(binaries),
            Err(err) => DependencyState::Missing(err),
        }
    }

    /// Composite readiness. Ok when the binaries are valid, when a setup is
    /// already running elsewhere, or when only extraction remains.
    pub fn verify_dependency(&self) -> ProvisioningOutcome {
        match self.state() {
            DependencyState::Ready => ProvisioningOutcome::Ready,
            DependencyState::SetupInProgress => {
                ProvisioningOutcome::ReadyWith(Notice::SetupInProgress)
            }
            DependencyState::ExtractionPending => {
                ProvisioningOutcome::ReadyWith(Notice::ExtractionPending)
            }
            DependencyState::Missing(err) => ProvisioningOutcome::Failed(err),
        }
    }
}
