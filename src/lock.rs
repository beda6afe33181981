//! Advisory, filesystem-based mutual exclusion between invocations.
//!
//! A lock is a marker file created with `create_new`. Nothing enforces it:
//! cooperating processes check for the marker before provisioning. A process
//! that dies while holding a lock leaves the marker behind; the next `acquire`
//! reclaims it once its age exceeds the staleness threshold. There are no
//! leases or fencing tokens, so a holder that outlives the threshold can
//! overlap with a reclaimer.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::ProvisioningOutcome;
use crate::error::AnyVideoError;

#[derive(Debug, Clone)]
pub struct AdvisoryLock {
    path: Utf8PathBuf,
}

#[derive(Debug, Serialize)]
struct LockRecord {
    pid: u32,
    created_at: String,
}

/// Releases the lock when dropped.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a AdvisoryLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl AdvisoryLock {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn name(&self) -> String {
        self.path.file_name().unwrap_or(self.path.as_str()).to_string()
    }

    pub fn acquire(&self, staleness: Duration) -> ProvisioningOutcome {
        self.try_create(staleness).into()
    }

    /// Like [`AdvisoryLock::acquire`] but hands back a guard that releases on drop.
    pub fn lock(&self, staleness: Duration) -> Result<LockGuard<'_>, AnyVideoError> {
        self.try_create(staleness)?;
        Ok(LockGuard { lock: self })
    }

    pub fn release(&self) {
        if let Err(err) = fs::remove_file(self.path.as_std_path()) {
            if err.kind() != ErrorKind::NotFound {
                debug!(lock = %self.path, error = %err, "lock release failed");
            }
        }
    }

    /// Age of the marker, `None` when it does not exist.
    pub fn age(&self) -> Result<Option<Duration>, AnyVideoError> {
        let modified = match fs::metadata(self.path.as_std_path()) {
            Ok(meta) => meta
                .modified()
                .map_err(|err| AnyVideoError::Filesystem(err.to_string()))?,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AnyVideoError::Filesystem(err.to_string())),
        };
        // A timestamp in the future counts as brand new.
        Ok(Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        ))
    }

    /// True when the marker exists and is not yet stale. An unreadable age
    /// counts as held.
    pub fn is_active(&self, staleness: Duration) -> bool {
        classify(self.age(), staleness) == Holder::Active
    }

    pub fn is_stale(&self, staleness: Duration) -> bool {
        matches!(classify(self.age(), staleness), Holder::Stale(_))
    }

    fn try_create(&self, staleness: Duration) -> Result<(), AnyVideoError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| AnyVideoError::Filesystem(err.to_string()))?;
        }

        match self.create_marker() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(AnyVideoError::Filesystem(err.to_string())),
        }

        match classify(self.age(), staleness) {
            Holder::Active => {
                return Err(AnyVideoError::LockContention {
                    name: self.name(),
                    stale: false,
                });
            }
            Holder::Stale(age) => {
                warn!(lock = %self.path, age_secs = age.as_secs(), "reclaiming stale lock");
                if let Err(err) = fs::remove_file(self.path.as_std_path()) {
                    if err.kind() != ErrorKind::NotFound {
                        return Err(AnyVideoError::LockContention {
                            name: self.name(),
                            stale: true,
                        });
                    }
                }
            }
            // Released between our attempt and the age check.
            Holder::Released => {}
        }

        match self.create_marker() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(AnyVideoError::LockContention {
                    name: self.name(),
                    stale: false,
                })
            }
            Err(err) => Err(AnyVideoError::Filesystem(err.to_string())),
        }
    }

    fn create_marker(&self) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path.as_std_path())?;
        let record = LockRecord {
            pid: std::process::id(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let body = serde_json::to_vec(&record).unwrap_or_default();
        // The marker's existence is what matters; its body is diagnostic only.
        let _ = file.write_all(&body);
        debug!(lock = %self.path, "lock acquired");
        Ok(())
    }
}

/// What an existing marker means for a would-be holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Active,
    Stale(Duration),
    Released,
}

/// An age that cannot be read counts as active and is never reclaimed.
fn classify(age: Result<Option<Duration>, AnyVideoError>, staleness: Duration) -> Holder {
    match age {
        Ok(Some(age)) if age <= staleness => Holder::Active,
        Ok(Some(age)) => Holder::Stale(age),
        Ok(None) => Holder::Released,
        Err(_) => Holder::Active,
    }
}
