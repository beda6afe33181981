use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum AnyVideoError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    OperationTimeout(String),

    #[error("archive not found: {0}")]
    ArchiveMissing(PathBuf),

    #[error("archive is empty (0 bytes): {0}")]
    ArchiveEmpty(PathBuf),

    #[error("archive is corrupted: {0}")]
    ArchiveCorrupt(String),

    #[error("archive contains no entries")]
    ArchiveNoEntries,

    #[error("archive is missing required entries: {}", .missing.join(", "))]
    ArchiveIncomplete { missing: Vec<String> },

    #[error("archive has empty required entries: {}", .entries.join(", "))]
    ArchiveEntryEmpty { entries: Vec<String> },

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("{}", describe_binaries(.missing, .empty))]
    BinaryMissing {
        missing: Vec<String>,
        empty: Vec<String>,
    },

    #[error("binaries are empty: {}", .empty.join(", "))]
    BinaryEmpty { empty: Vec<String> },

    #[error("{}", describe_lock(.name, .stale))]
    LockContention { name: String, stale: bool },

    #[error("{}", describe_partial(.library, .binary))]
    PartialUpdateFailure {
        library: Option<String>,
        binary: Option<String>,
    },

    #[error("package index request failed: {0}")]
    PackageIndex(String),

    #[error("no compatible distributable found (suffix {0})")]
    NoCompatibleDistributable(String),

    #[error("{0}")]
    MediaExtraction(String),

    #[error("process failed: {0}")]
    Process(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

fn describe_binaries(missing: &[String], empty: &[String]) -> String {
    let mut message = format!("binaries missing: {}", missing.join(", "));
    if !empty.is_empty() {
        message.push_str(&format!("; empty: {}", empty.join(", ")));
    }
    message
}

fn describe_lock(name: &str, stale: &bool) -> String {
    if *stale {
        format!("setup/update in progress ({name}, stale lock could not be reclaimed)")
    } else {
        format!("setup/update in progress ({name})")
    }
}

fn describe_partial(library: &Option<String>, binary: &Option<String>) -> String {
    format!(
        "update incomplete: library {}, binary {}",
        library.as_deref().unwrap_or("ok"),
        binary.as_deref().unwrap_or("ok")
    )
}
