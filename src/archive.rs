use std::fs;
use std::path::Path;

use zip::ZipArchive;

use crate::domain::ProvisioningOutcome;
use crate::error::AnyVideoError;
use crate::fs_util::entry_file_name;

/// Structural check of a downloaded archive. Checks run in order and stop at
/// the first failure: file exists, file is non-empty, container opens, entry
/// list is non-empty, every required binary is present (matched by file
/// name), every required binary has a non-zero stored size.
pub fn validate_archive(path: &Path, required: &[String]) -> ProvisioningOutcome {
    check_archive(path, required).into()
}

pub fn check_archive(path: &Path, required: &[String]) -> Result<(), AnyVideoError> {
    let meta = match fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        _ => return Err(AnyVideoError::ArchiveMissing(path.to_path_buf())),
    };
    if meta.len() == 0 {
        return Err(AnyVideoError::ArchiveEmpty(path.to_path_buf()));
    }

    let file = fs::File::open(path).map_err(|err| AnyVideoError::ArchiveCorrupt(err.to_string()))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| AnyVideoError::ArchiveCorrupt(err.to_string()))?;
    if archive.len() == 0 {
        return Err(AnyVideoError::ArchiveNoEntries);
    }

    let mut sizes: Vec<(String, u64)> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|err| AnyVideoError::ArchiveCorrupt(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        sizes.push((entry_file_name(entry.name()).to_string(), entry.size()));
    }

    let missing = required
        .iter()
        .filter(|name| !sizes.iter().any(|(entry, _)| entry == *name))
        .cloned()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(AnyVideoError::ArchiveIncomplete { missing });
    }

    let empty = required
        .iter()
        .filter(|name| {
            !sizes
                .iter()
                .any(|(entry, size)| entry == *name && *size > 0)
        })
        .cloned()
        .collect::<Vec<_>>();
    if !empty.is_empty() {
        return Err(AnyVideoError::ArchiveEntryEmpty { entries: empty });
    }

    Ok(())
}
