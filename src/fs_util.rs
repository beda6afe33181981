use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::AnyVideoError;

/// Unpacks every entry of `zip_path` below `target_dir`, returning the paths
/// of the extracted files.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, AnyVideoError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        AnyVideoError::ExtractionFailed(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| AnyVideoError::ExtractionFailed(err.to_string()))?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| AnyVideoError::ExtractionFailed(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(AnyVideoError::ExtractionFailed(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| AnyVideoError::ExtractionFailed(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| AnyVideoError::ExtractionFailed(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| AnyVideoError::ExtractionFailed(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| AnyVideoError::ExtractionFailed(err.to_string()))?;
        extracted.push(entry_path);
    }
    Ok(extracted)
}

/// Final path component of an archive entry name, accepting either separator.
pub fn entry_file_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Writes `content` next to `path` and renames it into place.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), AnyVideoError> {
    let parent = path
        .parent()
        .ok_or_else(|| AnyVideoError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| AnyVideoError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".anyvideo-write")
        .tempfile_in(parent)
        .map_err(|err| AnyVideoError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| AnyVideoError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| AnyVideoError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Moves `from` over `to`, replacing a previous file or directory.
pub fn replace_path(from: &Path, to: &Path) -> io::Result<()> {
    if to.is_dir() {
        fs::remove_dir_all(to)?;
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(from, to)
}

/// Best-effort delete; failures are dropped.
pub fn remove_quietly(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Size of the file at `path`, `None` when it does not exist or is not a file.
pub fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

#[cfg(unix)]
pub fn mark_executable(path: &Path) -> Result<(), AnyVideoError> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)
        .map_err(|err| AnyVideoError::Filesystem(err.to_string()))?
        .permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions).map_err(|err| AnyVideoError::Filesystem(err.to_string()))
}

#[cfg(not(unix))]
pub fn mark_executable(_path: &Path) -> Result<(), AnyVideoError> {
    Ok(())
}
