use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;

use crate::domain::AssetKind;
use crate::error::AnyVideoError;

pub const ARCHIVE_FILE: &str = "ffmpeg.zip";
pub const SETUP_LOCK_FILE: &str = "ffmpeg_setup.lock";
pub const UPDATE_MARKER_FILE: &str = ".ytdlp_last_update";
pub const UPDATE_LOCK_FILE: &str = ".ytdlp_updating";
pub const LOG_FILE: &str = "anyvideo.log";
pub const CONFIG_FILE: &str = "anyvideo.json";

/// Filesystem layout shared by every invocation.
///
/// The plugin root holds the self-updating primary binary, the archive and the
/// extracted binary pair. The library root is a sibling directory holding the
/// versioned library package and its update marker/lock.
#[derive(Debug, Clone)]
pub struct Store {
    plugin_root: Utf8PathBuf,
    library_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, AnyVideoError> {
        let plugin_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.data_local_dir().join("anyvideo").join("plugin"))
                    .ok()
            })
            .ok_or_else(|| {
                AnyVideoError::Filesystem("unable to resolve plugin directory".to_string())
            })?;
        Ok(Self::from_plugin_root(plugin_root))
    }

    pub fn from_plugin_root(plugin_root: Utf8PathBuf) -> Self {
        let library_root = match plugin_root.parent() {
            Some(parent) => parent.join("lib"),
            None => plugin_root.join("lib"),
        };
        Self {
            plugin_root,
            library_root,
        }
    }

    pub fn new_with_paths(plugin_root: Utf8PathBuf, library_root: Utf8PathBuf) -> Self {
        Self {
            plugin_root,
            library_root,
        }
    }

    pub fn plugin_root(&self) -> &Utf8Path {
        &self.plugin_root
    }

    pub fn library_root(&self) -> &Utf8Path {
        &self.library_root
    }

    pub fn primary_binary(&self) -> Utf8PathBuf {
        self.plugin_root.join(executable_name("yt-dlp"))
    }

    pub fn archive_path(&self) -> Utf8PathBuf {
        self.plugin_root.join(ARCHIVE_FILE)
    }

    pub fn binary_path(&self, name: &str) -> Utf8PathBuf {
        self.plugin_root.join(name)
    }

    pub fn setup_lock_path(&self) -> Utf8PathBuf {
        self.plugin_root.join(SETUP_LOCK_FILE)
    }

    pub fn library_package_dir(&self, package: &str) -> Utf8PathBuf {
        self.library_root.join(package)
    }

    pub fn update_marker_path(&self) -> Utf8PathBuf {
        self.library_root.join(UPDATE_MARKER_FILE)
    }

    pub fn update_lock_path(&self) -> Utf8PathBuf {
        self.library_root.join(UPDATE_LOCK_FILE)
    }

    pub fn log_path(&self) -> Utf8PathBuf {
        self.plugin_root.join(LOG_FILE)
    }

    pub fn config_path(&self) -> Utf8PathBuf {
        self.plugin_root.join(CONFIG_FILE)
    }

    /// Location of a dependency asset. The binary pair resolves to the plugin
    /// root, where both executables are extracted side by side.
    pub fn asset_path(&self, kind: AssetKind, package: &str) -> Utf8PathBuf {
        match kind {
            AssetKind::ArchiveBundle => self.archive_path(),
            AssetKind::ExtractedBinaryPair => self.plugin_root.clone(),
            AssetKind::SelfUpdatingBinary => self.primary_binary(),
            AssetKind::VersionedLibrary => self.library_package_dir(package),
        }
    }

    /// Top-level names in the plugin root that belong to the plugin itself.
    /// Extra archive entries must not land on them.
    pub fn reserved_names(&self) -> Vec<String> {
        let owned = [
            self.archive_path(),
            self.primary_binary(),
            self.setup_lock_path(),
            self.log_path(),
            self.config_path(),
        ];
        owned
            .iter()
            .filter_map(|path| path.file_name().map(str::to_string))
            .collect()
    }

    pub fn ensure_plugin_root(&self) -> Result<(), AnyVideoError> {
        fs::create_dir_all(self.plugin_root.as_std_path())
            .map_err(|err| AnyVideoError::Filesystem(err.to_string()))
    }

    pub fn ensure_library_root(&self) -> Result<(), AnyVideoError> {
        fs::create_dir_all(self.library_root.as_std_path())
            .map_err(|err| AnyVideoError::Filesystem(err.to_string()))
    }
}

/// Appends the platform executable suffix (`.exe` on Windows).
pub fn executable_name(stem: &str) -> String {
    format!("{stem}{}", std::env::consts::EXE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::from_plugin_root(Utf8PathBuf::from("/opt/launcher/anyvideo/plugin"));
        assert_eq!(store.library_root(), "/opt/launcher/anyvideo/lib");
        assert!(store.archive_path().ends_with("plugin/ffmpeg.zip"));
        assert!(store.setup_lock_path().ends_with("plugin/ffmpeg_setup.lock"));
        assert!(store.update_marker_path().ends_with("lib/.ytdlp_last_update"));
        assert!(store.update_lock_path().ends_with("lib/.ytdlp_updating"));
        assert_eq!(
            store.asset_path(AssetKind::VersionedLibrary, "yt_dlp"),
            store.library_root().join("yt_dlp")
        );
        assert_eq!(
            store.asset_path(AssetKind::SelfUpdatingBinary, "yt_dlp"),
            store.primary_binary()
        );
    }

    #[test]
    fn reserved_names_cover_plugin_files() {
        let store = Store::from_plugin_root(Utf8PathBuf::from("/opt/launcher/anyvideo/plugin"));
        let reserved = store.reserved_names();
        for name in [ARCHIVE_FILE, SETUP_LOCK_FILE, LOG_FILE, CONFIG_FILE] {
            assert!(reserved.contains(&name.to_string()), "{name}");
        }
        assert!(reserved.contains(&executable_name("yt-dlp")));
    }
}
