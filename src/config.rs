use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use directories::{BaseDirs, UserDirs};
use serde::{Deserialize, Serialize};

use crate::domain::SortKey;
use crate::error::AnyVideoError;
use crate::store::executable_name;

pub const DEFAULT_ARCHIVE_URL: &str =
    "https://github.com/z1nc0r3/ffmpeg-binaries/blob/main/ffmpeg-bin.zip?raw=true";
pub const DEFAULT_PACKAGE_INDEX_URL: &str = "https://pypi.org/pypi/yt-dlp/json";
pub const DEFAULT_DISTRIBUTABLE_SUFFIX: &str = "-py3-none-any.whl";
pub const DEFAULT_LIBRARY_PACKAGE: &str = "yt_dlp";
pub const DEFAULT_UPDATE_INTERVAL_DAYS: u32 = 10;
pub const DEFAULT_SETUP_LOCK_STALENESS_SECS: u64 = 600;
pub const DEFAULT_UPDATE_LOCK_STALENESS_SECS: u64 = 300;

/// Settings file as stored on disk. Every key is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub download_path: Option<String>,
    #[serde(default)]
    pub archive_url: Option<String>,
    #[serde(default)]
    pub package_index_url: Option<String>,
    #[serde(default)]
    pub distributable_suffix: Option<String>,
    #[serde(default)]
    pub library_package: Option<String>,
    #[serde(default)]
    pub required_binaries: Option<Vec<String>>,
    #[serde(default)]
    pub update_interval_days: Option<u32>,
    #[serde(default)]
    pub setup_lock_staleness_secs: Option<u64>,
    #[serde(default)]
    pub update_lock_staleness_secs: Option<u64>,
    #[serde(default)]
    pub sort: Option<SortKey>,
    #[serde(default)]
    pub highlight_best: Option<bool>,
    #[serde(default)]
    pub auto_provision: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionSettings {
    pub archive_url: String,
    pub required_binaries: Vec<String>,
    pub lock_staleness: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSettings {
    pub package_index_url: String,
    pub distributable_suffix: String,
    pub library_package: String,
    pub interval_days: u32,
    pub lock_staleness: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySettings {
    pub sort: SortKey,
    pub highlight_best: bool,
    pub auto_provision: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub download_path: Utf8PathBuf,
    pub provision: ProvisionSettings,
    pub update: UpdateSettings,
    pub query: QuerySettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the settings file. A missing default file yields defaults; a
    /// missing file named explicitly is an error.
    pub fn resolve(path: Option<&Path>, default_path: &Path) -> Result<ResolvedConfig, AnyVideoError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => default_path.to_path_buf(),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| AnyVideoError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| AnyVideoError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, AnyVideoError> {
        let download_path = match config
            .download_path
            .map(Utf8PathBuf::from)
            .filter(|path| path.as_std_path().is_dir())
        {
            Some(path) => path,
            None => default_download_path()?,
        };

        let required_binaries = config
            .required_binaries
            .filter(|names| !names.is_empty())
            .unwrap_or_else(default_required_binaries);

        Ok(ResolvedConfig {
            download_path,
            provision: ProvisionSettings {
                archive_url: config
                    .archive_url
                    .unwrap_or_else(|| DEFAULT_ARCHIVE_URL.to_string()),
                required_binaries,
                lock_staleness: Duration::from_secs(
                    config
                        .setup_lock_staleness_secs
                        .unwrap_or(DEFAULT_SETUP_LOCK_STALENESS_SECS),
                ),
            },
            update: UpdateSettings {
                package_index_url: config
                    .package_index_url
                    .unwrap_or_else(|| DEFAULT_PACKAGE_INDEX_URL.to_string()),
                distributable_suffix: config
                    .distributable_suffix
                    .unwrap_or_else(|| DEFAULT_DISTRIBUTABLE_SUFFIX.to_string()),
                library_package: config
                    .library_package
                    .unwrap_or_else(|| DEFAULT_LIBRARY_PACKAGE.to_string()),
                interval_days: config
                    .update_interval_days
                    .unwrap_or(DEFAULT_UPDATE_INTERVAL_DAYS),
                lock_staleness: Duration::from_secs(
                    config
                        .update_lock_staleness_secs
                        .unwrap_or(DEFAULT_UPDATE_LOCK_STALENESS_SECS),
                ),
            },
            query: QuerySettings {
                sort: config.sort.unwrap_or_default(),
                highlight_best: config.highlight_best.unwrap_or(false),
                auto_provision: config.auto_provision.unwrap_or(true),
            },
        })
    }

    /// Returns `cache` untouched while it is fresh, otherwise reloads from disk.
    pub fn refresh(
        cache: Option<CachedSettings>,
        path: Option<&Path>,
        default_path: &Path,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<CachedSettings, AnyVideoError> {
        if let Some(cache) = cache {
            if cache.is_fresh(now, ttl) {
                return Ok(cache);
            }
        }
        Ok(CachedSettings {
            value: Self::resolve(path, default_path)?,
            fetched_at: now,
        })
    }
}

/// Settings value together with the moment it was read. The owner decides
/// when to refresh it.
#[derive(Debug, Clone)]
pub struct CachedSettings {
    pub value: ResolvedConfig,
    pub fetched_at: DateTime<Utc>,
}

impl CachedSettings {
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.fetched_at) < ttl,
            Err(_) => true,
        }
    }
}

pub fn default_required_binaries() -> Vec<String> {
    vec![executable_name("ffmpeg"), executable_name("ffprobe")]
}

pub fn default_download_path() -> Result<Utf8PathBuf, AnyVideoError> {
    let downloads: Option<PathBuf> = UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .or_else(|| BaseDirs::new().map(|dirs| dirs.home_dir().join("Downloads")));
    downloads
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .ok_or_else(|| {
            AnyVideoError::Filesystem("unable to resolve downloads directory".to_string())
        })
}
