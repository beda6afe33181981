use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;

use anyvideo::config::{CachedSettings, Config, ConfigLoader};
use anyvideo::domain::SortKey;
use anyvideo::error::AnyVideoError;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let downloads = temp.path().join("videos");
    fs::create_dir_all(&downloads).unwrap();
    let path = temp.path().join("anyvideo.json");
    let content = serde_json::json!({
        "download_path": downloads.to_string_lossy(),
        "sort": "filesize",
        "highlight_best": true,
        "update_interval_days": 3,
        "required_binaries": ["ffmpeg", "ffprobe"],
        "setup_lock_staleness_secs": 120
    });
    fs::write(&path, content.to_string()).unwrap();

    let resolved = ConfigLoader::resolve(Some(&path), &temp.path().join("unused.json")).unwrap();
    assert_eq!(resolved.download_path.as_std_path(), downloads);
    assert_eq!(resolved.query.sort, SortKey::FileSize);
    assert!(resolved.query.highlight_best);
    assert!(resolved.query.auto_provision);
    assert_eq!(resolved.update.interval_days, 3);
    assert_eq!(resolved.provision.lock_staleness, Duration::from_secs(120));
    assert_eq!(resolved.update.library_package, "yt_dlp");
}

#[test]
fn missing_default_file_yields_defaults() {
    let temp = tempfile::tempdir().unwrap();
    let resolved = ConfigLoader::resolve(None, &temp.path().join("anyvideo.json")).unwrap();
    let defaults = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert_eq!(resolved, defaults);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nope.json");
    let err = ConfigLoader::resolve(Some(&path), &path).unwrap_err();
    assert_matches!(err, AnyVideoError::ConfigRead(_));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("anyvideo.json");
    fs::write(&path, b"{ \"sort\": \"loudness\" }").unwrap();
    let err = ConfigLoader::resolve(None, &path).unwrap_err();
    assert_matches!(err, AnyVideoError::ConfigParse(_));
}

#[test]
fn cached_settings_refresh_only_when_stale() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("anyvideo.json");
    let ttl = Duration::from_secs(60);
    let start = Utc::now();

    let cached = ConfigLoader::refresh(None, None, &path, ttl, start).unwrap();
    assert_eq!(cached.value.query.sort, SortKey::Resolution);

    fs::write(&path, br#"{ "sort": "bitrate" }"#).unwrap();
    let still_fresh =
        ConfigLoader::refresh(Some(cached.clone()), None, &path, ttl, start + chrono::Duration::seconds(30))
            .unwrap();
    assert_eq!(still_fresh.value.query.sort, SortKey::Resolution);
    assert_eq!(still_fresh.fetched_at, start);

    let later = start + chrono::Duration::seconds(61);
    let reloaded: CachedSettings =
        ConfigLoader::refresh(Some(still_fresh), None, &path, ttl, later).unwrap();
    assert_eq!(reloaded.value.query.sort, SortKey::Bitrate);
    assert_eq!(reloaded.fetched_at, later);
}
