use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;

use anyvideo::app::{
    App, METHOD_DOWNLOAD, METHOD_DOWNLOAD_ARCHIVE, METHOD_LAUNCH_UPDATE, METHOD_SKIP_UPDATE,
};
use anyvideo::config::{Config, ConfigLoader, ResolvedConfig};
use anyvideo::domain::{Notice, ProvisioningOutcome, VideoUrl};
use anyvideo::error::AnyVideoError;
use anyvideo::lock::AdvisoryLock;
use anyvideo::media::{MediaExtractor, MediaInfo, RawFormat};
use anyvideo::process::{DetachedTask, Launcher};
use anyvideo::store::Store;
use anyvideo::update::UpdateScheduler;

struct MockExtractor {
    response: Result<MediaInfo, AnyVideoError>,
    calls: Mutex<usize>,
}

impl MockExtractor {
    fn returning(response: Result<MediaInfo, AnyVideoError>) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

/// Local wrapper so the crate's traits can be implemented over a shared mock
/// (the orphan rule forbids implementing them for `Arc<_>` directly).
struct Shared<T>(Arc<T>);

impl MediaExtractor for Shared<MockExtractor> {
    fn try_extract_info(&self, _url: &VideoUrl) -> Result<MediaInfo, AnyVideoError> {
        *self.0.calls.lock().unwrap() += 1;
        self.0.response.clone()
    }
}

#[derive(Default)]
struct MockLauncher {
    launched: Mutex<Vec<DetachedTask>>,
}

impl MockLauncher {
    fn launched(&self) -> Vec<DetachedTask> {
        self.launched.lock().unwrap().clone()
    }
}

impl Launcher for Shared<MockLauncher> {
    fn launch(&self, task: DetachedTask) -> ProvisioningOutcome {
        self.0.launched.lock().unwrap().push(task);
        ProvisioningOutcome::Ready
    }
}

type TestApp = App<Shared<MockExtractor>, Shared<MockLauncher>>;

struct Fixture {
    _temp: tempfile::TempDir,
    store: Store,
    config: ResolvedConfig,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let downloads = root.join("Downloads");
        fs::create_dir_all(&downloads).unwrap();
        let store = Store::from_plugin_root(root.join("plugin"));
        store.ensure_plugin_root().unwrap();
        store.ensure_library_root().unwrap();

        let mut config = ConfigLoader::resolve_config(Config {
            download_path: Some(downloads.to_string()),
            ..Config::default()
        })
        .unwrap();
        config.provision.required_binaries = vec!["ffmpeg".to_string(), "ffprobe".to_string()];

        Self {
            _temp: temp,
            store,
            config,
        }
    }

    fn with_binaries(self) -> Self {
        for name in &self.config.provision.required_binaries {
            fs::write(self.store.binary_path(name).as_std_path(), b"binary").unwrap();
        }
        self
    }

    fn with_current_library(self) -> Self {
        fs::create_dir_all(self.store.library_package_dir("yt_dlp").as_std_path()).unwrap();
        let scheduler = UpdateScheduler::for_library(&self.store, &self.config.update);
        assert!(scheduler.record_updated(Some("2025.01.15".to_string())).is_ok());
        self
    }

    fn app(&self, extractor: &Arc<MockExtractor>) -> (TestApp, Arc<MockLauncher>) {
        let launcher = Arc::new(MockLauncher::default());
        let app = App::new(
            self.store.clone(),
            Shared(extractor.clone()),
            Shared(launcher.clone()),
        );
        (app, launcher)
    }
}

fn format(id: &str, resolution: Option<&str>, tbr: Option<f64>) -> RawFormat {
    RawFormat {
        format_id: id.to_string(),
        resolution: resolution.map(str::to_string),
        tbr,
        ext: Some("mp4".to_string()),
        ..RawFormat::default()
    }
}

fn media(formats: Vec<RawFormat>) -> MediaInfo {
    MediaInfo {
        title: "Sample clip".to_string(),
        thumbnail: Some("https://img.example.com/thumb.jpg".to_string()),
        formats,
    }
}

#[test]
fn empty_query_names_download_path() {
    let fixture = Fixture::new().with_binaries().with_current_library();
    let extractor = MockExtractor::returning(Ok(media(Vec::new())));
    let (app, _) = fixture.app(&extractor);

    let result = app.query("   ", &fixture.config);
    assert_eq!(result.result.len(), 1);
    let subtitle = result.result[0].subtitle.clone().unwrap();
    assert!(subtitle.contains(fixture.config.download_path.as_str()));
    assert!(result.result[0].action.is_none());
    assert_eq!(extractor.calls(), 0);
}

#[test]
fn empty_query_on_fresh_install_is_one_entry() {
    let fixture = Fixture::new().with_binaries();
    assert!(!fixture.store.library_package_dir("yt_dlp").as_std_path().exists());
    let extractor = MockExtractor::returning(Ok(media(Vec::new())));
    let (app, launcher) = fixture.app(&extractor);

    let result = app.query("", &fixture.config);
    assert_eq!(result.result.len(), 1);
    assert_eq!(result.result[0].title, "Please input the URL of the video");
    assert!(
        result.result[0]
            .subtitle
            .as_deref()
            .unwrap()
            .contains(fixture.config.download_path.as_str())
    );
    assert!(launcher.launched().is_empty());
}

#[test]
fn due_update_follows_ranked_formats() {
    let fixture = Fixture::new().with_binaries();
    let extractor = MockExtractor::returning(Ok(media(vec![
        format("18", Some("640x360"), Some(600.0)),
        format("137", Some("1920x1080"), Some(4400.0)),
    ])));
    let (app, _) = fixture.app(&extractor);

    let result = app.query("https://example.com/watch?v=1", &fixture.config);
    let methods: Vec<&str> = result
        .result
        .iter()
        .map(|entry| entry.action.as_ref().unwrap().method.as_str())
        .collect();
    assert_eq!(
        methods,
        vec![
            METHOD_DOWNLOAD,
            METHOD_DOWNLOAD,
            METHOD_LAUNCH_UPDATE,
            METHOD_SKIP_UPDATE
        ]
    );

    fs::create_dir_all(fixture.store.library_package_dir("yt_dlp").as_std_path()).unwrap();
    assert!(app.skip_library_update(&fixture.config).is_ok());
    let result = app.query("https://example.com/watch?v=1", &fixture.config);
    assert_eq!(result.result.len(), 2);

    let update_lock = AdvisoryLock::new(fixture.store.update_lock_path());
    fs::remove_file(fixture.store.update_marker_path().as_std_path()).unwrap();
    assert!(update_lock.acquire(fixture.config.update.lock_staleness).is_ok());
    let result = app.query("https://example.com/watch?v=1", &fixture.config);
    assert_eq!(result.result.len(), 2);
}

#[test]
fn invalid_url_is_rejected_without_extraction() {
    let fixture = Fixture::new().with_binaries().with_current_library();
    let extractor = MockExtractor::returning(Ok(media(Vec::new())));
    let (app, _) = fixture.app(&extractor);

    let result = app.query("not-a-url", &fixture.config);
    assert_eq!(result.result.len(), 1);
    assert_eq!(result.result[0].title, "Please check the URL for errors.");
    assert_eq!(extractor.calls(), 0);
}

#[test]
fn extraction_failure_is_one_advisory() {
    let fixture = Fixture::new().with_binaries().with_current_library();
    let extractor = MockExtractor::returning(Err(AnyVideoError::MediaExtraction(
        "ERROR: Unsupported URL".to_string(),
    )));
    let (app, _) = fixture.app(&extractor);

    let result = app.query("https://example.com/watch?v=1", &fixture.config);
    assert_eq!(result.result.len(), 1);
    assert!(
        result.result[0]
            .subtitle
            .as_deref()
            .unwrap()
            .contains("Unsupported URL")
    );
}

#[test]
fn no_eligible_formats_is_one_advisory() {
    let fixture = Fixture::new().with_binaries().with_current_library();
    let extractor = MockExtractor::returning(Ok(media(vec![
        format("sb0", Some("48x27"), None),
        format("x", None, Some(120.0)),
    ])));
    let (app, _) = fixture.app(&extractor);

    let result = app.query("https://example.com/watch?v=1", &fixture.config);
    assert_eq!(result.result.len(), 1);
    assert_eq!(result.result[0].title, "Couldn't find any video formats.");
    assert_eq!(extractor.calls(), 1);
}

#[test]
fn formats_are_ranked_with_download_actions() {
    let fixture = Fixture::new().with_binaries().with_current_library();
    let extractor = MockExtractor::returning(Ok(media(vec![
        format("140", Some("audio only"), Some(129.5)),
        format("18", Some("640x360"), Some(600.0)),
        format("137", Some("1920x1080"), Some(4400.0)),
        format("sb0", Some("48x27"), None),
    ])));
    let (app, _) = fixture.app(&extractor);

    let result = app.query("https://example.com/watch?v=1", &fixture.config);
    let ids: Vec<&str> = result
        .result
        .iter()
        .map(|entry| entry.action.as_ref().unwrap().parameters[1].as_str())
        .collect();
    assert_eq!(ids, vec!["137", "18", "140"]);

    let action = result.result[0].action.as_ref().unwrap();
    assert_eq!(action.method, METHOD_DOWNLOAD);
    assert_eq!(
        action.parameters,
        vec![
            "https://example.com/watch?v=1".to_string(),
            "137".to_string(),
            fixture.config.download_path.to_string(),
        ]
    );
    assert_eq!(result.result[0].title, "Sample clip");
    assert_eq!(result.result[0].icon, "https://img.example.com/thumb.jpg");
    assert_eq!(
        result.result[0].subtitle.as_deref(),
        Some("1920x1080 (4400 kbps) ┃ Format: mp4")
    );
}

#[test]
fn highlight_best_prepends_video_and_audio() {
    let mut fixture = Fixture::new().with_binaries().with_current_library();
    fixture.config.query.highlight_best = true;
    let extractor = MockExtractor::returning(Ok(media(vec![
        format("140", Some("audio only"), Some(129.5)),
        format("137", Some("1920x1080"), Some(4400.0)),
    ])));
    let (app, _) = fixture.app(&extractor);

    let result = app.query("https://example.com/watch?v=1", &fixture.config);
    assert_eq!(result.result.len(), 4);
    assert!(result.result[0].title.starts_with("Best video"));
    assert!(result.result[1].title.starts_with("Best audio"));
}

#[test]
fn missing_dependency_returns_only_provisioning_advisory() {
    let fixture = Fixture::new().with_current_library();
    let extractor = MockExtractor::returning(Ok(media(vec![format(
        "137",
        Some("1920x1080"),
        Some(4400.0),
    )])));
    let (app, launcher) = fixture.app(&extractor);

    for text in ["", "not-a-url", "https://example.com/watch?v=1"] {
        let result = app.query(text, &fixture.config);
        assert_eq!(result.result.len(), 1, "query {text:?}");
        let action = result.result[0].action.as_ref().unwrap();
        assert_eq!(action.method, METHOD_DOWNLOAD_ARCHIVE);
    }
    assert_eq!(extractor.calls(), 0);
    assert_eq!(launcher.launched(), vec![DetachedTask::Setup; 3]);
}

#[test]
fn auto_provision_can_be_disabled() {
    let mut fixture = Fixture::new().with_current_library();
    fixture.config.query.auto_provision = false;
    let extractor = MockExtractor::returning(Ok(media(Vec::new())));
    let (app, launcher) = fixture.app(&extractor);

    let result = app.query("https://example.com/watch?v=1", &fixture.config);
    assert!(
        result.result[0]
            .subtitle
            .as_deref()
            .unwrap()
            .contains("Select to download")
    );
    assert!(launcher.launched().is_empty());

    assert_eq!(
        app.download_archive_binaries(&fixture.config),
        ProvisioningOutcome::Ready
    );
    assert_eq!(launcher.launched(), vec![DetachedTask::Setup]);
}

#[test]
fn setup_in_progress_reports_without_relaunching() {
    let fixture = Fixture::new().with_current_library();
    let lock = AdvisoryLock::new(fixture.store.setup_lock_path());
    assert!(lock.acquire(fixture.config.provision.lock_staleness).is_ok());
    let extractor = MockExtractor::returning(Ok(media(Vec::new())));
    let (app, launcher) = fixture.app(&extractor);

    let result = app.query("https://example.com/watch?v=1", &fixture.config);
    assert_eq!(result.result.len(), 1);
    assert!(result.result[0].action.is_none());
    assert_eq!(
        app.download_archive_binaries(&fixture.config),
        ProvisioningOutcome::ReadyWith(Notice::SetupInProgress)
    );
    assert!(launcher.launched().is_empty());
}

#[test]
fn pending_archive_is_extracted_inline() {
    let fixture = Fixture::new().with_current_library();
    let file = fs::File::create(fixture.store.archive_path().as_std_path()).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for name in ["bin/ffmpeg", "bin/ffprobe"] {
        writer
            .start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"binary").unwrap();
    }
    writer.finish().unwrap();

    let extractor = MockExtractor::returning(Ok(media(vec![format(
        "137",
        Some("1920x1080"),
        Some(4400.0),
    )])));
    let (app, launcher) = fixture.app(&extractor);

    let result = app.query("https://example.com/watch?v=1", &fixture.config);
    assert_eq!(result.result.len(), 1);
    assert_eq!(
        result.result[0].action.as_ref().unwrap().method,
        METHOD_DOWNLOAD
    );
    assert!(fixture.store.binary_path("ffmpeg").as_std_path().exists());
    assert!(!fixture.store.archive_path().as_std_path().exists());
    assert!(launcher.launched().is_empty());
}

#[test]
fn actions_are_safe_to_repeat() {
    let fixture = Fixture::new().with_binaries().with_current_library();
    let extractor = MockExtractor::returning(Ok(media(Vec::new())));
    let (app, launcher) = fixture.app(&extractor);

    for _ in 0..2 {
        assert_eq!(
            app.download_archive_binaries(&fixture.config),
            ProvisioningOutcome::ReadyWith(Notice::AlreadyReady)
        );
        assert!(app.skip_library_update(&fixture.config).is_ok());
    }

    let update_lock = AdvisoryLock::new(fixture.store.update_lock_path());
    assert!(update_lock.acquire(fixture.config.update.lock_staleness).is_ok());
    assert!(!app.launch_library_update(&fixture.config).is_ok());
    update_lock.release();
    assert!(app.launch_library_update(&fixture.config).is_ok());
    assert_eq!(launcher.launched(), vec![DetachedTask::Update]);
}

#[test]
fn download_rejects_invalid_url() {
    let fixture = Fixture::new().with_binaries().with_current_library();
    let extractor = MockExtractor::returning(Ok(media(Vec::new())));
    let (app, _) = fixture.app(&extractor);

    let err = app
        .download("not-a-url", "137", None, &fixture.config)
        .unwrap_err();
    assert!(matches!(err, AnyVideoError::InvalidUrl(_)));

    let err = app
        .download("https://example.com/watch?v=1", "137", None, &fixture.config)
        .unwrap_err();
    assert!(matches!(err, AnyVideoError::BinaryMissing { .. }));
}

#[test]
fn status_reports_dependency_state() {
    let fixture = Fixture::new().with_binaries().with_current_library();
    let extractor = MockExtractor::returning(Ok(media(Vec::new())));
    let (app, _) = fixture.app(&extractor);

    let status = app.status(&fixture.config);
    assert_eq!(status.dependency, "ready");
    assert!(status.ready);
    assert!(!status.update_due);
    assert!(!status.update_in_progress);
}
