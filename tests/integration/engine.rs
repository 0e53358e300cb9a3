use crate::common::{RangeResponder, RawServer, RecordingLauncher, payload};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use updatekit::download::DownloadOutcome;
use updatekit::engine::{EngineOptions, SKIPPED_MESSAGE, UpdateEngine};
use updatekit::events::UpdateEvent;
use updatekit::install::{FixedAnswer, InstallOutcome};
use updatekit::store::{FsStore, MemoryStore, RecordStore};
use updatekit::test_utils::init_test_logging;
use updatekit::version_check::{CheckOutcome, VersionPolicy};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn release_server(version: &str, body: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;
    let url = format!("{}/hello-{}", server.uri(), version);
    Mock::given(method("GET"))
        .and(path("/version.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "latest_version": version,
            "url": url,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/hello-{version}")))
        .respond_with(RangeResponder { body })
        .mount(&server)
        .await;
    server
}

fn options(temp: &TempDir, server: &MockServer, current: &str) -> EngineOptions {
    init_test_logging(None);
    let mut options = EngineOptions::new(
        "Hello",
        current,
        format!("{}/version.json", server.uri()),
        temp.path().join("data"),
    );
    options.current_exe = Some(temp.path().join("bin").join("hello"));
    options.download.retry_delay = Duration::from_millis(20);
    options
}

#[tokio::test]
async fn test_check_reports_update_and_gates_next_check() -> Result<()> {
    let server = release_server("1.2.0", payload(1000)).await;
    let temp = TempDir::new()?;
    let engine = UpdateEngine::with_parts(
        options(&temp, &server, "1.1.1"),
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingLauncher::default()),
    )?;
    let mut events = engine.subscribe();

    let outcome = engine.check_now(false).await;
    assert_eq!(
        outcome,
        Some(CheckOutcome::UpdateAvailable {
            version: "1.2.0".into(),
            url: format!("{}/hello-1.2.0", server.uri()),
        })
    );
    assert!(matches!(events.recv().await?, UpdateEvent::UpdateFound { .. }));
    assert_eq!(
        events.recv().await?,
        UpdateEvent::CheckComplete {
            success: true,
            message: "Update found: 1.2.0".into(),
        }
    );

    assert_eq!(engine.check_now(false).await, None);
    assert_eq!(
        events.recv().await?,
        UpdateEvent::CheckComplete {
            success: true,
            message: SKIPPED_MESSAGE.into(),
        }
    );

    // A forced check ignores the interval.
    assert!(engine.check_now(true).await.is_some());
    Ok(())
}

#[tokio::test]
async fn test_same_version_is_up_to_date() -> Result<()> {
    let server = release_server("1.2.0", payload(10)).await;
    let temp = TempDir::new()?;
    let engine = UpdateEngine::with_parts(
        options(&temp, &server, "1.2.0"),
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingLauncher::default()),
    )?;

    assert_eq!(engine.check_now(true).await, Some(CheckOutcome::UpToDate));
    Ok(())
}

#[tokio::test]
async fn test_newer_policy_ignores_older_manifest() -> Result<()> {
    let server = release_server("1.0.0", payload(10)).await;
    let temp = TempDir::new()?;

    let mut exact = options(&temp, &server, "1.1.1");
    exact.version_policy = VersionPolicy::Exact;
    let engine = UpdateEngine::with_parts(exact, Arc::new(MemoryStore::new()), Arc::new(RecordingLauncher::default()))?;
    assert!(matches!(engine.check_now(true).await, Some(CheckOutcome::UpdateAvailable { .. })));

    let mut newer = options(&temp, &server, "1.1.1");
    newer.version_policy = VersionPolicy::Newer;
    let engine = UpdateEngine::with_parts(newer, Arc::new(MemoryStore::new()), Arc::new(RecordingLauncher::default()))?;
    assert_eq!(engine.check_now(true).await, Some(CheckOutcome::UpToDate));
    Ok(())
}

/// Check, download, decline the restart, then pick the update up at the next
/// startup from the records on disk.
#[tokio::test]
async fn test_declined_install_is_offered_at_next_startup() -> Result<()> {
    let body = payload(200_000);
    let server = release_server("1.2.0", body.clone()).await;
    let temp = TempDir::new()?;
    std::fs::create_dir_all(temp.path().join("bin"))?;
    std::fs::write(temp.path().join("bin").join("hello"), b"old")?;

    let store: Arc<dyn RecordStore> = Arc::new(FsStore::new(temp.path().join("data")));
    let launcher = Arc::new(RecordingLauncher::default());
    let engine = UpdateEngine::with_parts(options(&temp, &server, "1.1.1"), store.clone(), launcher.clone())?;

    let Some(CheckOutcome::UpdateAvailable { version, url }) = engine.check_now(false).await else {
        panic!("expected an update");
    };
    engine.start_download(&url, &version)?;
    let Some(DownloadOutcome::Completed(path)) = engine.wait_for_download().await? else {
        panic!("expected a completed download");
    };
    assert!(std::fs::read(&path)? == body);

    let outcome = engine.install_ready(&path, &version, true, &FixedAnswer(false))?;
    assert_eq!(outcome, InstallOutcome::Deferred);
    assert_eq!(std::fs::read(temp.path().join("bin").join("hello"))?, b"old");
    assert!(launcher.launched.lock().unwrap().is_empty());
    drop(engine);

    // Next process start.
    let engine = UpdateEngine::with_parts(options(&temp, &server, "1.1.1"), store, launcher.clone())?;
    let pending = engine.pending_update().expect("pending update survives restart");
    assert_eq!(pending.version, "1.2.0");
    assert_ne!(pending.new_exe_path, path);
    assert!(std::fs::read(&pending.new_exe_path)? == body);

    let outcome = engine.install_pending()?;
    assert!(matches!(outcome, Some(InstallOutcome::HelperLaunched { .. })));
    assert_eq!(launcher.launched.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_discarded_pending_update_removes_download() -> Result<()> {
    let server = release_server("1.2.0", payload(10)).await;
    let temp = TempDir::new()?;
    std::fs::create_dir_all(temp.path().join("bin"))?;
    std::fs::write(temp.path().join("bin").join("hello"), b"old")?;
    let download = temp.path().join("hello_new");
    std::fs::write(&download, b"new")?;

    let engine = UpdateEngine::with_parts(
        options(&temp, &server, "1.1.1"),
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingLauncher::default()),
    )?;
    engine.install_ready(&download, "1.2.0", true, &FixedAnswer(false))?;
    assert!(engine.pending_update().is_some());

    let staged = engine.pending_update().map(|p| p.new_exe_path).expect("pending update");

    engine.discard_pending()?;
    assert!(engine.pending_update().is_none());
    assert!(!download.exists());
    assert!(!staged.exists());
    Ok(())
}

/// A deferred update keeps its executable intact when the same release is
/// downloaded again in the same session and that transfer is interrupted.
#[tokio::test]
async fn test_deferred_update_survives_interrupted_redownload() -> Result<()> {
    let body = payload(2 * 1024 * 1024);
    let raw = RawServer::throttled(body.clone(), Duration::from_millis(10)).await?;
    let server = release_server("1.2.0", payload(10)).await;
    let temp = TempDir::new()?;
    std::fs::create_dir_all(temp.path().join("bin"))?;
    std::fs::write(temp.path().join("bin").join("hello"), b"old")?;

    let store: Arc<dyn RecordStore> = Arc::new(FsStore::new(temp.path().join("data")));
    let engine = UpdateEngine::with_parts(
        options(&temp, &server, "1.1.1"),
        store.clone(),
        Arc::new(RecordingLauncher::default()),
    )?;

    // A finished download whose install is deferred.
    let target = engine.options().download.target.clone();
    std::fs::create_dir_all(temp.path().join("data"))?;
    std::fs::write(&target, &body)?;
    let outcome = engine.install_ready(&target, "1.2.0", true, &FixedAnswer(false))?;
    assert_eq!(outcome, InstallOutcome::Deferred);

    // The next scheduled check finds the same release and starts over.
    let mut events = engine.subscribe();
    engine.start_download(&raw.url, "1.2.0")?;
    while !matches!(events.recv().await?, UpdateEvent::Progress(p) if p.downloaded > 0) {}
    tokio::time::timeout(Duration::from_secs(10), engine.shutdown()).await?;
    drop(engine);

    let engine = UpdateEngine::with_parts(
        options(&temp, &server, "1.1.1"),
        store,
        Arc::new(RecordingLauncher::default()),
    )?;
    let pending = engine.pending_update().expect("deferred update is still offered");
    assert_ne!(pending.new_exe_path, target);
    assert_eq!(pending.expected_len, Some(body.len() as u64));
    assert!(std::fs::read(&pending.new_exe_path)? == body);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_checkpoints_running_download() -> Result<()> {
    let body = payload(2 * 1024 * 1024);
    let raw = RawServer::throttled(body.clone(), Duration::from_millis(10)).await?;
    let server = release_server("1.2.0", payload(10)).await;
    let temp = TempDir::new()?;
    let engine = UpdateEngine::with_parts(
        options(&temp, &server, "1.1.1"),
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingLauncher::default()),
    )?;
    let mut events = engine.subscribe();

    engine.start_download(&raw.url, "1.2.0")?;
    assert!(engine.is_downloading());
    assert!(engine.start_download(&raw.url, "1.2.0").is_err());

    while !matches!(events.recv().await?, UpdateEvent::Progress(p) if p.downloaded > 0) {}
    tokio::time::timeout(Duration::from_secs(10), engine.shutdown()).await?;
    assert!(!engine.is_downloading());

    let state = engine.resumable_download().expect("shutdown leaves a checkpoint");
    assert_eq!(state.url, raw.url);
    assert!(state.bytes_downloaded > 0 && state.bytes_downloaded < body.len() as u64);
    assert_eq!(std::fs::metadata(&state.file_path)?.len(), state.bytes_downloaded);

    // Control calls need a running download.
    assert!(engine.pause().is_err());
    Ok(())
}
