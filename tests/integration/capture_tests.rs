//! Integration tests for complete capture runs
//!
//! The renderer is a small /bin/sh script written into a temp dir, so these
//! tests only run on unix.

#![cfg(unix)]

use html_snapshots::config::{Config, PerUrl, RendererConfig, Source};
use html_snapshots::{ConfigError, InputKind, SnapshotError};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Renderer that registers itself in a census dir (last argument), works for
/// a while, then writes its output file
const CENSUS_RENDERER: &str = r#"
census="$6"
touch "$census/$$"
sleep 0.3
echo "<html><body>$2</body></html>" > "$1"
rm -f "$census/$$"
"#;

/// Creates a config capturing `urls` from a text file with a stub renderer
fn create_test_config(dir: &Path, urls: &[&str], script: &str) -> Config {
    let list = dir.join("urls.txt");
    std::fs::write(&list, urls.join("\n")).unwrap();

    let renderer = dir.join("render.sh");
    std::fs::write(&renderer, script).unwrap();

    let mut config = Config::default();
    config.input.kind = InputKind::Textfile;
    config.input.source = Source::One(list.to_str().unwrap().to_string());
    config.output.dir = dir.join("snapshots").to_str().unwrap().to_string();
    config.capture.poll_interval = 25;
    config.renderer = RendererConfig {
        program: "/bin/sh".to_string(),
        snapshot_script: Some(renderer),
        args: Vec::new(),
    };
    config
}

/// Runs with the census renderer and returns the highest number of renderer
/// processes seen alive at once
async fn run_with_census(limit: i64, pages: usize) -> usize {
    let dir = tempfile::tempdir().unwrap();
    let census = dir.path().join("census");
    std::fs::create_dir_all(&census).unwrap();

    let urls: Vec<String> = (0..pages).map(|i| format!("/page-{}", i)).collect();
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    let mut config = create_test_config(dir.path(), &url_refs, CENSUS_RENDERER);
    config.capture.process_limit = limit;
    config.renderer.args = vec![census.to_str().unwrap().to_string()];

    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let (peak, done, census) = (peak.clone(), done.clone(), census.clone());
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                if let Ok(entries) = std::fs::read_dir(&census) {
                    peak.fetch_max(entries.count(), Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    let result = html_snapshots::run(config).await.expect("run should succeed");
    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();

    assert_eq!(result.completed.len(), pages);
    for file in &result.completed {
        let html = std::fs::read_to_string(file).unwrap();
        assert!(html.contains("http://localhost/page-"));
    }
    peak.load(Ordering::SeqCst)
}

#[tokio::test]
async fn test_full_run_with_single_process() {
    let peak = run_with_census(1, 3).await;
    assert_eq!(peak, 1);
}

#[tokio::test]
async fn test_process_limit_bounds_concurrency() {
    let peak = run_with_census(2, 6).await;
    assert!(peak >= 1 && peak <= 2, "peak was {}", peak);
}

#[tokio::test]
async fn test_unbounded_runs_everything() {
    let peak = run_with_census(0, 4).await;
    assert!(peak >= 1 && peak <= 4, "peak was {}", peak);
}

#[tokio::test]
async fn test_renderer_that_never_writes_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path(), &["/a", "/b"], "exit 0\n");
    config.capture.timeout = PerUrl::Global(200);

    let err = html_snapshots::run(config).await.unwrap_err();
    assert!(err.error.is_none());
    assert!(err.completed.is_empty());
    assert_eq!(err.not_completed.len(), 2);
}

#[tokio::test]
async fn test_hung_renderer_does_not_block_run() {
    let dir = tempfile::tempdir().unwrap();
    let script = "case \"$2\" in *hang) sleep 30 ;; esac\necho ok > \"$1\"\n";
    let mut config = create_test_config(dir.path(), &[], script);
    config.input.kind = InputKind::Array;
    config.input.source = Source::Many(vec![
        "http://localhost/hang".to_string(),
        "http://localhost/ok".to_string(),
    ]);
    config.capture.timeout = PerUrl::Global(200);
    config.capture.process_limit = 1;

    let err = tokio::time::timeout(Duration::from_secs(10), html_snapshots::run(config))
        .await
        .expect("run should finish while the renderer still hangs")
        .unwrap_err();
    assert!(err.error.is_none());
    assert!(err.completed.is_empty());
    assert_eq!(err.not_completed.len(), 2);
}

#[tokio::test]
async fn test_launch_failure_is_not_completed() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path(), &["/a", "/b"], "");
    config.renderer = RendererConfig {
        program: dir.path().join("no-such-renderer").to_str().unwrap().to_string(),
        snapshot_script: None,
        args: Vec::new(),
    };

    let err = html_snapshots::run(config).await.unwrap_err();
    assert!(err.error.is_none());
    assert!(err.completed.is_empty());
    assert_eq!(err.not_completed.len(), 2);
}

#[tokio::test]
async fn test_partial_failure_partition() {
    let dir = tempfile::tempdir().unwrap();
    let script = "case \"$2\" in *good*) echo ok > \"$1\" ;; *) exit 1 ;; esac\n";
    let mut config = create_test_config(
        dir.path(),
        &["/good-1", "/bad", "/good-2"],
        script,
    );
    config.capture.timeout = PerUrl::Global(200);
    config.capture.process_limit = 2;

    let err = html_snapshots::run(config).await.unwrap_err();
    assert!(err.error.is_none());
    assert_eq!(err.completed.len(), 2);
    assert_eq!(err.not_completed.len(), 1);
    assert!(!err.completed.contains(&err.not_completed[0]));
}

#[tokio::test]
async fn test_duplicate_output_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path(), &[], "echo ok > \"$1\"\n");
    config.input.kind = InputKind::Array;
    config.input.source = Source::Many(vec![
        "http://localhost/same".to_string(),
        "http://localhost/same".to_string(),
    ]);

    let err = html_snapshots::run(config).await.unwrap_err();
    assert!(matches!(
        err.error,
        Some(SnapshotError::Config(ConfigError::DuplicateOutput(_)))
    ));
    assert_eq!(err.completed.len() + err.not_completed.len(), 1);
}

#[tokio::test]
async fn test_existing_output_is_recaptured() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path(), &["/page"], "echo fresh > \"$1\"\n");

    let first = html_snapshots::run(config.clone()).await.unwrap();
    assert_eq!(first.completed.len(), 1);
    std::fs::write(&first.completed[0], "old").unwrap();

    let second = html_snapshots::run(config).await.unwrap();
    assert_eq!(second.completed, first.completed);
    assert_eq!(
        std::fs::read_to_string(&second.completed[0]).unwrap().trim(),
        "fresh"
    );
}
