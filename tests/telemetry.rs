#![cfg(unix)]

use ollama_connect::models::Provider;
use ollama_connect::{AppConfig, Controller, Session, Telemetry};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FAKE_OLLAMA: &str = r#"#!/bin/sh
case "$1" in
  list)
    echo "NAME                ID              SIZE      MODIFIED"
    echo "llama3.2:latest     a80c4f17acd5    2.0 GB    2 weeks ago"
    echo "mistral:7b          f974a74358d6    4.1 GB    3 days ago"
    ;;
  ps)
    echo "NAME                ID              STATUS   SIZE     PROCESSOR   UNTIL"
    echo "llama3.2:latest     a80c4f17acd5    running  5.4GB    37%/63%     4 minutes from now"
    echo "mistral:7b          f974a74358d6    running  4.1 GB   100% GPU    Stopping..."
    ;;
  *)
    exit 2
    ;;
esac
"#;

fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    let mut permissions = std::fs::metadata(&path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod");
    path
}

#[tokio::test]
async fn reads_inventory_from_cli() {
    let dir = tempfile::tempdir().expect("tempdir");
    let binary = install_script(dir.path(), "ollama", FAKE_OLLAMA);
    let telemetry = Telemetry::new(binary.to_string_lossy(), Duration::from_secs(10));

    assert_eq!(telemetry.list_models().await, vec!["llama3.2:latest", "mistral:7b"]);

    let rows = telemetry.running_models().await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].name, "llama3.2:latest");
    assert_eq!(rows[0].size_gb, 5.4);
    assert_eq!((rows[0].cpu_pct, rows[0].gpu_pct), (37, 63));
    assert_eq!(rows[1].size_gb, 4.1);
    assert!(!rows[1].utilization_reported);
}

#[tokio::test]
async fn failing_or_missing_cli_reads_as_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let failing = install_script(dir.path(), "ollama", "#!/bin/sh\necho 'Error: could not connect' >&2\nexit 1\n");
    let telemetry = Telemetry::new(failing.to_string_lossy(), Duration::from_secs(10));
    assert!(telemetry.list_models().await.is_empty());
    assert!(telemetry.running_models().await.is_empty());

    let missing = Telemetry::new(dir.path().join("absent").to_string_lossy(), Duration::from_secs(10));
    assert!(missing.running_models().await.is_empty());
}

#[tokio::test]
async fn slow_cli_is_cut_off_by_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let slow = install_script(dir.path(), "ollama", "#!/bin/sh\nsleep 5\necho 'NAME ID'\n");
    let telemetry = Telemetry::new(slow.to_string_lossy(), Duration::from_millis(200));

    let started = std::time::Instant::now();
    assert!(telemetry.list_models().await.is_empty());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn monitor_samples_only_selected_models() {
    let dir = tempfile::tempdir().expect("tempdir");
    let binary = install_script(dir.path(), "ollama", FAKE_OLLAMA);
    let config = AppConfig {
        ollama_bin: binary.to_string_lossy().to_string(),
        ..AppConfig::default()
    };
    let controller = Controller::from_config(&config, None).expect("controller");

    let session = controller.select_provider(Session::default(), Provider::Local);
    let session = controller.select_models(session, vec!["llama3.2".to_string()]);
    let session = controller.poll_monitor(session).await;
    let session = controller.poll_monitor(session).await;

    assert_eq!(session.monitor_history.len(), 2);
    let sample = session.latest_sample().expect("sample");
    assert_eq!(sample.rows.len(), 1);
    assert_eq!(sample.rows[0].name, "llama3.2:latest");
    assert!(session.monitor_history[0].taken_at <= sample.taken_at);
}
