use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use livecam_detect::config::LiveCamConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LIVECAM_CONFIG",
        "LIVECAM_DETECTION_URL",
        "LIVECAM_PROXY_ADDR",
        "LIVECAM_PLATE_CAMERA_URL",
        "LIVECAM_OBJECT_CAMERA_URL",
        "LIVECAM_MAX_ATTEMPTS",
        "LIVECAM_POLL_INTERVAL_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = LiveCamConfig::load().expect("load config");
    assert_eq!(cfg.detection_url, "http://127.0.0.1:5000");
    assert_eq!(cfg.retry.max_attempts, 3);
    assert_eq!(cfg.retry.backoff, Duration::from_secs(1));
    assert_eq!(cfg.request_timeout, Duration::from_secs(10));
    assert_eq!(cfg.poll_interval, Duration::from_secs(1));
    assert_eq!(cfg.overlay_window, Duration::from_secs(2));
    assert!(cfg.cameras.plate.is_none());
    assert!(cfg.cameras.object.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "detection_url": "http://detector.local:5000",
        "proxy": { "addr": "0.0.0.0:5050", "upstream_timeout_ms": 15000 },
        "retry": { "max_attempts": 5, "request_timeout_ms": 4000, "backoff_ms": 250 },
        "polling": { "interval_ms": 2000, "overlay_window_ms": 3000 },
        "cameras": { "plate": "http://10.0.0.5/plate.jpg" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("LIVECAM_CONFIG", file.path());
    std::env::set_var("LIVECAM_OBJECT_CAMERA_URL", "http://10.0.0.6/object.jpg");
    std::env::set_var("LIVECAM_MAX_ATTEMPTS", "2");
    std::env::set_var("LIVECAM_POLL_INTERVAL_MS", "500");

    let cfg = LiveCamConfig::load().expect("load config");

    assert_eq!(cfg.detection_url, "http://detector.local:5000");
    assert_eq!(cfg.proxy.addr, "0.0.0.0:5050");
    assert_eq!(cfg.proxy.upstream_timeout, Duration::from_secs(15));
    assert_eq!(cfg.retry.max_attempts, 2);
    assert_eq!(cfg.retry.backoff, Duration::from_millis(250));
    assert_eq!(cfg.request_timeout, Duration::from_secs(4));
    assert_eq!(cfg.poll_interval, Duration::from_millis(500));
    assert_eq!(cfg.overlay_window, Duration::from_secs(3));
    assert_eq!(cfg.cameras.plate.as_deref(), Some("http://10.0.0.5/plate.jpg"));
    assert_eq!(cfg.cameras.object.as_deref(), Some("http://10.0.0.6/object.jpg"));

    let settings = cfg.view_settings();
    assert_eq!(settings.retry.max_attempts, 2);
    assert_eq!(settings.poll_interval, Duration::from_millis(500));

    clear_env();
}

#[test]
fn rejects_invalid_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LIVECAM_MAX_ATTEMPTS", "many");
    assert!(LiveCamConfig::load().is_err());
    clear_env();

    std::env::set_var("LIVECAM_MAX_ATTEMPTS", "0");
    assert!(LiveCamConfig::load().is_err());
    clear_env();

    std::env::set_var("LIVECAM_PLATE_CAMERA_URL", "not a url");
    assert!(LiveCamConfig::load().is_err());
    clear_env();

    std::env::set_var("LIVECAM_DETECTION_URL", "ftp://detector");
    assert!(LiveCamConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_malformed_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("LIVECAM_CONFIG", file.path());
    assert!(LiveCamConfig::load().is_err());

    std::env::set_var("LIVECAM_CONFIG", "/nonexistent/livecam.json");
    assert!(LiveCamConfig::load().is_err());

    clear_env();
}
