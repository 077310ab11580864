use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::coordinator::RetryPolicy;
use crate::validate::validate_camera_url;
use crate::view::LiveViewSettings;

const DEFAULT_DETECTION_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_PROXY_ADDR: &str = "127.0.0.1:5050";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_OVERLAY_WINDOW_MS: u64 = 2_000;
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Deserialize, Default)]
struct LiveCamConfigFile {
    detection_url: Option<String>,
    proxy: Option<ProxyConfigFile>,
    retry: Option<RetryConfigFile>,
    polling: Option<PollingConfigFile>,
    cameras: Option<CamerasConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ProxyConfigFile {
    addr: Option<String>,
    upstream_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RetryConfigFile {
    max_attempts: Option<u32>,
    request_timeout_ms: Option<u64>,
    backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PollingConfigFile {
    interval_ms: Option<u64>,
    overlay_window_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CamerasConfigFile {
    plate: Option<String>,
    object: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LiveCamConfig {
    /// Base URL of the detection service.
    pub detection_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub overlay_window: Duration,
    pub proxy: ProxySettings,
    pub cameras: CameraSettings,
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub addr: String,
    pub upstream_timeout: Duration,
}

/// Camera URLs to preload into the channels at mount.
#[derive(Debug, Clone, Default)]
pub struct CameraSettings {
    pub plate: Option<String>,
    pub object: Option<String>,
}

impl LiveCamConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LIVECAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn view_settings(&self) -> LiveViewSettings {
        LiveViewSettings {
            retry: self.retry,
            poll_interval: self.poll_interval,
            overlay_window: self.overlay_window,
        }
    }

    fn from_file(file: LiveCamConfigFile) -> Self {
        let detection_url = file
            .detection_url
            .unwrap_or_else(|| DEFAULT_DETECTION_URL.to_string());
        let retry = file.retry.unwrap_or_default();
        let polling = file.polling.unwrap_or_default();
        let proxy = file.proxy.unwrap_or_default();
        let cameras = file.cameras.unwrap_or_default();
        Self {
            detection_url,
            request_timeout: Duration::from_millis(
                retry.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
                backoff: Duration::from_millis(
                    retry.backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
                ),
            },
            poll_interval: Duration::from_millis(
                polling.interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            overlay_window: Duration::from_millis(
                polling
                    .overlay_window_ms
                    .unwrap_or(DEFAULT_OVERLAY_WINDOW_MS),
            ),
            proxy: ProxySettings {
                addr: proxy
                    .addr
                    .unwrap_or_else(|| DEFAULT_PROXY_ADDR.to_string()),
                upstream_timeout: Duration::from_millis(
                    proxy
                        .upstream_timeout_ms
                        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_MS),
                ),
            },
            cameras: CameraSettings {
                plate: cameras.plate.filter(|url| !url.trim().is_empty()),
                object: cameras.object.filter(|url| !url.trim().is_empty()),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("LIVECAM_DETECTION_URL") {
            if !url.trim().is_empty() {
                self.detection_url = url;
            }
        }
        if let Ok(addr) = std::env::var("LIVECAM_PROXY_ADDR") {
            if !addr.trim().is_empty() {
                self.proxy.addr = addr;
            }
        }
        if let Ok(url) = std::env::var("LIVECAM_PLATE_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.cameras.plate = Some(url);
            }
        }
        if let Ok(url) = std::env::var("LIVECAM_OBJECT_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.cameras.object = Some(url);
            }
        }
        if let Ok(attempts) = std::env::var("LIVECAM_MAX_ATTEMPTS") {
            self.retry.max_attempts = attempts
                .trim()
                .parse()
                .map_err(|_| anyhow!("LIVECAM_MAX_ATTEMPTS must be a positive integer"))?;
        }
        if let Ok(interval) = std::env::var("LIVECAM_POLL_INTERVAL_MS") {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("LIVECAM_POLL_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.poll_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let url = Url::parse(&self.detection_url)
            .map_err(|e| anyhow!("invalid detection_url '{}': {}", self.detection_url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "detection_url must use http or https, got '{}'",
                url.scheme()
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("retry.request_timeout_ms must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("polling.interval_ms must be greater than zero"));
        }
        for (name, camera) in [
            ("plate", self.cameras.plate.as_deref()),
            ("object", self.cameras.object.as_deref()),
        ] {
            if let Some(camera) = camera {
                validate_camera_url(camera.trim())
                    .map_err(|e| anyhow!("cameras.{}: {}", name, e))?;
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<LiveCamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
