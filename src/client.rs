//! Remote detection endpoint.
//!
//! The coordinator talks to the detection service only through the
//! `DetectionService` trait. `HttpDetectionService` is the production
//! implementation; tests substitute scripted services.
//!
//! Every error returned from `detect` is treated as transient by the caller.
//! A response that arrives with `success: false` is NOT an error at this
//! layer; it is returned as-is and the coordinator decides what it means.

use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::channel::ChannelKind;
use crate::error::{DetectionError, Result};

/// Path of the detect-by-camera-URL resource on the detection service.
pub const DETECTION_PATH: &str = "/get-ip-camera-frame/";
/// Per-attempt request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON payload returned by the detection service.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct DetectionResponse {
    #[serde(default)]
    pub success: bool,

    /// Base64-encoded processed frame (present on success).
    #[serde(default)]
    pub image: Option<String>,

    /// Plate strings (plate detection).
    #[serde(default)]
    pub plates: Option<Vec<String>>,

    /// Label to count (object detection).
    #[serde(default)]
    pub object_count: Option<BTreeMap<String, u64>>,

    #[serde(default)]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}

/// A detection endpoint reachable for one request at a time.
pub trait DetectionService: Send + Sync {
    /// Issue one detection request. Implementations must not retry.
    fn detect(&self, channel: ChannelKind, camera_url: &str) -> Result<DetectionResponse>;
}

/// Detection service reached over HTTP.
pub struct HttpDetectionService {
    agent: ureq::Agent,
    endpoint: Url,
}

impl HttpDetectionService {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url).context("parse detection service url")?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported detection service scheme '{}'; expected http(s)",
                base.scheme()
            ));
        }
        let endpoint = endpoint_url(&base, DETECTION_PATH);
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { agent, endpoint })
    }

    /// Endpoint URL for one camera, with the camera address query-encoded.
    pub fn request_url(&self, camera_url: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("camera_url", camera_url);
        url
    }
}

/// Append `path` to the base URL's own path, keeping any prefix it carries
/// (`http://host/api` + `/x/` is `http://host/api/x/`).
pub(crate) fn endpoint_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(None);
    url.set_fragment(None);
    url
}

impl DetectionService for HttpDetectionService {
    fn detect(&self, channel: ChannelKind, camera_url: &str) -> Result<DetectionResponse> {
        let url = self.request_url(camera_url);
        log::debug!("{} detection request: {}", channel, url);
        let response = self.agent.get(url.as_str()).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => {
                DetectionError::Transient(format!("API responded with status: {}", code))
            }
            ureq::Error::Transport(transport) => DetectionError::Transient(transport.to_string()),
        })?;
        serde_json::from_reader(response.into_reader())
            .map_err(|e| DetectionError::Transient(format!("invalid detection response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url_encodes_camera_address() {
        let service =
            HttpDetectionService::new("http://127.0.0.1:5000", DEFAULT_REQUEST_TIMEOUT).unwrap();
        let url = service.request_url("http://10.0.0.5:8080/video?res=hd&fps=5");
        assert_eq!(url.path(), DETECTION_PATH);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![(
                "camera_url".to_string(),
                "http://10.0.0.5:8080/video?res=hd&fps=5".to_string()
            )]
        );
        assert!(!url.query().unwrap_or("").contains("&fps"));
    }

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let base = Url::parse("http://10.0.0.2:8000/vision/").unwrap();
        assert_eq!(
            endpoint_url(&base, DETECTION_PATH).as_str(),
            "http://10.0.0.2:8000/vision/get-ip-camera-frame/"
        );
        let bare = Url::parse("http://127.0.0.1:5000").unwrap();
        assert_eq!(
            endpoint_url(&bare, DETECTION_PATH).as_str(),
            "http://127.0.0.1:5000/get-ip-camera-frame/"
        );

        let service =
            HttpDetectionService::new("http://detector.local/api", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(
            service.request_url("http://cam").path(),
            "/api/get-ip-camera-frame/"
        );
    }

    #[test]
    fn rejects_non_http_service_url() {
        assert!(HttpDetectionService::new("ftp://detector", DEFAULT_REQUEST_TIMEOUT).is_err());
        assert!(HttpDetectionService::new("not a url", DEFAULT_REQUEST_TIMEOUT).is_err());
    }

    #[test]
    fn parses_plate_and_object_payloads() {
        let plate: DetectionResponse = serde_json::from_str(
            r#"{"success": true, "image": "abc", "plates": ["KA01AB1234"], "timestamp": "2024-01-01 10:00:00"}"#,
        )
        .unwrap();
        assert!(plate.success);
        assert_eq!(plate.plates, Some(vec!["KA01AB1234".to_string()]));
        assert_eq!(plate.object_count, None);

        let object: DetectionResponse = serde_json::from_str(
            r#"{"success": true, "image": "abc", "object_count": {"car": 3, "person": 1}}"#,
        )
        .unwrap();
        let counts = object.object_count.unwrap();
        assert_eq!(counts.get("car"), Some(&3));

        let failed: DetectionResponse =
            serde_json::from_str(r#"{"success": false, "error": "camera unreachable"}"#).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("camera unreachable"));
    }

    #[test]
    fn unreachable_service_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let service = HttpDetectionService::new(
            &format!("http://{}", addr),
            Duration::from_millis(500),
        )
        .unwrap();
        let err = service
            .detect(ChannelKind::Plate, "http://camera.local/video")
            .unwrap_err();
        assert!(matches!(err, DetectionError::Transient(_)));
    }
}
