use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use livecam_detect::proxy::{ProxyConfig, ProxyHandle, ProxyServer};

/// Request as seen by the fake detection service.
#[derive(Debug)]
struct Seen {
    request_line: String,
    content_type: Option<String>,
    body: Vec<u8>,
}

/// Serve exactly one request with a canned reply.
fn fake_upstream(status: u16, body: &'static str) -> (String, mpsc::Receiver<Seen>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel();
    let join = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let seen = read_upstream_request(&mut stream);
        tx.send(seen).unwrap();
        let reply = format!(
            "HTTP/1.1 {} Whatever\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(reply.as_bytes()).unwrap();
    });
    (base, rx, join)
}

fn read_upstream_request(stream: &mut TcpStream) -> Seen {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut buf).unwrap();
        assert!(n > 0, "upstream connection closed early");
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap().to_string();
    let mut content_type = None;
    let mut content_length = 0usize;
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            match k.trim().to_lowercase().as_str() {
                "content-type" => content_type = Some(v.trim().to_string()),
                "content-length" => content_length = v.trim().parse().unwrap(),
                _ => {}
            }
        }
    }
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).unwrap();
        assert!(n > 0, "upstream body truncated");
        body.extend_from_slice(&buf[..n]);
    }
    Seen {
        request_line,
        content_type,
        body,
    }
}

fn spawn_proxy(upstream_url: &str) -> ProxyHandle {
    ProxyServer::new(ProxyConfig {
        addr: "127.0.0.1:0".to_string(),
        upstream_url: upstream_url.to_string(),
        upstream_timeout: Duration::from_secs(5),
    })
    .spawn()
    .expect("spawn proxy")
}

fn send(handle: &ProxyHandle, request: &str) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(handle.addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    stream.write_all(request.as_bytes())?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let head = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    let status_line = head.lines().next().unwrap_or("").to_string();
    Ok((status_line, body))
}

fn unused_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[test]
fn health_and_routing_errors_are_local() -> Result<()> {
    let handle = spawn_proxy(&unused_upstream());

    let (status, body) = send(&handle, "GET /health HTTP/1.1\r\nHost: x\r\n\r\n")?;
    assert_eq!(status, "HTTP/1.1 200 OK");
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["status"], "ok");

    let (status, _) = send(&handle, "GET /detect-image/ HTTP/1.1\r\nHost: x\r\n\r\n")?;
    assert_eq!(status, "HTTP/1.1 404 Not Found");

    let (status, _) = send(&handle, "GET /detect-number-plate HTTP/1.1\r\nHost: x\r\n\r\n")?;
    assert_eq!(status, "HTTP/1.1 405 Method Not Allowed");

    handle.stop()
}

#[test]
fn upload_is_forwarded_to_detect_image() -> Result<()> {
    let (upstream, seen, join) =
        fake_upstream(200, r#"{"success":true,"plates":["KA01AB1234"]}"#);
    let handle = spawn_proxy(&upstream);

    let body = "--b\r\ncontent\r\n--b--";
    let request = format!(
        "POST /detect-number-plate HTTP/1.1\r\nHost: x\r\nContent-Type: multipart/form-data; boundary=b\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let (status, response) = send(&handle, &request)?;
    assert_eq!(status, "HTTP/1.1 200 OK");
    let json: Value = serde_json::from_str(&response)?;
    assert_eq!(json["plates"][0], "KA01AB1234");

    let seen = seen.recv_timeout(Duration::from_secs(5))?;
    assert!(seen.request_line.starts_with("POST /detect-image/ "));
    assert_eq!(
        seen.content_type.as_deref(),
        Some("multipart/form-data; boundary=b")
    );
    assert_eq!(seen.body, body.as_bytes());

    join.join().unwrap();
    handle.stop()
}

#[test]
fn frame_request_is_relayed_with_query() -> Result<()> {
    let (upstream, seen, join) = fake_upstream(200, r#"{"success":true,"object_count":{"car":2}}"#);
    let handle = spawn_proxy(&upstream);

    let (status, response) = send(
        &handle,
        "GET /get-ip-camera-frame/?camera_url=http%3A%2F%2F10.0.0.5%2Fshot.jpg HTTP/1.1\r\nHost: x\r\n\r\n",
    )?;
    assert_eq!(status, "HTTP/1.1 200 OK");
    let json: Value = serde_json::from_str(&response)?;
    assert_eq!(json["object_count"]["car"], 2);

    let seen = seen.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(
        seen.request_line,
        "GET /get-ip-camera-frame/?camera_url=http%3A%2F%2F10.0.0.5%2Fshot.jpg HTTP/1.1"
    );

    join.join().unwrap();
    handle.stop()
}

#[test]
fn upstream_error_status_becomes_500() -> Result<()> {
    let (upstream, _seen, join) = fake_upstream(503, r#"{"detail":"busy"}"#);
    let handle = spawn_proxy(&upstream);

    let (status, response) = send(
        &handle,
        "POST /detect-number-plate HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n",
    )?;
    assert_eq!(status, "HTTP/1.1 500 Internal Server Error");
    let json: Value = serde_json::from_str(&response)?;
    assert_eq!(json["error"], "Failed to process request");

    join.join().unwrap();
    handle.stop()
}

#[test]
fn unreachable_upstream_becomes_500() -> Result<()> {
    let handle = spawn_proxy(&unused_upstream());

    let (status, response) = send(
        &handle,
        "GET /get-ip-camera-frame/?camera_url=x HTTP/1.1\r\nHost: x\r\n\r\n",
    )?;
    assert_eq!(status, "HTTP/1.1 500 Internal Server Error");
    let json: Value = serde_json::from_str(&response)?;
    assert_eq!(json["error"], "Failed to process request");

    handle.stop()
}

#[test]
fn plate_search_is_relayed_under_upstream_prefix() -> Result<()> {
    let (upstream, seen, join) = fake_upstream(200, r#"[{"plate":"KA01AB1234"}]"#);
    let handle = spawn_proxy(&format!("{}/api", upstream));

    let (status, response) = send(
        &handle,
        "GET /search-number-plate/?plate_number=KA01AB1234 HTTP/1.1\r\nHost: x\r\n\r\n",
    )?;
    assert_eq!(status, "HTTP/1.1 200 OK");
    let json: Value = serde_json::from_str(&response)?;
    assert_eq!(json[0]["plate"], "KA01AB1234");

    let seen = seen.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(
        seen.request_line,
        "GET /api/search-number-plate/?plate_number=KA01AB1234 HTTP/1.1"
    );

    join.join().unwrap();
    handle.stop()
}
