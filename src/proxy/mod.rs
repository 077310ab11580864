//! HTTP forwarding proxy in front of the detection service.
//!
//! Browsers cannot always reach the detection service directly, so the
//! proxy accepts their requests on a local address and replays them
//! upstream. Upstream responses are relayed only when they are 2xx; any
//! other outcome becomes `500 {"error":"Failed to process request"}`.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use url::Url;

use crate::client::endpoint_url;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const UPSTREAM_FAILURE_BODY: &str = r#"{"error":"Failed to process request"}"#;

pub const UPLOAD_ROUTE: &str = "/detect-number-plate";
pub const UPLOAD_UPSTREAM_PATH: &str = "/detect-image/";
pub const FRAME_ROUTE: &str = "/get-ip-camera-frame/";
pub const SEARCH_ROUTE: &str = "/search-number-plate/";

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub addr: String,
    /// Base URL of the detection service.
    pub upstream_url: String,
    pub upstream_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5050".to_string(),
            upstream_url: "http://127.0.0.1:5000".to_string(),
            upstream_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct ProxyHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ProxyHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("proxy server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ProxyServer {
    cfg: ProxyConfig,
}

impl ProxyServer {
    pub fn new(cfg: ProxyConfig) -> Self {
        Self { cfg }
    }

    pub fn spawn(self) -> Result<ProxyHandle> {
        let upstream = Upstream::new(&self.cfg.upstream_url, self.cfg.upstream_timeout)?;
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("parse proxy address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind proxy address {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("detect-proxy".to_string())
            .spawn(move || {
                if let Err(err) = run_proxy(listener, Arc::new(upstream), shutdown_thread) {
                    log::error!("detection proxy stopped: {}", err);
                }
            })
            .context("spawn proxy thread")?;
        log::info!(
            "detection proxy listening on http://{} -> {}",
            addr,
            self.cfg.upstream_url
        );

        Ok(ProxyHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct Upstream {
    agent: ureq::Agent,
    base: Url,
}

impl Upstream {
    fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).context("parse upstream url")?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported upstream scheme '{}'; expected http(s)",
                base.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { agent, base })
    }

    fn forward(&self, request: &HttpRequest) -> Result<UpstreamReply> {
        let response = match request.path.as_str() {
            UPLOAD_ROUTE => {
                let url = endpoint_url(&self.base, UPLOAD_UPSTREAM_PATH);
                let mut call = self.agent.post(url.as_str());
                if let Some(content_type) = request.headers.get("content-type") {
                    call = call.set("Content-Type", content_type);
                }
                call.send_bytes(&request.body)
            }
            _ => {
                let mut url = endpoint_url(&self.base, &request.path);
                url.set_query(request.query.as_deref());
                self.agent.get(url.as_str()).call()
            }
        }
        .map_err(|err| match err {
            ureq::Error::Status(code, _) => anyhow!("upstream responded with status {}", code),
            ureq::Error::Transport(transport) => anyhow!("upstream unreachable: {}", transport),
        })?;

        let status = response.status();
        let content_type = response.content_type().to_string();
        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_BODY_BYTES as u64 + 1)
            .read_to_end(&mut body)
            .context("read upstream body")?;
        if body.len() > MAX_BODY_BYTES {
            return Err(anyhow!("upstream body too large"));
        }
        Ok(UpstreamReply {
            status,
            content_type,
            body,
        })
    }
}

struct UpstreamReply {
    status: u16,
    content_type: String,
    body: Vec<u8>,
}

fn run_proxy(
    listener: TcpListener,
    upstream: Arc<Upstream>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let upstream = upstream.clone();
                let spawned = std::thread::Builder::new()
                    .name("detect-proxy-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &upstream) {
                            log::warn!("proxy request from {} failed: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("proxy could not spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, upstream: &Upstream) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    let allowed = match route_method(&request.path) {
        Some(method) => method,
        None => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    };
    if request.method == "OPTIONS" {
        write_response(&mut stream, 204, "text/plain", b"")?;
        return Ok(());
    }
    if request.method != allowed {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    if request.path == "/health" {
        write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
        return Ok(());
    }

    match upstream.forward(&request) {
        Ok(reply) => {
            log::debug!(
                "{} {} -> {} ({} bytes)",
                request.method,
                request.path,
                reply.status,
                reply.body.len()
            );
            write_response(&mut stream, reply.status, &reply.content_type, &reply.body)
        }
        Err(err) => {
            log::error!("error connecting to detection service: {}", err);
            write_json_response(&mut stream, 500, UPSTREAM_FAILURE_BODY)
        }
    }
}

fn route_method(path: &str) -> Option<&'static str> {
    match path {
        "/health" => Some("GET"),
        UPLOAD_ROUTE => Some("POST"),
        FRAME_ROUTE | SEARCH_ROUTE => Some("GET"),
        _ => None,
    }
}

fn read_request<R: Read>(stream: &mut R) -> Result<HttpRequest> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end..].to_vec();
    if body.len() < content_length {
        let missing = content_length - body.len();
        let mut rest = vec![0u8; missing];
        stream
            .read_exact(&mut rest)
            .context("read request body")?;
        body.extend_from_slice(&rest);
    }
    body.truncate(content_length);

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (raw_path.to_string(), None),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        query,
        headers,
        body,
    })
}

fn write_json_response<W: Write>(stream: &mut W, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response<W: Write>(
    stream: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ if (200..300).contains(&status) => "OK",
        _ => "Internal Server Error",
    };
    let status = if (200..300).contains(&status) || matches!(status, 400 | 404 | 405) {
        status
    } else {
        500
    };
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status = status,
        reason = reason,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: Option<String>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}
