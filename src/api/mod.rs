//! Control Gateway: PTZ commands over a small HTTP/1.1 JSON API.
//!
//! One thread per accepted connection. Sessions are read through a
//! [`SharedSessions`] snapshot; the server never mutates them.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::ptz::{Direction, SharedSessions};

const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_ADDR: &str = "0.0.0.0:8081";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("control gateway thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    sessions: SharedSessions,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, sessions: SharedSessions) -> Self {
        Self { cfg, sessions }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid control gateway address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)
            .map_err(|e| anyhow!("bind control gateway on {}: {}", configured_addr, e))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let sessions = self.sessions;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, sessions, shutdown_thread) {
                log::error!("control gateway stopped: {}", err);
            }
        });
        log::info!("control gateway listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, sessions: SharedSessions, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let sessions = sessions.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &sessions) {
                        log::warn!("control gateway request from {} rejected: {}", peer, err);
                    }
                });
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

#[derive(Debug, Deserialize)]
struct PtzRequest {
    camera_name: String,
    direction: String,
}

fn handle_connection(mut stream: TcpStream, sessions: &SharedSessions) -> Result<()> {
    // Accepted sockets may inherit the listener's nonblocking flag.
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, &json!({"error": "bad_request"}))?;
            return Err(err);
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            let cameras = sessions.snapshot().len();
            write_json_response(&mut stream, 200, &json!({"status": "ok", "cameras": cameras}))
        }
        ("OPTIONS", "/ptz") => write_response(&mut stream, 200, "text/plain", b""),
        ("POST", "/ptz") => handle_ptz(&mut stream, &request, sessions),
        (_, "/ptz") => {
            write_json_response(&mut stream, 405, &json!({"error": "method_not_allowed"}))
        }
        _ => write_json_response(&mut stream, 404, &json!({"error": "not_found"})),
    }
}

fn handle_ptz(stream: &mut TcpStream, request: &HttpRequest, sessions: &SharedSessions) -> Result<()> {
    let body: PtzRequest = match serde_json::from_slice(&request.body) {
        Ok(body) => body,
        Err(err) => {
            log::warn!("malformed ptz request: {}", err);
            return write_json_response(stream, 400, &json!({"error": "invalid_request"}));
        }
    };

    let table = sessions.snapshot();
    let Some(session) = table.get(&body.camera_name) else {
        log::warn!("ptz: unknown camera '{}'", body.camera_name);
        return write_json_response(
            stream,
            404,
            &json!({"error": "camera_not_found", "camera_name": body.camera_name}),
        );
    };
    let direction: Direction = match body.direction.parse() {
        Ok(direction) => direction,
        Err(err) => {
            log::warn!("ptz {}: {}", body.camera_name, err);
            return write_json_response(
                stream,
                400,
                &json!({"error": "invalid_direction", "direction": body.direction}),
            );
        }
    };

    match session.execute(direction) {
        Ok(()) => {
            log::info!("ptz {} {}", session.camera_name, direction.as_str());
            write_json_response(
                stream,
                200,
                &json!({
                    "status": "ok",
                    "camera_name": session.camera_name,
                    "direction": direction.as_str(),
                }),
            )
        }
        Err(err) => {
            log::error!(
                "ptz {} {} failed: {:#}",
                session.camera_name,
                direction.as_str(),
                err
            );
            write_json_response(stream, 500, &json!({"error": "ptz_failed"}))
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
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
    let body_start = header_end + 4;
    if content_length > MAX_REQUEST_BYTES.saturating_sub(body_start) {
        return Err(anyhow!("request too large"));
    }
    let mut body = data[body_start..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: POST, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
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
    body: Vec<u8>,
}
