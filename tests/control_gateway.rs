use anyhow::{anyhow, Result};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use camera_relay_gateway::api::{ApiConfig, ApiHandle, ApiServer};
use camera_relay_gateway::onvif::{DeviceControl, MediaProfile, VendorInfo};
use camera_relay_gateway::ptz::{PtzSession, PtzVector, SessionTable, SharedSessions};

#[derive(Clone, Debug, PartialEq)]
enum Call {
    Move(String, PtzVector),
    Home(String),
}

#[derive(Clone, Default)]
struct RecordingControl {
    calls: Arc<Mutex<Vec<Call>>>,
    fail: bool,
}

impl DeviceControl for RecordingControl {
    fn device_information(&self) -> Result<VendorInfo> {
        Ok(VendorInfo::default())
    }

    fn media_profiles(&self) -> Result<Vec<MediaProfile>> {
        Ok(vec![MediaProfile {
            token: "profile_1".into(),
        }])
    }

    fn stream_uri(&self, _profile: &str) -> Result<String> {
        Ok("rtsp://10.0.0.2/live".into())
    }

    fn relative_move(&self, profile: &str, vector: PtzVector) -> Result<()> {
        if self.fail {
            return Err(anyhow!("device rejected move"));
        }
        self.calls
            .lock()
            .unwrap()
            .push(Call::Move(profile.to_string(), vector));
        Ok(())
    }

    fn goto_home(&self, profile: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("device rejected home"));
        }
        self.calls.lock().unwrap().push(Call::Home(profile.to_string()));
        Ok(())
    }
}

struct TestGateway {
    handle: Option<ApiHandle>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl TestGateway {
    fn new() -> Result<Self> {
        let control = RecordingControl::default();
        let calls = control.calls.clone();
        let broken = RecordingControl {
            fail: true,
            ..RecordingControl::default()
        };
        let table = SessionTable::new(vec![
            PtzSession {
                camera_name: "cam1".into(),
                control: Box::new(control),
                profile_token: "profile_1".into(),
            },
            PtzSession {
                camera_name: "broken".into(),
                control: Box::new(broken),
                profile_token: "profile_1".into(),
            },
        ]);
        let handle = ApiServer::new(
            ApiConfig {
                addr: "127.0.0.1:0".into(),
            },
            SharedSessions::new(table),
        )
        .spawn()?;
        Ok(Self {
            handle: Some(handle),
            calls,
        })
    }

    fn request(&self, method: &str, path: &str, body: &str) -> Result<(String, String)> {
        let addr = self.handle.as_ref().ok_or_else(|| anyhow!("stopped"))?.addr;
        let mut stream = TcpStream::connect(addr)?;
        let request = format!(
            "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\n\r\n{body}",
            method = method,
            path = path,
            addr = addr,
            len = body.len(),
            body = body
        );
        stream.write_all(request.as_bytes())?;
        read_response(&mut stream)
    }

    fn raw_request(&self, request: &str) -> Result<(String, String)> {
        let addr = self.handle.as_ref().ok_or_else(|| anyhow!("stopped"))?.addr;
        let mut stream = TcpStream::connect(addr)?;
        stream.write_all(request.as_bytes())?;
        read_response(&mut stream)
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop();
        }
    }
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

#[test]
fn ptz_up_moves_known_camera() -> Result<()> {
    let gateway = TestGateway::new()?;
    let (headers, body) = gateway.request(
        "POST",
        "/ptz",
        r#"{"camera_name":"cam1","direction":"up"}"#,
    )?;
    assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["status"], "ok");
    assert_eq!(
        gateway.calls(),
        vec![Call::Move(
            "profile_1".into(),
            PtzVector {
                pan: 0.0,
                tilt: 0.1,
                zoom: 0.0
            }
        )]
    );
    Ok(())
}

#[test]
fn ptz_home_returns_to_home_position() -> Result<()> {
    let gateway = TestGateway::new()?;
    let (headers, _) = gateway.request(
        "POST",
        "/ptz",
        r#"{"camera_name":"cam1","direction":"home"}"#,
    )?;
    assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
    assert_eq!(gateway.calls(), vec![Call::Home("profile_1".into())]);
    Ok(())
}

#[test]
fn unknown_camera_is_not_found() -> Result<()> {
    let gateway = TestGateway::new()?;
    let (headers, body) = gateway.request(
        "POST",
        "/ptz",
        r#"{"camera_name":"nope","direction":"up"}"#,
    )?;
    assert!(headers.starts_with("HTTP/1.1 404"), "{}", headers);
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["error"], "camera_not_found");
    assert!(gateway.calls().is_empty());
    Ok(())
}

#[test]
fn unknown_direction_is_bad_request() -> Result<()> {
    let gateway = TestGateway::new()?;
    let (headers, body) = gateway.request(
        "POST",
        "/ptz",
        r#"{"camera_name":"cam1","direction":"diagonal"}"#,
    )?;
    assert!(headers.starts_with("HTTP/1.1 400"), "{}", headers);
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["error"], "invalid_direction");
    assert!(gateway.calls().is_empty());
    Ok(())
}

#[test]
fn malformed_body_is_bad_request() -> Result<()> {
    let gateway = TestGateway::new()?;
    let (headers, _) = gateway.request("POST", "/ptz", "{not json")?;
    assert!(headers.starts_with("HTTP/1.1 400"), "{}", headers);
    Ok(())
}

#[test]
fn oversized_content_length_is_bad_request() -> Result<()> {
    let gateway = TestGateway::new()?;
    for length in ["18446744073709551615", "9000"] {
        let request = format!(
            "POST /ptz HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{{}}",
            length
        );
        let (headers, _) = gateway.raw_request(&request)?;
        assert!(headers.starts_with("HTTP/1.1 400"), "{}: {}", length, headers);
    }
    // Still serving.
    let (headers, _) = gateway.request("GET", "/health", "")?;
    assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
    assert!(gateway.calls().is_empty());
    Ok(())
}

#[test]
fn device_failure_is_server_error_and_gateway_survives() -> Result<()> {
    let gateway = TestGateway::new()?;
    let (headers, body) = gateway.request(
        "POST",
        "/ptz",
        r#"{"camera_name":"broken","direction":"left"}"#,
    )?;
    assert!(headers.starts_with("HTTP/1.1 500"), "{}", headers);
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["error"], "ptz_failed");

    let (headers, _) = gateway.request(
        "POST",
        "/ptz",
        r#"{"camera_name":"cam1","direction":"right"}"#,
    )?;
    assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
    Ok(())
}

#[test]
fn preflight_exposes_cors_headers() -> Result<()> {
    let gateway = TestGateway::new()?;
    let (headers, _) = gateway.request("OPTIONS", "/ptz", "")?;
    assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    assert!(headers.contains("Access-Control-Allow-Methods: POST, OPTIONS"));
    assert!(headers.contains("Access-Control-Allow-Headers: Content-Type"));
    Ok(())
}

#[test]
fn other_routes_and_methods() -> Result<()> {
    let gateway = TestGateway::new()?;
    let (headers, _) = gateway.request("GET", "/ptz", "")?;
    assert!(headers.starts_with("HTTP/1.1 405"), "{}", headers);

    let (headers, _) = gateway.request("POST", "/zoom", "{}")?;
    assert!(headers.starts_with("HTTP/1.1 404"), "{}", headers);

    let (headers, body) = gateway.request("GET", "/health", "")?;
    assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["cameras"], 2);
    Ok(())
}

#[test]
fn swapped_table_is_served_without_restart() -> Result<()> {
    let sessions = SharedSessions::new(SessionTable::default());
    let handle = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".into(),
        },
        sessions.clone(),
    )
    .spawn()?;

    let send = |body: &str| -> Result<String> {
        let mut stream = TcpStream::connect(handle.addr)?;
        let request = format!(
            "POST /ptz HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(request.as_bytes())?;
        Ok(read_response(&mut stream)?.0)
    };

    let body = r#"{"camera_name":"cam1","direction":"down"}"#;
    assert!(send(body)?.starts_with("HTTP/1.1 404"));
    sessions.swap(SessionTable::new(vec![PtzSession {
        camera_name: "cam1".into(),
        control: Box::new(RecordingControl::default()),
        profile_token: "p".into(),
    }]));
    assert!(send(body)?.starts_with("HTTP/1.1 200"));
    handle.stop()?;
    Ok(())
}
