//! HTTP transport tests against a live listener on an ephemeral port.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use pothole_witness::api::{ApiConfig, ApiHandle, ApiServer};
use pothole_witness::{
    AreaEstimator, ArtifactStore, DetectionPipeline, EventBroadcaster, InMemoryDetectionStore,
    SegmentationClient, StubBackend,
};
use tempfile::TempDir;

fn start(segmenter: SegmentationClient) -> (ApiHandle, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let pipeline = DetectionPipeline::new(
        segmenter,
        AreaEstimator::new(100.0),
        ArtifactStore::open(dir.path()).expect("artifact dir"),
        Arc::new(InMemoryDetectionStore::new()),
        EventBroadcaster::new(8),
    );
    let cfg = ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        max_upload_bytes: 64 * 1024,
    };
    let handle = ApiServer::new(cfg, Arc::new(pipeline))
        .spawn()
        .expect("spawn api");
    (handle, dir)
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(width, height, Rgb([90, 90, 90]))
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

fn request(addr: SocketAddr, method: &str, path: &str, body: &[u8]) -> (u16, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("timeout");
    let head = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n",
        method,
        path,
        body.len()
    );
    stream.write_all(head.as_bytes()).expect("write head");
    stream.write_all(body).expect("write body");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read response");
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");
    (status, raw[split + 4..].to_vec())
}

fn json_request(addr: SocketAddr, method: &str, path: &str, body: &[u8]) -> (u16, serde_json::Value) {
    let (status, body) = request(addr, method, path, body);
    (status, serde_json::from_slice(&body).expect("json body"))
}

#[test]
fn health_reports_model_readiness() {
    let (handle, _dir) = start(SegmentationClient::ready(StubBackend::covering(1, 0.5)));
    let (status, body) = json_request(handle.addr, "GET", "/health", b"");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_ready"], true);
    handle.stop().expect("stop");

    let (handle, _dir) = start(SegmentationClient::unavailable("no weights"));
    let (_, body) = json_request(handle.addr, "GET", "/health", b"");
    assert_eq!(body["model_ready"], false);
    handle.stop().expect("stop");
}

#[test]
fn detect_then_list_fetch_and_serve_overlay() {
    let (handle, _dir) = start(SegmentationClient::ready(StubBackend::covering(1_500, 0.88)));
    let addr = handle.addr;

    let (status, body) = json_request(
        addr,
        "POST",
        "/detect?latitude=51.5&longitude=%2D0.12",
        &png(60, 60),
    );
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["severity"], "medium");
    assert_eq!(body["area_m2"], 0.15);
    let id = body["pothole_id"].as_i64().expect("id");
    let image_url = body["image_url"].as_str().expect("url").to_string();
    assert!(image_url.starts_with("/image/pothole_"));

    let (status, list) = json_request(addr, "GET", "/potholes", b"");
    assert_eq!(status, 200);
    let list = list.as_array().expect("array").clone();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], id);
    assert_eq!(list[0]["latitude"], 51.5);
    assert_eq!(list[0]["longitude"], -0.12);
    assert_eq!(list[0]["status"], "reported");

    let (status, one) = json_request(addr, "GET", &format!("/potholes/{}", id), b"");
    assert_eq!(status, 200);
    assert_eq!(one["id"], id);

    let (status, _) = json_request(addr, "GET", "/potholes/999", b"");
    assert_eq!(status, 404);

    let (status, jpeg) = request(addr, "GET", &image_url, b"");
    assert_eq!(status, 200);
    assert!(image::load_from_memory(&jpeg).is_ok());

    let (status, _) = request(addr, "GET", "/image/..%2Fsecret", b"");
    assert_eq!(status, 404);

    let (status, pdf) = request(addr, "GET", &format!("/export/{}", id), b"");
    assert_eq!(status, 200);
    assert!(pdf.starts_with(b"%PDF-"));

    let (status, body) = json_request(addr, "GET", "/export/999", b"");
    assert_eq!(status, 404);
    assert_eq!(body["error"], "not_found");

    let (status, _) = json_request(addr, "POST", &format!("/export/{}", id), b"");
    assert_eq!(status, 405);

    handle.stop().expect("stop");
}

#[test]
fn detect_maps_each_failure_to_its_own_response() {
    let (handle, _dir) = start(SegmentationClient::unavailable("no weights"));
    let (status, body) = json_request(handle.addr, "POST", "/detect", &png(8, 8));
    assert_eq!(status, 503);
    assert_eq!(body["error"], "model_unavailable");
    handle.stop().expect("stop");

    let (handle, _dir) = start(SegmentationClient::ready(StubBackend::empty()));
    let addr = handle.addr;
    let (status, body) = json_request(addr, "POST", "/detect", &png(8, 8));
    assert_eq!(status, 200);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "no_detection");

    let (status, body) = json_request(addr, "POST", "/detect", b"");
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_input");

    let (status, _) = json_request(addr, "POST", "/detect?latitude=12.5", &png(8, 8));
    assert_eq!(status, 400);

    let (status, _) = json_request(addr, "GET", "/detect", b"");
    assert_eq!(status, 405);

    let (status, list) = json_request(addr, "GET", "/potholes", b"");
    assert_eq!(status, 200);
    assert_eq!(list.as_array().map(Vec::len), Some(0));
    handle.stop().expect("stop");

    let (handle, _dir) = start(SegmentationClient::ready(StubBackend::failing("gpu fault")));
    let (status, body) = json_request(handle.addr, "POST", "/detect", &png(8, 8));
    assert_eq!(status, 500);
    assert_eq!(body["error"], "inference_error");
    handle.stop().expect("stop");
}

#[test]
fn oversized_upload_is_refused_before_reading_body() {
    let (handle, _dir) = start(SegmentationClient::ready(StubBackend::covering(1, 0.5)));
    let mut stream = TcpStream::connect(handle.addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("timeout");
    // Announce a body over the limit but send none of it.
    stream
        .write_all(b"POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Length: 1000000\r\n\r\n")
        .expect("write head");
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read response");
    assert!(String::from_utf8_lossy(&raw).starts_with("HTTP/1.1 413"));
    handle.stop().expect("stop");
}

#[test]
fn event_stream_delivers_new_detections() {
    let (handle, _dir) = start(SegmentationClient::ready(StubBackend::covering(400, 0.7)));
    let addr = handle.addr;

    let mut events = TcpStream::connect(addr).expect("connect");
    events
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("timeout");
    events
        .write_all(b"GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .expect("write");
    let mut reader = BufReader::new(events);
    let mut line = String::new();
    loop {
        line.clear();
        reader.read_line(&mut line).expect("read stream");
        if line.starts_with(": connected") {
            break;
        }
    }

    let (status, body) = json_request(addr, "POST", "/detect", &png(30, 30));
    assert_eq!(status, 200);
    let id = body["pothole_id"].as_i64().expect("id");

    let mut saw_event_name = false;
    loop {
        line.clear();
        reader.read_line(&mut line).expect("read stream");
        if line.trim_end() == "event: new_pothole" {
            saw_event_name = true;
        }
        if let Some(data) = line.strip_prefix("data: ") {
            let event: serde_json::Value = serde_json::from_str(data.trim_end()).expect("event json");
            assert!(saw_event_name);
            assert_eq!(event["id"], id);
            assert_eq!(event["severity"], "low");
            assert!(event["latitude"].is_null());
            break;
        }
    }

    handle.stop().expect("stop");
}
