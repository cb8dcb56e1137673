//! HTTP transport for the detection pipeline.
//!
//! Routes:
//! - `GET  /health`             model readiness
//! - `POST /detect`             raw image body, `?latitude=..&longitude=..`
//! - `GET  /potholes`           every record, newest first
//! - `GET  /potholes/<id>`      one record
//! - `GET  /image/<file_name>`  overlay JPEG
//! - `GET  /export/<id>`        PDF report for one record
//! - `GET  /events`             Server-Sent Events stream of new detections

use crate::error::PipelineError;
use crate::pipeline::DetectionPipeline;
use crate::record::{DetectionRecord, DetectionRequest, GeoPoint};
use crate::report::PdfReport;
use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MAX_HEADER_BYTES: usize = 8192;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
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
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<DetectionPipeline>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: Arc<DetectionPipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let pipeline = self.pipeline;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, pipeline, shutdown_thread) {
                log::error!("detection api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    pipeline: Arc<DetectionPipeline>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let cfg = Arc::new(cfg);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let pipeline = pipeline.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &pipeline, &cfg, &shutdown) {
                        log::warn!("detection api request from {} rejected: {}", peer, err);
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

fn handle_connection(
    mut stream: TcpStream,
    pipeline: &DetectionPipeline,
    cfg: &ApiConfig,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut request = read_request_head(&mut stream)?;
    let path = request.path.clone();
    let segments: Vec<&str> = path
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["health"]) => {
            let body = json!({
                "status": "ok",
                "model_ready": pipeline.readiness().is_ready(),
            });
            write_json(&mut stream, 200, &body)
        }
        ("POST", ["detect"]) => {
            let length = match request.content_length()? {
                Some(length) => length,
                None => {
                    return write_error(&mut stream, 411, "length_required", "Content-Length required")
                }
            };
            if length > cfg.max_upload_bytes {
                return write_error(&mut stream, 413, "payload_too_large", "image exceeds upload limit");
            }
            read_request_body(&mut stream, &mut request, length)?;
            handle_detect(&mut stream, pipeline, request)
        }
        ("GET", ["potholes"]) => match pipeline.store().list_all() {
            Ok(records) => write_json(&mut stream, 200, &serde_json::to_value(records)?),
            Err(err) => write_pipeline_error(&mut stream, &PipelineError::store(err)),
        },
        ("GET", ["potholes", id]) => {
            let Ok(id) = id.parse::<i64>() else {
                return write_error(&mut stream, 400, "invalid_id", "pothole id must be an integer");
            };
            match pipeline.store().get(id) {
                Ok(Some(record)) => write_json(&mut stream, 200, &serde_json::to_value(record)?),
                Ok(None) => write_error(&mut stream, 404, "not_found", "no such pothole"),
                Err(err) => write_pipeline_error(&mut stream, &PipelineError::store(err)),
            }
        }
        ("GET", ["image", file_name]) => match pipeline.artifacts().read(file_name) {
            Ok(Some(bytes)) => write_response(&mut stream, 200, "image/jpeg", &bytes),
            Ok(None) => write_error(&mut stream, 404, "not_found", "no such image"),
            Err(_) => write_error(&mut stream, 404, "not_found", "no such image"),
        },
        ("GET", ["export", id]) => {
            let Ok(id) = id.parse::<i64>() else {
                return write_error(&mut stream, 400, "invalid_id", "pothole id must be an integer");
            };
            match pipeline.store().get(id) {
                Ok(Some(record)) => handle_export(&mut stream, pipeline, &record),
                Ok(None) => write_error(&mut stream, 404, "not_found", "no such pothole"),
                Err(err) => write_pipeline_error(&mut stream, &PipelineError::store(err)),
            }
        }
        ("GET", ["events"]) => stream_events(&mut stream, pipeline, shutdown),
        (_, ["health"]) | (_, ["detect"]) | (_, ["potholes", ..]) | (_, ["image", _])
        | (_, ["export", _]) | (_, ["events"]) => write_error(&mut stream, 405, "method_not_allowed", "method not allowed"),
        _ => write_error(&mut stream, 404, "not_found", "not found"),
    }
}

fn handle_detect(
    stream: &mut TcpStream,
    pipeline: &DetectionPipeline,
    request: HttpRequest,
) -> Result<()> {
    let location = match request.location() {
        Ok(location) => location,
        Err(err) => return write_pipeline_error(stream, &err),
    };
    match pipeline.run(DetectionRequest::new(request.body, location)) {
        Ok(outcome) => {
            let record = &outcome.record;
            let body = json!({
                "success": true,
                "pothole_id": record.id,
                "severity": record.severity,
                "area_m2": record.area,
                "depth_meters": record.depth_meters,
                "confidence": record.confidence,
                "image_url": outcome.artifact.url(),
            });
            write_json(stream, 200, &body)
        }
        Err(err) => write_pipeline_error(stream, &err),
    }
}

fn handle_export(
    stream: &mut TcpStream,
    pipeline: &DetectionPipeline,
    record: &DetectionRecord,
) -> Result<()> {
    // The overlay is optional in the report; a missing file only drops the image.
    let overlay = std::path::Path::new(&record.image_path)
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| pipeline.artifacts().read(name).ok().flatten())
        .and_then(|bytes| match image::load_from_memory(&bytes) {
            Ok(decoded) => Some(decoded.to_rgb8()),
            Err(err) => {
                log::warn!("overlay for report {} unreadable: {}", record.id, err);
                None
            }
        });
    match PdfReport::render(record, overlay.as_ref()) {
        Ok(pdf) => write_attachment(stream, "application/pdf", &PdfReport::file_name(record.id), &pdf),
        Err(err) => write_pipeline_error(stream, &PipelineError::artifact(err)),
    }
}

fn stream_events(
    stream: &mut TcpStream,
    pipeline: &DetectionPipeline,
    shutdown: &AtomicBool,
) -> Result<()> {
    let subscription = pipeline.broadcaster().subscribe();
    stream.write_all(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-store\r\nConnection: keep-alive\r\n\r\n",
    )?;
    stream.write_all(b": connected\n\n")?;
    stream.flush()?;

    let mut last_write = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        match subscription.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(Some(event)) => {
                let payload = serde_json::to_string(&event)?;
                let frame = format!("event: new_pothole\ndata: {}\n\n", payload);
                if stream.write_all(frame.as_bytes()).is_err() {
                    break;
                }
                last_write = Instant::now();
            }
            Ok(None) => {
                if last_write.elapsed() >= KEEP_ALIVE_INTERVAL {
                    if stream.write_all(b": keep-alive\n\n").is_err() {
                        break;
                    }
                    last_write = Instant::now();
                }
            }
            Err(_) => break,
        }
    }
    Ok(())
}

fn status_for(err: &PipelineError) -> u16 {
    match err {
        PipelineError::InvalidInput(_) => 400,
        PipelineError::NoDetection => 200,
        PipelineError::ModelUnavailable(_) => 503,
        PipelineError::Inference(_)
        | PipelineError::StoreUnavailable(_)
        | PipelineError::Artifact(_) => 500,
    }
}

fn write_pipeline_error(stream: &mut TcpStream, err: &PipelineError) -> Result<()> {
    write_error(stream, status_for(err), err.code(), &err.to_string())
}

fn write_error(stream: &mut TcpStream, status: u16, code: &str, message: &str) -> Result<()> {
    let body = json!({
        "success": false,
        "error": code,
        "message": message,
    });
    write_json(stream, status, &body)
}

fn write_json(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_attachment(
    stream: &mut TcpStream,
    content_type: &str,
    file_name: &str,
    body: &[u8],
) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Disposition: attachment; filename=\"{}\"\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        content_type,
        file_name,
        body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
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
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
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
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn content_length(&self) -> Result<Option<usize>> {
        match self.headers.get("content-length") {
            Some(value) => Ok(Some(
                value
                    .parse()
                    .map_err(|_| anyhow!("invalid Content-Length '{}'", value))?,
            )),
            None => Ok(None),
        }
    }

    fn coordinate(&self, key: &str) -> Result<Option<f64>, PipelineError> {
        match self.query.get(key) {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| PipelineError::InvalidInput(format!("{} '{}' is not a number", key, raw))),
        }
    }

    fn location(&self) -> Result<Option<GeoPoint>, PipelineError> {
        GeoPoint::from_parts(self.coordinate("latitude")?, self.coordinate("longitude")?)
    }
}

fn read_request_head(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request head"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request head too large"));
        }
    };
    let body = data.split_off(header_end + 4);
    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    parse_head(&text, body)
}

fn parse_head(text: &str, body: Vec<u8>) -> Result<HttpRequest> {
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
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
        headers,
        body,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn read_request_body(stream: &mut TcpStream, request: &mut HttpRequest, length: usize) -> Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    if request.body.len() > length {
        request.body.truncate(length);
        return Ok(());
    }
    let remaining = length - request.body.len();
    let mut rest = vec![0u8; remaining];
    stream.read_exact(&mut rest)?;
    request.body.extend_from_slice(&rest);
    Ok(())
}
