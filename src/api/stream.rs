use anyhow::Result;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::http::{read_request, write_json_response, write_response};
use super::{spawn_accept_loop, ServerHandle};
use crate::frame::{encode_jpeg, SharedFrameState, StreamView, DEFAULT_JPEG_QUALITY};

pub const MJPEG_BOUNDARY: &str = "frame";

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub addr: String,
    pub view: StreamView,
    /// Delay between shared-state polls per client.
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
    /// Concurrent `/video_feed` clients; extra clients get 503.
    pub max_clients: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
            view: StreamView::Annotated,
            poll_interval: Duration::from_millis(30),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_clients: 16,
        }
    }
}

/// Live view of `SharedFrameState`.
///
/// - `GET /video_feed`: `multipart/x-mixed-replace` MJPEG, one part per new frame
/// - `GET /snapshot`: latest frame as a single JPEG
/// - `GET /health`: JSON status
pub struct StreamServer {
    cfg: StreamConfig,
    state: SharedFrameState,
}

impl StreamServer {
    pub fn new(cfg: StreamConfig, state: SharedFrameState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(StreamContext {
            cfg: self.cfg.clone(),
            state: self.state,
            clients: AtomicUsize::new(0),
            shutdown: Arc::clone(&shutdown),
        });

        let handle = spawn_accept_loop("stream", &self.cfg.addr, shutdown, move |stream| {
            let ctx = Arc::clone(&ctx);
            let spawned = std::thread::Builder::new()
                .name("stream-client".to_string())
                .spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        log::debug!("stream: connection ended: {:#}", err);
                    }
                });
            if let Err(err) = spawned {
                log::warn!("stream: failed to spawn client thread: {}", err);
            }
        })?;
        log::info!(
            "stream: serving {:?} frames on http://{}/video_feed",
            self.cfg.view,
            handle.addr
        );
        Ok(handle)
    }
}

struct StreamContext {
    cfg: StreamConfig,
    state: SharedFrameState,
    clients: AtomicUsize,
    shutdown: Arc<AtomicBool>,
}

/// Decrements the client count when the stream ends.
struct ClientSlot<'a>(&'a AtomicUsize);

impl<'a> ClientSlot<'a> {
    fn acquire(clients: &'a AtomicUsize, max: usize) -> Option<Self> {
        clients
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(clients))
    }
}

impl Drop for ClientSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn handle_connection(mut stream: TcpStream, ctx: &StreamContext) -> Result<()> {
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/video_feed" => serve_video_feed(stream, ctx),
        "/snapshot" => serve_snapshot(&mut stream, ctx),
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "frames_published": ctx.state.published(),
                "stream_clients": ctx.clients.load(Ordering::SeqCst),
            });
            write_json_response(&mut stream, 200, &body.to_string())
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn serve_snapshot(stream: &mut TcpStream, ctx: &StreamContext) -> Result<()> {
    let Some(pair) = ctx.state.read_latest() else {
        return write_json_response(stream, 503, r#"{"error":"no_frame_yet"}"#);
    };
    match encode_jpeg(pair.view(ctx.cfg.view), ctx.cfg.jpeg_quality) {
        Ok(jpeg) => write_response(stream, 200, "image/jpeg", &jpeg),
        Err(err) => {
            log::warn!("stream: snapshot of frame {} failed: {:#}", pair.sequence, err);
            write_json_response(stream, 500, r#"{"error":"encode_failed"}"#)
        }
    }
}

fn serve_video_feed(mut stream: TcpStream, ctx: &StreamContext) -> Result<()> {
    let Some(_slot) = ClientSlot::acquire(&ctx.clients, ctx.cfg.max_clients) else {
        log::warn!(
            "stream: rejecting client, {} streams already open",
            ctx.cfg.max_clients
        );
        return write_json_response(&mut stream, 503, r#"{"error":"too_many_clients"}"#);
    };

    let peer = stream.peer_addr()?;
    log::info!("stream: client {} connected", peer);
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        MJPEG_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    let mut last_sent = 0u64;
    while !ctx.shutdown.load(Ordering::SeqCst) {
        if let Some(pair) = ctx.state.read_latest() {
            if pair.sequence != last_sent {
                last_sent = pair.sequence;
                match encode_jpeg(pair.view(ctx.cfg.view), ctx.cfg.jpeg_quality) {
                    Ok(jpeg) => {
                        if let Err(err) = write_part(&mut stream, &jpeg) {
                            log::info!("stream: client {} disconnected ({})", peer, err);
                            return Ok(());
                        }
                    }
                    Err(err) => {
                        log::warn!("stream: skipping frame {}: {:#}", pair.sequence, err);
                    }
                }
            }
        }
        std::thread::sleep(ctx.cfg.poll_interval);
    }
    Ok(())
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> std::io::Result<()> {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_slots_are_bounded_and_released() {
        let clients = AtomicUsize::new(0);
        let first = ClientSlot::acquire(&clients, 2).unwrap();
        let second = ClientSlot::acquire(&clients, 2).unwrap();
        assert!(ClientSlot::acquire(&clients, 2).is_none());
        drop(first);
        assert!(ClientSlot::acquire(&clients, 2).is_some());
        drop(second);
        assert_eq!(clients.load(Ordering::SeqCst), 0);
    }
}
