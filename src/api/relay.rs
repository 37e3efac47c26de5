use anyhow::Result;
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::http::{read_request, write_json_response};
use super::{spawn_accept_loop, ServerHandle};
use crate::alert::{AlertQueue, RelayTask};

#[derive(Clone, Debug)]
pub struct RelayServerConfig {
    pub addr: String,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5001".to_string(),
        }
    }
}

/// Alert intake for remote detectors.
///
/// - `POST /send_task`: JSON `RelayTask`, answered `202 {"status":"queued"}`
/// - `GET /health`
///
/// Requests are handled one at a time on the accept thread; handling is just
/// a parse and an enqueue.
pub struct RelayServer {
    cfg: RelayServerConfig,
    queue: AlertQueue,
}

impl RelayServer {
    pub fn new(cfg: RelayServerConfig, queue: AlertQueue) -> Self {
        Self { cfg, queue }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let queue = self.queue;
        let handle = spawn_accept_loop("relay", &self.cfg.addr, shutdown, move |mut stream| {
            if let Err(err) = handle_connection(&mut stream, &queue) {
                log::warn!("relay: request rejected: {:#}", err);
            }
        })?;
        log::info!("relay: accepting tasks on http://{}/send_task", handle.addr);
        Ok(handle)
    }
}

fn handle_connection(stream: &mut TcpStream, queue: &AlertQueue) -> Result<()> {
    let request = match read_request(stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/send_task") => {}
        ("GET", "/health") => {
            return write_json_response(stream, 200, r#"{"status":"ok"}"#);
        }
        (_, "/send_task") | (_, "/health") => {
            return write_json_response(stream, 405, r#"{"error":"method_not_allowed"}"#);
        }
        _ => return write_json_response(stream, 404, r#"{"error":"not_found"}"#),
    }

    let task = match serde_json::from_slice::<RelayTask>(&request.body)
        .map_err(anyhow::Error::from)
        .and_then(RelayTask::into_task)
    {
        Ok(task) => task,
        Err(err) => {
            let body = serde_json::json!({ "error": format!("{:#}", err) });
            return write_json_response(stream, 400, &body.to_string());
        }
    };

    log::info!("relay: queued alert for {}", task.photo_path.display());
    if queue.enqueue(task) {
        write_json_response(stream, 202, r#"{"status":"queued"}"#)
    } else {
        write_json_response(stream, 503, r#"{"error":"dispatcher_stopped"}"#)
    }
}
