//! HTTP surfaces: the live MJPEG stream and the alert relay intake.
//!
//! Both servers use a nonblocking accept loop polled against a shutdown
//! flag, so `ServerHandle::stop` returns promptly.

use anyhow::{anyhow, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

mod http;
mod relay;
mod stream;

pub use relay::{RelayServer, RelayServerConfig};
pub use stream::{StreamConfig, StreamServer, MJPEG_BOUNDARY};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("server thread at {} panicked", self.addr))?;
        }
        Ok(())
    }
}

/// Bind `addr` and run `handle` for every accepted connection on a
/// dedicated accept thread until the handle is stopped.
fn spawn_accept_loop<F>(
    name: &'static str,
    addr: &str,
    shutdown: Arc<AtomicBool>,
    mut handle: F,
) -> Result<ServerHandle>
where
    F: FnMut(TcpStream) + Send + 'static,
{
    let configured: SocketAddr = addr
        .parse()
        .map_err(|err| anyhow!("{} addr '{}' is invalid: {}", name, addr, err))?;
    let listener = TcpListener::bind(configured)
        .map_err(|err| anyhow!("{} failed to bind {}: {}", name, configured, err))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let shutdown_thread = Arc::clone(&shutdown);
    let join = std::thread::Builder::new()
        .name(format!("{}-accept", name))
        .spawn(move || {
            if let Err(err) = accept_loop(&listener, &shutdown_thread, &mut handle) {
                log::error!("{}: accept loop stopped: {}", name, err);
            }
        })?;

    Ok(ServerHandle {
        addr,
        shutdown,
        join: Some(join),
    })
}

fn accept_loop<F>(listener: &TcpListener, shutdown: &AtomicBool, handle: &mut F) -> Result<()>
where
    F: FnMut(TcpStream),
{
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                // Accepted sockets may inherit the listener's nonblocking mode.
                if let Err(err) = stream.set_nonblocking(false) {
                    log::warn!("connection setup failed: {}", err);
                    continue;
                }
                handle(stream);
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
