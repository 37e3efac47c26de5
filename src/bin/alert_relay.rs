//! alert_relay - Telegram delivery service for remote detectors.
//!
//! Accepts `POST /send_task` from `sentryd` instances running in relay mode
//! and delivers each task (photo, text, voice) from its own dispatcher queue.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use motion_sentry::{
    AlertDispatcher, HttpSpeech, MessengerDelivery, RelayConfig, RelayServer, RelayServerConfig,
    TelegramMessenger,
};

const IDLE_POLL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about = "Deliver alert tasks posted by sentryd to Telegram")]
struct Args {
    /// Config file shared with sentryd.
    #[arg(long, env = "SENTRY_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = RelayConfig::load_from(args.config.as_deref())?;

    let timeout = cfg.timeout();
    let messenger = TelegramMessenger::new(cfg.telegram.messenger_config(timeout)?)?;
    let speech = if cfg.speech.enabled {
        Some(HttpSpeech::new(&cfg.speech.endpoint, &cfg.speech.language, timeout)?)
    } else {
        log::info!("speech disabled; alerts are sent without voice messages");
        None
    };
    let (queue, dispatcher) = AlertDispatcher::start(MessengerDelivery::new(messenger, speech))?;

    let server = RelayServer::new(
        RelayServerConfig {
            addr: cfg.addr.clone(),
        },
        queue,
    )
    .spawn()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        signal.store(true, Ordering::SeqCst);
    })
    .context("install signal handler")?;

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(IDLE_POLL);
    }

    log::info!("alert_relay shutting down");
    // Stopping the server drops its queue handle, which lets the dispatcher
    // finish pending tasks and exit.
    server.stop()?;
    let stats = dispatcher.join();
    log::info!(
        "alert_relay stopped: {} alerts processed, {} failed steps",
        stats.processed,
        stats.failed_steps
    );
    Ok(())
}
