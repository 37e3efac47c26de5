use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::{AlertDelivery, AlertQueue, AlertTask};

/// Single worker draining the alert queue in FIFO order.
///
/// The worker blocks on the channel until a task arrives. It exits once every
/// `AlertQueue` clone has been dropped and the queue is empty.
pub struct AlertDispatcher;

impl AlertDispatcher {
    /// Create a queue and start its worker.
    pub fn start<D>(delivery: D) -> Result<(AlertQueue, DispatcherHandle)>
    where
        D: AlertDelivery + 'static,
    {
        let (queue, receiver) = AlertQueue::channel();
        let handle = Self::spawn(receiver, delivery)?;
        Ok((queue, handle))
    }

    /// Start a worker on an existing receiver.
    pub fn spawn<D>(receiver: Receiver<AlertTask>, mut delivery: D) -> Result<DispatcherHandle>
    where
        D: AlertDelivery + 'static,
    {
        let stats = Arc::new(Counters::default());
        let worker_stats = Arc::clone(&stats);
        let join = std::thread::Builder::new()
            .name("alert-dispatcher".to_string())
            .spawn(move || {
                log::info!("dispatcher: started ({})", delivery.name());
                for task in receiver.iter() {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        process(&mut delivery, &task, &worker_stats)
                    }));
                    if let Err(payload) = outcome {
                        log::error!(
                            "dispatcher: delivery of {} panicked: {}",
                            task.photo_path.display(),
                            panic_message(payload.as_ref())
                        );
                        worker_stats.processed.fetch_add(1, Ordering::SeqCst);
                        worker_stats.panicked.fetch_add(1, Ordering::SeqCst);
                    }
                }
                log::info!("dispatcher: queue closed, worker exiting");
            })
            .context("spawn alert dispatcher thread")?;

        Ok(DispatcherHandle {
            join: Some(join),
            stats,
        })
    }
}

fn process<D: AlertDelivery>(delivery: &mut D, task: &AlertTask, stats: &Counters) {
    log::info!("dispatcher: delivering alert {}", task.photo_path.display());
    let report = delivery.deliver(task);

    for (step, outcome) in [
        ("photo", &report.photo),
        ("text", &report.text),
        ("voice", &report.voice),
    ] {
        if outcome.is_failed() {
            log::error!(
                "dispatcher: {} step for {} {}",
                step,
                task.photo_path.display(),
                outcome
            );
        } else {
            log::debug!("dispatcher: {} step {}", step, outcome);
        }
    }

    stats.processed.fetch_add(1, Ordering::SeqCst);
    if report.failed_steps() > 0 {
        stats
            .failed_steps
            .fetch_add(report.failed_steps() as u64, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed_steps: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of dispatcher counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub processed: u64,
    pub failed_steps: u64,
    /// Tasks whose delivery panicked; the worker kept going.
    pub panicked: u64,
}

pub struct DispatcherHandle {
    join: Option<JoinHandle<()>>,
    stats: Arc<Counters>,
}

impl DispatcherHandle {
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            processed: self.stats.processed.load(Ordering::SeqCst),
            failed_steps: self.stats.failed_steps.load(Ordering::SeqCst),
            panicked: self.stats.panicked.load(Ordering::SeqCst),
        }
    }

    /// Wait for the worker to drain the queue and exit. All `AlertQueue`
    /// clones must be dropped first or this blocks forever.
    pub fn join(mut self) -> DispatcherStats {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("dispatcher: worker thread panicked");
            }
        }
        self.stats()
    }
}
