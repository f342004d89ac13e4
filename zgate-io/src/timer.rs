//! Single-slot retransmission timer
//!
//! One worker thread per session consumes timer commands from a channel. At
//! most one request is pending; a new request replaces the old one. The fire
//! callback runs on the worker thread, so a handler may issue the next
//! request from inside `on_timeout` without deadlocking.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Target of a timer request
pub trait TimeoutHandler: Send + Sync {
    fn on_timeout(&self);
}

enum TimerCommand {
    Request {
        /// `None` for a delay too far in the future to represent
        deadline: Option<Instant>,
        target: Arc<dyn TimeoutHandler>,
    },
    Cancel,
    Stop,
}

/// Timer subsystem backed by a dedicated worker thread
pub struct TimeoutProvider {
    tx: Sender<TimerCommand>,
    stopped: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutProvider {
    /// Spawn the worker thread
    pub fn new(name: &str) -> io::Result<Self> {
        let (tx, rx) = channel::unbounded();
        let stopped = Arc::new(AtomicBool::new(false));

        let worker_stopped = Arc::clone(&stopped);
        let worker = thread::Builder::new()
            .name(format!("{}-timer", name))
            .spawn(move || run(rx, worker_stopped))?;

        tracing::debug!("Timer worker {}-timer started", name);

        Ok(TimeoutProvider {
            tx,
            stopped,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Arm the timer, replacing any pending request
    ///
    /// Returns false once the provider is stopped. A delay beyond the
    /// representable range still replaces the pending request but never fires.
    pub fn request(&self, delay: Duration, target: Arc<dyn TimeoutHandler>) -> bool {
        if self.is_stopped() {
            return false;
        }
        let deadline = Instant::now().checked_add(delay);
        if deadline.is_none() {
            tracing::debug!("Timer delay {:?} out of range, request will not fire", delay);
        }
        self.tx
            .send(TimerCommand::Request { deadline, target })
            .is_ok()
    }

    /// Disarm the pending request, if any
    pub fn cancel(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.tx.send(TimerCommand::Cancel).is_ok()
    }

    /// Halt the worker permanently
    ///
    /// Safe to call from the fire callback; the worker thread is only joined
    /// when called from another thread.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(TimerCommand::Stop);

        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
        tracing::debug!("Timer worker stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for TimeoutProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(rx: Receiver<TimerCommand>, stopped: Arc<AtomicBool>) {
    let mut pending: Option<(Option<Instant>, Arc<dyn TimeoutHandler>)> = None;

    loop {
        let command = match &pending {
            Some((Some(deadline), _)) => rx.recv_deadline(*deadline),
            _ => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(TimerCommand::Request { deadline, target }) => {
                tracing::trace!("Timer armed");
                pending = Some((deadline, target));
            }
            Ok(TimerCommand::Cancel) => {
                if pending.take().is_some() {
                    tracing::trace!("Timer cancelled");
                }
            }
            Ok(TimerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if let Some((Some(deadline), target)) = pending.take() {
                    if Instant::now() < deadline {
                        pending = Some((Some(deadline), target));
                        continue;
                    }
                    if stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::trace!("Timer fired");
                    target.on_timeout();
                }
            }
        }
    }
}
