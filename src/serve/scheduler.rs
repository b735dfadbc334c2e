//! Background model refresh

use super::state::ServerState;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum Signal {
    Refresh,
    Shutdown,
}

/// Wakes the refresh thread. Cheap to clone.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: SyncSender<Signal>,
    stop: Arc<AtomicBool>,
}

impl RefreshHandle {
    /// Request a refresh. Returns false if one is already pending or the
    /// scheduler has stopped.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(Signal::Refresh) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Refresh already pending");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Stop the refresh thread after its current pass. Never blocks; a
    /// queued refresh is discarded.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Wakes an idle thread. If the slot is full the thread sees the flag
        // as soon as it dequeues.
        let _ = self.tx.try_send(Signal::Shutdown);
    }
}

/// Start the refresh thread: one pass immediately, then every `interval`.
pub fn start(
    state: Arc<ServerState>,
    interval: Duration,
) -> io::Result<(RefreshHandle, JoinHandle<()>)> {
    let (tx, rx) = mpsc::sync_channel(1);
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let handle = thread::Builder::new()
        .name("model-refresh".to_string())
        .spawn(move || run(&state, &rx, &thread_stop, interval))?;
    Ok((RefreshHandle { tx, stop }, handle))
}

fn run(state: &ServerState, rx: &Receiver<Signal>, stop: &AtomicBool, interval: Duration) {
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let report = state.update_models();
        tracing::info!(
            "Model refresh done: {} loaded, {} unchanged, {} failed, {} removed",
            report.loaded.len(),
            report.unchanged,
            report.failed.len(),
            report.removed.len()
        );
        if stop.load(Ordering::SeqCst) {
            break;
        }

        match rx.recv_timeout(interval) {
            Ok(Signal::Refresh) | Err(RecvTimeoutError::Timeout) => continue,
            Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("Model refresh thread stopped");
}
