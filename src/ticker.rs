//! Cancellable repeating progress tick.

use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::engine::EventSink;
use crate::protocol::{Message, SessionCommand};

/// Posts [`SessionCommand::Tick`] onto the bus at a fixed interval until cancelled.
pub struct ProgressTicker {
    cancel_tx: Option<SyncSender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    pub fn spawn(sink: EventSink, interval: Duration) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::sync_channel::<()>(1);
        let worker = thread::Builder::new()
            .name("castlane-progress-tick".to_string())
            .spawn(move || loop {
                match cancel_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !sink.post(Message::Session(SessionCommand::Tick)) {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });
        let worker = match worker {
            Ok(worker) => Some(worker),
            Err(err) => {
                warn!("ProgressTicker: failed to spawn tick thread: {}", err);
                None
            }
        };
        Self {
            cancel_tx: Some(cancel_tx),
            worker,
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel_tx.is_some()
    }

    /// Stops the tick and waits for the worker to exit. Safe to call more than once.
    pub fn cancel(&mut self) {
        let Some(cancel_tx) = self.cancel_tx.take() else {
            return;
        };
        let _ = cancel_tx.try_send(());
        drop(cancel_tx);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("ProgressTicker: tick thread panicked");
            }
        }
        debug!("ProgressTicker: cancelled");
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.cancel();
    }
}
