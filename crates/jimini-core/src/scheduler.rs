//! Triggers for sync cycles: host background tasks and an in-process timer.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::sync::{SyncEngine, SyncError, SyncReport};

/// The host's background-task runner. Every task handed to the engine must
/// be finished, or the OS treats the invocation as hung.
pub trait TaskCompletion {
    fn finish(&self, task_id: &str);
}

/// Calls `finish` when dropped, so panics still complete the task.
struct FinishOnDrop<'a> {
    task_id: &'a str,
    host: &'a dyn TaskCompletion,
}

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        tracing::debug!(task_id = self.task_id, "Finishing background task");
        self.host.finish(self.task_id);
    }
}

impl SyncEngine {
    /// Entry point for a periodic background wake-up.
    ///
    /// Runs one cycle and then finishes `task_id`, whatever the outcome.
    pub fn run_background_task(
        &self,
        task_id: &str,
        host: &dyn TaskCompletion,
    ) -> Result<SyncReport, SyncError> {
        let _finish = FinishOnDrop { task_id, host };
        tracing::info!(task_id, "Background sync triggered");
        self.run_sync_cycle()
    }

    /// The host ran out of background time for `task_id`.
    ///
    /// A running cycle is not interrupted; its request timeouts bound it.
    pub fn expire_background_task(&self, task_id: &str, host: &dyn TaskCompletion) {
        tracing::warn!(task_id, syncing = self.is_syncing(), "Background task timed out");
        host.finish(task_id);
    }
}

/// Runs a sync cycle every `interval` on a dedicated thread until stopped.
///
/// Overlap with foreground or background triggers is resolved by the
/// engine's guard: a tick during a running cycle is skipped.
pub struct PeriodicScheduler {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicScheduler {
    pub fn spawn(engine: Arc<SyncEngine>, interval: Duration) -> io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("jimini-sync".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        // Outcome is already logged by the engine
                        let _ = engine.run_sync_cycle();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        tracing::info!(interval_secs = interval.as_secs(), "Periodic sync scheduled");
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop ticking and wait for an in-flight cycle to finish.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Periodic sync thread panicked");
            }
        }
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
