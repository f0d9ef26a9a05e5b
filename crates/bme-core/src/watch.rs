//! Background file watcher for the hot-reload config plane.
//!
//! A plain thread that runs a callback on a fixed cadence and exits
//! promptly when signalled. The callback owns the mtime comparison;
//! this type only owns the scheduling.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

/// Poll cadence shared by every config watcher.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(10);

/// Handle to a running watcher thread. Dropping it stops the thread.
pub struct FileWatcher {
    stop_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
    label: &'static str,
}

impl FileWatcher {
    /// Spawn a watcher running `tick` every `interval` until stopped.
    pub fn spawn<F>(label: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            loop {
                // Sleep for the interval or until the stop signal; a
                // disconnected channel also means stop.
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => tick(),
                }
            }
        });
        debug!(label, "started background file watcher");
        Self {
            stop_tx,
            handle: Some(handle),
            label,
        }
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.send(());
            let _ = handle.join();
            debug!(label = self.label, "stopped background file watcher");
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Modification time of a file, if it exists.
pub fn mtime(path: &std::path::Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
