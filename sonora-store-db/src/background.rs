// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Opening a project file on a worker thread.
//!
//! Saving to a new path opens the freshly written copy while the caller keeps
//! its progress display alive. The worker owns a different file than the
//! current connection until the caller adopts the result.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::connection::StoreConnection;
use crate::error::{Error, Result};
use crate::types::Progress;

/// An open in flight on a worker thread.
#[must_use = "the worker must be waited for"]
pub struct PendingOpen {
    path: PathBuf,
    poll: Duration,
    result: Receiver<Result<StoreConnection>>,
    worker: JoinHandle<()>,
}

impl PendingOpen {
    pub fn spawn(path: &Path, config: &StoreConfig) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(1);
        let worker_path = path.to_owned();
        let worker_config = config.clone();
        let worker = std::thread::Builder::new()
            .name("sonora-open".to_string())
            .spawn(move || {
                // The receiver only disappears if the waiter is gone
                let _ = tx.send(StoreConnection::open(&worker_path, &worker_config));
            })
            .map_err(|e| Error::io("Failed to start project open worker", e))?;

        Ok(Self {
            path: path.to_owned(),
            poll: config.open_poll_interval(),
            result: rx,
            worker,
        })
    }

    /// Wait for the worker, asking `pulse` whether to keep waiting between
    /// polls.
    ///
    /// The worker is always joined before returning. On cancellation the
    /// opened connection is closed and [`Error::Cancelled`] is returned.
    pub fn wait<F>(self, mut pulse: F) -> Result<StoreConnection>
    where
        F: FnMut() -> Progress,
    {
        let mut cancelled = false;
        let outcome = loop {
            match self.result.recv_timeout(self.poll) {
                Ok(outcome) => break outcome,
                Err(RecvTimeoutError::Timeout) => {
                    if !cancelled && pulse().is_cancel() {
                        debug!("Cancellation requested while opening {}", self.path.display());
                        cancelled = true;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(Error::io(
                        format!("Worker opening {} stopped", self.path.display()),
                        std::io::Error::other("worker exited without a result"),
                    ));
                }
            }
        };

        if self.worker.join().is_err() {
            warn!("Worker opening {} panicked", self.path.display());
        }

        let conn = outcome?;
        if cancelled {
            if let Err((_, e)) = conn.close() {
                warn!("{e}");
            }
            return Err(Error::Cancelled);
        }
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_on_worker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.sonora");
        let pending = PendingOpen::spawn(&path, &StoreConfig::default()).unwrap();
        let conn = pending.wait(|| Progress::Continue).unwrap();
        assert_eq!(conn.path(), path);
        assert_eq!(conn.block_count().unwrap(), 0);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("bg.sonora");
        let pending = PendingOpen::spawn(&path, &StoreConfig::default()).unwrap();
        let err = pending.wait(|| Progress::Continue).unwrap_err();
        assert!(matches!(err, Error::OpenFailed { .. }), "{err}");
    }
}
