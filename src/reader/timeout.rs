//! Emits a timeout signal when the wrapped reader stays silent
//!
//! The wrapped reader runs on a background task feeding a channel of capacity
//! one. A result that arrives after a timeout was reported is kept in the
//! channel and returned by the following call.

use super::Reader;
use crate::types::Message;
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

enum Worker {
    /// No task running; the reader is parked here
    Idle(Box<dyn Reader>),
    /// Task is reading ahead; it hands the reader back after an error
    Running {
        rx: mpsc::Receiver<Result<Message>>,
        handle: JoinHandle<Box<dyn Reader>>,
    },
    /// The reader was lost with a failed task
    Gone,
}

/// Wraps a reader with a per-call timeout
pub struct TimeoutReader {
    worker: Worker,
    timeout: Duration,
    cancel: CancellationToken,
}

impl TimeoutReader {
    /// Wrap `reader`, reporting [`Error::Timeout`] after `timeout` of silence
    pub fn new(reader: Box<dyn Reader>, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            worker: Worker::Idle(reader),
            timeout,
            cancel,
        }
    }

    fn start(&mut self) {
        let Worker::Idle(mut reader) = std::mem::replace(&mut self.worker, Worker::Gone) else {
            return;
        };

        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            loop {
                let result = reader.next().await;
                let failed = result.is_err();
                if tx.send(result).await.is_err() || failed {
                    break;
                }
            }
            reader
        });

        self.worker = Worker::Running { rx, handle };
    }

    /// Wait for the task to finish and park its reader again
    async fn reclaim(&mut self) {
        if let Worker::Running { handle, .. } = std::mem::replace(&mut self.worker, Worker::Gone) {
            match handle.await {
                Ok(reader) => self.worker = Worker::Idle(reader),
                Err(err) => warn!(error = %err, "reader task failed"),
            }
        }
    }
}

#[async_trait]
impl Reader for TimeoutReader {
    async fn next(&mut self) -> Result<Message> {
        if matches!(self.worker, Worker::Idle(_)) {
            self.start();
        }
        let Worker::Running { rx, .. } = &mut self.worker else {
            return Err(Error::Closed);
        };

        let received = tokio::select! {
            received = rx.recv() => received,
            _ = sleep(self.timeout) => {
                debug!(timeout = ?self.timeout, "no line received before timeout");
                return Err(Error::Timeout);
            }
            _ = self.cancel.cancelled() => return Err(Error::Closed),
        };

        match received {
            Some(Ok(message)) => Ok(message),
            Some(Err(err)) => {
                self.reclaim().await;
                Err(err)
            }
            None => {
                self.reclaim().await;
                Err(Error::Closed)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.worker, Worker::Gone) {
            Worker::Idle(mut reader) => reader.close().await,
            Worker::Running { handle, .. } => {
                handle.abort();
                Ok(())
            }
            Worker::Gone => Ok(()),
        }
    }
}

impl Drop for TimeoutReader {
    fn drop(&mut self) {
        if let Worker::Running { handle, .. } = &self.worker {
            handle.abort();
        }
    }
}
