//! Harvesters drive one reader pipeline each and forward its events
//!
//! A [`Harvester`] owns the [`Pipeline`] of a single source. It keeps the raw
//! resume offset of the source, strips a UTF-8 byte order mark from the very
//! first line, drops events rejected by its [`LineFilter`] and translates the
//! terminal errors of the pipeline into a [`HarvestOutcome`].
//!
//! The offset only moves past an event once the event was handed to the
//! channel; filtered and empty messages move it immediately.

pub mod filter;
pub mod registry;

use crate::config::{HarvesterConfig, ReaderConfig};
use crate::reader::{Pipeline, Reader};
use crate::source::Source;
use crate::types::Message;
use crate::{Error, Result};
use bytes::Buf;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use filter::LineFilter;
pub use registry::{Registry, RegistryGuard};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A message ready for publishing, with the offset to persist once it is acknowledged
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Harvester that produced the event
    pub harvester: Uuid,
    /// Name of the source
    pub source: String,
    /// Raw offset just past the bytes of this event
    pub offset: u64,
    /// The event itself
    pub message: Message,
}

/// Why a harvester stopped
#[derive(Debug)]
pub enum HarvestOutcome {
    /// The source has no more data
    Eof,
    /// The file shrank; harvesting must restart at offset 0
    Truncated,
    /// The path now names a different file
    Renamed,
    /// The path was removed
    Removed,
    /// No data arrived within close_inactive
    Inactive,
    /// Stopped from the outside or the receiver went away
    Closed,
    /// The harvester ran for longer than close_timeout
    CloseTimeout,
    /// Any other failure
    Failed(Error),
}

impl HarvestOutcome {
    /// Offset a new harvester of the same file should start from
    pub fn resume_offset(&self, offset: u64) -> u64 {
        match self {
            HarvestOutcome::Truncated => 0,
            _ => offset,
        }
    }

    /// Returns true for [`HarvestOutcome::Failed`]
    pub fn is_failure(&self) -> bool {
        matches!(self, HarvestOutcome::Failed(_))
    }
}

impl From<Error> for HarvestOutcome {
    fn from(err: Error) -> Self {
        match err {
            Error::Eof => HarvestOutcome::Eof,
            Error::Truncated => HarvestOutcome::Truncated,
            Error::Renamed => HarvestOutcome::Renamed,
            Error::Removed => HarvestOutcome::Removed,
            Error::Inactive => HarvestOutcome::Inactive,
            Error::Closed => HarvestOutcome::Closed,
            other => HarvestOutcome::Failed(other),
        }
    }
}

impl fmt::Display for HarvestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarvestOutcome::Eof => write!(f, "end of file"),
            HarvestOutcome::Truncated => write!(f, "truncated"),
            HarvestOutcome::Renamed => write!(f, "renamed"),
            HarvestOutcome::Removed => write!(f, "removed"),
            HarvestOutcome::Inactive => write!(f, "inactive"),
            HarvestOutcome::Closed => write!(f, "closed"),
            HarvestOutcome::CloseTimeout => write!(f, "close timeout"),
            HarvestOutcome::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Summary returned when a harvester stops
#[derive(Debug)]
pub struct HarvestReport {
    /// Harvester id
    pub id: Uuid,
    /// Name of the source
    pub source: String,
    /// Why harvesting stopped
    pub outcome: HarvestOutcome,
    /// Raw offset after the last consumed byte
    pub offset: u64,
    /// Number of events forwarded
    pub events: u64,
}

impl HarvestReport {
    /// Offset a new harvester of the same file should start from
    pub fn resume_offset(&self) -> u64 {
        self.outcome.resume_offset(self.offset)
    }
}

/// Reads one source until it reaches a terminal condition
pub struct Harvester {
    id: Uuid,
    pipeline: Pipeline,
    offset: u64,
    filter: LineFilter,
    close_timeout: Option<Duration>,
    cancel: CancellationToken,
    guard: Option<RegistryGuard>,
}

impl Harvester {
    /// Open a harvester over `source`, resuming at raw byte `offset`.
    ///
    /// Line filters are compiled before the pipeline is built, so an invalid
    /// pattern fails without touching the source.
    pub async fn open(
        source: Box<dyn Source>,
        reader: &ReaderConfig,
        harvester: &HarvesterConfig,
        offset: u64,
    ) -> Result<Self> {
        let filter = LineFilter::from_config(harvester)?;
        let cancel = CancellationToken::new();
        let pipeline = Pipeline::open(source, reader, offset, cancel.clone()).await?;

        Ok(Self {
            id: Uuid::new_v4(),
            offset: pipeline.offset(),
            pipeline,
            filter,
            close_timeout: harvester.close_timeout(),
            cancel,
            guard: None,
        })
    }

    /// Claim the source in `registry` for as long as this harvester lives
    pub fn register(mut self, registry: &Registry) -> Result<Self> {
        let guard = registry.register(self.pipeline.name(), self.id, self.cancel.clone())?;
        self.guard = Some(guard);
        Ok(self)
    }

    /// Harvester id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the source
    pub fn source(&self) -> &str {
        self.pipeline.name()
    }

    /// Current raw offset
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Token that stops this harvester when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run on a new task
    pub fn spawn(self, tx: mpsc::Sender<Event>) -> JoinHandle<HarvestReport> {
        tokio::spawn(self.run(tx))
    }

    /// Forward events to `tx` until the pipeline ends or close_timeout elapses
    pub async fn run(mut self, tx: mpsc::Sender<Event>) -> HarvestReport {
        let source = self.pipeline.name().to_string();
        info!(
            harvester = %self.id,
            source = %source,
            offset = self.offset,
            encoding = self.pipeline.encoding(),
            "harvester started"
        );

        // Cancelling the token unblocks the pipeline wherever it waits
        let timer = self.close_timeout.map(|limit| {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        cancel.cancel();
                        true
                    }
                    _ = cancel.cancelled() => false,
                }
            })
        });

        let mut events = 0;
        let outcome = loop {
            let (message, cause) = match self.pipeline.next().await {
                Ok(message) => (Some(message), None),
                Err(err) => {
                    let (partial, cause) = err.into_parts();
                    (partial, Some(cause))
                }
            };

            if let Some(message) = message {
                match self.forward(message, &tx).await {
                    Ok(true) => events += 1,
                    Ok(false) => {}
                    Err(err) => break HarvestOutcome::from(err),
                }
            }
            if let Some(cause) = cause {
                break HarvestOutcome::from(cause);
            }
        };

        let outcome = match timer {
            Some(timer) => {
                timer.abort();
                match (outcome, timer.await) {
                    (HarvestOutcome::Closed, Ok(true)) => {
                        info!(source = %source, "close_timeout reached");
                        HarvestOutcome::CloseTimeout
                    }
                    (outcome, _) => outcome,
                }
            }
            None => outcome,
        };

        if let Err(err) = self.pipeline.close().await {
            warn!(source = %source, error = %err, "failed to close source");
        }

        match &outcome {
            HarvestOutcome::Failed(err) => {
                warn!(harvester = %self.id, source = %source, error = %err, "harvester failed")
            }
            outcome => info!(
                harvester = %self.id,
                source = %source,
                offset = self.offset,
                events,
                outcome = %outcome,
                "harvester stopped"
            ),
        }

        HarvestReport {
            id: self.id,
            source,
            outcome,
            offset: self.offset,
            events,
        }
    }

    /// Publish `message` and advance the offset past it. Returns false if
    /// there was nothing to publish.
    async fn forward(&mut self, mut message: Message, tx: &mpsc::Sender<Event>) -> Result<bool> {
        if self.offset == 0 && message.content.starts_with(UTF8_BOM) {
            message.content.advance(UTF8_BOM.len());
        }
        let offset = self.offset + message.bytes as u64;

        if message.is_empty() {
            self.offset = offset;
            return Ok(false);
        }
        if !self.filter.accepts(&message.content) {
            debug!(source = self.pipeline.name(), offset, "dropping filtered line");
            self.offset = offset;
            return Ok(false);
        }

        let event = Event {
            harvester: self.id,
            source: self.pipeline.name().to_string(),
            offset,
            message,
        };

        tokio::select! {
            sent = tx.send(event) => sent.map_err(|_| Error::Closed)?,
            _ = self.cancel.cancelled() => return Err(Error::Closed),
        }
        self.offset = offset;
        Ok(true)
    }
}
