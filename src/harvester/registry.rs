//! Registry of running harvesters

use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
struct Entry {
    id: Uuid,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    active: HashMap<String, Entry>,
    limit: usize,
}

/// Tracks which sources are being harvested, shared between tasks
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
}

impl Registry {
    /// Create a registry allowing at most `limit` harvesters, 0 for unlimited
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                active: HashMap::new(),
                limit,
            })),
        }
    }

    /// Claim `source` for the harvester `id`.
    ///
    /// The claim is released when the returned guard is dropped.
    pub fn register(&self, source: &str, id: Uuid, cancel: CancellationToken) -> Result<RegistryGuard> {
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.active.get(source) {
            return Err(Error::Harvester(format!(
                "{} is already harvested by {}",
                source, entry.id
            )));
        }
        if inner.limit > 0 && inner.active.len() >= inner.limit {
            return Err(Error::Harvester(format!(
                "harvester limit of {} reached, not starting {}",
                inner.limit, source
            )));
        }

        inner.active.insert(source.to_string(), Entry { id, cancel });
        debug!(source, harvester = %id, active = inner.active.len(), "harvester registered");

        Ok(RegistryGuard {
            registry: self.clone(),
            source: source.to_string(),
            id,
        })
    }

    /// Number of active harvesters
    pub fn len(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Returns true if no harvester is active
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `source` is being harvested
    pub fn contains(&self, source: &str) -> bool {
        self.inner.lock().active.contains_key(source)
    }

    /// Ask every active harvester to stop
    pub fn stop_all(&self) {
        let inner = self.inner.lock();
        info!(active = inner.active.len(), "stopping all harvesters");
        for entry in inner.active.values() {
            entry.cancel.cancel();
        }
    }

    fn release(&self, source: &str, id: Uuid) {
        let mut inner = self.inner.lock();
        if inner.active.get(source).is_some_and(|entry| entry.id == id) {
            inner.active.remove(source);
            debug!(source, harvester = %id, "harvester unregistered");
        }
    }
}

/// Keeps a source claimed in the [`Registry`]
#[derive(Debug)]
pub struct RegistryGuard {
    registry: Registry,
    source: String,
    id: Uuid,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.release(&self.source, self.id);
    }
}
