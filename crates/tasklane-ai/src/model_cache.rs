//! Process-wide cache of model handles, keyed by role.
//!
//! Each role gets a one-shot async cell. The first `get` for a cold role runs
//! the load (snapshot first, fresh construction as fallback) and every
//! concurrent caller for that role waits on the same cell, so a role is built
//! at most once per process. Different roles have different cells and load
//! independently.

use crate::models::{ModelHandle, ModelProvider};
use crate::snapshot::SnapshotStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tasklane_core::{ModelRole, Result, TaskLaneError};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Lazily populated, snapshot-backed registry of model handles.
pub struct ModelCache {
    providers: HashMap<ModelRole, Arc<dyn ModelProvider>>,
    store: Arc<dyn SnapshotStore>,
    cells: Mutex<HashMap<ModelRole, Arc<OnceCell<ModelHandle>>>>,
}

impl ModelCache {
    /// Create an empty cache persisting snapshots to `store`.
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            providers: HashMap::new(),
            store,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Register the provider for its role, replacing any previous one.
    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        let role = provider.role();
        debug!(role = %role, "Registered model provider");
        self.providers.insert(role, provider);
        // A new provider makes any handle built by the old one stale.
        self.cells.get_mut().remove(&role);
    }

    /// Whether a handle for `role` is already resident.
    pub fn is_loaded(&self, role: ModelRole) -> bool {
        self.cells
            .lock()
            .get(&role)
            .is_some_and(|cell| cell.initialized())
    }

    /// Return the handle for `role`, loading it on first use.
    ///
    /// Fails with [`TaskLaneError::ModelUnavailable`] when no provider is
    /// registered or construction fails. A failed load leaves the cell empty,
    /// so a later call tries again.
    pub async fn get(&self, role: ModelRole) -> Result<ModelHandle> {
        let cell = self.cell(role);
        if let Some(handle) = cell.get() {
            debug!(role = %role, "Model cache hit");
            return Ok(handle.clone());
        }

        let provider = self
            .providers
            .get(&role)
            .cloned()
            .ok_or_else(|| TaskLaneError::ModelUnavailable {
                role,
                cause: "no provider registered".into(),
            })?;
        let store = Arc::clone(&self.store);

        let handle = cell
            .get_or_try_init(|| async move {
                debug!(role = %role, "Model cache miss");
                let loaded = tokio::task::spawn_blocking(move || {
                    load_or_construct(role, &*provider, &*store)
                })
                .await;
                match loaded {
                    Ok(result) => result,
                    Err(e) => Err(TaskLaneError::ModelUnavailable {
                        role,
                        cause: format!("loader task failed: {e}"),
                    }),
                }
            })
            .await?;
        Ok(handle.clone())
    }

    /// Drop the in-memory handle and the persisted snapshot for `role`.
    ///
    /// Callers already holding the handle keep using it; the next `get`
    /// constructs a new one.
    pub fn invalidate(&self, role: ModelRole) -> Result<()> {
        self.cells.lock().remove(&role);
        self.store.remove(role)?;
        info!(role = %role, "Invalidated cached model");
        Ok(())
    }

    fn cell(&self, role: ModelRole) -> Arc<OnceCell<ModelHandle>> {
        Arc::clone(self.cells.lock().entry(role).or_default())
    }
}

/// Blocking load: snapshot if usable, otherwise fresh construction plus a
/// best-effort snapshot write.
fn load_or_construct(
    role: ModelRole,
    provider: &dyn ModelProvider,
    store: &dyn SnapshotStore,
) -> Result<ModelHandle> {
    match store.read(role) {
        Ok(Some(bytes)) => match provider.decode_snapshot(&bytes) {
            Ok(handle) if handle.role() == role => {
                info!(role = %role, "Restored model from snapshot");
                return Ok(handle);
            }
            Ok(handle) => {
                let err = TaskLaneError::SnapshotCorrupted {
                    role,
                    reason: format!("snapshot decoded to a {} handle", handle.role()),
                };
                warn!(error = %err, "Ignoring snapshot");
            }
            Err(e) => {
                let err = TaskLaneError::SnapshotCorrupted {
                    role,
                    reason: e.to_string(),
                };
                warn!(error = %err, "Ignoring snapshot");
            }
        },
        Ok(None) => debug!(role = %role, "No snapshot on disk"),
        Err(e) => warn!(role = %role, error = %e, "Snapshot read failed"),
    }

    info!(role = %role, "Constructing model");
    let start = Instant::now();
    let handle = provider.construct().map_err(|e| match e {
        TaskLaneError::ModelUnavailable { .. } => e,
        other => TaskLaneError::ModelUnavailable {
            role,
            cause: other.to_string(),
        },
    })?;
    if handle.role() != role {
        return Err(TaskLaneError::ModelUnavailable {
            role,
            cause: format!("provider built a {} handle", handle.role()),
        });
    }
    info!(
        role = %role,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Model constructed"
    );

    let persisted = provider
        .encode_snapshot(&handle)
        .and_then(|bytes| store.write(role, &bytes));
    if let Err(e) = persisted {
        let err = match e {
            TaskLaneError::SnapshotWriteFailed { .. } => e,
            other => TaskLaneError::SnapshotWriteFailed {
                role,
                reason: other.to_string(),
            },
        };
        warn!(error = %err, "Continuing without a snapshot");
    }

    Ok(handle)
}
