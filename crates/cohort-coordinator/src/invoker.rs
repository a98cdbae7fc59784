use crate::capacity::CapacityGate;
use crate::catalog::CapabilityCatalog;
use crate::types::{ContextMap, CoordinationTask, GroupId, GroupResponse, Priority, ResponseStatus};
use async_trait::async_trait;
use cohort_core::{CohortError, CohortResult};
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Request handed to a group worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task_id: Uuid,
    /// Task-type label; the coordination task's name.
    pub task_type: String,
    pub group: GroupId,
    pub priority: Priority,
    pub context: ContextMap,
}

/// A single worker inside a specialist group.
///
/// The reply is an opaque JSON document that must carry a `status` of
/// `success`, `failed` or `error`, and may carry `data`, `errors` and `warnings`.
#[async_trait]
pub trait GroupWorker: Send + Sync {
    /// Stable identifier, unique within the group.
    fn id(&self) -> &str;

    /// Whether the worker can currently take calls.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Execute one request.
    async fn execute(&self, request: WorkerRequest) -> CohortResult<serde_json::Value>;
}

struct WorkerEntry {
    worker: Arc<dyn GroupWorker>,
    processed: AtomicU64,
}

/// Workers registered per group, with per-worker processed counters.
#[derive(Default)]
pub struct WorkerRegistry {
    pools: RwLock<HashMap<GroupId, Vec<Arc<WorkerEntry>>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker to a group's pool.
    pub fn register(&self, group: impl Into<GroupId>, worker: Arc<dyn GroupWorker>) {
        let group = group.into();
        debug!(group = %group, worker = worker.id(), "Worker registered");
        self.pools
            .write()
            .entry(group)
            .or_default()
            .push(Arc::new(WorkerEntry {
                worker,
                processed: AtomicU64::new(0),
            }));
    }

    /// Number of workers in the group reporting healthy.
    pub fn live_workers(&self, group: &GroupId) -> usize {
        self.pools
            .read()
            .get(group)
            .map(|pool| pool.iter().filter(|e| e.worker.is_healthy()).count())
            .unwrap_or(0)
    }

    /// Total number of workers in the group, healthy or not.
    pub fn worker_count(&self, group: &GroupId) -> usize {
        self.pools.read().get(group).map_or(0, Vec::len)
    }

    /// Calls dispatched to each worker in the group, in registration order.
    pub fn processed_counts(&self, group: &GroupId) -> Vec<(String, u64)> {
        self.pools
            .read()
            .get(group)
            .map(|pool| {
                pool.iter()
                    .map(|e| (e.worker.id().to_string(), e.processed.load(Ordering::Relaxed)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Claim the healthy worker with the fewest processed calls.
    ///
    /// Selection and the counter bump happen under the write lock, so
    /// concurrent claims see each other's counts.
    fn claim(&self, group: &GroupId) -> Option<Arc<WorkerEntry>> {
        let pools = self.pools.write();
        let entry = pools.get(group).and_then(|pool| {
            pool.iter()
                .filter(|e| e.worker.is_healthy())
                .min_by_key(|e| e.processed.load(Ordering::Relaxed))
                .cloned()
        })?;
        entry.processed.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }
}

#[derive(Deserialize)]
struct WorkerReply {
    status: ResponseStatus,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// Validate a raw worker reply into a [`GroupResponse`].
pub fn parse_reply(group: &GroupId, raw: serde_json::Value) -> CohortResult<GroupResponse> {
    if !raw.is_object() {
        return Err(CohortError::InvalidResponse {
            group: group.to_string(),
            reason: format!("expected a JSON object, got {raw}"),
        });
    }
    let reply: WorkerReply =
        serde_json::from_value(raw).map_err(|e| CohortError::InvalidResponse {
            group: group.to_string(),
            reason: e.to_string(),
        })?;
    Ok(GroupResponse {
        group: group.clone(),
        status: reply.status,
        data: reply.data,
        errors: reply.errors,
        warnings: reply.warnings,
        worker_id: None,
        elapsed_ms: 0,
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Dispatches one task to one group through a load-balanced worker.
pub struct GroupInvoker {
    catalog: Arc<CapabilityCatalog>,
    workers: Arc<WorkerRegistry>,
    gate: Arc<CapacityGate>,
}

impl GroupInvoker {
    pub fn new(
        catalog: Arc<CapabilityCatalog>,
        workers: Arc<WorkerRegistry>,
        gate: Arc<CapacityGate>,
    ) -> Self {
        Self {
            catalog,
            workers,
            gate,
        }
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    /// Invoke `group` for `task` with the given phase context.
    ///
    /// Holds one capacity slot for the duration of the call; the slot is
    /// released on every exit path, including worker panics and cancellation.
    pub async fn invoke(
        &self,
        task: &CoordinationTask,
        group: &GroupId,
        context: &ContextMap,
    ) -> CohortResult<GroupResponse> {
        self.catalog.lookup(group)?;
        let entry = self
            .workers
            .claim(group)
            .ok_or_else(|| CohortError::GroupUnavailable(group.to_string()))?;
        let _slot = match self.gate.try_acquire(group) {
            Ok(slot) => slot,
            Err(err) => {
                // the call never reached the worker
                entry.processed.fetch_sub(1, Ordering::Relaxed);
                return Err(err.into());
            }
        };

        let worker_id = entry.worker.id().to_string();
        let request = WorkerRequest {
            task_id: task.id,
            task_type: task.name.clone(),
            group: group.clone(),
            priority: task.priority,
            context: context.clone(),
        };

        debug!(task_id = %task.id, group = %group, worker = %worker_id, "Dispatching to worker");
        let start = Instant::now();
        let outcome = AssertUnwindSafe(entry.worker.execute(request))
            .catch_unwind()
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let raw = match outcome {
            Ok(reply) => reply?,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(group = %group, worker = %worker_id, panic = %message, "Worker panicked");
                return Err(CohortError::Worker(format!(
                    "worker '{worker_id}' panicked: {message}"
                )));
            }
        };

        let mut response = parse_reply(group, raw)?;
        response.worker_id = Some(worker_id);
        response.elapsed_ms = elapsed_ms;
        Ok(response)
    }
}
