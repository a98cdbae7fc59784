use crate::aggregator::ResultAggregator;
use crate::capacity::CapacityGate;
use crate::catalog::CapabilityCatalog;
use crate::config::EngineConfig;
use crate::executor::{executor_for, ExecutionContext};
use crate::invoker::{panic_message, GroupInvoker, WorkerRegistry};
use crate::planner::ExecutionPlanner;
use crate::selector;
use crate::stats::{EngineStats, EngineStatus, GroupStatus, ResultSummary, StatsTracker};
use crate::types::{CoordinationResult, CoordinationTask, GroupId, RunState};
use chrono::Utc;
use cohort_core::{CohortError, CohortResult};
use futures_util::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Entry point of the engine.
///
/// Runs admission, planning, pattern execution and aggregation for each
/// submitted task, and keeps engine-wide stats and in-flight run states.
pub struct CoordinationSupervisor {
    config: EngineConfig,
    catalog: Arc<CapabilityCatalog>,
    workers: Arc<WorkerRegistry>,
    gate: Arc<CapacityGate>,
    invoker: GroupInvoker,
    planner: ExecutionPlanner,
    aggregator: ResultAggregator,
    stats: StatsTracker,
    runs: RwLock<HashMap<Uuid, RunState>>,
}

impl CoordinationSupervisor {
    pub fn new(
        catalog: Arc<CapabilityCatalog>,
        workers: Arc<WorkerRegistry>,
        config: EngineConfig,
    ) -> Self {
        let gate = Arc::new(CapacityGate::new(catalog.clone(), workers.clone()));
        let stats = StatsTracker::new(config.engine.stats_smoothing, config.engine.history_limit);
        Self {
            invoker: GroupInvoker::new(catalog.clone(), workers.clone(), gate.clone()),
            planner: ExecutionPlanner::new(catalog.clone()),
            aggregator: ResultAggregator::new(config.aggregation.clone(), catalog.clone()),
            config,
            catalog,
            workers,
            gate,
            stats,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Validate `config` and build the catalog it describes.
    pub fn from_config(config: EngineConfig, workers: Arc<WorkerRegistry>) -> CohortResult<Self> {
        config.validate()?;
        let catalog = Arc::new(config.build_catalog()?);
        Ok(Self::new(catalog, workers, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<CapabilityCatalog> {
        &self.catalog
    }

    pub fn workers(&self) -> &Arc<WorkerRegistry> {
        &self.workers
    }

    pub fn gate(&self) -> &Arc<CapacityGate> {
        &self.gate
    }

    /// Coordinate one task to completion.
    ///
    /// Never fails: admission rejections, planning errors and panics all come
    /// back as a `failed` result.
    pub async fn coordinate(&self, task: CoordinationTask) -> CoordinationResult {
        let start = Instant::now();
        info!(
            task_id = %task.id,
            task = %task.name,
            complexity = ?task.complexity,
            groups = task.required_groups.len(),
            "Coordination requested"
        );

        if let Err(err) = self.gate.check(&task) {
            warn!(task_id = %task.id, group = %err.group(), reason = err.reason(), "Admission rejected");
            return self.conclude(CoordinationResult::failed(
                task.id,
                vec![err.tagged()],
                elapsed_ms(start),
            ));
        }

        if !self.begin(task.id) {
            warn!(task_id = %task.id, "Duplicate coordination rejected");
            return self.conclude(CoordinationResult::failed(
                task.id,
                vec![format!("task {} is already being coordinated", task.id)],
                elapsed_ms(start),
            ));
        }

        let result = match AssertUnwindSafe(self.run(&task, start)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                error!(task_id = %task.id, error = %err, "Coordination failed");
                CoordinationResult::failed(task.id, vec![err.to_string()], elapsed_ms(start))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(task_id = %task.id, panic = %message, "Coordination panicked");
                CoordinationResult::failed(
                    task.id,
                    vec![format!("coordination panicked: {message}")],
                    elapsed_ms(start),
                )
            }
        };

        self.transition(task.id, RunState::from(result.status));
        self.runs.write().remove(&task.id);
        self.conclude(result)
    }

    async fn run(&self, task: &CoordinationTask, start: Instant) -> CohortResult<CoordinationResult> {
        let pattern = selector::select(task);
        let (optional, mut warnings) = self.gate.admit_optional(task);
        let plan = self.planner.build_with_optional(task, pattern, &optional)?;
        self.transition(task.id, RunState::Executing);

        let timeout = task
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.engine.default_timeout());
        let ctx = ExecutionContext {
            invoker: &self.invoker,
            task,
            deadline: start + timeout,
            timeout_ms: timeout.as_millis() as u64,
            stop_on_failure: self.config.engine.sequential_stop_on_failure,
            latency_warning_factor: self.config.engine.latency_warning_factor,
        };
        info!(task_id = %task.id, pattern = %pattern, phases = plan.phases.len(), "Executing plan");
        let outcome = executor_for(pattern).execute(&plan, &ctx).await;

        let considered: Vec<GroupId> = plan.groups().cloned().collect();
        let aggregation = self
            .aggregator
            .aggregate(task, &considered, &outcome.responses);
        warnings.extend(outcome.warnings);

        Ok(CoordinationResult {
            task_id: task.id,
            pattern: Some(pattern),
            status: outcome.status_override.unwrap_or(aggregation.status),
            elapsed_ms: elapsed_ms(start),
            responses: outcome.responses,
            quality: aggregation.quality,
            efficiency_score: aggregation.efficiency_score,
            errors: outcome.errors,
            warnings,
            completed_at: Utc::now(),
        })
    }

    /// Track a new run as planned; false if the id is already in flight.
    fn begin(&self, task_id: Uuid) -> bool {
        let mut runs = self.runs.write();
        if runs.contains_key(&task_id) {
            return false;
        }
        runs.insert(task_id, RunState::Planned);
        true
    }

    fn transition(&self, task_id: Uuid, next: RunState) {
        let mut runs = self.runs.write();
        let Some(state) = runs.get_mut(&task_id) else {
            return;
        };
        let current = *state;
        if current.can_transition_to(next) {
            *state = next;
        } else {
            warn!(task_id = %task_id, from = ?current, to = ?next, "Illegal run state transition ignored");
        }
    }

    fn conclude(&self, result: CoordinationResult) -> CoordinationResult {
        self.stats.record(&result);
        info!(
            task_id = %result.task_id,
            status = ?result.status,
            elapsed_ms = result.elapsed_ms,
            efficiency = result.efficiency_score,
            errors = result.errors.len(),
            "Coordination finished"
        );
        result
    }

    /// Current state of an in-flight run.
    pub fn run_state(&self, task_id: Uuid) -> Option<RunState> {
        self.runs.read().get(&task_id).copied()
    }

    pub fn active_runs(&self) -> usize {
        self.runs.read().len()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.snapshot()
    }

    /// Summaries of recent runs, oldest first.
    pub fn history(&self) -> Vec<ResultSummary> {
        self.stats.history()
    }

    pub fn reset_stats(&self) {
        info!("Engine stats reset");
        self.stats.reset();
    }

    /// Stats plus a live view of every catalogued group.
    pub fn status(&self) -> EngineStatus {
        let groups = self
            .catalog
            .list_groups()
            .iter()
            .map(|capability| GroupStatus {
                group: capability.id.clone(),
                stage: capability.stage,
                workload: self.gate.workload(&capability.id),
                max_concurrent_tasks: capability.max_concurrent_tasks,
                utilization: self.gate.utilization(&capability.id),
                live_workers: self.workers.live_workers(&capability.id),
            })
            .collect();
        EngineStatus {
            stats: self.stats.snapshot(),
            groups,
            active_runs: self.active_runs(),
        }
    }

    /// [`status`](Self::status) as JSON.
    pub fn status_json(&self) -> CohortResult<serde_json::Value> {
        serde_json::to_value(self.status()).map_err(CohortError::from)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::invoker::{GroupWorker, WorkerRequest};
    use crate::types::{Complexity, CoordinationPattern, CoordinationStatus};
    use async_trait::async_trait;

    struct EchoWorker(&'static str);

    #[async_trait]
    impl GroupWorker for EchoWorker {
        fn id(&self) -> &str {
            self.0
        }

        async fn execute(&self, request: WorkerRequest) -> CohortResult<serde_json::Value> {
            Ok(serde_json::json!({ "status": "success", "data": request.group.as_str() }))
        }
    }

    fn supervisor() -> CoordinationSupervisor {
        let workers = Arc::new(WorkerRegistry::new());
        for group in ["research", "build", "verify"] {
            workers.register(group, Arc::new(EchoWorker(group)));
        }
        CoordinationSupervisor::from_config(EngineConfig::default(), workers).unwrap()
    }

    #[tokio::test]
    async fn test_successful_run() {
        let sup = supervisor();
        let task = CoordinationTask::new("ship", Complexity::Simple).with_required(["build"]);
        let result = sup.coordinate(task).await;

        assert_eq!(result.status, CoordinationStatus::Success);
        assert_eq!(result.pattern, Some(CoordinationPattern::Sequential));
        assert!(result.errors.is_empty());
        assert_eq!(result.responses["build"].data, "build");
        assert_eq!(sup.active_runs(), 0);
        assert_eq!(sup.stats().successful, 1);
    }

    #[tokio::test]
    async fn test_group_without_workers_is_rejected() {
        let sup = supervisor();
        let task = CoordinationTask::new("page", Complexity::Simple).with_required(["respond"]);
        let result = sup.coordinate(task).await;

        assert_eq!(result.status, CoordinationStatus::Failed);
        assert_eq!(
            result.errors,
            vec!["[respond] admission rejected: no workers available".to_string()]
        );
        assert!(result.pattern.is_none());
        assert_eq!(sup.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_unknown_group_is_rejected() {
        let sup = supervisor();
        let task = CoordinationTask::new("x", Complexity::Simple).with_required(["legal"]);
        let result = sup.coordinate(task).await;
        assert_eq!(
            result.errors,
            vec!["[legal] admission rejected: unknown group".to_string()]
        );
    }

    #[tokio::test]
    async fn test_planning_error_becomes_failed_result() {
        let sup = supervisor();
        let task = CoordinationTask::new("empty", Complexity::Simple);
        let result = sup.coordinate(task).await;

        assert_eq!(result.status, CoordinationStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("declares no required groups"));
        assert_eq!(sup.active_runs(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_optional_group_is_skipped() {
        let sup = supervisor();
        let task = CoordinationTask::new("ship", Complexity::Simple)
            .with_required(["build"])
            .with_optional(["respond"]);
        let result = sup.coordinate(task).await;

        assert_eq!(result.status, CoordinationStatus::Success);
        assert_eq!(result.responses.len(), 1);
        assert!(result
            .warnings
            .contains(&"[respond] optional group skipped: no workers available".to_string()));
    }

    #[tokio::test]
    async fn test_status_reports_groups() {
        let sup = supervisor();
        let status = sup.status();
        assert_eq!(status.groups.len(), 4);
        assert_eq!(status.active_runs, 0);
        let respond = status
            .groups
            .iter()
            .find(|g| g.group.as_str() == "respond")
            .unwrap();
        assert_eq!(respond.live_workers, 0);
        assert_eq!(respond.max_concurrent_tasks, 2);

        let json = sup.status_json().unwrap();
        assert_eq!(json["stats"]["total_coordinated"], 0);
        assert_eq!(json["groups"][0]["group"], "research");
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let sup = supervisor();
        sup.coordinate(CoordinationTask::new("a", Complexity::Simple).with_required(["build"]))
            .await;
        assert_eq!(sup.history().len(), 1);
        sup.reset_stats();
        assert_eq!(sup.stats(), EngineStats::default());
        assert!(sup.history().is_empty());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = EngineConfig::default();
        config.engine.default_timeout_ms = 0;
        let err = CoordinationSupervisor::from_config(config, Arc::new(WorkerRegistry::new()));
        assert!(matches!(err, Err(CohortError::Config(_))));
    }
}
