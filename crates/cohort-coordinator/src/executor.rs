use crate::invoker::GroupInvoker;
use crate::planner::{ExecutionPlan, Phase};
use crate::types::{
    tag, ContextMap, CoordinationPattern, CoordinationStatus, CoordinationTask, GroupId,
    GroupResponse,
};
use async_trait::async_trait;
use cohort_core::CohortError;
use futures_util::future::join_all;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything an executor needs to drive one run.
pub struct ExecutionContext<'a> {
    pub invoker: &'a GroupInvoker,
    pub task: &'a CoordinationTask,
    /// Wall-clock limit for the whole run.
    pub deadline: Instant,
    /// Budget the deadline was derived from, for error messages.
    pub timeout_ms: u64,
    /// Sequential runs stop at the first error when set.
    pub stop_on_failure: bool,
    pub latency_warning_factor: f64,
}

/// Responses and messages collected by an executor.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub responses: HashMap<GroupId, GroupResponse>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Status imposed by the pattern, taking precedence over the count-based one.
    pub status_override: Option<CoordinationStatus>,
}

impl ExecutionOutcome {
    /// Record a response; returns whether the group succeeded.
    fn record(&mut self, ctx: &ExecutionContext<'_>, response: GroupResponse) -> bool {
        let group = response.group.clone();
        let succeeded = response.is_success();

        for warning in &response.warnings {
            self.warnings.push(tag(&group, warning));
        }
        if succeeded {
            self.check_latency(ctx, &response);
        } else {
            let required = ctx.task.requires(&group);
            let faults = if response.errors.is_empty() {
                vec![format!("group reported status {:?}", response.status).to_lowercase()]
            } else {
                response.errors.clone()
            };
            for fault in faults {
                warn!(task_id = %ctx.task.id, group = %group, required, error = %fault, "Group call failed");
                if required {
                    self.errors.push(tag(&group, fault));
                } else {
                    self.warnings
                        .push(tag(&group, format_args!("optional group failed: {fault}")));
                }
            }
        }

        self.responses.insert(group, response);
        succeeded
    }

    fn check_latency(&mut self, ctx: &ExecutionContext<'_>, response: &GroupResponse) {
        let Some(capability) = ctx.invoker.catalog().get(&response.group) else {
            return;
        };
        let limit = capability.expected_latency_ms as f64 * ctx.latency_warning_factor;
        if response.elapsed_ms as f64 > limit {
            self.warnings.push(tag(
                &response.group,
                format_args!(
                    "responded in {} ms, expected about {} ms",
                    response.elapsed_ms, capability.expected_latency_ms
                ),
            ));
        }
    }

    fn skip(&mut self, phase: &Phase, reason: &str) {
        for group in &phase.groups {
            debug!(group = %group, phase = %phase.name, reason, "Group skipped");
            self.warnings
                .push(tag(group, format_args!("skipped: {reason}")));
        }
    }

    /// Whether any group that was invoked did not succeed.
    pub fn has_failures(&self) -> bool {
        self.responses.values().any(|r| !r.is_success())
    }
}

/// Invoke every group of one phase concurrently and wait for all of them.
///
/// Calls still outstanding at the deadline are dropped (releasing their
/// capacity slots) and reported as timeout errors.
pub async fn run_phase(
    ctx: &ExecutionContext<'_>,
    groups: &[GroupId],
    context: &ContextMap,
) -> Vec<GroupResponse> {
    let calls = groups.iter().map(|group| async move {
        let call = ctx.invoker.invoke(ctx.task, group, context);
        match tokio::time::timeout_at(ctx.deadline, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => GroupResponse::error(group.clone(), err.to_string()),
            Err(_) => {
                GroupResponse::error(group.clone(), CohortError::Timeout(ctx.timeout_ms).to_string())
            }
        }
    });
    join_all(calls).await
}

/// How the shared phase walk reacts to failures.
#[derive(Debug, Clone, Copy)]
struct PhasePolicy {
    /// Stop once the run has recorded any error.
    abort_on_error: bool,
    /// Feed successful payloads into the context of later phases.
    carry_forward: bool,
}

async fn walk_phases(
    plan: &ExecutionPlan,
    ctx: &ExecutionContext<'_>,
    policy: PhasePolicy,
) -> ExecutionOutcome {
    let mut outcome = ExecutionOutcome::default();
    let mut context = ctx.task.context.clone();
    let mut closed: Vec<usize> = Vec::new();
    let mut halted: Option<String> = None;

    for phase in &plan.phases {
        if let Some(reason) = &halted {
            outcome.skip(phase, reason);
            continue;
        }
        if !phase.is_ready(&closed) {
            outcome.skip(phase, "dependencies did not complete");
            continue;
        }
        let mut succeeded = 0usize;
        if Instant::now() >= ctx.deadline {
            for group in &phase.groups {
                outcome.record(
                    ctx,
                    GroupResponse::error(
                        group.clone(),
                        CohortError::Timeout(ctx.timeout_ms).to_string(),
                    ),
                );
            }
        } else {
            info!(
                task_id = %ctx.task.id,
                phase = %phase.name,
                groups = phase.groups.len(),
                "Phase started"
            );
            for response in run_phase(ctx, &phase.groups, &context).await {
                if policy.carry_forward && response.is_success() {
                    context.insert(format!("{}_output", response.group), response.data.clone());
                }
                if outcome.record(ctx, response) {
                    succeeded += 1;
                }
            }
        }
        closed.push(phase.index);
        debug!(task_id = %ctx.task.id, phase = %phase.name, succeeded, "Phase closed");

        if plan.is_critical(phase.index) && succeeded == 0 {
            warn!(task_id = %ctx.task.id, phase = %phase.name, "Critical phase failed");
            outcome.status_override = Some(CoordinationStatus::Failed);
            halted = Some(format!("critical phase '{}' failed", phase.name));
        } else if policy.abort_on_error && !outcome.errors.is_empty() {
            halted = Some(format!("run aborted after phase '{}'", phase.name));
        }
    }

    outcome
}

/// Drives an execution plan for one coordination pattern.
#[async_trait]
pub trait PatternExecutor: Send + Sync {
    fn pattern(&self) -> CoordinationPattern;

    async fn execute(&self, plan: &ExecutionPlan, ctx: &ExecutionContext<'_>) -> ExecutionOutcome;
}

/// One group at a time; failures are recorded and the run continues
/// unless `stop_on_failure` is set.
pub struct SequentialExecutor;

#[async_trait]
impl PatternExecutor for SequentialExecutor {
    fn pattern(&self) -> CoordinationPattern {
        CoordinationPattern::Sequential
    }

    async fn execute(&self, plan: &ExecutionPlan, ctx: &ExecutionContext<'_>) -> ExecutionOutcome {
        let policy = PhasePolicy {
            abort_on_error: ctx.stop_on_failure,
            carry_forward: false,
        };
        walk_phases(plan, ctx, policy).await
    }
}

/// Every group at once behind a single completion barrier.
pub struct ParallelExecutor;

#[async_trait]
impl PatternExecutor for ParallelExecutor {
    fn pattern(&self) -> CoordinationPattern {
        CoordinationPattern::Parallel
    }

    async fn execute(&self, plan: &ExecutionPlan, ctx: &ExecutionContext<'_>) -> ExecutionOutcome {
        let policy = PhasePolicy {
            abort_on_error: false,
            carry_forward: false,
        };
        walk_phases(plan, ctx, policy).await
    }
}

/// Stage-ordered chain that breaks at the first error.
pub struct PipelineExecutor;

#[async_trait]
impl PatternExecutor for PipelineExecutor {
    fn pattern(&self) -> CoordinationPattern {
        CoordinationPattern::Pipeline
    }

    async fn execute(&self, plan: &ExecutionPlan, ctx: &ExecutionContext<'_>) -> ExecutionOutcome {
        let policy = PhasePolicy {
            abort_on_error: true,
            carry_forward: true,
        };
        walk_phases(plan, ctx, policy).await
    }
}

/// Research, implementation, verification.
///
/// A failed research phase fails the run; any other failure makes it partial.
pub struct HierarchicalExecutor;

#[async_trait]
impl PatternExecutor for HierarchicalExecutor {
    fn pattern(&self) -> CoordinationPattern {
        CoordinationPattern::Hierarchical
    }

    async fn execute(&self, plan: &ExecutionPlan, ctx: &ExecutionContext<'_>) -> ExecutionOutcome {
        let policy = PhasePolicy {
            abort_on_error: false,
            carry_forward: true,
        };
        let mut outcome = walk_phases(plan, ctx, policy).await;
        if outcome.status_override.is_none() {
            let incomplete = outcome.responses.len() < plan.group_count();
            if outcome.has_failures() || incomplete {
                outcome.status_override = Some(CoordinationStatus::Partial);
            } else {
                outcome.status_override = Some(CoordinationStatus::Success);
            }
        }
        outcome
    }
}

/// The executor for a pattern.
pub fn executor_for(pattern: CoordinationPattern) -> Box<dyn PatternExecutor> {
    match pattern {
        CoordinationPattern::Sequential => Box::new(SequentialExecutor),
        CoordinationPattern::Parallel => Box::new(ParallelExecutor),
        CoordinationPattern::Pipeline => Box::new(PipelineExecutor),
        CoordinationPattern::Hierarchical => Box::new(HierarchicalExecutor),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::capacity::CapacityGate;
    use crate::catalog::{CapabilityCatalog, GroupCapability};
    use crate::invoker::{GroupWorker, WorkerRegistry, WorkerRequest};
    use crate::planner::ExecutionPlanner;
    use crate::types::{Complexity, Stage};
    use cohort_core::CohortResult;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    /// Records every request and replies per group according to a script.
    struct Recorder {
        group: String,
        fail: bool,
        delay: Duration,
        seen: Arc<Mutex<Vec<WorkerRequest>>>,
    }

    #[async_trait]
    impl GroupWorker for Recorder {
        fn id(&self) -> &str {
            &self.group
        }

        async fn execute(&self, request: WorkerRequest) -> CohortResult<serde_json::Value> {
            self.seen.lock().push(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                Ok(serde_json::json!({ "status": "failed", "errors": [format!("{} broke", self.group)] }))
            } else {
                Ok(serde_json::json!({ "status": "success", "data": format!("{} done", self.group) }))
            }
        }
    }

    struct Harness {
        invoker: GroupInvoker,
        planner: ExecutionPlanner,
        seen: Arc<Mutex<Vec<WorkerRequest>>>,
    }

    impl Harness {
        fn new(failing: &[&str], slow: &[&str]) -> Self {
            let capabilities = vec![
                GroupCapability::new("research", Stage::Research, 2),
                GroupCapability::new("build", Stage::Build, 2),
                GroupCapability::new("verify", Stage::Verify, 2),
                GroupCapability::new("respond", Stage::Respond, 2),
            ];
            let delays: Vec<(&str, Duration)> =
                slow.iter().map(|g| (*g, Duration::from_secs(5))).collect();
            Self::with_catalog(capabilities, failing, &delays)
        }

        fn with_catalog(
            capabilities: Vec<GroupCapability>,
            failing: &[&str],
            delays: &[(&str, Duration)],
        ) -> Self {
            let catalog = Arc::new(CapabilityCatalog::from_capabilities(capabilities).unwrap());
            let registry = Arc::new(WorkerRegistry::new());
            let seen = Arc::new(Mutex::new(Vec::new()));
            for capability in catalog.list_groups() {
                let group = capability.id.as_str();
                let delay = delays
                    .iter()
                    .find(|(g, _)| *g == group)
                    .map_or(Duration::ZERO, |(_, d)| *d);
                registry.register(
                    group,
                    Arc::new(Recorder {
                        group: group.to_string(),
                        fail: failing.contains(&group),
                        delay,
                        seen: seen.clone(),
                    }),
                );
            }
            let gate = Arc::new(CapacityGate::new(catalog.clone(), registry.clone()));
            Self {
                invoker: GroupInvoker::new(catalog.clone(), registry, gate),
                planner: ExecutionPlanner::new(catalog),
                seen,
            }
        }

        async fn run(
            &self,
            pattern: CoordinationPattern,
            groups: &[&str],
            timeout: Duration,
        ) -> ExecutionOutcome {
            self.run_with(pattern, groups, timeout, false).await
        }

        async fn run_with(
            &self,
            pattern: CoordinationPattern,
            groups: &[&str],
            timeout: Duration,
            stop_on_failure: bool,
        ) -> ExecutionOutcome {
            let task = CoordinationTask::new("t", Complexity::Simple)
                .with_required(groups.iter().copied())
                .with_context("ticket", serde_json::json!("ENG-7"));
            let plan = self.planner.build(&task, pattern).unwrap();
            let ctx = ExecutionContext {
                invoker: &self.invoker,
                task: &task,
                deadline: Instant::now() + timeout,
                timeout_ms: timeout.as_millis() as u64,
                stop_on_failure,
                latency_warning_factor: 2.0,
            };
            executor_for(pattern).execute(&plan, &ctx).await
        }

        fn invoked(&self) -> Vec<String> {
            self.seen.lock().iter().map(|r| r.group.to_string()).collect()
        }
    }

    const BUDGET: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_sequential_continues_after_failure() {
        let h = Harness::new(&["build"], &[]);
        let outcome = h
            .run(CoordinationPattern::Sequential, &["build", "verify"], BUDGET)
            .await;
        assert_eq!(h.invoked(), vec!["build", "verify"]);
        assert_eq!(outcome.errors, vec!["[build] build broke".to_string()]);
        assert!(outcome.responses["verify"].is_success());
        assert!(outcome.status_override.is_none());
    }

    #[tokio::test]
    async fn test_sequential_stop_on_failure() {
        let h = Harness::new(&["build"], &[]);
        let outcome = h
            .run_with(CoordinationPattern::Sequential, &["build", "verify"], BUDGET, true)
            .await;
        assert_eq!(h.invoked(), vec!["build"]);
        assert_eq!(outcome.errors, vec!["[build] build broke".to_string()]);
        assert!(!outcome.responses.contains_key("verify"));
        assert_eq!(
            outcome.warnings,
            vec!["[verify] skipped: run aborted after phase 'step-1'".to_string()]
        );
    }

    #[tokio::test]
    async fn test_slow_group_gets_latency_warning() {
        let h = Harness::with_catalog(
            vec![GroupCapability::new("build", Stage::Build, 1)
                .with_expected_latency(Duration::from_millis(10))],
            &[],
            &[("build", Duration::from_millis(60))],
        );
        let outcome = h
            .run(CoordinationPattern::Sequential, &["build"], BUDGET)
            .await;
        assert!(outcome.errors.is_empty());
        assert!(outcome.responses["build"].is_success());
        assert_eq!(outcome.warnings.len(), 1);
        let warning = &outcome.warnings[0];
        assert!(warning.starts_with("[build] responded in "), "{warning}");
        assert!(warning.ends_with(" ms, expected about 10 ms"), "{warning}");
    }

    #[tokio::test]
    async fn test_fast_group_has_no_latency_warning() {
        let h = Harness::with_catalog(
            vec![GroupCapability::new("build", Stage::Build, 1)
                .with_expected_latency(Duration::from_secs(10))],
            &[],
            &[("build", Duration::from_millis(20))],
        );
        let outcome = h
            .run(CoordinationPattern::Sequential, &["build"], BUDGET)
            .await;
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_parallel_collects_all() {
        let h = Harness::new(&["verify"], &[]);
        let outcome = h
            .run(CoordinationPattern::Parallel, &["build", "verify", "respond"], BUDGET)
            .await;
        assert_eq!(outcome.responses.len(), 3);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("[verify]"));
    }

    #[tokio::test]
    async fn test_pipeline_breaks_on_error() {
        let h = Harness::new(&["build"], &[]);
        let outcome = h
            .run(
                CoordinationPattern::Pipeline,
                &["respond", "verify", "build", "research"],
                BUDGET,
            )
            .await;
        assert_eq!(h.invoked(), vec!["research", "build"]);
        assert_eq!(outcome.responses.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.starts_with("[verify] skipped")));
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.starts_with("[respond] skipped")));
    }

    #[tokio::test]
    async fn test_pipeline_carries_outputs_forward() {
        let h = Harness::new(&[], &[]);
        h.run(CoordinationPattern::Pipeline, &["verify", "research"], BUDGET)
            .await;
        let seen = h.seen.lock();
        assert_eq!(seen[0].context["ticket"], "ENG-7");
        assert!(!seen[0].context.contains_key("research_output"));
        assert_eq!(seen[1].context["research_output"], "research done");
    }

    #[tokio::test]
    async fn test_hierarchical_research_failure_short_circuits() {
        let h = Harness::new(&["research"], &[]);
        let outcome = h
            .run(
                CoordinationPattern::Hierarchical,
                &["build", "verify", "respond", "research"],
                BUDGET,
            )
            .await;
        assert_eq!(h.invoked(), vec!["research"]);
        assert_eq!(outcome.status_override, Some(CoordinationStatus::Failed));
        assert_eq!(outcome.responses.len(), 1);
    }

    #[tokio::test]
    async fn test_hierarchical_non_critical_failure_is_partial() {
        let h = Harness::new(&["verify", "respond"], &[]);
        let outcome = h
            .run(
                CoordinationPattern::Hierarchical,
                &["research", "build", "verify", "respond"],
                BUDGET,
            )
            .await;
        assert_eq!(outcome.responses.len(), 4);
        assert_eq!(outcome.status_override, Some(CoordinationStatus::Partial));
        let seen = h.seen.lock();
        let verify = seen.iter().find(|r| r.group.as_str() == "verify").unwrap();
        assert_eq!(verify.context["research_output"], "research done");
        assert_eq!(verify.context["build_output"], "build done");
    }

    #[tokio::test]
    async fn test_timeout_keeps_earlier_responses() {
        let h = Harness::new(&[], &["verify"]);
        let outcome = h
            .run(
                CoordinationPattern::Parallel,
                &["build", "verify"],
                Duration::from_millis(100),
            )
            .await;
        assert!(outcome.responses["build"].is_success());
        let verify = &outcome.responses["verify"];
        assert!(!verify.is_success());
        assert_eq!(outcome.errors, vec!["[verify] Timed out after 100 ms".to_string()]);
    }

    #[tokio::test]
    async fn test_phases_after_deadline_are_timed_out() {
        let h = Harness::new(&[], &["build"]);
        let outcome = h
            .run(
                CoordinationPattern::Sequential,
                &["build", "verify"],
                Duration::from_millis(50),
            )
            .await;
        assert_eq!(h.invoked(), vec!["build"]);
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.errors[1].starts_with("[verify] Timed out"));
    }

    #[test]
    fn test_executor_for_matches_pattern() {
        for pattern in [
            CoordinationPattern::Sequential,
            CoordinationPattern::Parallel,
            CoordinationPattern::Pipeline,
            CoordinationPattern::Hierarchical,
        ] {
            assert_eq!(executor_for(pattern).pattern(), pattern);
        }
    }
}
