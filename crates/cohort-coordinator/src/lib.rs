//! Multi-group task coordination engine.
//!
//! A task names the groups whose work it needs. The engine admits it against
//! per-group capacity, picks a coordination pattern from its complexity,
//! expands that into phases, runs the phases through load-balanced group
//! workers, and scores the collected responses.
//!
//! # Main types
//!
//! - [`CoordinationSupervisor`]: Entry point for admission, planning, execution, aggregation.
//! - [`CapabilityCatalog`]: Registry of groups, their stage, capacity and affinities.
//! - [`CapacityGate`]: Per-group workload counters and admission decisions.
//! - [`ExecutionPlanner`]: Expands a pattern into an ordered [`ExecutionPlan`].
//! - [`GroupInvoker`]: Dispatches one call to the least-loaded healthy [`GroupWorker`].
//! - [`ResultAggregator`]: Quality, efficiency, and overall status of a run.
//! - [`EngineConfig`]: TOML-backed engine settings and scoring constants.

/// Quality, efficiency, and status aggregation.
pub mod aggregator;
/// Admission control and workload counters.
pub mod capacity;
/// Group capability catalog.
pub mod catalog;
/// Engine configuration.
pub mod config;
/// Pattern executors and the phase primitive.
pub mod executor;
/// Group workers, worker registry, and the invoker.
pub mod invoker;
/// Execution plan construction.
pub mod planner;
/// Stock group capabilities.
pub mod profiles;
/// Complexity-based pattern selection.
pub mod selector;
/// Engine stats, result history, and status reports.
pub mod stats;
/// Coordination supervisor.
pub mod supervisor;
/// Shared coordination types (tasks, responses, results).
pub mod types;

pub use aggregator::{Aggregation, ResultAggregator};
pub use capacity::{AdmissionDecision, AdmissionError, CapacityGate, CapacitySlot};
pub use catalog::{CapabilityCatalog, GroupCapability};
pub use config::{AggregationConfig, EngineConfig, EngineSettings};
pub use executor::{executor_for, ExecutionContext, ExecutionOutcome, PatternExecutor};
pub use invoker::{parse_reply, GroupInvoker, GroupWorker, WorkerRegistry, WorkerRequest};
pub use planner::{ExecutionPlan, ExecutionPlanner, Phase};
pub use profiles::default_capabilities;
pub use stats::{EngineStats, EngineStatus, GroupStatus, ResultSummary, StatsTracker};
pub use supervisor::CoordinationSupervisor;
pub use types::{
    Complexity, ContextMap, CoordinationPattern, CoordinationResult, CoordinationStatus,
    CoordinationTask, GroupId, GroupResponse, Priority, QualityMetrics, ResponseStatus, RunState,
    Stage,
};
