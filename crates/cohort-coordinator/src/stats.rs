use crate::types::{CoordinationPattern, CoordinationResult, CoordinationStatus, GroupId, Stage};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Process-wide coordination counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_coordinated: u64,
    pub successful: u64,
    pub partial: u64,
    pub failed: u64,
    /// Exponentially weighted mean of run durations.
    pub mean_coordination_ms: f64,
}

/// Compact record of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub task_id: Uuid,
    pub pattern: Option<CoordinationPattern>,
    pub status: CoordinationStatus,
    pub elapsed_ms: u64,
    pub efficiency_score: f64,
    pub error_count: usize,
    pub completed_at: DateTime<Utc>,
}

impl From<&CoordinationResult> for ResultSummary {
    fn from(result: &CoordinationResult) -> Self {
        Self {
            task_id: result.task_id,
            pattern: result.pattern,
            status: result.status,
            elapsed_ms: result.elapsed_ms,
            efficiency_score: result.efficiency_score,
            error_count: result.errors.len(),
            completed_at: result.completed_at,
        }
    }
}

/// Live view of one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupStatus {
    pub group: GroupId,
    pub stage: Stage,
    pub workload: usize,
    pub max_concurrent_tasks: usize,
    /// `workload / max_concurrent_tasks`.
    pub utilization: f64,
    pub live_workers: usize,
}

/// Read-only snapshot for health checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub stats: EngineStats,
    pub groups: Vec<GroupStatus>,
    pub active_runs: usize,
}

struct StatsState {
    stats: EngineStats,
    history: VecDeque<ResultSummary>,
}

/// Lock-protected stats plus a bounded history of recent runs.
pub struct StatsTracker {
    smoothing: f64,
    history_limit: usize,
    state: Mutex<StatsState>,
}

impl StatsTracker {
    pub fn new(smoothing: f64, history_limit: usize) -> Self {
        Self {
            smoothing,
            history_limit,
            state: Mutex::new(StatsState {
                stats: EngineStats::default(),
                history: VecDeque::with_capacity(history_limit),
            }),
        }
    }

    /// Fold a finished run into the counters and history.
    pub fn record(&self, result: &CoordinationResult) {
        let mut state = self.state.lock();
        let stats = &mut state.stats;
        let elapsed = result.elapsed_ms as f64;

        stats.mean_coordination_ms = if stats.total_coordinated == 0 {
            elapsed
        } else {
            stats.mean_coordination_ms * (1.0 - self.smoothing) + elapsed * self.smoothing
        };
        stats.total_coordinated += 1;
        match result.status {
            CoordinationStatus::Success => stats.successful += 1,
            CoordinationStatus::Partial => stats.partial += 1,
            CoordinationStatus::Failed => stats.failed += 1,
        }

        if self.history_limit > 0 {
            if state.history.len() == self.history_limit {
                state.history.pop_front();
            }
            state.history.push_back(ResultSummary::from(result));
        }
    }

    pub fn snapshot(&self) -> EngineStats {
        self.state.lock().stats.clone()
    }

    /// Recent runs, oldest first.
    pub fn history(&self) -> Vec<ResultSummary> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Clear counters and history.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.stats = EngineStats::default();
        state.history.clear();
    }
}
