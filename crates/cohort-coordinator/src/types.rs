use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Free-form context carried from the caller through every phase.
pub type ContextMap = HashMap<String, serde_json::Value>;

/// Identity of a specialist group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Create a group identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for GroupId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for GroupId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Canonical position of a group in a pipeline.
///
/// Variant order is the pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Gathers information and requirements.
    Research,
    /// Produces the artifact.
    Build,
    /// Checks what was built.
    Verify,
    /// Reacts to or ships the verified result.
    Respond,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Research => write!(f, "research"),
            Stage::Build => write!(f, "build"),
            Stage::Verify => write!(f, "verify"),
            Stage::Respond => write!(f, "respond"),
        }
    }
}

/// Declared complexity of a coordination task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    Epic,
}

/// Topology used to combine group calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationPattern {
    /// One group at a time, in declaration order.
    Sequential,
    /// Every group at once.
    Parallel,
    /// Canonical stage order, aborting on the first failure.
    Pipeline,
    /// Research, then implementation, then concurrent verification.
    Hierarchical,
}

impl std::fmt::Display for CoordinationPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinationPattern::Sequential => write!(f, "sequential"),
            CoordinationPattern::Parallel => write!(f, "parallel"),
            CoordinationPattern::Pipeline => write!(f, "pipeline"),
            CoordinationPattern::Hierarchical => write!(f, "hierarchical"),
        }
    }
}

/// Priority label forwarded to workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// A unit of work requiring contributions from several groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationTask {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub complexity: Complexity,
    /// When set, bypasses the complexity table.
    #[serde(default)]
    pub pattern_override: Option<CoordinationPattern>,
    /// Groups that must take part, in declaration order.
    pub required_groups: Vec<GroupId>,
    /// Groups that take part only if they can be admitted.
    #[serde(default)]
    pub optional_groups: Vec<GroupId>,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub context: ContextMap,
    /// Wall-clock budget for the whole run. Falls back to the engine default.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

impl CoordinationTask {
    pub fn new(name: impl Into<String>, complexity: Complexity) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            complexity,
            pattern_override: None,
            required_groups: Vec::new(),
            optional_groups: Vec::new(),
            dependencies: Vec::new(),
            context: ContextMap::new(),
            timeout_ms: None,
            priority: Priority::Normal,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_pattern(mut self, pattern: CoordinationPattern) -> Self {
        self.pattern_override = Some(pattern);
        self
    }

    /// Append required groups. Duplicates are ignored; first declaration wins.
    pub fn with_required<I, G>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<GroupId>,
    {
        for group in groups {
            let group = group.into();
            if !self.required_groups.contains(&group) {
                self.required_groups.push(group);
            }
        }
        self
    }

    /// Append optional groups. Groups already required are ignored.
    pub fn with_optional<I, G>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<GroupId>,
    {
        for group in groups {
            let group = group.into();
            if !self.required_groups.contains(&group) && !self.optional_groups.contains(&group) {
                self.optional_groups.push(group);
            }
        }
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Whether `group` is one of the required groups.
    pub fn requires(&self, group: &GroupId) -> bool {
        self.required_groups.contains(group)
    }
}

/// Outcome status reported for a single group call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    /// The group ran and reported failure.
    Failed,
    /// The call itself did not complete (unavailable, panic, timeout, bad reply).
    Error,
}

/// Per-group outcome of one coordination run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResponse {
    pub group: GroupId,
    pub status: ResponseStatus,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Worker that served the call, if one was reached.
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl GroupResponse {
    /// An error-status response for a call that never produced a reply.
    pub fn error(group: GroupId, message: impl Into<String>) -> Self {
        Self {
            group,
            status: ResponseStatus::Error,
            data: serde_json::Value::Null,
            errors: vec![message.into()],
            warnings: Vec::new(),
            worker_id: None,
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Overall status of a coordination run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationStatus {
    Success,
    Partial,
    Failed,
}

/// Quality figures derived from the collected responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean per-group quality over successful groups.
    pub average_quality: f64,
    /// Groups that produced any response.
    pub group_coverage: usize,
    /// Successful groups over groups considered.
    pub success_rate: f64,
    /// Mean pairwise catalog affinity among successful groups.
    pub collaboration_affinity: f64,
}

/// Final output of a coordination run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationResult {
    pub task_id: Uuid,
    /// Pattern that was executed; `None` when the run never reached planning.
    pub pattern: Option<CoordinationPattern>,
    pub status: CoordinationStatus,
    pub elapsed_ms: u64,
    pub responses: HashMap<GroupId, GroupResponse>,
    pub quality: QualityMetrics,
    pub efficiency_score: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl CoordinationResult {
    /// A failed result with no group responses.
    pub fn failed(task_id: Uuid, errors: Vec<String>, elapsed_ms: u64) -> Self {
        Self {
            task_id,
            pattern: None,
            status: CoordinationStatus::Failed,
            elapsed_ms,
            responses: HashMap::new(),
            quality: QualityMetrics::default(),
            efficiency_score: 0.0,
            errors,
            warnings: Vec::new(),
            completed_at: Utc::now(),
        }
    }
}

/// Lifecycle of one coordination run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Planned,
    Executing,
    Succeeded,
    PartiallySucceeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::PartiallySucceeded | RunState::Failed
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: RunState) -> bool {
        match self {
            RunState::Planned => matches!(next, RunState::Executing | RunState::Failed),
            RunState::Executing => next.is_terminal(),
            _ => false,
        }
    }
}

impl From<CoordinationStatus> for RunState {
    fn from(status: CoordinationStatus) -> Self {
        match status {
            CoordinationStatus::Success => RunState::Succeeded,
            CoordinationStatus::Partial => RunState::PartiallySucceeded,
            CoordinationStatus::Failed => RunState::Failed,
        }
    }
}

/// Prefix a message with the group it came from.
pub(crate) fn tag(group: &GroupId, message: impl std::fmt::Display) -> String {
    format!("[{group}] {message}")
}
