use crate::catalog::CapabilityCatalog;
use crate::types::{CoordinationPattern, CoordinationTask, GroupId, Stage};
use cohort_core::{CohortError, CohortResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One step of an execution plan. Its groups may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub index: usize,
    pub name: String,
    pub groups: Vec<GroupId>,
    /// Indices of phases that must be closed before this one starts.
    pub depends_on: Vec<usize>,
}

impl Phase {
    fn new(index: usize, name: impl Into<String>, groups: Vec<GroupId>) -> Self {
        let depends_on = if index == 0 { Vec::new() } else { vec![index - 1] };
        Self {
            index,
            name: name.into(),
            groups,
            depends_on,
        }
    }

    /// Whether every dependency is among `closed`.
    pub fn is_ready(&self, closed: &[usize]) -> bool {
        self.depends_on.iter().all(|dep| closed.contains(dep))
    }
}

/// Ordered phases derived from a task and its pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub pattern: CoordinationPattern,
    pub phases: Vec<Phase>,
    /// Phase whose failure terminates the run at the next phase boundary.
    pub critical_phase: Option<usize>,
}

impl ExecutionPlan {
    /// Every planned group in phase order.
    pub fn groups(&self) -> impl Iterator<Item = &GroupId> {
        self.phases.iter().flat_map(|p| p.groups.iter())
    }

    pub fn group_count(&self) -> usize {
        self.phases.iter().map(|p| p.groups.len()).sum()
    }

    pub fn is_critical(&self, index: usize) -> bool {
        self.critical_phase == Some(index)
    }

    /// Check that dependencies point at existing phases and form no cycle.
    pub fn validate(&self) -> CohortResult<()> {
        for phase in &self.phases {
            if let Some(dep) = phase.depends_on.iter().find(|&&d| d >= self.phases.len()) {
                return Err(CohortError::Planning(format!(
                    "phase {} depends on unknown phase {dep}",
                    phase.index
                )));
            }
        }
        if self.has_cycle() {
            return Err(CohortError::Planning(
                "dependency cycle detected in execution plan".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns true if a dependency cycle exists between phases.
    pub fn has_cycle(&self) -> bool {
        let mut visited = HashMap::new();
        (0..self.phases.len()).any(|i| self.dfs_cycle(i, &mut visited))
    }

    fn dfs_cycle(&self, index: usize, visited: &mut HashMap<usize, u8>) -> bool {
        match visited.get(&index) {
            Some(1) => return true,
            Some(2) => return false,
            _ => {}
        }
        visited.insert(index, 1);
        if let Some(phase) = self.phases.get(index) {
            for &dep in &phase.depends_on {
                if self.dfs_cycle(dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(index, 2);
        false
    }
}

/// Expands a pattern and a task's groups into an [`ExecutionPlan`].
pub struct ExecutionPlanner {
    catalog: Arc<CapabilityCatalog>,
}

impl ExecutionPlanner {
    pub fn new(catalog: Arc<CapabilityCatalog>) -> Self {
        Self { catalog }
    }

    /// Plan over the task's required groups.
    pub fn build(
        &self,
        task: &CoordinationTask,
        pattern: CoordinationPattern,
    ) -> CohortResult<ExecutionPlan> {
        self.build_with_optional(task, pattern, &[])
    }

    /// Plan over the required groups plus the admitted optional ones.
    pub fn build_with_optional(
        &self,
        task: &CoordinationTask,
        pattern: CoordinationPattern,
        optional: &[GroupId],
    ) -> CohortResult<ExecutionPlan> {
        if task.required_groups.is_empty() {
            return Err(CohortError::Planning(format!(
                "task '{}' declares no required groups",
                task.name
            )));
        }
        if task.dependencies.contains(&task.id) {
            return Err(CohortError::Planning(format!(
                "task '{}' depends on itself",
                task.name
            )));
        }

        let mut groups: Vec<(GroupId, Stage)> = Vec::new();
        for group in task.required_groups.iter().chain(optional) {
            if groups.iter().any(|(g, _)| g == group) {
                continue;
            }
            let stage = self.catalog.lookup(group)?.stage;
            groups.push((group.clone(), stage));
        }

        let plan = match pattern {
            CoordinationPattern::Sequential => sequential(groups),
            CoordinationPattern::Parallel => parallel(groups),
            CoordinationPattern::Pipeline => pipeline(groups),
            CoordinationPattern::Hierarchical => hierarchical(groups),
        };
        plan.validate()?;

        debug!(
            task_id = %task.id,
            pattern = %pattern,
            phases = plan.phases.len(),
            groups = plan.group_count(),
            "Execution plan built"
        );
        Ok(plan)
    }
}

fn sequential(groups: Vec<(GroupId, Stage)>) -> ExecutionPlan {
    let phases = groups
        .into_iter()
        .enumerate()
        .map(|(i, (group, _))| Phase::new(i, format!("step-{}", i + 1), vec![group]))
        .collect();
    ExecutionPlan {
        pattern: CoordinationPattern::Sequential,
        phases,
        critical_phase: None,
    }
}

fn parallel(groups: Vec<(GroupId, Stage)>) -> ExecutionPlan {
    let groups = groups.into_iter().map(|(g, _)| g).collect();
    ExecutionPlan {
        pattern: CoordinationPattern::Parallel,
        phases: vec![Phase::new(0, "parallel", groups)],
        critical_phase: None,
    }
}

fn pipeline(mut groups: Vec<(GroupId, Stage)>) -> ExecutionPlan {
    // stable: equal stages keep declaration order
    groups.sort_by_key(|(_, stage)| *stage);
    let phases = groups
        .into_iter()
        .enumerate()
        .map(|(i, (group, stage))| Phase::new(i, format!("{stage}:{group}"), vec![group]))
        .collect();
    ExecutionPlan {
        pattern: CoordinationPattern::Pipeline,
        phases,
        critical_phase: None,
    }
}

fn hierarchical(mut groups: Vec<(GroupId, Stage)>) -> ExecutionPlan {
    let lead = groups
        .iter()
        .position(|(_, stage)| *stage == Stage::Research)
        .unwrap_or(0);
    let (research, _) = groups.remove(lead);

    let mut phases = vec![Phase::new(0, "research", vec![research])];
    if let Some(pos) = groups.iter().position(|(_, stage)| *stage == Stage::Build) {
        let (builder, _) = groups.remove(pos);
        phases.push(Phase::new(phases.len(), "implementation", vec![builder]));
    }
    if !groups.is_empty() {
        let rest = groups.into_iter().map(|(g, _)| g).collect();
        phases.push(Phase::new(phases.len(), "verification", rest));
    }

    ExecutionPlan {
        pattern: CoordinationPattern::Hierarchical,
        phases,
        critical_phase: Some(0),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::GroupCapability;
    use crate::types::Complexity;
    use uuid::Uuid;

    fn planner() -> ExecutionPlanner {
        let catalog = CapabilityCatalog::from_capabilities([
            GroupCapability::new("respond", Stage::Respond, 1),
            GroupCapability::new("verify", Stage::Verify, 1),
            GroupCapability::new("lint", Stage::Verify, 1),
            GroupCapability::new("build", Stage::Build, 1),
            GroupCapability::new("research", Stage::Research, 1),
        ])
        .unwrap();
        ExecutionPlanner::new(Arc::new(catalog))
    }

    fn task(groups: &[&str]) -> CoordinationTask {
        CoordinationTask::new("t", Complexity::Simple).with_required(groups.iter().copied())
    }

    fn names(phase: &Phase) -> Vec<&str> {
        phase.groups.iter().map(GroupId::as_str).collect()
    }

    #[test]
    fn test_sequential_single_group() {
        let plan = planner()
            .build(&task(&["build"]), CoordinationPattern::Sequential)
            .unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(names(&plan.phases[0]), vec!["build"]);
        assert!(plan.phases[0].depends_on.is_empty());
    }

    #[test]
    fn test_sequential_declaration_order_chain() {
        let plan = planner()
            .build(&task(&["verify", "build", "research"]), CoordinationPattern::Sequential)
            .unwrap();
        assert_eq!(plan.phases.len(), 3);
        assert_eq!(names(&plan.phases[0]), vec!["verify"]);
        assert_eq!(names(&plan.phases[2]), vec!["research"]);
        assert_eq!(plan.phases[1].depends_on, vec![0]);
        assert_eq!(plan.phases[2].depends_on, vec![1]);
    }

    #[test]
    fn test_parallel_single_phase() {
        let plan = planner()
            .build(&task(&["build", "verify", "lint"]), CoordinationPattern::Parallel)
            .unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(names(&plan.phases[0]), vec!["build", "verify", "lint"]);
        assert!(plan.phases[0].depends_on.is_empty());
    }

    #[test]
    fn test_pipeline_canonical_order() {
        let plan = planner()
            .build(
                &task(&["respond", "lint", "build", "verify", "research"]),
                CoordinationPattern::Pipeline,
            )
            .unwrap();
        let order: Vec<&str> = plan.groups().map(GroupId::as_str).collect();
        assert_eq!(order, vec!["research", "build", "lint", "verify", "respond"]);
        assert_eq!(plan.phases[4].depends_on, vec![3]);
    }

    #[test]
    fn test_pipeline_keeps_only_requested_groups() {
        let plan = planner()
            .build(&task(&["verify", "build"]), CoordinationPattern::Pipeline)
            .unwrap();
        let order: Vec<&str> = plan.groups().map(GroupId::as_str).collect();
        assert_eq!(order, vec!["build", "verify"]);
    }

    #[test]
    fn test_hierarchical_three_phases() {
        let plan = planner()
            .build(
                &task(&["verify", "build", "research", "lint"]),
                CoordinationPattern::Hierarchical,
            )
            .unwrap();
        assert_eq!(plan.phases.len(), 3);
        assert_eq!(plan.phases[0].name, "research");
        assert_eq!(names(&plan.phases[0]), vec!["research"]);
        assert_eq!(plan.phases[1].name, "implementation");
        assert_eq!(names(&plan.phases[1]), vec!["build"]);
        assert_eq!(plan.phases[1].depends_on, vec![0]);
        assert_eq!(plan.phases[2].name, "verification");
        assert_eq!(names(&plan.phases[2]), vec!["verify", "lint"]);
        assert_eq!(plan.phases[2].depends_on, vec![1]);
        assert_eq!(plan.critical_phase, Some(0));
    }

    #[test]
    fn test_hierarchical_without_research_group_uses_lead() {
        let plan = planner()
            .build(&task(&["verify", "lint"]), CoordinationPattern::Hierarchical)
            .unwrap();
        assert_eq!(names(&plan.phases[0]), vec!["verify"]);
        assert_eq!(plan.phases[1].name, "verification");
        assert_eq!(plan.phases[1].depends_on, vec![0]);
    }

    #[test]
    fn test_optional_groups_appended() {
        let plan = planner()
            .build_with_optional(
                &task(&["build"]),
                CoordinationPattern::Parallel,
                &[GroupId::from("lint"), GroupId::from("build")],
            )
            .unwrap();
        assert_eq!(names(&plan.phases[0]), vec!["build", "lint"]);
    }

    #[test]
    fn test_empty_task_is_planning_error() {
        let err = planner()
            .build(&task(&[]), CoordinationPattern::Parallel)
            .unwrap_err();
        assert!(matches!(err, CohortError::Planning(_)));
    }

    #[test]
    fn test_self_dependency_is_planning_error() {
        let mut t = task(&["build"]);
        t.dependencies = vec![Uuid::new_v4(), t.id];
        let err = planner()
            .build(&t, CoordinationPattern::Sequential)
            .unwrap_err();
        assert!(err.to_string().contains("depends on itself"));
    }

    #[test]
    fn test_unknown_group_is_rejected() {
        let err = planner()
            .build(&task(&["build", "deploy"]), CoordinationPattern::Parallel)
            .unwrap_err();
        assert!(matches!(err, CohortError::Catalog(_)));
    }

    #[test]
    fn test_cycle_detection() {
        let mut plan = planner()
            .build(&task(&["build", "verify"]), CoordinationPattern::Sequential)
            .unwrap();
        assert!(!plan.has_cycle());
        plan.phases[0].depends_on = vec![1];
        assert!(plan.has_cycle());
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_dangling_dependency() {
        let mut plan = planner()
            .build(&task(&["build"]), CoordinationPattern::Sequential)
            .unwrap();
        plan.phases[0].depends_on = vec![7];
        assert!(plan.validate().unwrap_err().to_string().contains("unknown phase 7"));
    }

    #[test]
    fn test_phase_is_ready() {
        let phase = Phase::new(2, "x", vec![]);
        assert!(!phase.is_ready(&[0]));
        assert!(phase.is_ready(&[0, 1]));
    }
}
