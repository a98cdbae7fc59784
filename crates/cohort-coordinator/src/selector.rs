use crate::types::{Complexity, CoordinationPattern, CoordinationTask};

/// Pattern used for a complexity level when no override is given.
pub fn pattern_for(complexity: Complexity) -> CoordinationPattern {
    match complexity {
        Complexity::Simple => CoordinationPattern::Sequential,
        Complexity::Moderate => CoordinationPattern::Parallel,
        Complexity::Complex => CoordinationPattern::Pipeline,
        Complexity::Epic => CoordinationPattern::Hierarchical,
    }
}

/// Choose the coordination pattern for a task.
pub fn select(task: &CoordinationTask) -> CoordinationPattern {
    task.pattern_override
        .unwrap_or_else(|| pattern_for(task.complexity))
}
