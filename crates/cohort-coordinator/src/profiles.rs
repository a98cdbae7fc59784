use crate::catalog::GroupCapability;
use crate::types::Stage;
use std::time::Duration;

/// Stock catalog with one group per pipeline stage.
pub fn default_capabilities() -> Vec<GroupCapability> {
    vec![
        research_group(),
        build_group(),
        verify_group(),
        respond_group(),
    ]
}

fn research_group() -> GroupCapability {
    GroupCapability::new("research", Stage::Research, 3)
        .with_functions(["requirements_analysis", "codebase_survey", "prior_art"])
        .with_affinity("build", 0.8)
        .with_affinity("verify", 0.6)
        .with_expected_latency(Duration::from_secs(2))
}

fn build_group() -> GroupCapability {
    GroupCapability::new("build", Stage::Build, 4)
        .with_functions(["code_generation", "refactoring", "migration"])
        .with_affinity("verify", 0.9)
        .with_affinity("respond", 0.5)
        .with_expected_latency(Duration::from_secs(5))
}

fn verify_group() -> GroupCapability {
    GroupCapability::new("verify", Stage::Verify, 3)
        .with_functions(["test_execution", "security_scan", "code_review"])
        .with_affinity("respond", 0.7)
        .with_expected_latency(Duration::from_secs(3))
}

fn respond_group() -> GroupCapability {
    GroupCapability::new("respond", Stage::Respond, 2)
        .with_functions(["release", "monitoring", "incident_response"])
        .with_expected_latency(Duration::from_millis(1500))
}
