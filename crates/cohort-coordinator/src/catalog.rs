use crate::types::{GroupId, Stage};
use cohort_core::{CohortError, CohortResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Static description of a specialist group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCapability {
    pub id: GroupId,
    /// Canonical pipeline position; also designates hierarchical roles.
    pub stage: Stage,
    /// Function names this group supports.
    #[serde(default)]
    pub functions: Vec<String>,
    /// Collaboration affinity towards peer groups, each in `[0, 1]`.
    #[serde(default)]
    pub affinity: HashMap<GroupId, f64>,
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_expected_latency_ms")]
    pub expected_latency_ms: u64,
}

fn default_expected_latency_ms() -> u64 {
    1_000
}

impl GroupCapability {
    pub fn new(id: impl Into<GroupId>, stage: Stage, max_concurrent_tasks: usize) -> Self {
        Self {
            id: id.into(),
            stage,
            functions: Vec::new(),
            affinity: HashMap::new(),
            max_concurrent_tasks,
            expected_latency_ms: default_expected_latency_ms(),
        }
    }

    pub fn with_functions<I, S>(mut self, functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.functions.extend(functions.into_iter().map(Into::into));
        self
    }

    pub fn with_affinity(mut self, peer: impl Into<GroupId>, score: f64) -> Self {
        self.affinity.insert(peer.into(), score);
        self
    }

    pub fn with_expected_latency(mut self, latency: Duration) -> Self {
        self.expected_latency_ms = latency.as_millis() as u64;
        self
    }

    pub fn supports(&self, function: &str) -> bool {
        self.functions.iter().any(|f| f == function)
    }

    fn validate(&self) -> CohortResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(CohortError::Catalog("group id must not be empty".to_string()));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(CohortError::Catalog(format!(
                "group '{}' must allow at least one concurrent task",
                self.id
            )));
        }
        if let Some((peer, score)) = self
            .affinity
            .iter()
            .find(|(_, score)| !(0.0..=1.0).contains(*score))
        {
            return Err(CohortError::Catalog(format!(
                "group '{}' declares affinity {score} towards '{peer}', expected a value in [0, 1]",
                self.id
            )));
        }
        Ok(())
    }
}

/// Registry of group capabilities.
///
/// Populated at startup, then shared read-only behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct CapabilityCatalog {
    groups: Vec<GroupCapability>,
    index: HashMap<GroupId, usize>,
}

impl CapabilityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a list of capabilities, failing on the first invalid one.
    pub fn from_capabilities(
        capabilities: impl IntoIterator<Item = GroupCapability>,
    ) -> CohortResult<Self> {
        let mut catalog = Self::new();
        for capability in capabilities {
            catalog.register(capability)?;
        }
        Ok(catalog)
    }

    /// Register a group. Duplicate ids and invalid limits are rejected.
    pub fn register(&mut self, capability: GroupCapability) -> CohortResult<()> {
        capability.validate()?;
        if self.index.contains_key(&capability.id) {
            return Err(CohortError::Catalog(format!(
                "group '{}' is already registered",
                capability.id
            )));
        }
        self.index.insert(capability.id.clone(), self.groups.len());
        self.groups.push(capability);
        Ok(())
    }

    /// Look up a group, failing with a catalog error if it is unknown.
    pub fn lookup(&self, id: &GroupId) -> CohortResult<&GroupCapability> {
        self.get(id)
            .ok_or_else(|| CohortError::Catalog(format!("unknown group '{id}'")))
    }

    pub fn get(&self, id: &GroupId) -> Option<&GroupCapability> {
        self.index.get(id).map(|&i| &self.groups[i])
    }

    pub fn contains(&self, id: &GroupId) -> bool {
        self.index.contains_key(id)
    }

    /// All groups in registration order.
    pub fn list_groups(&self) -> &[GroupCapability] {
        &self.groups
    }

    /// Stage of a registered group.
    pub fn stage_of(&self, id: &GroupId) -> Option<Stage> {
        self.get(id).map(|c| c.stage)
    }

    /// Affinity between two groups. Uses `a`'s declaration, then `b`'s, else 0.
    pub fn affinity(&self, a: &GroupId, b: &GroupId) -> f64 {
        self.get(a)
            .and_then(|c| c.affinity.get(b))
            .or_else(|| self.get(b).and_then(|c| c.affinity.get(a)))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
