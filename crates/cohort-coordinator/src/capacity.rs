use crate::catalog::CapabilityCatalog;
use crate::invoker::WorkerRegistry;
use crate::types::{tag, CoordinationTask, GroupId};
use cohort_core::CohortError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a group could not take more work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("group '{0}': unknown group")]
    UnknownGroup(GroupId),

    #[error("group '{0}': no workers available")]
    NoWorkers(GroupId),

    #[error("group '{group}': at capacity ({workload}/{max})")]
    AtCapacity {
        group: GroupId,
        workload: usize,
        max: usize,
    },
}

impl AdmissionError {
    /// The short, stable reason phrase.
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::UnknownGroup(_) => "unknown group",
            AdmissionError::NoWorkers(_) => "no workers available",
            AdmissionError::AtCapacity { .. } => "at capacity",
        }
    }

    /// The group that failed admission.
    pub fn group(&self) -> &GroupId {
        match self {
            AdmissionError::UnknownGroup(group)
            | AdmissionError::NoWorkers(group)
            | AdmissionError::AtCapacity { group, .. } => group,
        }
    }

    /// Error string tagged with the originating group.
    pub fn tagged(&self) -> String {
        tag(self.group(), format_args!("admission rejected: {}", self.reason()))
    }
}

impl From<AdmissionError> for CohortError {
    fn from(err: AdmissionError) -> Self {
        CohortError::Admission {
            group: err.group().to_string(),
            reason: err.reason().to_string(),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub admit: bool,
    /// Reason phrase when rejected.
    pub reason: Option<String>,
    /// Group that caused the rejection.
    pub group: Option<GroupId>,
}

impl AdmissionDecision {
    pub fn admitted() -> Self {
        Self {
            admit: true,
            reason: None,
            group: None,
        }
    }
}

impl From<&AdmissionError> for AdmissionDecision {
    fn from(err: &AdmissionError) -> Self {
        Self {
            admit: false,
            reason: Some(err.reason().to_string()),
            group: Some(err.group().clone()),
        }
    }
}

/// Per-group workload accounting and admission control.
pub struct CapacityGate {
    catalog: Arc<CapabilityCatalog>,
    workers: Arc<WorkerRegistry>,
    workload: Mutex<HashMap<GroupId, usize>>,
}

impl CapacityGate {
    pub fn new(catalog: Arc<CapabilityCatalog>, workers: Arc<WorkerRegistry>) -> Self {
        let workload = catalog
            .list_groups()
            .iter()
            .map(|c| (c.id.clone(), 0))
            .collect();
        Self {
            catalog,
            workers,
            workload: Mutex::new(workload),
        }
    }

    /// All-or-nothing admission check over the task's required groups.
    ///
    /// Does not reserve capacity; slots are taken per call via [`try_acquire`](Self::try_acquire).
    pub fn check(&self, task: &CoordinationTask) -> Result<(), AdmissionError> {
        for group in &task.required_groups {
            self.check_group(group)?;
        }
        Ok(())
    }

    /// [`check`](Self::check) in decision form.
    pub fn decide(&self, task: &CoordinationTask) -> AdmissionDecision {
        match self.check(task) {
            Ok(()) => AdmissionDecision::admitted(),
            Err(err) => AdmissionDecision::from(&err),
        }
    }

    /// Split the task's optional groups into admissible ones and skip warnings.
    pub fn admit_optional(&self, task: &CoordinationTask) -> (Vec<GroupId>, Vec<String>) {
        let mut admitted = Vec::new();
        let mut warnings = Vec::new();
        for group in &task.optional_groups {
            match self.check_group(group) {
                Ok(()) => admitted.push(group.clone()),
                Err(err) => {
                    debug!(group = %group, reason = err.reason(), "Optional group skipped");
                    warnings.push(tag(
                        group,
                        format_args!("optional group skipped: {}", err.reason()),
                    ));
                }
            }
        }
        (admitted, warnings)
    }

    /// Check a single group without changing its workload.
    pub fn check_group(&self, group: &GroupId) -> Result<(), AdmissionError> {
        let workload = self.workload.lock();
        self.check_locked(&workload, group)
    }

    fn check_locked(
        &self,
        workload: &HashMap<GroupId, usize>,
        group: &GroupId,
    ) -> Result<(), AdmissionError> {
        let capability = self
            .catalog
            .get(group)
            .ok_or_else(|| AdmissionError::UnknownGroup(group.clone()))?;
        if self.workers.live_workers(group) == 0 {
            return Err(AdmissionError::NoWorkers(group.clone()));
        }
        let current = workload.get(group).copied().unwrap_or(0);
        if current >= capability.max_concurrent_tasks {
            return Err(AdmissionError::AtCapacity {
                group: group.clone(),
                workload: current,
                max: capability.max_concurrent_tasks,
            });
        }
        Ok(())
    }

    /// Atomically check and take one slot for `group`.
    ///
    /// The slot is released when the returned guard is dropped.
    pub fn try_acquire(&self, group: &GroupId) -> Result<CapacitySlot<'_>, AdmissionError> {
        let mut workload = self.workload.lock();
        self.check_locked(&workload, group)?;
        *workload.entry(group.clone()).or_insert(0) += 1;
        Ok(CapacitySlot {
            gate: self,
            group: group.clone(),
        })
    }

    /// Raise the workload counter for `group`, returning the new value.
    ///
    /// Must be paired with exactly one [`decrement`](Self::decrement).
    pub fn increment(&self, group: &GroupId) -> usize {
        let mut workload = self.workload.lock();
        let counter = workload.entry(group.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Lower the workload counter for `group`, returning the new value.
    pub fn decrement(&self, group: &GroupId) -> usize {
        let mut workload = self.workload.lock();
        let counter = workload.entry(group.clone()).or_insert(0);
        if *counter == 0 {
            warn!(group = %group, "Workload decrement without matching increment");
        }
        *counter = counter.saturating_sub(1);
        *counter
    }

    pub fn workload(&self, group: &GroupId) -> usize {
        self.workload.lock().get(group).copied().unwrap_or(0)
    }

    /// Copy of every group's current workload.
    pub fn snapshot(&self) -> HashMap<GroupId, usize> {
        self.workload.lock().clone()
    }

    /// Workload over capacity, or 0 for unknown groups.
    pub fn utilization(&self, group: &GroupId) -> f64 {
        match self.catalog.get(group) {
            Some(capability) => self.workload(group) as f64 / capability.max_concurrent_tasks as f64,
            None => 0.0,
        }
    }
}

/// A held unit of group capacity. Dropping it releases the slot.
#[must_use = "dropping the slot releases capacity immediately"]
pub struct CapacitySlot<'a> {
    gate: &'a CapacityGate,
    group: GroupId,
}

impl CapacitySlot<'_> {
    pub fn group(&self) -> &GroupId {
        &self.group
    }
}

impl Drop for CapacitySlot<'_> {
    fn drop(&mut self) {
        self.gate.decrement(&self.group);
    }
}
