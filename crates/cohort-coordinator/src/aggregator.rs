use crate::catalog::CapabilityCatalog;
use crate::config::AggregationConfig;
use crate::types::{CoordinationStatus, CoordinationTask, GroupId, GroupResponse, QualityMetrics};
use std::collections::HashMap;
use std::sync::Arc;

/// Derived figures for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub quality: QualityMetrics,
    pub efficiency_score: f64,
    pub status: CoordinationStatus,
}

/// Turns collected group responses into quality, efficiency and status.
pub struct ResultAggregator {
    config: AggregationConfig,
    catalog: Arc<CapabilityCatalog>,
}

impl ResultAggregator {
    pub fn new(config: AggregationConfig, catalog: Arc<CapabilityCatalog>) -> Self {
        Self { config, catalog }
    }

    /// Aggregate `responses` over the `considered` groups (every planned group,
    /// including ones that were skipped and never answered).
    pub fn aggregate(
        &self,
        task: &CoordinationTask,
        considered: &[GroupId],
        responses: &HashMap<GroupId, GroupResponse>,
    ) -> Aggregation {
        let total = considered.len();
        let successful: Vec<&GroupResponse> = considered
            .iter()
            .filter_map(|g| responses.get(g))
            .filter(|r| r.is_success())
            .collect();
        let success_count = successful.len();

        let average_quality = if successful.is_empty() {
            0.0
        } else {
            successful.iter().map(|r| self.group_quality(r)).sum::<f64>() / success_count as f64
        };
        let group_coverage = considered
            .iter()
            .filter(|g| responses.contains_key(*g))
            .count();
        let success_rate = if total == 0 {
            0.0
        } else {
            success_count as f64 / total as f64
        };

        let all_required_succeeded = !task.required_groups.is_empty()
            && task
                .required_groups
                .iter()
                .all(|g| responses.get(g).is_some_and(GroupResponse::is_success));

        let mut efficiency = success_rate;
        if success_count >= self.config.breadth_threshold {
            efficiency *= self.config.breadth_bonus;
        }
        if all_required_succeeded {
            efficiency *= self.config.completeness_bonus;
        }

        let succeeded_ids: Vec<&GroupId> = successful.iter().map(|r| &r.group).collect();

        Aggregation {
            quality: QualityMetrics {
                average_quality,
                group_coverage,
                success_rate,
                collaboration_affinity: self.mean_affinity(&succeeded_ids),
            },
            efficiency_score: efficiency.min(1.0),
            status: status_for(success_count, total),
        }
    }

    /// Base quality plus a bonus for each clean channel.
    pub fn group_quality(&self, response: &GroupResponse) -> f64 {
        let mut quality = self.config.base_quality;
        if response.errors.is_empty() {
            quality += self.config.no_error_bonus;
        }
        if response.warnings.is_empty() {
            quality += self.config.no_warning_bonus;
        }
        quality
    }

    fn mean_affinity(&self, groups: &[&GroupId]) -> f64 {
        let mut sum = 0.0;
        let mut pairs = 0usize;
        for (i, a) in groups.iter().enumerate() {
            for b in &groups[i + 1..] {
                sum += self.catalog.affinity(a, b);
                pairs += 1;
            }
        }
        if pairs == 0 {
            0.0
        } else {
            sum / pairs as f64
        }
    }
}

/// Success if all succeeded, failed if none or fewer than half did, partial otherwise.
pub fn status_for(successful: usize, total: usize) -> CoordinationStatus {
    if total == 0 || successful == 0 {
        CoordinationStatus::Failed
    } else if successful == total {
        CoordinationStatus::Success
    } else if (successful as f64) < total as f64 / 2.0 {
        CoordinationStatus::Failed
    } else {
        CoordinationStatus::Partial
    }
}
