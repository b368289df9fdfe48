//! Batch-level progress aggregation
//!
//! Every job contributes its weighted step position: each of Mkdir, Copy, Mklink and
//! (when enabled) Verifying counts as one equal part of the job. The overall figure is
//! the mean over all jobs of the batch. It is an approximation for display purposes and
//! does not track bytes.

use dirshift_types::{weighted_percent, JobId, MoveStep, StepProgress};
use std::collections::HashMap;

/// Folds per-job step progress into an overall percentage
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    steps: u32,
    jobs: HashMap<JobId, f64>,
}

impl ProgressAggregator {
    /// Create an aggregator for `job_ids`, each going through `steps` weighted steps
    pub fn new<I>(job_ids: I, steps: u32) -> Self
    where
        I: IntoIterator<Item = JobId>,
    {
        Self {
            steps: steps.max(1),
            jobs: job_ids.into_iter().map(|id| (id, 0.0)).collect(),
        }
    }

    /// Record progress of one job and return the new overall percentage
    pub fn update(&mut self, job_id: &JobId, progress: &StepProgress) -> f64 {
        let value = match progress.step {
            // Rollbacks are a single step of their own
            MoveStep::Cleaning => f64::from(progress.percent.min(100)),
            step => weighted_percent(step, progress.percent, self.steps),
        };
        if let Some(current) = self.jobs.get_mut(job_id) {
            *current = value;
        }
        self.overall()
    }

    /// Progress of one job (0-100)
    pub fn job_percent(&self, job_id: &JobId) -> Option<f64> {
        self.jobs.get(job_id).copied()
    }

    /// Overall batch percentage (0-100)
    pub fn overall(&self) -> f64 {
        if self.jobs.is_empty() {
            return 100.0;
        }
        self.jobs.values().sum::<f64>() / self.jobs.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(n: usize) -> Vec<JobId> {
        (0..n).map(|i| JobId::new(format!("job-{}", i))).collect()
    }

    #[test]
    fn test_two_jobs_four_steps() {
        let ids = ids(2);
        let mut aggregator = ProgressAggregator::new(ids.clone(), 4);

        // Job 0 half way through Copy: (100 + 50) / 4 = 37.5
        let overall = aggregator.update(&ids[0], &StepProgress::new(MoveStep::Copy, 50));
        assert!((overall - 18.75).abs() < 1e-9);

        aggregator.update(&ids[1], &StepProgress::new(MoveStep::Completed, 100));
        assert!((aggregator.overall() - 68.75).abs() < 1e-9);
    }

    #[test]
    fn test_failed_job_counts_as_done() {
        let ids = ids(1);
        let mut aggregator = ProgressAggregator::new(ids.clone(), 3);
        aggregator.update(&ids[0], &StepProgress::new(MoveStep::Copy, 10));
        let overall = aggregator.update(&ids[0], &StepProgress::new(MoveStep::Error, 0));
        assert!((overall - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_job_is_ignored() {
        let mut aggregator = ProgressAggregator::new(ids(1), 3);
        let overall = aggregator.update(
            &JobId::from("stranger"),
            &StepProgress::new(MoveStep::Completed, 100),
        );
        assert_eq!(overall, 0.0);
    }

    proptest! {
        #[test]
        fn test_overall_stays_in_bounds(
            updates in proptest::collection::vec((0usize..4, 0usize..4, 0u8..=100), 0..64),
            verify in any::<bool>(),
        ) {
            let ids = ids(4);
            let steps = if verify { 4 } else { 3 };
            let mut aggregator = ProgressAggregator::new(ids.clone(), steps);
            for (job, step, percent) in updates {
                let overall = aggregator.update(
                    &ids[job],
                    &StepProgress::new(MoveStep::WEIGHTED[step], percent),
                );
                prop_assert!((0.0..=100.0).contains(&overall));
            }
        }

        #[test]
        fn test_in_order_progress_never_decreases(percents in proptest::collection::vec(0u8..=100, 1..16)) {
            let ids = ids(1);
            let mut aggregator = ProgressAggregator::new(ids.clone(), 4);
            let mut last = 0.0;
            for step in MoveStep::WEIGHTED {
                let mut sorted = percents.clone();
                sorted.sort_unstable();
                for percent in sorted {
                    let overall = aggregator.update(&ids[0], &StepProgress::new(step, percent));
                    prop_assert!(overall >= last);
                    last = overall;
                }
            }
        }
    }
}
