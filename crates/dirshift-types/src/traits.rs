//! Core traits for dirshift operations
//!
//! This module defines the seams between the migration engine and its callers:
//! progress reporting and cancellation.

use crate::{MigrationResult, ProgressEvent};

/// Trait for receiving progress during a batch
///
/// Events are delivered from a single task, so implementations never observe two
/// calls at once. Events for one job always arrive in step order.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report_progress(&self, event: &ProgressEvent);

    /// Report the terminal result of a job
    fn report_completion(&self, _result: &MigrationResult) {}
}

impl<F> ProgressReporter for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report_progress(&self, event: &ProgressEvent) {
        self(event);
    }
}

/// Reporter that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report_progress(&self, _event: &ProgressEvent) {}
}

/// Trait for cooperative cancellation
pub trait Cancellable {
    /// Request cancellation
    fn cancel(&self);

    /// Check if cancellation was requested
    fn is_cancelled(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobId, MoveStep, StepProgress};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_reporter() {
        let calls = AtomicUsize::new(0);
        let reporter = |_event: &ProgressEvent| {
            calls.fetch_add(1, Ordering::SeqCst);
        };

        let event = ProgressEvent {
            job_id: JobId::from("a"),
            progress: StepProgress::new(MoveStep::Copy, 40),
            overall_percent: 10.0,
        };
        reporter.report_progress(&event);
        reporter.report_progress(&event);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
