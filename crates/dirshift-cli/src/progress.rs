//! Terminal progress display for batches

use crate::display::format_bytes;
use dirshift_types::{
    weighted_percent, Job, JobId, MigrationResult, MoveStep, ProgressEvent, ProgressReporter,
};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

const JOB_TEMPLATE: &str = "{spinner:.green} {prefix:<20!} [{bar:30.cyan/blue}] {pos:>3}% {msg}";
const OVERALL_TEMPLATE: &str = "  {prefix:<20!} [{bar:30.green/white}] {pos:>3}%";

/// One bar per job plus an overall bar
///
/// Bars are created up front, so updates never need to lock anything.
pub struct BatchProgress {
    bars: HashMap<JobId, ProgressBar>,
    overall: ProgressBar,
    multi: MultiProgress,
    steps: u32,
}

impl BatchProgress {
    /// Create bars for `jobs` going through `steps` weighted steps
    ///
    /// Nothing is drawn when `visible` is false.
    pub fn new(jobs: &[Job], steps: u32, visible: bool) -> Self {
        let multi = if visible {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let job_style = ProgressStyle::with_template(JOB_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ");
        let bars = jobs
            .iter()
            .map(|job| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(job_style.clone());
                bar.set_prefix(job.name.clone());
                bar.set_message(format!("{} queued", job.id.short()));
                bar.enable_steady_tick(Duration::from_millis(120));
                (job.id.clone(), bar)
            })
            .collect();

        let overall = multi.add(ProgressBar::new(100));
        overall.set_style(
            ProgressStyle::with_template(OVERALL_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        overall.set_prefix("overall");

        Self {
            bars,
            overall,
            multi,
            steps,
        }
    }

    /// Remove every bar from the terminal
    pub fn finish(&self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
        self.overall.finish();
        let _ = self.multi.clear();
    }
}

fn step_label(event: &ProgressEvent) -> String {
    let progress = &event.progress;
    match (progress.step, progress.bytes_done, progress.bytes_total) {
        (MoveStep::Copy | MoveStep::Verifying, Some(done), Some(total)) => format!(
            "{} {}/{}",
            progress.step,
            format_bytes(done),
            format_bytes(total)
        ),
        (step, _, _) => step.to_string(),
    }
}

impl ProgressReporter for BatchProgress {
    fn report_progress(&self, event: &ProgressEvent) {
        if let Some(bar) = self.bars.get(&event.job_id) {
            let position = match event.progress.step {
                MoveStep::Cleaning => f64::from(event.progress.percent),
                step => weighted_percent(step, event.progress.percent, self.steps),
            };
            bar.set_position(position.round() as u64);
            bar.set_message(step_label(event));
        }
        self.overall.set_position(event.overall_percent.round() as u64);
    }

    fn report_completion(&self, result: &MigrationResult) {
        if let Some(bar) = self.bars.get(&result.job.id) {
            let message = match (result.success, result.job.state) {
                (true, MoveStep::Idle) => "rolled back",
                (true, _) => "done",
                (false, _) if result.is_cancelled() => "cancelled",
                (false, _) => "failed",
            };
            bar.finish_with_message(message);
        }
    }
}
