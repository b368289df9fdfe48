//! JSON output structures for the dirshift CLI

use chrono::{DateTime, Utc};
use dirshift_types::{BatchSummary, MigrationResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Operation metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// dirshift version
    pub version: String,
    /// Operation type
    pub operation: String,
    /// When the operation started
    pub started_at: DateTime<Utc>,
    /// When the operation finished
    pub finished_at: DateTime<Utc>,
    /// Volume directory receiving the folders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_root: Option<PathBuf>,
}

impl OperationMetadata {
    /// Metadata for an operation that started at `started_at` and just finished
    pub fn finished(operation: &str, started_at: DateTime<Utc>, target_root: Option<PathBuf>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            operation: operation.to_string(),
            started_at,
            finished_at: Utc::now(),
            target_root,
        }
    }
}

/// Complete JSON output for migrate and rollback
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchOutputJson {
    /// Operation metadata
    pub metadata: OperationMetadata,
    /// Aggregate counts
    pub summary: BatchSummary,
    /// One result per job, in input order
    pub results: Vec<MigrationResult>,
}

impl BatchOutputJson {
    /// Bundle results with their summary
    pub fn new(metadata: OperationMetadata, results: Vec<MigrationResult>) -> Self {
        Self {
            metadata,
            summary: BatchSummary::from_results(&results),
            results,
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirshift_types::{CopyStats, Error, Job, JobId};

    #[test]
    fn test_batch_output_carries_error_kind() {
        let ok = MigrationResult::success(
            Job::new(JobId::from("a"), "Steam", "/apps/Steam", 1),
            Vec::new(),
            CopyStats::new(),
        );
        let failed = MigrationResult::failure(
            Job::new(JobId::from("b"), "Discord", "/apps/Discord", 1),
            &Error::Cancelled,
            vec!["Cancelled during Copy".into()],
            CopyStats::new(),
        );

        let output = BatchOutputJson::new(
            OperationMetadata::finished("migrate", Utc::now(), Some(PathBuf::from("/volume"))),
            vec![ok, failed],
        );
        assert_eq!(output.summary.succeeded, 1);
        assert_eq!(output.summary.cancelled, 1);

        let value: serde_json::Value = serde_json::from_str(&output.to_json().unwrap()).unwrap();
        assert_eq!(value["metadata"]["operation"], "migrate");
        assert_eq!(value["results"][1]["error_kind"], "Cancelled");
        assert_eq!(value["results"][0]["job"]["id"], "a");
    }
}
