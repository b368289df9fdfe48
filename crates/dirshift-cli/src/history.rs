//! Result journal and cancel requests kept in the state directory

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use dirshift_types::{JobId, MigrationResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Operation a history record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// A migration run
    Migrate,
    /// A rollback
    Rollback,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Migrate => write!(f, "migrate"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// One recorded job outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// When the outcome was recorded
    pub recorded_at: DateTime<Utc>,
    /// What produced the outcome
    pub operation: Operation,
    /// Terminal result, including the job's final state and log
    pub result: MigrationResult,
}

impl HistoryRecord {
    /// Record a result now
    pub fn now(operation: Operation, result: MigrationResult) -> Self {
        Self {
            recorded_at: Utc::now(),
            operation,
            result,
        }
    }
}

/// Files under the state directory
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Use `root` as state directory
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Path of the history journal
    pub fn history_path(&self) -> PathBuf {
        self.root.join("history.json")
    }

    fn cancel_dir(&self) -> PathBuf {
        self.root.join("cancel")
    }

    /// All recorded outcomes, oldest first
    pub fn load_history(&self) -> Result<Vec<HistoryRecord>> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read history '{}'", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("History journal '{}' is corrupt", path.display()))
    }

    /// Append outcomes to the journal
    pub fn append_history(&self, records: Vec<HistoryRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut history = self.load_history()?;
        history.extend(records);

        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create '{}'", self.root.display()))?;
        let path = self.history_path();
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec_pretty(&history)?)
            .with_context(|| format!("Failed to write '{}'", staging.display()))?;
        fs::rename(&staging, &path)
            .with_context(|| format!("Failed to replace '{}'", path.display()))?;
        Ok(())
    }

    /// Latest record of the job matching `query` (full id or unique prefix)
    pub fn latest_for(&self, query: &str) -> Result<Option<HistoryRecord>> {
        let history = self.load_history()?;

        let mut ids: Vec<&JobId> = history
            .iter()
            .map(|record| &record.result.job.id)
            .filter(|id| id.as_str().starts_with(query))
            .collect();
        ids.sort();
        ids.dedup();

        let id = match ids.as_slice() {
            [] => return Ok(None),
            [id] => (*id).clone(),
            candidates => match candidates.iter().find(|id| id.as_str() == query) {
                Some(id) => (*id).clone(),
                None => bail!("'{}' matches {} jobs, use a longer id", query, candidates.len()),
            },
        };

        Ok(history
            .into_iter()
            .rev()
            .find(|record| record.result.job.id == id))
    }

    /// Ask a running `dirshift migrate` to cancel `query` (full id or prefix)
    pub fn request_cancel(&self, query: &str) -> Result<PathBuf> {
        if query.is_empty() || Path::new(query).components().count() != 1 || query.contains(['/', '\\']) {
            bail!("'{}' is not a job id", query);
        }
        let dir = self.cancel_dir();
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create '{}'", dir.display()))?;
        let path = dir.join(query);
        fs::write(&path, Utc::now().to_rfc3339())
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
        Ok(path)
    }

    /// Pending cancel requests
    pub fn cancel_requests(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.cancel_dir()) else {
            return Vec::new();
        };
        entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect()
    }

    /// Drop a cancel request once it has been honoured
    pub fn clear_cancel_request(&self, query: &str) {
        let _ = fs::remove_file(self.cancel_dir().join(query));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirshift_types::{CopyStats, Job, MoveStep};
    use tempfile::TempDir;

    fn result(id: &str, state: MoveStep) -> MigrationResult {
        let mut job = Job::new(JobId::from(id), "Steam", "/apps/Steam", 1);
        job.state = state;
        MigrationResult::success(job, vec!["done".into()], CopyStats::new())
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let temp = TempDir::new().unwrap();
        let state = StateDir::new(temp.path().join("state"));
        assert!(state.load_history().unwrap().is_empty());
    }

    #[test]
    fn test_latest_record_wins() {
        let temp = TempDir::new().unwrap();
        let state = StateDir::new(temp.path());
        state
            .append_history(vec![HistoryRecord::now(
                Operation::Migrate,
                result("abc123", MoveStep::Completed),
            )])
            .unwrap();
        state
            .append_history(vec![HistoryRecord::now(
                Operation::Rollback,
                result("abc123", MoveStep::Idle),
            )])
            .unwrap();

        let record = state.latest_for("abc").unwrap().unwrap();
        assert_eq!(record.operation, Operation::Rollback);
        assert_eq!(record.result.job.state, MoveStep::Idle);
        assert_eq!(state.load_history().unwrap().len(), 2);
    }

    #[test]
    fn test_ambiguous_prefix_is_rejected() {
        let temp = TempDir::new().unwrap();
        let state = StateDir::new(temp.path());
        state
            .append_history(vec![
                HistoryRecord::now(Operation::Migrate, result("ab-1", MoveStep::Completed)),
                HistoryRecord::now(Operation::Migrate, result("ab-2", MoveStep::Completed)),
            ])
            .unwrap();

        assert!(state.latest_for("ab").is_err());
        assert!(state.latest_for("ab-2").unwrap().is_some());
        assert!(state.latest_for("zz").unwrap().is_none());
    }

    #[test]
    fn test_cancel_requests_round_trip() {
        let temp = TempDir::new().unwrap();
        let state = StateDir::new(temp.path());
        assert!(state.cancel_requests().is_empty());

        state.request_cancel("abc123").unwrap();
        assert_eq!(state.cancel_requests(), ["abc123"]);

        state.clear_cancel_request("abc123");
        assert!(state.cancel_requests().is_empty());
        assert!(state.request_cancel("../escape").is_err());
    }
}
