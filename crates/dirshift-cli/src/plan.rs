//! Migration plan files
//!
//! A plan is the JSON document printed by `dirshift folders --json`. It can be edited
//! and handed back to `dirshift migrate --plan`.

use crate::scan::ScannedFolder;
use anyhow::{Context, Result};
use dirshift_types::{FolderCandidate, Job, JobId, RiskAssessment, RiskLevel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Advisory assessment attached to one planned job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advisory {
    /// Job the assessment belongs to
    pub id: JobId,
    /// Assessment details
    pub assessment: RiskAssessment,
}

/// A batch of folders to migrate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    /// Volume directory receiving the folders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_root: Option<PathBuf>,
    /// Folders to migrate, in execution order
    pub jobs: Vec<FolderCandidate>,
    /// Informational assessments, never used to skip a job
    #[serde(default)]
    pub advisory: Vec<Advisory>,
}

impl Plan {
    /// Build a plan from scanned folders
    pub fn from_scan(folders: Vec<ScannedFolder>, target_root: Option<PathBuf>) -> Self {
        let mut plan = Self {
            target_root,
            ..Self::default()
        };
        for folder in folders {
            plan.advisory.push(Advisory {
                id: folder.candidate.id.clone(),
                assessment: folder.assessment,
            });
            plan.jobs.push(folder.candidate);
        }
        plan
    }

    /// Read a plan from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan '{}'", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plan '{}'", path.display()))
    }

    /// Assessments that deserve a warning before starting
    pub fn warnings(&self) -> impl Iterator<Item = (&FolderCandidate, &RiskAssessment)> {
        self.advisory
            .iter()
            .filter(|advisory| advisory.assessment.risk_level >= RiskLevel::Medium)
            .filter_map(|advisory| {
                self.jobs
                    .iter()
                    .find(|job| job.id == advisory.id)
                    .map(|job| (job, &advisory.assessment))
            })
    }

    /// Idle jobs in plan order
    pub fn into_jobs(self) -> Vec<Job> {
        self.jobs.into_iter().map(FolderCandidate::into_job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, name: &str) -> FolderCandidate {
        FolderCandidate {
            id: JobId::from(id),
            name: name.to_string(),
            source_path: PathBuf::from(format!("/apps/{}", name)),
            size_bytes: 10,
        }
    }

    #[test]
    fn test_plan_without_advisory_parses() {
        let json = r#"{"jobs":[{"id":"a","name":"Steam","source_path":"/apps/Steam","size_bytes":5}]}"#;
        let plan: Plan = serde_json::from_str(json).unwrap();
        assert!(plan.target_root.is_none());
        assert!(plan.advisory.is_empty());

        let jobs = plan.into_jobs();
        assert_eq!(jobs[0].id.as_str(), "a");
        assert_eq!(jobs[0].size_bytes, 5);
    }

    #[test]
    fn test_only_risky_entries_warn() {
        let plan = Plan {
            target_root: None,
            jobs: vec![candidate("a", "Games"), candidate("b", "Microsoft")],
            advisory: vec![
                Advisory {
                    id: JobId::from("a"),
                    assessment: RiskAssessment::heuristic(Path::new("/apps/Games"), "Games"),
                },
                Advisory {
                    id: JobId::from("b"),
                    assessment: RiskAssessment::heuristic(Path::new("/apps/Microsoft"), "Microsoft"),
                },
            ],
        };

        let warned: Vec<_> = plan.warnings().map(|(job, _)| job.name.as_str()).collect();
        assert_eq!(warned, ["Microsoft"]);
    }

    #[test]
    fn test_load_reports_bad_json() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("plan.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Plan::load(&path).is_err());
    }
}
