//! Records exchanged with external collaborators
//!
//! Drive enumeration, folder discovery and the safety advisor live outside the
//! engine. The engine consumes these records but never computes them itself, and
//! it never gates execution on a [`RiskAssessment`].

use crate::{Job, JobId};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A mounted volume
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiskInfo {
    /// Stable identifier
    pub id: String,
    /// Human readable name
    pub display_name: String,
    /// Mount point
    pub path: PathBuf,
    /// Total capacity in bytes
    pub total_space: u64,
    /// Bytes available to the current user
    pub free_space: u64,
    /// Bytes in use
    pub used_space: u64,
}

impl DiskInfo {
    /// Percentage of the volume in use
    pub fn usage_percent(&self) -> f64 {
        if self.total_space == 0 {
            0.0
        } else {
            self.used_space as f64 / self.total_space as f64 * 100.0
        }
    }

    /// Check whether `path` lives on this volume
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.path)
    }
}

/// A directory proposed for migration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FolderCandidate {
    /// Job identifier to use
    pub id: JobId,
    /// Display name, also the target directory name
    pub name: String,
    /// Directory to migrate
    pub source_path: PathBuf,
    /// Best-effort size in bytes
    pub size_bytes: u64,
}

impl FolderCandidate {
    /// Turn the candidate into an idle job
    pub fn into_job(self) -> Job {
        Job::new(self.id, self.name, self.source_path, self.size_bytes)
    }
}

/// Advisory risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RiskLevel {
    /// Safe to move
    Low,
    /// Application may need reconfiguration
    Medium,
    /// Likely to break the system or the application
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Advisory assessment of a folder, informational only
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RiskAssessment {
    /// Risk classification
    pub risk_level: RiskLevel,
    /// Confidence in the classification (0.0-1.0)
    pub confidence: f64,
    /// Suggested precautions
    pub recommendations: Vec<String>,
    /// Things that may go wrong
    pub warnings: Vec<String>,
    /// Advisor's overall verdict
    pub safe_to_move: bool,
}

const SYSTEM_FOLDERS: &[&str] = &[
    "windows",
    "system32",
    "syswow64",
    "program files",
    "appdata/local/microsoft",
    "appdata/roaming/microsoft",
];
const HIGH_RISK_KEYWORDS: &[&str] = &["system", "windows", "microsoft", "service", "driver"];
const MEDIUM_RISK_KEYWORDS: &[&str] = &["program", "appdata", "local", "roaming"];

impl RiskAssessment {
    /// Keyword based offline assessment of a folder
    pub fn heuristic(path: &Path, name: &str) -> Self {
        let path_lower = path.to_string_lossy().to_lowercase().replace('\\', "/");
        let name_lower = name.to_lowercase();
        let mentions = |keyword: &&str| name_lower.contains(keyword) || path_lower.contains(keyword);

        if SYSTEM_FOLDERS.iter().any(|folder| path_lower.contains(folder)) {
            return Self {
                risk_level: RiskLevel::High,
                confidence: 0.8,
                recommendations: vec![
                    "Do not migrate system folders".into(),
                    "Create a full backup first if the move is unavoidable".into(),
                ],
                warnings: vec![
                    "Folder may contain files the operating system depends on".into(),
                    "Folder may be referenced by hard-coded paths".into(),
                ],
                safe_to_move: false,
            };
        }

        if HIGH_RISK_KEYWORDS.iter().any(mentions) {
            return Self {
                risk_level: RiskLevel::High,
                confidence: 0.7,
                recommendations: vec!["Migration is not recommended".into()],
                warnings: vec!["Folder may contain system related files".into()],
                safe_to_move: false,
            };
        }

        if MEDIUM_RISK_KEYWORDS.iter().any(mentions) {
            return Self {
                risk_level: RiskLevel::Medium,
                confidence: 0.6,
                recommendations: vec![
                    "Keep a backup of the original folder".into(),
                    "Test the application after migration".into(),
                ],
                warnings: vec!["Application may need to be reconfigured".into()],
                safe_to_move: true,
            };
        }

        Self {
            risk_level: RiskLevel::Low,
            confidence: 0.5,
            recommendations: vec!["Test the application after migration".into()],
            warnings: Vec::new(),
            safe_to_move: true,
        }
    }
}
