//! Core data model and error handling for dirshift
//!
//! This crate provides the foundational types shared by every dirshift crate:
//!
//! - **Error handling**: the migration error taxonomy with kinds and severity levels
//! - **Core types**: jobs, the step state machine, progress events and results
//! - **Interfaces**: records exchanged with drive, folder and advisory collaborators
//! - **Configuration**: validated value types such as [`ChunkSize`]
//!
//! # Features
//!
//! - `std` (default): Enable standard library features
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use dirshift_types::{Job, JobId, MoveStep, Result};
//!
//! fn example_job() -> Result<Job> {
//!     let mut job = Job::new(JobId::from("steam"), "Steam", "/data/Steam", 1024);
//!     job.advance(MoveStep::Mkdir)?;
//!     Ok(job)
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod interfaces;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{ChunkSize, VerifyMode};
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use interfaces::{DiskInfo, FolderCandidate, RiskAssessment, RiskLevel};
pub use result::Result;
pub use traits::*;
pub use types::*;
