//! Result type alias for dirshift operations

use crate::Error;

/// Result type alias for dirshift operations
pub type Result<T> = std::result::Result<T, Error>;
