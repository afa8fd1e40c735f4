//! Convenience result type alias for Modhost.

use crate::error::AppError;

/// A specialized `Result` type for Modhost operations.
pub type AppResult<T> = Result<T, AppError>;
