//! # modhost-core
//!
//! Core crate for Modhost. Contains configuration schemas and the unified
//! error system shared by the plugin lifecycle crate and the server binary.
//!
//! This crate has **no** internal dependencies on other Modhost crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
