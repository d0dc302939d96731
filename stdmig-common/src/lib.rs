//! Shared types and utilities for the coding standard migrator.
//!
//! Registry payload models, the error catalog, the retry policy shared by
//! every registry call, configuration loading and logging bootstrap.

pub mod config;
pub mod errors;
pub mod logging;
pub mod retry;
pub mod types;
pub mod util;

pub use errors::{ErrorCategory, ErrorCode, ErrorEntry};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use retry::{RetryPolicy, RetryableError, run_with_retry};
pub use types::{
    CatalogTool, OrgRef, Pattern, PatternParameter, PatternRecord, PatternUpdate, PolicyContainer,
    Repository, SettingsKind, ToolConfig, ToolPatch,
};
