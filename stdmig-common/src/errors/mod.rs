//! Error catalog and definitions for the coding standard migrator
//!
//! This module provides an error catalog with unique error codes,
//! categorized by subsystem. Each error includes remediation steps.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                          |
//! |------------|-------------|--------------------------------------|
//! | E001-E099  | Config      | Configuration and setup errors       |
//! | E100-E199  | Registry    | Registry HTTP API failures           |
//! | E200-E299  | Extraction  | Source snapshot extraction           |
//! | E300-E399  | Replication | Destination replication              |
//! | E400-E499  | Validation  | Convergence validation               |
//! | E500-E599  | Internal    | Internal/unexpected errors           |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};
