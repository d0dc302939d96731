#![allow(dead_code)]

pub mod fixtures;
pub mod logging;

pub use fixtures::{Registries, client, numbered_patterns, pattern_ids};
pub use logging::init_test_logging;
