//! Shared storage integration tests.
//!
//! Tests the RevisionLog contract against every SQL dialect. Each dialect's
//! test binary builds a migrated log and runs these functions against it.

pub mod revision_log_tests;
