//! Tracing setup for the restore binaries and tests.

pub mod tracing;
