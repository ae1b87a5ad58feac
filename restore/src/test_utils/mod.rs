//! Helpers shared by the integration tests.

pub mod database;
pub mod fixtures;
