//! Postgres types shared by the restore crates.

pub mod schema;
#[cfg(feature = "tokio")]
pub mod tokio;
