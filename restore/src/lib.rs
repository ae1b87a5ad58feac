//! Restores a logical dump into Postgres while masking data on the way in.
//!
//! A run walks the dump's catalog in dependency order. Every entry is restored in its own
//! destination transaction; table data entries additionally stream their rows through the
//! configured transformers and into `COPY`, inside a session whose role, trigger and
//! replication-role changes are always undone before the transaction ends.

pub mod catalog;
pub mod concurrency;
pub mod conversions;
pub mod destination;
pub mod error;
mod macros;
pub mod pipeline;
pub mod restorers;
pub mod storage;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod transformers;
pub mod types;
pub mod workers;
