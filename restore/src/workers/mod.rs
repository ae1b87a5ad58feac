//! Workers restoring catalog entries concurrently.

pub mod entry;
pub mod policy;
pub mod pool;
