//! Restorers make a single catalog entry durable in the destination.
//!
//! [`RestoreBase`] is the controller shared by all of them: it owns the session changes made
//! on the entry's transaction and ends that transaction.

mod base;
mod definition;
mod table_data;

pub use base::{RestoreBase, SessionState, SessionStep, SessionWork};
pub use definition::DefinitionRestorer;
pub use table_data::{TableDataRestorer, TableDataStats};
