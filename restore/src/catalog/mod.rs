//! The dump's table of contents as consumed by the restore run.

mod entry;
mod graph;
mod manifest;

pub use entry::{CatalogEntry, DumpId, Section};
#[cfg(test)]
pub(crate) use entry::data_entry;
pub use graph::DependencyGraph;
pub use manifest::Catalog;
