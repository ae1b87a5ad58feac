//! Access to the objects of a dump and decoding of their payloads.

mod base;
mod local;
mod memory;
mod payload;
mod rows;

pub use base::{ObjectReader, ObjectStore};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use payload::Payload;
pub use rows::{DEFAULT_ROW_CHANNEL_CAPACITY, RowReader};
