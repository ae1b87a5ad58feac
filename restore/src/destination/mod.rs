//! Where restored entries are written.

mod base;
pub mod memory;
pub mod postgres;

pub use base::{Destination, DestinationTransaction};
