//! Coordination primitives shared by the restore pipeline and its workers.

pub mod shutdown;
