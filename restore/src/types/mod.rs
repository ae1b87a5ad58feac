mod record;

pub use record::{RawValue, Record};
pub use tokio_postgres::types::Type;
