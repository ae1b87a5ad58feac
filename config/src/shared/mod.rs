//! Configuration types shared by the restore library and the restorer binary.

mod base;
mod connection;
mod restore;
mod restorer;
mod storage;
mod transformation;

pub use base::ValidationError;
pub use connection::{
    IntoConnectOptions, PgConnectionConfig, PgConnectionOptions, RESTORE_CONNECTION_OPTIONS,
    TlsConfig,
};
pub use restore::{EntryErrorPolicy, RestoreConfig, TransformErrorPolicy};
pub use restorer::RestorerConfig;
pub use storage::StorageConfig;
pub use transformation::{
    DynamicParamConfig, ParamValue, ParamValueError, TableTransformationConfig, TransformerConfig,
};
