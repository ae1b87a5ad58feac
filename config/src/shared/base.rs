use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("`max_workers` cannot be zero")]
    MaxWorkersZero,
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    #[error("`catalog_object` cannot be empty")]
    EmptyCatalogObject,
    #[error("storage path cannot be empty")]
    EmptyStoragePath,
    #[error("`superuser` cannot be an empty role name")]
    EmptySuperuser,
    #[error("transformer name cannot be empty for table {0}")]
    EmptyTransformerName(String),
    #[error("table {0} has more than one transformation entry")]
    DuplicateTableTransformation(String),
}
