use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Object store holding the dump's catalog manifest and data files.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StorageConfig {
    /// A dump directory on the local filesystem.
    Local { path: String },
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            StorageConfig::Local { path } if path.trim().is_empty() => {
                Err(ValidationError::EmptyStoragePath)
            }
            StorageConfig::Local { .. } => Ok(()),
        }
    }
}
