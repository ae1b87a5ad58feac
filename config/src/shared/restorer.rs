use std::collections::HashSet;

use serde::Deserialize;

use crate::Config;
use crate::shared::{
    PgConnectionConfig, RestoreConfig, StorageConfig, TableTransformationConfig, ValidationError,
};

/// Complete configuration of the restorer service.
///
/// Not [`serde::Serialize`] since the destination password is part of it.
#[derive(Debug, Clone, Deserialize)]
pub struct RestorerConfig {
    pub destination: PgConnectionConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    /// Masking rules, one entry per table.
    #[serde(default)]
    pub transformation: Vec<TableTransformationConfig>,
}

impl RestorerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.destination.validate()?;
        self.storage.validate()?;
        self.restore.validate()?;

        let mut seen = HashSet::new();
        for table in &self.transformation {
            table.validate()?;
            if !seen.insert((table.schema.as_str(), table.name.as_str())) {
                return Err(ValidationError::DuplicateTableTransformation(
                    table.qualified_name(),
                ));
            }
        }

        Ok(())
    }
}

impl Config for RestorerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
