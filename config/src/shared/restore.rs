use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

const fn default_max_workers() -> u16 {
    4
}

fn default_catalog_object() -> String {
    "toc.json".to_string()
}

/// What the run does with the remaining entries once one entry failed.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EntryErrorPolicy {
    /// Cancel in-flight entries and stop scheduling new ones.
    #[default]
    Abort,
    /// Skip the dependents of the failed entry and keep restoring everything else.
    Continue,
}

/// What a table load does with a row whose transformation failed.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TransformErrorPolicy {
    /// Fail the entry, rolling back its transaction.
    #[default]
    Fail,
    /// Drop the row, log it and keep loading. The untransformed row is never written.
    SkipRow,
}

/// Restore behaviour shared by every entry of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Disable user triggers on the target table while its data is loaded.
    #[serde(default)]
    pub disable_triggers: bool,
    /// Switch `session_replication_role` to `replica` while data is loaded.
    #[serde(default)]
    pub use_session_replication_role_replica: bool,
    /// Role impersonated with `SET ROLE` for the privileged session steps.
    #[serde(default)]
    pub superuser: Option<String>,
    /// Maximum number of entries restored concurrently.
    #[serde(default = "default_max_workers")]
    pub max_workers: u16,
    #[serde(default)]
    pub on_entry_error: EntryErrorPolicy,
    #[serde(default)]
    pub on_transform_error: TransformErrorPolicy,
    /// Object store key of the catalog manifest.
    #[serde(default = "default_catalog_object")]
    pub catalog_object: String,
}

impl RestoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_workers == 0 {
            return Err(ValidationError::MaxWorkersZero);
        }

        if self.catalog_object.trim().is_empty() {
            return Err(ValidationError::EmptyCatalogObject);
        }

        if self
            .superuser
            .as_deref()
            .is_some_and(|role| role.trim().is_empty())
        {
            return Err(ValidationError::EmptySuperuser);
        }

        Ok(())
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            disable_triggers: false,
            use_session_replication_role_replica: false,
            superuser: None,
            max_workers: default_max_workers(),
            on_entry_error: EntryErrorPolicy::default(),
            on_transform_error: TransformErrorPolicy::default(),
            catalog_object: default_catalog_object(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: RestoreConfig =
            serde_json::from_str(r#"{"superuser": "postgres", "on_entry_error": "continue"}"#)
                .unwrap();

        assert!(!config.disable_triggers);
        assert!(!config.use_session_replication_role_replica);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.on_entry_error, EntryErrorPolicy::Continue);
        assert_eq!(config.on_transform_error, TransformErrorPolicy::Fail);
        assert_eq!(config.catalog_object, "toc.json");
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = RestoreConfig {
            max_workers: 0,
            ..RestoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MaxWorkersZero)
        ));
    }

    #[test]
    fn blank_superuser_is_rejected() {
        let config = RestoreConfig {
            superuser: Some("  ".to_string()),
            ..RestoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::EmptySuperuser)
        ));
    }
}
