use std::collections::HashMap;
use std::sync::Arc;

use config::shared::TransformerConfig;

use crate::bail;
use crate::error::{ErrorKind, RestoreResult};
use crate::transformers::{TableDriver, Transformer, TransformerDefinition, random_int_definition};

/// Transformer definitions available to a run, keyed by name.
///
/// The registry is filled at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TransformerRegistry {
    definitions: HashMap<&'static str, Arc<TransformerDefinition>>,
}

impl TransformerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in transformers.
    pub fn with_builtin() -> RestoreResult<Self> {
        let mut registry = Self::new();
        registry.register(random_int_definition())?;

        Ok(registry)
    }

    /// Adds a definition. Names must be unique.
    pub fn register(&mut self, definition: TransformerDefinition) -> RestoreResult<()> {
        if self.definitions.contains_key(definition.name) {
            bail!(
                ErrorKind::DuplicateTransformer,
                "Transformer already registered",
                format!("a transformer named {} is already registered", definition.name)
            );
        }

        self.definitions
            .insert(definition.name, Arc::new(definition));

        Ok(())
    }

    pub fn get(&self, name: &str) -> RestoreResult<&TransformerDefinition> {
        match self.definitions.get(name) {
            Some(definition) => Ok(definition.as_ref()),
            None => bail!(
                ErrorKind::TransformerNotFound,
                "Transformer not found",
                format!("no transformer named {name} is registered")
            ),
        }
    }

    /// Builds an instance of the transformer named by `config` for one table.
    pub fn build(
        &self,
        config: &TransformerConfig,
        driver: &TableDriver,
    ) -> RestoreResult<Box<dyn Transformer>> {
        self.get(&config.name)?.instantiate(driver, config)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.definitions.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::RANDOM_INT_TRANSFORMER_NAME;
    use crate::transformers::driver::orders_schema;

    #[test]
    fn builtin_transformers_are_registered() {
        let registry = TransformerRegistry::with_builtin().unwrap();
        assert_eq!(registry.names(), vec![RANDOM_INT_TRANSFORMER_NAME]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = TransformerRegistry::with_builtin().unwrap();
        let err = registry.register(random_int_definition()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DuplicateTransformer);
    }

    #[test]
    fn unknown_transformer_is_not_found() {
        let registry = TransformerRegistry::with_builtin().unwrap();
        let driver = TableDriver::new(&orders_schema(), None).unwrap();

        let err = registry
            .build(&TransformerConfig::new("RandomUuid"), &driver)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransformerNotFound);
    }
}
