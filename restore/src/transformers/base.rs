use std::collections::BTreeMap;
use std::fmt;

use config::shared::TransformerConfig;

use crate::error::RestoreResult;
use crate::transformers::parameters::{ParameterDefinition, Parameters, validate_definitions};
use crate::transformers::{TableDriver, bind_parameters};
use crate::types::Record;

/// A transformer instance bound to one table.
///
/// Instances are built once per restored entry and rewrite its records one at a time, in
/// payload order.
pub trait Transformer: Send + fmt::Debug {
    /// Returns the registered name of the transformer.
    fn name(&self) -> &'static str;

    /// Columns this instance may rewrite, keyed by record index. Fixed at construction.
    fn affected_columns(&self) -> &BTreeMap<usize, String>;

    /// Rewrites `record` in place.
    fn transform(&mut self, record: &mut Record) -> RestoreResult<()>;
}

/// Builds an instance from the table driver and the bound parameters.
pub type TransformerConstructor =
    fn(&TableDriver, Parameters) -> RestoreResult<Box<dyn Transformer>>;

/// Static description of a transformer, registered once at startup.
#[derive(Clone)]
pub struct TransformerDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ParameterDefinition>,
    constructor: TransformerConstructor,
}

impl TransformerDefinition {
    /// Creates a definition.
    ///
    /// # Panics
    /// Panics if the parameter declarations are inconsistent.
    pub fn new(
        name: &'static str,
        description: &'static str,
        parameters: Vec<ParameterDefinition>,
        constructor: TransformerConstructor,
    ) -> Self {
        validate_definitions(name, &parameters);

        Self {
            name,
            description,
            parameters,
            constructor,
        }
    }

    /// Binds `config` to the table described by `driver` and builds an instance.
    pub fn instantiate(
        &self,
        driver: &TableDriver,
        config: &TransformerConfig,
    ) -> RestoreResult<Box<dyn Transformer>> {
        let parameters = bind_parameters(self, config, driver)?;
        (self.constructor)(driver, parameters)
    }
}

impl fmt::Debug for TransformerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerDefinition")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}
