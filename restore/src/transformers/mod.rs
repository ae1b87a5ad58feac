//! Row transformers and the parameters they are built from.

mod base;
mod driver;
mod parameters;
mod pipeline;
mod random_int;
mod registry;

pub use base::{Transformer, TransformerConstructor, TransformerDefinition};
pub use driver::{DriverColumn, TableDriver};
#[cfg(test)]
pub(crate) use driver::orders_schema;
pub use parameters::{ColumnProperties, Parameter, ParameterDefinition, Parameters, bind_parameters};
pub use pipeline::TransformationPipeline;
pub use random_int::{RANDOM_INT_TRANSFORMER_NAME, RandomIntTransformer, random_int_definition};
pub use registry::TransformerRegistry;
