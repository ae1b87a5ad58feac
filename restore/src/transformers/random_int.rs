use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bail;
use crate::error::{ErrorKind, RestoreResult};
use crate::restore_error;
use crate::transformers::{
    ColumnProperties, Parameter, ParameterDefinition, Parameters, TableDriver, Transformer,
    TransformerDefinition,
};
use crate::types::{RawValue, Record};

pub const RANDOM_INT_TRANSFORMER_NAME: &str = "RandomInt";

const INTEGER_TYPES: &[&str] = &["int2", "int4", "int8", "numeric"];

/// Declares the `RandomInt` transformer.
pub fn random_int_definition() -> TransformerDefinition {
    TransformerDefinition::new(
        RANDOM_INT_TRANSFORMER_NAME,
        "Generate a random integer in the closed range [min, max]",
        vec![
            ParameterDefinition::new("column", "column name")
                .required(true)
                .column(
                    ColumnProperties::new()
                        .affected(true)
                        .allowed_types(INTEGER_TYPES),
                ),
            ParameterDefinition::new("min", "min int value threshold")
                .required(true)
                .link_parameter("column")
                .dynamic_mode_support(true),
            ParameterDefinition::new("max", "max int value threshold")
                .required(true)
                .link_parameter("column")
                .dynamic_mode_support(true),
            ParameterDefinition::new(
                "keep_null",
                "do not replace NULL values with random values",
            )
            .default_value(true),
            ParameterDefinition::new(
                "seed",
                "seed of the random generator, values are reproducible when set",
            ),
        ],
        RandomIntTransformer::construct,
    )
}

/// A bound that is either fixed or read from the record being transformed.
#[derive(Debug)]
enum Bound {
    Static(i64),
    Dynamic(Parameter),
}

impl Bound {
    fn resolve(&self, record: &Record) -> RestoreResult<i64> {
        match self {
            Bound::Static(value) => Ok(*value),
            Bound::Dynamic(parameter) => match parameter.scan_i64(Some(record))? {
                Some(value) => Ok(value),
                None => bail!(
                    ErrorKind::TransformFailed,
                    "Missing bound value",
                    format!("parameter `{}` has no value", parameter.name())
                ),
            },
        }
    }
}

/// Replaces a column with an integer drawn uniformly from `[min, max]`.
#[derive(Debug)]
pub struct RandomIntTransformer {
    column_index: usize,
    affected_columns: BTreeMap<usize, String>,
    min: Bound,
    max: Bound,
    keep_null: bool,
    rng: StdRng,
}

impl RandomIntTransformer {
    fn construct(
        _driver: &TableDriver,
        mut parameters: Parameters,
    ) -> RestoreResult<Box<dyn Transformer>> {
        let column = parameters.take("column")?;
        let Some(column) = column.column().cloned() else {
            bail!(
                ErrorKind::InvalidState,
                "Column parameter was not resolved",
                "parameter `column` of transformer RandomInt"
            );
        };

        let min = Self::bound(parameters.take("min")?)?;
        let max = Self::bound(parameters.take("max")?)?;
        if let (Bound::Static(min), Bound::Static(max)) = (&min, &max) {
            check_bounds(*min, *max, ErrorKind::InvalidParameter)?;
        }

        let keep_null = parameters.take("keep_null")?.scan_bool()?.unwrap_or(true);
        let rng = match parameters.take("seed")?.scan_i64(None)? {
            Some(seed) => StdRng::seed_from_u64(seed as u64),
            None => StdRng::from_entropy(),
        };

        Ok(Box::new(Self {
            column_index: column.index,
            affected_columns: BTreeMap::from([(column.index, column.name)]),
            min,
            max,
            keep_null,
            rng,
        }))
    }

    fn bound(parameter: Parameter) -> RestoreResult<Bound> {
        if parameter.is_dynamic() {
            return Ok(Bound::Dynamic(parameter));
        }

        match parameter.scan_i64(None)? {
            Some(value) => Ok(Bound::Static(value)),
            None => bail!(
                ErrorKind::InvalidParameter,
                "Missing required parameter",
                format!("parameter `{}` of transformer RandomInt is required", parameter.name())
            ),
        }
    }
}

fn check_bounds(min: i64, max: i64, kind: ErrorKind) -> RestoreResult<()> {
    if min >= max {
        return Err(restore_error!(
            kind,
            "Invalid random range",
            format!("max value must be greater than min: got min = {min} max = {max}")
        ));
    }

    Ok(())
}

impl Transformer for RandomIntTransformer {
    fn name(&self) -> &'static str {
        RANDOM_INT_TRANSFORMER_NAME
    }

    fn affected_columns(&self) -> &BTreeMap<usize, String> {
        &self.affected_columns
    }

    fn transform(&mut self, record: &mut Record) -> RestoreResult<()> {
        let min = self.min.resolve(record)?;
        let max = self.max.resolve(record)?;
        check_bounds(min, max, ErrorKind::TransformFailed)?;

        if self.keep_null && record.get(self.column_index)?.is_null() {
            return Ok(());
        }

        let value = self.rng.gen_range(min..=max);
        record.set(self.column_index, RawValue::new(value.to_string()))
    }
}
