use std::collections::BTreeMap;

use config::shared::TransformerConfig;
use tracing::warn;

use crate::error::RestoreResult;
use crate::transformers::{TableDriver, Transformer, TransformerRegistry};
use crate::types::Record;

/// The transformers of one table, applied to every record in configuration order.
///
/// Several transformers may affect the same column; the one listed last determines the value
/// that is written.
#[derive(Debug, Default)]
pub struct TransformationPipeline {
    transformers: Vec<Box<dyn Transformer>>,
}

impl TransformationPipeline {
    /// Builds every configured transformer for the table described by `driver`.
    pub fn build(
        registry: &TransformerRegistry,
        configs: &[TransformerConfig],
        driver: &TableDriver,
    ) -> RestoreResult<Self> {
        let mut transformers = Vec::with_capacity(configs.len());
        let mut owners: BTreeMap<usize, &'static str> = BTreeMap::new();

        for config in configs {
            let transformer = registry.build(config, driver)?;

            for (index, column) in transformer.affected_columns() {
                if let Some(previous) = owners.insert(*index, transformer.name()) {
                    warn!(
                        table = %driver.table_name(),
                        column,
                        previous,
                        current = transformer.name(),
                        "column is affected by several transformers, the last one wins"
                    );
                }
            }

            transformers.push(transformer);
        }

        Ok(Self { transformers })
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    /// Union of the columns affected by the transformers.
    pub fn affected_columns(&self) -> BTreeMap<usize, String> {
        self.transformers
            .iter()
            .flat_map(|transformer| transformer.affected_columns().clone())
            .collect()
    }

    /// Runs every transformer on `record`, stopping at the first failure.
    pub fn transform(&mut self, record: &mut Record) -> RestoreResult<()> {
        for transformer in &mut self.transformers {
            transformer.transform(record)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::RANDOM_INT_TRANSFORMER_NAME;
    use crate::transformers::driver::orders_schema;

    fn random_int(column: &str, min: i64, max: i64) -> TransformerConfig {
        TransformerConfig::new(RANDOM_INT_TRANSFORMER_NAME)
            .with_param("column", column)
            .with_param("min", min)
            .with_param("max", max)
    }

    fn pipeline(configs: &[TransformerConfig]) -> TransformationPipeline {
        let registry = TransformerRegistry::with_builtin().unwrap();
        let driver = TableDriver::new(&orders_schema(), None).unwrap();
        TransformationPipeline::build(&registry, configs, &driver).unwrap()
    }

    #[test]
    fn last_transformer_wins_on_overlapping_columns() {
        let mut pipeline = pipeline(&[
            random_int("user_id", 1, 10),
            random_int("user_id", 500, 600),
        ]);
        assert_eq!(pipeline.len(), 2);
        assert_eq!(
            pipeline.affected_columns(),
            BTreeMap::from([(1, "user_id".to_string())])
        );

        for _ in 0..100 {
            let mut record = Record::from_text([Some("1"), Some("2"), None, None, None]);
            pipeline.transform(&mut record).unwrap();

            let value: i64 = record.text(1).unwrap().unwrap().parse().unwrap();
            assert!((500..=600).contains(&value));
        }
    }

    #[test]
    fn transformers_apply_to_their_own_columns() {
        let mut pipeline = pipeline(&[random_int("id", 1, 3), random_int("priority", 7, 9)]);
        let mut record = Record::from_text([Some("100"), Some("2"), None, Some("0"), Some("x")]);

        pipeline.transform(&mut record).unwrap();

        let id: i64 = record.text(0).unwrap().unwrap().parse().unwrap();
        let priority: i64 = record.text(3).unwrap().unwrap().parse().unwrap();
        assert!((1..=3).contains(&id));
        assert!((7..=9).contains(&priority));
        assert_eq!(record.text(1).unwrap(), Some("2"));
        assert_eq!(record.text(4).unwrap(), Some("x"));
    }

    #[test]
    fn empty_pipeline_leaves_records_untouched() {
        let mut pipeline = pipeline(&[]);
        let mut record = Record::from_text([Some("1"), None]);
        let original = record.clone();

        pipeline.transform(&mut record).unwrap();
        assert!(pipeline.is_empty());
        assert_eq!(record, original);
    }
}
