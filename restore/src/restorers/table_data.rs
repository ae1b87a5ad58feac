use std::sync::Arc;

use config::shared::{TransformErrorPolicy, TransformerConfig};
use tracing::{info, warn};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownRx, wait_for_shutdown};
use crate::destination::DestinationTransaction;
use crate::error::{ErrorKind, RestoreResult};
use crate::restorers::base::{RestoreBase, SessionWork};
use crate::storage::{DEFAULT_ROW_CHANNEL_CAPACITY, ObjectStore, RowReader};
use crate::transformers::{TableDriver, TransformationPipeline, TransformerRegistry};

/// Rows written and dropped while loading one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableDataStats {
    pub rows_loaded: u64,
    pub rows_skipped: u64,
}

/// Restores the data of one table: rows are read from the entry's payload, passed through the
/// table's transformers and copied into the destination table.
#[derive(Debug)]
pub struct TableDataRestorer<S> {
    base: RestoreBase<S>,
    registry: Arc<TransformerRegistry>,
    transformers: Vec<TransformerConfig>,
    shutdown_rx: ShutdownRx,
}

impl<S> TableDataRestorer<S>
where
    S: ObjectStore,
{
    pub fn new(
        base: RestoreBase<S>,
        registry: Arc<TransformerRegistry>,
        transformers: Vec<TransformerConfig>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            base,
            registry,
            transformers,
            shutdown_rx,
        }
    }

    pub fn base(&self) -> &RestoreBase<S> {
        &self.base
    }

    /// Loads the table within `tx` and ends the transaction.
    pub async fn restore<T>(&mut self, mut tx: T) -> RestoreResult<TableDataStats>
    where
        T: DestinationTransaction,
    {
        let mut load = TableLoad {
            registry: &self.registry,
            transformers: &self.transformers,
            shutdown_rx: self.shutdown_rx.clone(),
        };

        let result = self.base.in_session(&mut tx, &mut load).await;
        self.base.finish(tx, result).await
    }
}

struct TableLoad<'a> {
    registry: &'a TransformerRegistry,
    transformers: &'a [TransformerConfig],
    shutdown_rx: ShutdownRx,
}

impl<S, T> SessionWork<S, T> for TableLoad<'_>
where
    S: ObjectStore,
    T: DestinationTransaction,
{
    type Output = TableDataStats;

    async fn run(&mut self, base: &RestoreBase<S>, tx: &mut T) -> RestoreResult<TableDataStats> {
        let entry = base.entry();
        let Some(table_name) = entry.table_name() else {
            bail!(
                ErrorKind::InvalidData,
                "Entry names no relation",
                format!("{} has no namespace or tag", base.debug_label())
            );
        };

        let schema = tx.table_schema(&table_name).await?;
        let driver = TableDriver::new(&schema, entry.columns.as_deref())?;
        let mut pipeline = TransformationPipeline::build(self.registry, self.transformers, &driver)?;

        let payload = base.fetch_payload().await?;
        let mut rows = RowReader::spawn(payload, driver.column_count(), DEFAULT_ROW_CHANNEL_CAPACITY);

        tx.copy_in(&table_name, &driver.column_names()).await?;
        info!(
            entry = %base.debug_label(),
            columns = driver.column_count(),
            transformers = pipeline.len(),
            "loading table data"
        );

        let skip_failed_rows = base.config().on_transform_error == TransformErrorPolicy::SkipRow;
        let mut stats = TableDataStats::default();
        let mut row_number = 0u64;

        loop {
            let row = tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    bail!(
                        ErrorKind::RestoreCanceled,
                        "Restore canceled",
                        format!("{} canceled after {row_number} rows", base.debug_label())
                    );
                }
                row = rows.next() => row,
            };

            let Some(row) = row else {
                break;
            };
            let mut record = row?;
            row_number += 1;

            if let Err(err) = pipeline.transform(&mut record) {
                if !skip_failed_rows {
                    return Err(err);
                }

                warn!(
                    entry = %base.debug_label(),
                    row = row_number,
                    error = %err,
                    "skipping row that failed transformation"
                );
                stats.rows_skipped += 1;
                continue;
            }

            tx.write_record(&record).await?;
        }

        stats.rows_loaded = tx.finish_copy().await?;
        info!(
            entry = %base.debug_label(),
            rows = stats.rows_loaded,
            skipped = stats.rows_skipped,
            "table data loaded"
        );

        Ok(stats)
    }
}
