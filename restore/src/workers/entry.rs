use std::collections::HashMap;
use std::sync::Arc;

use config::shared::{RestoreConfig, TransformerConfig};
use postgres::schema::TableName;
use tracing::{Instrument, info, info_span};

use crate::bail;
use crate::catalog::{CatalogEntry, Section};
use crate::concurrency::shutdown::{ShutdownRx, is_shutdown_requested};
use crate::destination::Destination;
use crate::error::{ErrorKind, RestoreResult};
use crate::restorers::{DefinitionRestorer, RestoreBase, TableDataRestorer};
use crate::storage::ObjectStore;
use crate::transformers::TransformerRegistry;

/// Result of a successfully restored entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOutcome {
    pub rows_loaded: u64,
    pub rows_skipped: u64,
}

/// Everything an [`EntryWorker`] needs besides its entry. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EntryWorkerContext<S, D> {
    pub store: S,
    pub destination: D,
    pub config: Arc<RestoreConfig>,
    pub registry: Arc<TransformerRegistry>,
    /// Transformers of each table, in configuration order.
    pub transformations: Arc<HashMap<TableName, Vec<TransformerConfig>>>,
    pub shutdown_rx: ShutdownRx,
}

/// Restores one catalog entry in its own destination transaction.
#[derive(Debug)]
pub struct EntryWorker<S, D> {
    entry: Arc<CatalogEntry>,
    context: EntryWorkerContext<S, D>,
}

impl<S, D> EntryWorker<S, D>
where
    S: ObjectStore,
    D: Destination,
{
    pub fn new(entry: Arc<CatalogEntry>, context: EntryWorkerContext<S, D>) -> Self {
        Self { entry, context }
    }

    /// Restores the entry with the restorer matching its kind.
    ///
    /// Data entries backed by an object are loaded row by row; every other entry executes its
    /// stored definition.
    pub async fn run(self) -> RestoreResult<EntryOutcome> {
        let span = info_span!(
            "restore_entry",
            dump_id = %self.entry.dump_id,
            entry = %self.entry.debug_label()
        );

        self.restore().instrument(span).await
    }

    async fn restore(self) -> RestoreResult<EntryOutcome> {
        let EntryWorker { entry, context } = self;

        if is_shutdown_requested(&context.shutdown_rx) {
            bail!(
                ErrorKind::RestoreCanceled,
                "Restore canceled",
                format!("{} was not started", entry.debug_label())
            );
        }

        info!(desc = %entry.desc, section = %entry.section, "restoring entry");
        let tx = context.destination.begin().await?;
        let base = RestoreBase::new(entry.clone(), context.store, context.config);

        if entry.section == Section::Data && entry.file_name.is_some() {
            let transformers = entry
                .table_name()
                .and_then(|table_name| context.transformations.get(&table_name).cloned())
                .unwrap_or_default();

            let mut restorer = TableDataRestorer::new(
                base,
                context.registry,
                transformers,
                context.shutdown_rx,
            );
            let stats = restorer.restore(tx).await?;

            return Ok(EntryOutcome {
                rows_loaded: stats.rows_loaded,
                rows_skipped: stats.rows_skipped,
            });
        }

        let mut restorer = DefinitionRestorer::new(base);
        restorer.restore(tx).await?;

        Ok(EntryOutcome::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DumpId, data_entry};
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::destination::memory::MemoryDestination;
    use crate::storage::MemoryStore;
    use crate::transformers::orders_schema;

    async fn context(
        shutdown_rx: ShutdownRx,
    ) -> EntryWorkerContext<MemoryStore, MemoryDestination> {
        let destination = MemoryDestination::new("postgres");
        destination.grant_superuser("postgres").await;
        destination.create_table(orders_schema()).await;

        EntryWorkerContext {
            store: MemoryStore::new(),
            destination,
            config: Arc::new(RestoreConfig::default()),
            registry: Arc::new(TransformerRegistry::with_builtin().unwrap()),
            transformations: Arc::new(HashMap::new()),
            shutdown_rx,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn data_entries_are_loaded_from_their_payload() {
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let context = context(shutdown_rx).await;
        context
            .store
            .insert("7.dat.gz", "1\t2\t3.50\t1\tnote\n\\.\n")
            .await;

        let outcome = EntryWorker::new(Arc::new(data_entry(7, "public", "orders")), context.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.rows_loaded, 1);
        let rows = context
            .destination
            .rows(&TableName::new("public", "orders"))
            .await;
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entries_without_payload_run_their_definition() {
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let context = context(shutdown_rx).await;

        let entry = CatalogEntry {
            dump_id: DumpId(9),
            section: Section::Data,
            desc: "SEQUENCE SET".to_string(),
            namespace: Some("public".to_string()),
            tag: Some("orders_id_seq".to_string()),
            file_name: None,
            columns: None,
            definition: Some("SELECT pg_catalog.setval('public.orders_id_seq', 42, true)".to_string()),
            dependencies: Vec::new(),
        };

        let outcome = EntryWorker::new(Arc::new(entry), context.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(outcome, EntryOutcome::default());
        let statements = &context.destination.sessions().await[0].statements;
        assert!(statements[0].starts_with("SELECT pg_catalog.setval"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn canceled_run_does_not_start_entries() {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let context = context(shutdown_rx).await;
        shutdown_tx.send_replace(());

        let err = EntryWorker::new(Arc::new(data_entry(7, "public", "orders")), context.clone())
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RestoreCanceled);
        assert!(context.destination.sessions().await.is_empty());
    }
}
