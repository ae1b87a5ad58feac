//! Orchestration of a whole restore run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use config::shared::{EntryErrorPolicy, RestoreConfig, TableTransformationConfig, TransformerConfig};
use postgres::schema::TableName;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, DependencyGraph, DumpId, Section};
use crate::concurrency::shutdown::{
    ShutdownRx, ShutdownTx, create_shutdown_channel, wait_for_shutdown,
};
use crate::destination::Destination;
use crate::error::{ErrorKind, RestoreError, RestoreResult};
use crate::restore_error;
use crate::storage::ObjectStore;
use crate::transformers::TransformerRegistry;
use crate::workers::entry::{EntryWorker, EntryWorkerContext};
use crate::workers::policy::{FailureScope, build_error_handling_policy};
use crate::workers::pool::{RestoreWorkerPool, WorkerExit};

/// What happened to every entry of a run.
#[derive(Debug, Default)]
pub struct RestoreSummary {
    pub restored: Vec<DumpId>,
    pub failed: Vec<(DumpId, RestoreError)>,
    /// Entries not attempted because a dependency failed or the run stopped.
    pub skipped: Vec<DumpId>,
    /// Entries interrupted or never started because the run was canceled.
    pub canceled: Vec<DumpId>,
    /// Failures not attributable to a single entry.
    pub errors: Vec<RestoreError>,
    pub rows_loaded: u64,
    pub rows_skipped: u64,
}

impl RestoreSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.errors.is_empty() && self.canceled.is_empty()
    }

    /// Returns the summary if every entry was restored, the aggregated failures otherwise.
    pub fn into_result(self) -> RestoreResult<Self> {
        if self.is_success() {
            return Ok(self);
        }

        let mut errors: Vec<RestoreError> =
            self.failed.iter().map(|(_, err)| err.clone()).collect();
        errors.extend(self.errors.iter().cloned());
        if !self.canceled.is_empty() {
            errors.push(restore_error!(
                ErrorKind::RestoreCanceled,
                "Restore canceled",
                format!("{} entries canceled", self.canceled.len())
            ));
        }

        Err(errors.into())
    }
}

/// Why scheduling stopped before the catalog was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Aborted,
    Canceled,
}

/// Restores a catalog into a destination.
///
/// Sections are restored one after the other. Within a section, entries run as soon as their
/// dependencies committed, with at most `max_workers` of them at once, each in its own
/// transaction.
#[derive(Debug)]
pub struct RestorePipeline<S, D> {
    config: Arc<RestoreConfig>,
    transformations: Arc<HashMap<TableName, Vec<TransformerConfig>>>,
    registry: Arc<TransformerRegistry>,
    store: S,
    destination: D,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
}

impl<S, D> RestorePipeline<S, D>
where
    S: ObjectStore,
    D: Destination,
{
    pub fn new(
        config: RestoreConfig,
        transformations: Vec<TableTransformationConfig>,
        registry: Arc<TransformerRegistry>,
        store: S,
        destination: D,
    ) -> Self {
        let mut by_table: HashMap<TableName, Vec<TransformerConfig>> = HashMap::new();
        for table in transformations {
            by_table
                .entry(TableName::new(table.schema, table.name))
                .or_default()
                .extend(table.transformers);
        }

        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            transformations: Arc::new(by_table),
            registry,
            store,
            destination,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Returns a handle that cancels the run. Entries in flight tear down their session and
    /// roll back.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Restores every entry of `catalog`.
    ///
    /// Fails only if the run could not start. Entry failures are reported in the summary, see
    /// [`RestoreSummary::into_result`].
    pub async fn run(&self, catalog: &Catalog) -> RestoreResult<RestoreSummary> {
        self.check_transformers()?;

        info!(
            entries = catalog.len(),
            max_workers = self.config.max_workers,
            destination = D::name(),
            store = S::name(),
            "starting restore"
        );

        let (workers_shutdown_tx, workers_shutdown_rx) = create_shutdown_channel();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut summary = RestoreSummary::default();
        let mut blocked: HashSet<DumpId> = HashSet::new();
        let mut stop: Option<Stop> = None;

        for section in Section::ALL {
            let entries = catalog.phase(section);
            if entries.is_empty() {
                continue;
            }

            let mut graph = DependencyGraph::new(entries);
            for dump_id in blocked.clone() {
                for skipped in graph.fail(dump_id) {
                    warn!(%dump_id, skipped = %skipped, "skipping entry depending on a failed entry");
                    blocked.insert(skipped);
                    summary.skipped.push(skipped);
                }
            }

            if stop.is_none() {
                info!(phase = %section, entries = graph.pending().len(), "restoring phase");
            }

            let mut pool = RestoreWorkerPool::new();
            loop {
                if stop.is_none() {
                    while pool.len() < usize::from(self.config.max_workers) {
                        let Some(entry) = graph.next_ready() else {
                            break;
                        };

                        let context = EntryWorkerContext {
                            store: self.store.clone(),
                            destination: self.destination.clone(),
                            config: self.config.clone(),
                            registry: self.registry.clone(),
                            transformations: self.transformations.clone(),
                            shutdown_rx: workers_shutdown_rx.clone(),
                        };
                        pool.spawn(entry.dump_id, EntryWorker::new(entry, context).run());
                    }
                }

                if pool.is_empty() {
                    if stop.is_none() && graph.is_stalled() {
                        let pending = graph.pending();
                        error!(?pending, phase = %section, "dependency cycle between entries");
                        summary.errors.push(restore_error!(
                            ErrorKind::DependencyCycle,
                            "Entries depend on each other",
                            format!("phase {section}: entries {pending:?} can never start")
                        ));
                        stop = Some(Stop::Aborted);
                    }
                    break;
                }

                let exit = tokio::select! {
                    biased;

                    _ = wait_for_shutdown(&mut shutdown_rx), if stop != Some(Stop::Canceled) => {
                        warn!("restore canceled, stopping entries in flight");
                        stop = Some(Stop::Canceled);
                        workers_shutdown_tx.send_replace(());
                        continue;
                    }
                    exit = pool.join_next() => exit,
                };

                match exit {
                    Some(WorkerExit::Finished { dump_id, result }) => match result {
                        Ok(outcome) => {
                            graph.complete(dump_id);
                            summary.restored.push(dump_id);
                            summary.rows_loaded += outcome.rows_loaded;
                            summary.rows_skipped += outcome.rows_skipped;
                        }
                        Err(err) => {
                            if stop == Some(Stop::Canceled)
                                && err.kinds().contains(&ErrorKind::RestoreCanceled)
                            {
                                summary.canceled.push(dump_id);
                            } else {
                                self.on_entry_failure(dump_id, &err, &mut stop, &workers_shutdown_tx);
                                summary.failed.push((dump_id, err));
                            }

                            blocked.insert(dump_id);
                            for skipped in graph.fail(dump_id) {
                                blocked.insert(skipped);
                                summary.skipped.push(skipped);
                            }
                        }
                    },
                    Some(WorkerExit::Lost(err)) => {
                        summary.errors.push(err);
                        if stop.is_none() {
                            stop = Some(Stop::Aborted);
                            workers_shutdown_tx.send_replace(());
                        }
                    }
                    None => {}
                }
            }

            for dump_id in graph.pending() {
                blocked.insert(dump_id);
                match stop {
                    Some(Stop::Canceled) => summary.canceled.push(dump_id),
                    _ => summary.skipped.push(dump_id),
                }
            }
        }

        info!(
            restored = summary.restored.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            canceled = summary.canceled.len(),
            rows = summary.rows_loaded,
            skipped_rows = summary.rows_skipped,
            "restore finished"
        );

        Ok(summary)
    }

    fn on_entry_failure(
        &self,
        dump_id: DumpId,
        err: &RestoreError,
        stop: &mut Option<Stop>,
        workers_shutdown_tx: &ShutdownTx,
    ) {
        let policy = build_error_handling_policy(err);
        error!(
            %dump_id,
            error = %err,
            solution = policy.solution().unwrap_or("-"),
            "entry failed"
        );

        let abort = self.config.on_entry_error == EntryErrorPolicy::Abort
            || policy.scope() == FailureScope::Run;
        if abort && stop.is_none() {
            warn!(%dump_id, "aborting restore after entry failure");
            *stop = Some(Stop::Aborted);
            workers_shutdown_tx.send_replace(());
        }
    }

    /// Checks that every configured transformer is registered before anything is restored.
    fn check_transformers(&self) -> RestoreResult<()> {
        let mut errors = Vec::new();
        for (table_name, transformers) in self.transformations.iter() {
            for transformer in transformers {
                if let Err(err) = self.registry.get(&transformer.name) {
                    error!(table = %table_name, transformer = %transformer.name, "unknown transformer");
                    errors.push(err);
                }
            }
        }

        if errors.is_empty() {
            return Ok(());
        }

        Err(errors.into())
    }
}
