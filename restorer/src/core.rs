use std::sync::Arc;

use config::shared::{PgConnectionConfig, RestoreConfig, RestorerConfig, StorageConfig};
use restore::catalog::Catalog;
use restore::destination::postgres::PgDestination;
use restore::pipeline::{RestorePipeline, RestoreSummary};
use restore::storage::{LocalStore, ObjectStore, Payload};
use restore::transformers::TransformerRegistry;
use tracing::{debug, info, warn};

/// Restores the dump described by `restorer_config` and waits for the run to finish.
///
/// Fails if the run could not start or if any entry was not restored.
pub async fn start_restorer_with_config(restorer_config: RestorerConfig) -> anyhow::Result<()> {
    info!("starting restorer service");

    log_config(&restorer_config);

    let registry = Arc::new(TransformerRegistry::with_builtin()?);
    let destination = PgDestination::new(restorer_config.destination);

    match restorer_config.storage {
        StorageConfig::Local { path } => {
            let store = LocalStore::new(path);
            let catalog = load_catalog(&store, &restorer_config.restore.catalog_object).await?;

            let pipeline = RestorePipeline::new(
                restorer_config.restore,
                restorer_config.transformation,
                registry,
                store,
                destination,
            );
            let summary = run_pipeline(pipeline, &catalog).await?;

            info!(
                restored = summary.restored.len(),
                rows = summary.rows_loaded,
                "restorer service completed"
            );
        }
    }

    Ok(())
}

/// Reads the catalog manifest, which may be gzip compressed like the data files.
async fn load_catalog<S: ObjectStore>(store: &S, key: &str) -> anyhow::Result<Catalog> {
    let object = store.get_object(key).await?;
    let key = key.to_owned();

    let catalog = tokio::task::spawn_blocking(move || {
        let payload = Payload::open(key, object)?;
        Catalog::from_reader(payload)
    })
    .await??;

    info!(entries = catalog.len(), "catalog loaded");

    Ok(catalog)
}

/// Runs the pipeline until it finishes or a shutdown signal cancels it.
async fn run_pipeline<S>(
    pipeline: RestorePipeline<S, PgDestination>,
    catalog: &Catalog,
) -> anyhow::Result<RestoreSummary>
where
    S: ObjectStore,
{
    let shutdown_tx = pipeline.shutdown_tx();
    let shutdown_handle = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl+c");
            return;
        }

        info!("sigint (ctrl+c) received, canceling restore");
        shutdown_tx.send_replace(());
    });

    let result = pipeline.run(catalog).await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    Ok(result?.into_result()?)
}

fn log_config(config: &RestorerConfig) {
    log_pg_connection_config(&config.destination);
    log_storage_config(&config.storage);
    log_restore_config(&config.restore);

    for table in &config.transformation {
        let transformers: Vec<&str> = table
            .transformers
            .iter()
            .map(|transformer| transformer.name.as_str())
            .collect();
        debug!(table = %table.qualified_name(), ?transformers, "table transformation config");
    }
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "destination postgres connection config",
    );
}

fn log_storage_config(config: &StorageConfig) {
    match config {
        StorageConfig::Local { path } => debug!(path, "using local storage config"),
    }
}

fn log_restore_config(config: &RestoreConfig) {
    debug!(
        superuser = config.superuser.as_deref().unwrap_or("-"),
        disable_triggers = config.disable_triggers,
        replica_mode = config.use_session_replication_role_replica,
        max_workers = config.max_workers,
        on_entry_error = ?config.on_entry_error,
        on_transform_error = ?config.on_transform_error,
        catalog_object = config.catalog_object,
        "restore config"
    );
}
