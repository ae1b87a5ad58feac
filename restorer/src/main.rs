//! Restorer service binary.
//!
//! Restores a logical dump from the configured storage into a Postgres database, masking table
//! data with the configured transformers on the way in.

use anyhow::Context;
use tracing::error;

use crate::config::load_restorer_config;
use crate::core::start_restorer_with_config;

mod config;
mod core;

fn main() -> anyhow::Result<()> {
    let restorer_config = load_restorer_config()?;

    let _log_flusher = telemetry::tracing::init_tracing(env!("CARGO_BIN_NAME"))
        .context("failed to initialize tracing")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    if let Err(err) = runtime.block_on(start_restorer_with_config(restorer_config)) {
        error!("{err:#}");
        return Err(err);
    }

    Ok(())
}
