use anyhow::Context;
use config::load_config;
use config::shared::RestorerConfig;

/// Loads and validates the restorer configuration.
pub fn load_restorer_config() -> anyhow::Result<RestorerConfig> {
    let config =
        load_config::<RestorerConfig>().context("failed to load the restorer configuration")?;
    config
        .validate()
        .context("invalid restorer configuration")?;

    Ok(config)
}
