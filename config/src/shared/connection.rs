use std::sync::LazyLock;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_postgres::{Config as TokioPgConnectOptions, config::SslMode as TokioPgSslMode};

use crate::shared::ValidationError;

const APP_NAME_RESTORE: &str = "masked_restore";

/// Session settings applied to every restore connection.
///
/// `client_encoding` must stay UTF8: payload rows are decoded and re-encoded as UTF-8 text.
pub static RESTORE_CONNECTION_OPTIONS: LazyLock<PgConnectionOptions> =
    LazyLock::new(|| PgConnectionOptions {
        datestyle: "ISO".to_string(),
        intervalstyle: "postgres".to_string(),
        extra_float_digits: 3,
        client_encoding: "UTF8".to_string(),
        timezone: "UTC".to_string(),
        statement_timeout: 0,
        lock_timeout: 30_000,
        application_name: APP_NAME_RESTORE.to_string(),
    });

/// Startup options sent with the connection, rendered as `-c key=value` pairs.
#[derive(Debug, Clone)]
pub struct PgConnectionOptions {
    pub datestyle: String,
    pub intervalstyle: String,
    pub extra_float_digits: i32,
    pub client_encoding: String,
    pub timezone: String,
    pub statement_timeout: u32,
    pub lock_timeout: u32,
    pub application_name: String,
}

impl PgConnectionOptions {
    pub fn to_options_string(&self) -> String {
        format!(
            "-c datestyle={} -c intervalstyle={} -c extra_float_digits={} -c client_encoding={} -c timezone={} -c statement_timeout={} -c lock_timeout={}",
            self.datestyle,
            self.intervalstyle,
            self.extra_float_digits,
            self.client_encoding,
            self.timezone,
            self.statement_timeout,
            self.lock_timeout,
        )
    }
}

/// Connection settings of the destination database.
///
/// Does not implement [`Serialize`] so the password cannot leak through serialization.
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: Option<SecretString>,
    #[serde(default = "TlsConfig::disabled")]
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tls.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM encoded root certificates trusted when `enabled` is set.
    pub trusted_root_certs: String,
    pub enabled: bool,
}

impl TlsConfig {
    pub fn disabled() -> Self {
        Self {
            trusted_root_certs: String::new(),
            enabled: false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts a [`PgConnectionConfig`] into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options targeting the server without selecting a database, used for administrative work
    /// such as creating databases.
    fn without_db(&self, options: Option<&PgConnectionOptions>) -> Output;

    /// Options targeting [`PgConnectionConfig::name`].
    fn with_db(&self, options: Option<&PgConnectionOptions>) -> Output;
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn without_db(&self, options: Option<&PgConnectionOptions>) -> TokioPgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            TokioPgSslMode::Require
        } else {
            TokioPgSslMode::Prefer
        };

        let mut config = TokioPgConnectOptions::new();
        config
            .host(self.host.clone())
            .port(self.port)
            .user(self.username.clone())
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        if let Some(options) = options {
            config
                .options(options.to_options_string())
                .application_name(options.application_name.clone());
        }

        config
    }

    fn with_db(&self, options: Option<&PgConnectionOptions>) -> TokioPgConnectOptions {
        let mut config: TokioPgConnectOptions = self.without_db(options);
        config.dbname(self.name.clone());
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_options_keep_utf8_encoding() {
        let options = RESTORE_CONNECTION_OPTIONS.to_options_string();
        assert!(options.contains("-c client_encoding=UTF8"));
        assert!(options.contains("-c timezone=UTC"));
    }

    #[test]
    fn tls_requires_root_certs_when_enabled() {
        let tls = TlsConfig {
            trusted_root_certs: String::new(),
            enabled: true,
        };
        assert!(matches!(
            tls.validate(),
            Err(ValidationError::MissingTrustedRootCerts)
        ));
        assert!(TlsConfig::disabled().validate().is_ok());
    }

    #[test]
    fn with_db_sets_database_name() {
        let config = PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "restored".to_string(),
            username: "loader".to_string(),
            password: None,
            tls: TlsConfig::disabled(),
        };

        let options: TokioPgConnectOptions = config.with_db(Some(&RESTORE_CONNECTION_OPTIONS));
        assert_eq!(options.get_dbname(), Some("restored"));
        assert_eq!(options.get_user(), Some("loader"));
        assert_eq!(options.get_application_name(), Some(APP_NAME_RESTORE));
    }
}
