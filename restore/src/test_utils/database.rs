use config::shared::{PgConnectionConfig, TlsConfig};
use postgres::tokio::test_utils::PgDatabase;
use uuid::Uuid;

/// Connection settings of a fresh test database on the local server.
///
/// Read from `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT`, `TESTS_DATABASE_USERNAME` and the
/// optional `TESTS_DATABASE_PASSWORD`. The database name is random.
///
/// # Panics
/// Panics if a required variable is missing.
pub fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig::disabled(),
    }
}

/// Creates an isolated destination database, dropped with the returned value.
pub async fn spawn_destination_database() -> PgDatabase {
    PgDatabase::new(local_pg_connection_config()).await
}
