use config::shared::{IntoConnectOptions, PgConnectionConfig};
use tokio::runtime::Handle;
use tokio_postgres::{Client, NoTls};
use tracing::error;

use crate::schema::TableName;

/// A throwaway Postgres database for tests, dropped together with the value.
pub struct PgDatabase {
    pub config: PgConnectionConfig,
    pub client: Option<Client>,
    destroy_on_drop: bool,
}

impl PgDatabase {
    /// Creates the database named by `config.name` and connects to it.
    pub async fn new(config: PgConnectionConfig) -> Self {
        let client = create_pg_database(&config).await;

        Self {
            config,
            client: Some(client),
            destroy_on_drop: true,
        }
    }

    /// Connects to an already existing database without dropping it afterwards.
    pub async fn duplicate(&self) -> Self {
        let client = connect(&self.config).await;

        Self {
            config: self.config.clone(),
            client: Some(client),
            destroy_on_drop: false,
        }
    }

    pub fn client(&self) -> &Client {
        self.client.as_ref().expect("database client is connected")
    }

    /// Runs a batch of `;`-separated statements.
    pub async fn run_sql(&self, sql: &str) -> Result<(), tokio_postgres::Error> {
        self.client().batch_execute(sql).await
    }

    /// Creates a table with the given `(name, type)` columns.
    pub async fn create_table(
        &self,
        table_name: &TableName,
        columns: &[(&str, &str)],
    ) -> Result<(), tokio_postgres::Error> {
        let columns = columns
            .iter()
            .map(|(name, typ)| format!("{} {typ}", pg_escape::quote_identifier(name)))
            .collect::<Vec<_>>()
            .join(", ");

        self.run_sql(&format!(
            "create table {} ({columns})",
            table_name.as_quoted_identifier()
        ))
        .await
    }

    /// Returns `pg_trigger.tgenabled` of a named trigger, `'O'` enabled or `'D'` disabled.
    pub async fn trigger_state(
        &self,
        table_name: &TableName,
        trigger: &str,
    ) -> Result<String, tokio_postgres::Error> {
        let row = self
            .client()
            .query_one(
                "select t.tgenabled::text
                 from pg_trigger t
                 join pg_class c on c.oid = t.tgrelid
                 join pg_namespace n on n.oid = c.relnamespace
                 where n.nspname = $1 and c.relname = $2 and t.tgname = $3",
                &[&table_name.schema, &table_name.name, &trigger],
            )
            .await?;

        Ok(row.get(0))
    }
}

impl Drop for PgDatabase {
    fn drop(&mut self) {
        if self.destroy_on_drop {
            // The client must be closed before the database can be dropped.
            self.client.take();
            tokio::task::block_in_place(move || {
                Handle::current().block_on(async move { drop_pg_database(&self.config).await });
            });
        }
    }
}

async fn connect(config: &PgConnectionConfig) -> Client {
    let options: tokio_postgres::Config = config.with_db(None);
    let (client, connection) = options
        .connect(NoTls)
        .await
        .expect("Failed to connect to Postgres");
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("test database connection error: {e}");
        }
    });

    client
}

/// Creates a new database and returns a client connected to it.
///
/// # Panics
/// Panics if the server is unreachable or the database cannot be created.
pub async fn create_pg_database(config: &PgConnectionConfig) -> Client {
    let options: tokio_postgres::Config = config.without_db(None);
    let (admin, connection) = options
        .connect(NoTls)
        .await
        .expect("Failed to connect to Postgres");
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("test admin connection error: {e}");
        }
    });

    admin
        .simple_query(&format!(r#"create database "{}";"#, config.name))
        .await
        .expect("Failed to create database");

    connect(config).await
}

/// Terminates the remaining sessions of the database and drops it. Failures are only logged so
/// cleanup never fails a test.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let options: tokio_postgres::Config = config.without_db(None);
    let (admin, connection) = match options.connect(NoTls).await {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("warning: failed to connect to Postgres for cleanup: {e}");
            return;
        }
    };
    tokio::spawn(async move {
        let _ = connection.await;
    });

    if let Err(e) = admin
        .simple_query(&format!(
            "select pg_terminate_backend(pid) from pg_stat_activity where datname = '{}' and pid <> pg_backend_pid();",
            config.name
        ))
        .await
    {
        eprintln!(
            "warning: failed to terminate connections for database {}: {e}",
            config.name
        );
    }

    if let Err(e) = admin
        .simple_query(&format!(r#"drop database if exists "{}";"#, config.name))
        .await
    {
        eprintln!("warning: failed to drop database {}: {e}", config.name);
    }
}
