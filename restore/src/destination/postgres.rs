use std::io::BufReader;
use std::pin::Pin;
use std::sync::Arc;

use ::postgres::schema::{ColumnSchema, TableName, TableSchema, convert_type_oid_to_type};
use bytes::{Bytes, BytesMut};
use config::shared::{IntoConnectOptions, PgConnectionConfig, RESTORE_CONNECTION_OPTIONS};
use futures::SinkExt;
use pg_escape::quote_identifier;
use rustls::ClientConfig;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, CopyInSink, NoTls, SimpleQueryMessage, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error, info, warn};

use crate::bail;
use crate::conversions::copy::encode_row;
use crate::destination::{Destination, DestinationTransaction};
use crate::error::{ErrorKind, RestoreResult};
use crate::types::Record;

/// Size at which buffered `COPY` data is sent to the server.
const COPY_FLUSH_THRESHOLD: usize = 64 * 1024;

const TABLE_SCHEMA_QUERY: &str = "
select a.attname, a.atttypid, a.atttypmod, a.attnum, a.attnotnull
from pg_catalog.pg_attribute a
join pg_catalog.pg_class c on c.oid = a.attrelid
join pg_catalog.pg_namespace n on n.oid = c.relnamespace
where n.nspname = $1 and c.relname = $2 and a.attnum > 0 and not a.attisdropped
order by a.attnum";

/// Spawns a background task driving a Postgres connection until it terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        match connection.await {
            Err(err) => error!("an error occurred during the postgres connection: {}", err),
            Ok(()) => debug!("postgres connection terminated successfully"),
        }
    }
    .instrument(span);

    // The connection ends when its client is dropped.
    tokio::spawn(task);
}

/// Restores into a Postgres database, one connection per transaction.
#[derive(Debug, Clone)]
pub struct PgDestination {
    config: Arc<PgConnectionConfig>,
}

impl PgDestination {
    pub fn new(config: PgConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Opens a connection, using TLS if configured.
    pub async fn connect(&self) -> RestoreResult<Client> {
        match self.config.tls.enabled {
            true => self.connect_tls().await,
            false => self.connect_no_tls().await,
        }
    }

    async fn connect_no_tls(&self) -> RestoreResult<Client> {
        let config: Config = self.config.with_db(Some(&*RESTORE_CONNECTION_OPTIONS));

        let (client, connection) = config.connect(NoTls).await?;
        spawn_postgres_connection::<NoTls>(connection);

        debug!("connected to postgres without tls");

        Ok(client)
    }

    async fn connect_tls(&self) -> RestoreResult<Client> {
        let config: Config = self.config.with_db(Some(&*RESTORE_CONNECTION_OPTIONS));

        let mut root_store = rustls::RootCertStore::empty();
        let mut root_certs_reader = BufReader::new(self.config.tls.trusted_root_certs.as_bytes());
        for cert in rustls_pemfile::certs(&mut root_certs_reader) {
            let cert = cert?;
            root_store.add(cert)?;
        }

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let (client, connection) = config.connect(MakeRustlsConnect::new(tls_config)).await?;
        spawn_postgres_connection::<MakeRustlsConnect>(connection);

        debug!("connected to postgres with tls");

        Ok(client)
    }
}

impl Destination for PgDestination {
    type Transaction = PgTransaction;

    fn name() -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> RestoreResult<PgTransaction> {
        let client = self.connect().await?;
        client.simple_query("begin").await?;

        Ok(PgTransaction {
            client,
            copy: None,
            finished: false,
        })
    }
}

struct CopyState {
    sink: Pin<Box<CopyInSink<Bytes>>>,
    buffer: BytesMut,
}

/// A transaction on a dedicated Postgres connection.
pub struct PgTransaction {
    client: Client,
    copy: Option<CopyState>,
    finished: bool,
}

impl PgTransaction {
    fn copy_state(&mut self) -> RestoreResult<&mut CopyState> {
        match self.copy.as_mut() {
            Some(copy) => Ok(copy),
            None => bail!(ErrorKind::InvalidState, "No COPY in progress"),
        }
    }
}

impl DestinationTransaction for PgTransaction {
    async fn execute(&mut self, statement: &str) -> RestoreResult<()> {
        debug!(statement, "executing statement");
        self.client.simple_query(statement).await?;

        Ok(())
    }

    async fn query_scalar(&mut self, query: &str) -> RestoreResult<Option<String>> {
        let messages = self.client.simple_query(query).await?;
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                return Ok(row.get(0).map(str::to_owned));
            }
        }

        Ok(None)
    }

    async fn table_schema(&mut self, table_name: &TableName) -> RestoreResult<TableSchema> {
        let rows = self
            .client
            .query(TABLE_SCHEMA_QUERY, &[&table_name.schema, &table_name.name])
            .await?;

        if rows.is_empty() {
            bail!(
                ErrorKind::DestinationSchemaError,
                "Table not found in destination",
                format!("table {table_name} does not exist or has no columns")
            );
        }

        let mut column_schemas = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0)?;
            let type_oid: u32 = row.try_get(1)?;
            let modifier: i32 = row.try_get(2)?;
            let ordinal_position: i16 = row.try_get(3)?;
            let not_null: bool = row.try_get(4)?;

            column_schemas.push(ColumnSchema::new(
                name,
                convert_type_oid_to_type(type_oid),
                modifier,
                i32::from(ordinal_position),
                !not_null,
            ));
        }

        Ok(TableSchema::new(table_name.clone(), column_schemas))
    }

    async fn copy_in(&mut self, table_name: &TableName, columns: &[String]) -> RestoreResult<()> {
        if self.copy.is_some() {
            bail!(ErrorKind::InvalidState, "A COPY is already in progress");
        }

        let columns = columns
            .iter()
            .map(|column| quote_identifier(column).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "copy {} ({columns}) from stdin with (format text)",
            table_name.as_quoted_identifier()
        );
        debug!(statement, "starting copy");

        let sink = self.client.copy_in::<_, Bytes>(&statement).await?;
        self.copy = Some(CopyState {
            sink: Box::pin(sink),
            buffer: BytesMut::with_capacity(COPY_FLUSH_THRESHOLD),
        });

        Ok(())
    }

    async fn write_record(&mut self, record: &Record) -> RestoreResult<()> {
        let copy = self.copy_state()?;
        encode_row(record, &mut copy.buffer);

        if copy.buffer.len() >= COPY_FLUSH_THRESHOLD {
            let chunk = copy.buffer.split().freeze();
            copy.sink.send(chunk).await?;
        }

        Ok(())
    }

    async fn finish_copy(&mut self) -> RestoreResult<u64> {
        let copy = self.copy_state()?;
        if !copy.buffer.is_empty() {
            let chunk = copy.buffer.split().freeze();
            copy.sink.send(chunk).await?;
        }

        let rows = copy.sink.as_mut().finish().await?;
        self.copy = None;

        Ok(rows)
    }

    fn abort_copy(&mut self) {
        // Dropping an unfinished sink makes the server fail the COPY.
        if self.copy.take().is_some() {
            warn!("aborting copy in progress");
        }
    }

    async fn commit(mut self) -> RestoreResult<()> {
        self.finished = true;
        self.client.simple_query("commit").await?;
        info!("transaction committed");

        Ok(())
    }

    async fn rollback(mut self) -> RestoreResult<()> {
        self.finished = true;
        self.copy = None;
        self.client.simple_query("rollback").await?;
        debug!("transaction rolled back");

        Ok(())
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if !self.finished {
            // Closing the connection discards the open transaction on the server.
            warn!("transaction dropped without commit or rollback, closing its connection");
        }
    }
}
