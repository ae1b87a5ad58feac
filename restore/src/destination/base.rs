use std::future::Future;

use postgres::schema::{TableName, TableSchema};

use crate::error::RestoreResult;
use crate::types::Record;

/// A database restored entries are written to.
///
/// Every entry is restored through its own [`DestinationTransaction`], on its own connection,
/// so that concurrently restored entries never share session state.
pub trait Destination: Clone + Send + Sync + 'static {
    type Transaction: DestinationTransaction;

    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Opens a connection and begins a transaction on it.
    fn begin(&self) -> impl Future<Output = RestoreResult<Self::Transaction>> + Send;
}

/// One open transaction of a [`Destination`].
///
/// Session statements (role, trigger and replication-role changes) and row writes all go through
/// the same transaction. A transaction is consumed by [`DestinationTransaction::commit`] or
/// [`DestinationTransaction::rollback`]; dropping it without either rolls it back.
pub trait DestinationTransaction: Send + Sized {
    /// Executes one statement that returns no rows.
    fn execute(&mut self, statement: &str) -> impl Future<Output = RestoreResult<()>> + Send;

    /// Runs a query and returns the first column of its first row.
    fn query_scalar(
        &mut self,
        query: &str,
    ) -> impl Future<Output = RestoreResult<Option<String>>> + Send;

    /// Reads the columns of a table. Fails with
    /// [`crate::error::ErrorKind::DestinationSchemaError`] if the table does not exist.
    fn table_schema(
        &mut self,
        table_name: &TableName,
    ) -> impl Future<Output = RestoreResult<TableSchema>> + Send;

    /// Starts a `COPY` of `columns` into a table. Records written next must follow that column
    /// order.
    fn copy_in(
        &mut self,
        table_name: &TableName,
        columns: &[String],
    ) -> impl Future<Output = RestoreResult<()>> + Send;

    /// Writes one record to the `COPY` in progress.
    fn write_record(&mut self, record: &Record) -> impl Future<Output = RestoreResult<()>> + Send;

    /// Completes the `COPY` in progress and returns the number of rows it loaded.
    fn finish_copy(&mut self) -> impl Future<Output = RestoreResult<u64>> + Send;

    /// Abandons the `COPY` in progress, if any. The transaction is left in a failed state until
    /// it is rolled back, or rolled back to a savepoint.
    fn abort_copy(&mut self);

    fn commit(self) -> impl Future<Output = RestoreResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = RestoreResult<()>> + Send;
}
