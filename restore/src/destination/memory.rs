//! In-memory destination simulating the parts of a Postgres session a restore touches.
//!
//! Besides rows, it tracks the current role, `session_replication_role`, per-table trigger
//! flags, savepoints and failed transactions, so that session handling can be verified without
//! a database. Statements it does not understand are accepted and only recorded.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use postgres::schema::{TableName, TableSchema};
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::destination::{Destination, DestinationTransaction};
use crate::error::{ErrorKind, RestoreError, RestoreResult};
use crate::restore_error;
use crate::types::Record;

const REPLICATION_ROLES: [&str; 3] = ["origin", "replica", "local"];

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Record>,
    triggers_enabled: bool,
}

/// State of a transaction's session when it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub current_role: String,
    pub replication_role: String,
    pub committed: bool,
    /// Every statement and query sent, in order.
    pub statements: Vec<String>,
}

#[derive(Debug)]
struct Inner {
    login_role: String,
    /// Roles the login role may switch to, all of which may alter tables and set the
    /// replication role.
    superusers: HashSet<String>,
    tables: BTreeMap<TableName, MemoryTable>,
    failing_prefixes: Vec<String>,
    write_delay: Option<Duration>,
    sessions: Vec<SessionSnapshot>,
}

/// In-memory [`Destination`] for tests and development.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    /// Creates a destination whose connections log in as the unprivileged `login_role`.
    pub fn new(login_role: impl Into<String>) -> Self {
        let inner = Inner {
            login_role: login_role.into(),
            superusers: HashSet::new(),
            tables: BTreeMap::new(),
            failing_prefixes: Vec::new(),
            write_delay: None,
            sessions: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Makes `role` a superuser the login role is a member of. Granting the login role itself
    /// makes every connection privileged.
    pub async fn grant_superuser(&self, role: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.superusers.insert(role.into());
    }

    /// Creates an empty table with enabled triggers.
    pub async fn create_table(&self, schema: TableSchema) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(
            schema.name.clone(),
            MemoryTable {
                schema,
                rows: Vec::new(),
                triggers_enabled: true,
            },
        );
    }

    pub async fn set_triggers_enabled(&self, table_name: &TableName, enabled: bool) {
        let mut inner = self.inner.lock().await;
        if let Some(table) = inner.tables.get_mut(table_name) {
            table.triggers_enabled = enabled;
        }
    }

    /// Makes every statement starting with `prefix`, ignoring case, fail.
    pub async fn fail_statements_matching(&self, prefix: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.failing_prefixes.push(prefix.into());
    }

    /// Delays every written record, to keep loads in flight.
    pub async fn set_write_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().await;
        inner.write_delay = Some(delay);
    }

    /// Committed rows of a table.
    pub async fn rows(&self, table_name: &TableName) -> Vec<Record> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table_name)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Committed trigger flag of a table, `None` if the table does not exist.
    pub async fn triggers_enabled(&self, table_name: &TableName) -> Option<bool> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table_name)
            .map(|table| table.triggers_enabled)
    }

    /// Snapshots of every ended transaction, in the order they ended.
    pub async fn sessions(&self) -> Vec<SessionSnapshot> {
        let inner = self.inner.lock().await;
        inner.sessions.clone()
    }
}

impl Destination for MemoryDestination {
    type Transaction = MemoryTransaction;

    fn name() -> &'static str {
        "memory"
    }

    async fn begin(&self) -> RestoreResult<MemoryTransaction> {
        let login_role = {
            let inner = self.inner.lock().await;
            inner.login_role.clone()
        };

        Ok(MemoryTransaction {
            inner: self.inner.clone(),
            state: TransactionState {
                current_role: login_role.clone(),
                replication_role: "origin".to_string(),
                staged_rows: BTreeMap::new(),
                trigger_flags: BTreeMap::new(),
            },
            login_role,
            savepoints: Vec::new(),
            copy: None,
            statements: Vec::new(),
            aborted: false,
        })
    }
}

/// Transaction-scoped state, captured by savepoints.
#[derive(Debug, Clone)]
struct TransactionState {
    current_role: String,
    replication_role: String,
    staged_rows: BTreeMap<TableName, Vec<Record>>,
    trigger_flags: BTreeMap<TableName, bool>,
}

#[derive(Debug)]
struct PendingCopy {
    table_name: TableName,
    column_count: usize,
    rows: Vec<Record>,
}

/// Transaction of a [`MemoryDestination`]. Changes become visible on commit.
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: Arc<Mutex<Inner>>,
    state: TransactionState,
    login_role: String,
    savepoints: Vec<(String, TransactionState)>,
    copy: Option<PendingCopy>,
    statements: Vec<String>,
    aborted: bool,
}

impl MemoryTransaction {
    /// Marks the transaction as failed, as Postgres does after any error.
    fn fail(&mut self, error: RestoreError) -> RestoreError {
        self.aborted = true;
        self.copy = None;
        error
    }

    fn ensure_usable(&self) -> RestoreResult<()> {
        if self.aborted {
            bail!(
                ErrorKind::InvalidState,
                "Transaction is aborted",
                "current transaction is aborted, commands ignored until end of transaction block"
            );
        }
        if self.copy.is_some() {
            bail!(ErrorKind::InvalidState, "A COPY is in progress");
        }

        Ok(())
    }

    async fn is_superuser(&self, role: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.superusers.contains(role)
    }

    async fn injected_failure(&self, statement: &str) -> Option<RestoreError> {
        let inner = self.inner.lock().await;
        inner
            .failing_prefixes
            .iter()
            .find(|prefix| strip_prefix_ignore_case(statement, prefix).is_some())
            .map(|prefix| {
                restore_error!(
                    ErrorKind::DestinationQueryFailed,
                    "Statement failed",
                    format!("injected failure for statements starting with `{prefix}`")
                )
            })
    }

    async fn require_superuser(&mut self, action: &str) -> RestoreResult<()> {
        if self.is_superuser(&self.state.current_role).await {
            return Ok(());
        }

        let error = restore_error!(
            ErrorKind::PermissionDenied,
            "Permission denied",
            format!("role {} is not allowed to {action}", self.state.current_role)
        );
        Err(self.fail(error))
    }

    async fn alter_triggers(&mut self, table: &str, enabled: bool) -> RestoreResult<()> {
        let Some(table_name) = parse_table_name(table) else {
            let error = restore_error!(
                ErrorKind::DestinationQueryFailed,
                "Syntax error",
                format!("invalid table name `{table}`")
            );
            return Err(self.fail(error));
        };

        let exists = {
            let inner = self.inner.lock().await;
            inner.tables.contains_key(&table_name)
        };
        if !exists {
            let error = restore_error!(
                ErrorKind::DestinationSchemaError,
                "Relation does not exist",
                format!("relation {table_name} does not exist")
            );
            return Err(self.fail(error));
        }

        self.require_superuser("alter table triggers").await?;
        self.state.trigger_flags.insert(table_name, enabled);

        Ok(())
    }

    async fn set_role(&mut self, role: &str) -> RestoreResult<()> {
        let role = unquote_identifier(role);
        if role != self.login_role && !self.is_superuser(&role).await {
            let error = restore_error!(
                ErrorKind::PermissionDenied,
                "Permission denied",
                format!("permission denied to set role \"{role}\"")
            );
            return Err(self.fail(error));
        }

        self.state.current_role = role;

        Ok(())
    }

    async fn set_replication_role(&mut self, value: &str) -> RestoreResult<()> {
        let value = value.trim().trim_matches('\'').to_ascii_lowercase();
        if !REPLICATION_ROLES.contains(&value.as_str()) {
            let error = restore_error!(
                ErrorKind::DestinationQueryFailed,
                "Invalid parameter value",
                format!("invalid value for parameter \"session_replication_role\": \"{value}\"")
            );
            return Err(self.fail(error));
        }

        self.require_superuser("set session_replication_role")
            .await?;
        self.state.replication_role = value;

        Ok(())
    }

    async fn record_session(&self, committed: bool) {
        let mut inner = self.inner.lock().await;
        inner.sessions.push(SessionSnapshot {
            current_role: self.state.current_role.clone(),
            replication_role: self.state.replication_role.clone(),
            committed,
            statements: self.statements.clone(),
        });
    }
}

impl DestinationTransaction for MemoryTransaction {
    async fn execute(&mut self, statement: &str) -> RestoreResult<()> {
        let statement = statement.trim().trim_end_matches(';').trim();
        self.statements.push(statement.to_string());
        debug!(statement, "executing statement");

        if let Some(name) = strip_prefix_ignore_case(statement, "rollback to savepoint ") {
            let Some(position) = self
                .savepoints
                .iter()
                .rposition(|(savepoint, _)| savepoint == name)
            else {
                let error = restore_error!(
                    ErrorKind::InvalidState,
                    "Savepoint does not exist",
                    format!("savepoint \"{name}\" does not exist")
                );
                return Err(self.fail(error));
            };

            // The savepoint itself survives a rollback to it.
            self.savepoints.truncate(position + 1);
            self.state = self.savepoints[position].1.clone();
            self.copy = None;
            self.aborted = false;

            return Ok(());
        }

        self.ensure_usable()?;
        if let Some(error) = self.injected_failure(statement).await {
            return Err(self.fail(error));
        }

        if let Some(name) = strip_prefix_ignore_case(statement, "savepoint ") {
            self.savepoints.push((name.to_string(), self.state.clone()));
        } else if let Some(name) = strip_prefix_ignore_case(statement, "release savepoint ") {
            if let Some(position) = self
                .savepoints
                .iter()
                .rposition(|(savepoint, _)| savepoint == name)
            {
                self.savepoints.truncate(position);
            }
        } else if let Some(role) = strip_prefix_ignore_case(statement, "set role ") {
            self.set_role(role).await?;
        } else if statement.eq_ignore_ascii_case("reset role") {
            self.state.current_role = self.login_role.clone();
        } else if let Some(rest) = strip_prefix_ignore_case(statement, "alter table ") {
            if let Some(table) = strip_suffix_ignore_case(rest, " disable trigger all") {
                self.alter_triggers(table, false).await?;
            } else if let Some(table) = strip_suffix_ignore_case(rest, " enable trigger all") {
                self.alter_triggers(table, true).await?;
            }
        } else if let Some(rest) =
            strip_prefix_ignore_case(statement, "set session_replication_role")
        {
            let value = rest
                .strip_prefix('=')
                .or_else(|| strip_prefix_ignore_case(rest, "to "))
                .unwrap_or(rest);
            self.set_replication_role(value).await?;
        } else if statement.eq_ignore_ascii_case("reset session_replication_role") {
            self.require_superuser("set session_replication_role")
                .await?;
            self.state.replication_role = "origin".to_string();
        }

        Ok(())
    }

    async fn query_scalar(&mut self, query: &str) -> RestoreResult<Option<String>> {
        let query = query.trim().trim_end_matches(';').trim();
        self.statements.push(query.to_string());
        self.ensure_usable()?;
        if let Some(error) = self.injected_failure(query).await {
            return Err(self.fail(error));
        }

        if query.eq_ignore_ascii_case("show session_replication_role") {
            return Ok(Some(self.state.replication_role.clone()));
        }
        if query.eq_ignore_ascii_case("select current_user") {
            return Ok(Some(self.state.current_role.clone()));
        }

        Ok(None)
    }

    async fn table_schema(&mut self, table_name: &TableName) -> RestoreResult<TableSchema> {
        self.ensure_usable()?;

        let inner = self.inner.lock().await;
        match inner.tables.get(table_name) {
            Some(table) => Ok(table.schema.clone()),
            None => bail!(
                ErrorKind::DestinationSchemaError,
                "Table not found in destination",
                format!("table {table_name} does not exist")
            ),
        }
    }

    async fn copy_in(&mut self, table_name: &TableName, columns: &[String]) -> RestoreResult<()> {
        self.ensure_usable()?;
        self.statements
            .push(format!("copy {} from stdin", table_name.as_quoted_identifier()));

        let missing = {
            let inner = self.inner.lock().await;
            match inner.tables.get(table_name) {
                Some(table) => columns
                    .iter()
                    .find(|column| table.schema.column(column).is_none())
                    .map(|column| format!("column \"{column}\" of relation {table_name} does not exist")),
                None => Some(format!("relation {table_name} does not exist")),
            }
        };
        if let Some(detail) = missing {
            let error = restore_error!(
                ErrorKind::DestinationSchemaError,
                "Invalid COPY target",
                detail = detail
            );
            return Err(self.fail(error));
        }

        self.copy = Some(PendingCopy {
            table_name: table_name.clone(),
            column_count: columns.len(),
            rows: Vec::new(),
        });

        Ok(())
    }

    async fn write_record(&mut self, record: &Record) -> RestoreResult<()> {
        let delay = {
            let inner = self.inner.lock().await;
            inner.write_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let Some(copy) = self.copy.as_mut() else {
            bail!(ErrorKind::InvalidState, "No COPY in progress");
        };

        if record.len() != copy.column_count {
            let detail = format!(
                "record has {} columns, the COPY expects {}",
                record.len(),
                copy.column_count
            );
            let error = restore_error!(ErrorKind::InvalidData, "Malformed COPY row", detail = detail);
            return Err(self.fail(error));
        }

        copy.rows.push(record.clone());

        Ok(())
    }

    async fn finish_copy(&mut self) -> RestoreResult<u64> {
        let Some(copy) = self.copy.take() else {
            bail!(ErrorKind::InvalidState, "No COPY in progress");
        };

        let loaded = copy.rows.len() as u64;
        self.state
            .staged_rows
            .entry(copy.table_name)
            .or_default()
            .extend(copy.rows);

        Ok(loaded)
    }

    fn abort_copy(&mut self) {
        if self.copy.take().is_some() {
            self.aborted = true;
        }
    }

    async fn commit(mut self) -> RestoreResult<()> {
        self.statements.push("commit".to_string());
        if self.aborted || self.copy.is_some() {
            self.record_session(false).await;
            bail!(
                ErrorKind::InvalidState,
                "Cannot commit a failed transaction",
                "the transaction is aborted or has a COPY in progress"
            );
        }

        {
            let mut inner = self.inner.lock().await;
            for (table_name, rows) in std::mem::take(&mut self.state.staged_rows) {
                if let Some(table) = inner.tables.get_mut(&table_name) {
                    table.rows.extend(rows);
                }
            }
            for (table_name, enabled) in &self.state.trigger_flags {
                if let Some(table) = inner.tables.get_mut(table_name) {
                    table.triggers_enabled = *enabled;
                }
            }
        }

        self.record_session(true).await;

        Ok(())
    }

    async fn rollback(mut self) -> RestoreResult<()> {
        self.statements.push("rollback".to_string());
        self.record_session(false).await;

        Ok(())
    }
}

fn strip_prefix_ignore_case<'a>(statement: &'a str, prefix: &str) -> Option<&'a str> {
    let head = statement.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }

    statement.get(prefix.len()..).map(str::trim)
}

fn strip_suffix_ignore_case<'a>(statement: &'a str, suffix: &str) -> Option<&'a str> {
    let split = statement.len().checked_sub(suffix.len())?;
    let tail = statement.get(split..)?;
    if !tail.eq_ignore_ascii_case(suffix) {
        return None;
    }

    statement.get(..split).map(str::trim)
}

/// Removes the quotes of a possibly quoted identifier.
fn unquote_identifier(identifier: &str) -> String {
    let identifier = identifier.trim();
    match identifier
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(quoted) => quoted.replace("\"\"", "\""),
        None => identifier.to_string(),
    }
}

/// Parses `schema.name`, either part possibly quoted.
fn parse_table_name(qualified: &str) -> Option<TableName> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = qualified.trim().chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);

    match parts.as_slice() {
        [schema, name] if !schema.is_empty() && !name.is_empty() => {
            Some(TableName::new(schema.clone(), name.clone()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use postgres::schema::ColumnSchema;
    use tokio_postgres::types::Type;

    use super::*;

    fn orders() -> TableName {
        TableName::new("public", "orders")
    }

    async fn destination() -> MemoryDestination {
        let destination = MemoryDestination::new("non_super_user");
        destination.grant_superuser("postgres").await;
        destination
            .create_table(TableSchema::new(
                orders(),
                vec![
                    ColumnSchema::new("id", Type::INT4, -1, 1, false),
                    ColumnSchema::new("note", Type::TEXT, -1, 2, true),
                ],
            ))
            .await;
        destination
    }

    #[test]
    fn parses_quoted_table_names() {
        assert_eq!(parse_table_name("public.orders"), Some(orders()));
        assert_eq!(
            parse_table_name(r#""My ""Schema"""."a.b""#),
            Some(TableName::new("My \"Schema\"", "a.b"))
        );
        assert_eq!(parse_table_name("orders"), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unprivileged_role_cannot_alter_triggers() {
        let destination = destination().await;
        let mut tx = destination.begin().await.unwrap();

        let err = tx
            .execute("alter table public.orders disable trigger all")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = tx.execute("select 1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn session_changes_follow_savepoints() {
        let destination = destination().await;
        let mut tx = destination.begin().await.unwrap();

        tx.execute("savepoint before").await.unwrap();
        tx.execute("set role postgres").await.unwrap();
        tx.execute("set session_replication_role = 'replica'").await.unwrap();
        assert_eq!(
            tx.query_scalar("select current_user").await.unwrap().as_deref(),
            Some("postgres")
        );

        tx.execute("set role nobody").await.unwrap_err();
        tx.execute("rollback to savepoint before").await.unwrap();

        assert_eq!(
            tx.query_scalar("select current_user").await.unwrap().as_deref(),
            Some("non_super_user")
        );
        assert_eq!(
            tx.query_scalar("show session_replication_role")
                .await
                .unwrap()
                .as_deref(),
            Some("origin")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rows_and_trigger_flags_become_visible_on_commit() {
        let destination = destination().await;
        let mut tx = destination.begin().await.unwrap();

        tx.execute("set role postgres").await.unwrap();
        tx.execute("alter table public.orders disable trigger all")
            .await
            .unwrap();
        tx.copy_in(&orders(), &["id".to_string(), "note".to_string()])
            .await
            .unwrap();
        tx.write_record(&Record::from_text([Some("1"), None]))
            .await
            .unwrap();
        assert_eq!(tx.finish_copy().await.unwrap(), 1);

        assert!(destination.rows(&orders()).await.is_empty());
        assert_eq!(destination.triggers_enabled(&orders()).await, Some(true));

        tx.commit().await.unwrap();

        assert_eq!(destination.rows(&orders()).await.len(), 1);
        assert_eq!(destination.triggers_enabled(&orders()).await, Some(false));
        let sessions = destination.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].committed);
        assert_eq!(sessions[0].current_role, "postgres");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn aborted_copy_fails_the_transaction() {
        let destination = destination().await;
        let mut tx = destination.begin().await.unwrap();

        tx.execute("savepoint load").await.unwrap();
        tx.copy_in(&orders(), &["id".to_string()]).await.unwrap();
        tx.abort_copy();
        assert!(tx.execute("select 1").await.is_err());

        tx.execute("rollback to savepoint load").await.unwrap();
        tx.execute("select 1").await.unwrap();
        tx.rollback().await.unwrap();

        assert!(!destination.sessions().await[0].committed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_failures_abort_the_transaction() {
        let destination = destination().await;
        destination.fail_statements_matching("create index").await;
        let mut tx = destination.begin().await.unwrap();

        let err = tx
            .execute("CREATE INDEX orders_idx ON public.orders (id)")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);

        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
