use std::fmt;
use std::future::Future;
use std::sync::Arc;

use config::shared::RestoreConfig;
use pg_escape::{quote_identifier, quote_literal};
use postgres::schema::TableName;
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::catalog::CatalogEntry;
use crate::destination::DestinationTransaction;
use crate::error::{ErrorKind, RestoreError, RestoreResult};
use crate::restore_error;
use crate::storage::{ObjectStore, Payload};

/// Savepoint taken before the session is altered. Rolling back to it undoes a partial setup.
const SETUP_SAVEPOINT: &str = "restore_session_setup";

/// Savepoint taken once the session is set up. Rolling back to it discards a failed load while
/// keeping the session changes that teardown undoes.
const WORK_SAVEPOINT: &str = "restore_session_work";

/// Progress of one entry through its restore transaction.
///
/// States advance in declaration order. `Aborted` can be reached from any state before
/// `Committed`. Steps that are not configured are passed through without touching the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    SessionPrepared,
    TriggersSuppressed,
    ReplicaModeSet,
    Streaming,
    ReplicaModeReset,
    TriggersRestored,
    RoleReset,
    Committed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::SessionPrepared => "session_prepared",
            SessionState::TriggersSuppressed => "triggers_suppressed",
            SessionState::ReplicaModeSet => "replica_mode_set",
            SessionState::Streaming => "streaming",
            SessionState::ReplicaModeReset => "replica_mode_reset",
            SessionState::TriggersRestored => "triggers_restored",
            SessionState::RoleReset => "role_reset",
            SessionState::Committed => "committed",
            SessionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// A session change made by setup, together with what is needed to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStep {
    RoleSwitched { role: String },
    TriggersDisabled { table_name: TableName },
    ReplicaModeSet { previous: String },
}

impl SessionStep {
    fn undo_statement(&self) -> String {
        match self {
            SessionStep::RoleSwitched { .. } => "reset role".to_string(),
            SessionStep::TriggersDisabled { table_name } => format!(
                "alter table {} enable trigger all",
                table_name.as_quoted_identifier()
            ),
            SessionStep::ReplicaModeSet { previous } => format!(
                "set session_replication_role = {}",
                quote_literal(previous)
            ),
        }
    }

    /// State reached once this step is undone.
    fn undone_state(&self) -> SessionState {
        match self {
            SessionStep::RoleSwitched { .. } => SessionState::RoleReset,
            SessionStep::TriggersDisabled { .. } => SessionState::TriggersRestored,
            SessionStep::ReplicaModeSet { .. } => SessionState::ReplicaModeReset,
        }
    }
}

/// Work executed by [`RestoreBase::in_session`] once the session is set up.
pub trait SessionWork<S, T>: Send
where
    S: ObjectStore,
    T: DestinationTransaction,
{
    type Output: Send;

    fn run(
        &mut self,
        base: &RestoreBase<S>,
        tx: &mut T,
    ) -> impl Future<Output = RestoreResult<Self::Output>> + Send;
}

/// Restore controller of a single catalog entry.
///
/// Owns the session changes made on the entry's transaction: every change applied by
/// [`RestoreBase::setup_session`] is recorded, and [`RestoreBase::teardown_session`] undoes
/// exactly the recorded changes in reverse order.
#[derive(Debug)]
pub struct RestoreBase<S> {
    entry: Arc<CatalogEntry>,
    store: S,
    config: Arc<RestoreConfig>,
    state: SessionState,
    applied: Vec<SessionStep>,
}

impl<S> RestoreBase<S>
where
    S: ObjectStore,
{
    pub fn new(entry: Arc<CatalogEntry>, store: S, config: Arc<RestoreConfig>) -> Self {
        Self {
            entry,
            store,
            config,
            state: SessionState::Idle,
            applied: Vec::new(),
        }
    }

    pub fn entry(&self) -> &CatalogEntry {
        &self.entry
    }

    pub fn config(&self) -> &RestoreConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session changes currently applied, in the order they were made.
    pub fn applied_steps(&self) -> &[SessionStep] {
        &self.applied
    }

    /// Identifier of the entry used in logs and errors, e.g. `table public.orders`.
    pub fn debug_label(&self) -> String {
        self.entry.debug_label()
    }

    /// Switches role, disables triggers and enters replica mode, each when configured.
    ///
    /// A failing step stops the setup. The steps already made are undone by rolling back to a
    /// savepoint taken before the first one, and the error is returned as a
    /// [`ErrorKind::SessionSetupFailed`] together with the underlying failure.
    pub async fn setup_session<T>(&mut self, tx: &mut T) -> RestoreResult<()>
    where
        T: DestinationTransaction,
    {
        if self.state != SessionState::Idle {
            bail!(
                ErrorKind::InvalidState,
                "Session already set up",
                format!("{} is in state {}", self.debug_label(), self.state)
            );
        }

        tx.execute(&format!("savepoint {SETUP_SAVEPOINT}")).await?;

        if let Err(err) = self.apply_setup_steps(tx).await {
            error!(entry = %self.debug_label(), error = %err, "session setup failed");

            let mut errors = vec![
                restore_error!(
                    ErrorKind::SessionSetupFailed,
                    "Session setup failed",
                    format!("{} after {} step(s)", self.debug_label(), self.applied.len())
                ),
                err,
            ];

            self.applied.clear();
            if let Err(rollback_err) = tx
                .execute(&format!("rollback to savepoint {SETUP_SAVEPOINT}"))
                .await
            {
                errors.push(rollback_err);
            }
            self.state = SessionState::Aborted;

            return Err(errors.into());
        }

        debug!(entry = %self.debug_label(), steps = self.applied.len(), "session set up");

        Ok(())
    }

    async fn apply_setup_steps<T>(&mut self, tx: &mut T) -> RestoreResult<()>
    where
        T: DestinationTransaction,
    {
        if let Some(role) = self.config.superuser.clone() {
            let statement = format!("set role {}", quote_identifier(&role));
            self.run_step(tx, &statement).await?;
            self.applied.push(SessionStep::RoleSwitched { role });
        }
        self.state = SessionState::SessionPrepared;

        if self.config.disable_triggers {
            let Some(table_name) = self.entry.table_name() else {
                bail!(
                    ErrorKind::InvalidData,
                    "Entry names no relation",
                    format!("cannot disable triggers for {}", self.debug_label())
                );
            };

            let statement = format!(
                "alter table {} disable trigger all",
                table_name.as_quoted_identifier()
            );
            self.run_step(tx, &statement).await?;
            self.applied.push(SessionStep::TriggersDisabled { table_name });
        }
        self.state = SessionState::TriggersSuppressed;

        if self.config.use_session_replication_role_replica {
            let previous = tx
                .query_scalar("show session_replication_role")
                .await?
                .unwrap_or_else(|| "origin".to_string());

            self.run_step(tx, "set session_replication_role = 'replica'")
                .await?;
            self.applied.push(SessionStep::ReplicaModeSet { previous });
        }
        self.state = SessionState::ReplicaModeSet;

        Ok(())
    }

    async fn run_step<T>(&self, tx: &mut T, statement: &str) -> RestoreResult<()>
    where
        T: DestinationTransaction,
    {
        debug!(entry = %self.debug_label(), statement, "applying session step");
        tx.execute(statement).await
    }

    /// Undoes the applied session changes in reverse order.
    ///
    /// Every step is attempted even if an earlier one failed; failures are returned together,
    /// behind a [`ErrorKind::SessionTeardownFailed`]. Calling it again once the session is torn
    /// down does nothing.
    pub async fn teardown_session<T>(&mut self, tx: &mut T) -> RestoreResult<()>
    where
        T: DestinationTransaction,
    {
        let mut errors = Vec::new();

        while let Some(step) = self.applied.pop() {
            let statement = step.undo_statement();
            debug!(entry = %self.debug_label(), statement, "undoing session step");

            match tx.execute(&statement).await {
                Ok(()) => self.state = step.undone_state(),
                Err(err) => {
                    warn!(
                        entry = %self.debug_label(),
                        statement,
                        error = %err,
                        "failed to undo session step"
                    );
                    errors.push(err);
                }
            }
        }

        if errors.is_empty() {
            if !self.state.is_terminal() {
                self.state = SessionState::RoleReset;
            }
            return Ok(());
        }

        self.state = SessionState::Aborted;
        errors.insert(
            0,
            restore_error!(
                ErrorKind::SessionTeardownFailed,
                "Session teardown failed",
                format!("{} could not restore its session", self.debug_label())
            ),
        );

        Err(errors.into())
    }

    /// Runs `work` between session setup and teardown.
    ///
    /// Teardown runs on every path once setup succeeded. If `work` fails, a `COPY` it left open
    /// is abandoned and its changes are rolled back to a savepoint before teardown; teardown
    /// failures are then reported after the work error.
    pub async fn in_session<T, W>(&mut self, tx: &mut T, work: &mut W) -> RestoreResult<W::Output>
    where
        T: DestinationTransaction,
        W: SessionWork<S, T>,
    {
        self.setup_session(tx).await?;

        let mut result = match tx.execute(&format!("savepoint {WORK_SAVEPOINT}")).await {
            Ok(()) => {
                self.state = SessionState::Streaming;
                work.run(self, tx).await
            }
            Err(err) => Err(err),
        };

        if result.is_ok() {
            if let Err(err) = tx
                .execute(&format!("release savepoint {WORK_SAVEPOINT}"))
                .await
            {
                result = Err(err);
            }
        }

        let mut errors = Vec::new();
        if let Err(err) = result.as_ref() {
            errors.push(err.clone());

            tx.abort_copy();
            if let Err(rollback_err) = tx
                .execute(&format!("rollback to savepoint {WORK_SAVEPOINT}"))
                .await
            {
                errors.push(rollback_err);
            }
        }

        if let Err(teardown_err) = self.teardown_session(tx).await {
            errors.push(teardown_err);
        }

        if errors.is_empty() {
            return result;
        }
        self.state = SessionState::Aborted;

        Err(errors.into())
    }

    /// Opens the entry's payload, decompressed if it is stored compressed.
    pub async fn fetch_payload(&self) -> RestoreResult<Payload> {
        let Some(key) = self.entry.file_name.clone() else {
            bail!(
                ErrorKind::InvalidData,
                "Entry has no payload",
                format!("{} references no object", self.debug_label())
            );
        };

        let object = self.store.get_object(&key).await?;
        let payload = tokio::task::spawn_blocking(move || Payload::open(key, object)).await??;
        debug!(
            entry = %self.debug_label(),
            key = payload.key(),
            compressed = payload.is_compressed(),
            store = S::name(),
            "payload opened"
        );

        Ok(payload)
    }

    /// Commits the transaction if `result` succeeded, rolls it back otherwise.
    ///
    /// A rollback failure is reported after the original error.
    pub async fn finish<T, O>(&mut self, tx: T, result: RestoreResult<O>) -> RestoreResult<O>
    where
        T: DestinationTransaction,
    {
        match result {
            Ok(output) => match tx.commit().await {
                Ok(()) => {
                    self.state = SessionState::Committed;
                    info!(entry = %self.debug_label(), "entry committed");

                    Ok(output)
                }
                Err(err) => {
                    self.state = SessionState::Aborted;
                    Err(err)
                }
            },
            Err(err) => {
                self.state = SessionState::Aborted;
                error!(entry = %self.debug_label(), error = %err, "entry rolled back");

                match tx.rollback().await {
                    Ok(()) => Err(err),
                    Err(rollback_err) => Err(RestoreError::from(vec![err, rollback_err])),
                }
            }
        }
    }
}
