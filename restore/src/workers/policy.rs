use crate::error::{ErrorKind, RestoreError};

/// How far the failure of an entry reaches.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FailureScope {
    /// Only the entry and its dependents are affected.
    Entry,
    /// Every other entry would fail the same way, so the run stops regardless of policy.
    Run,
}

/// Policy describing how a [`RestoreError`] of an entry should be handled by the pipeline.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    scope: FailureScope,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(scope: FailureScope, solution: Option<&'static str>) -> Self {
        Self { scope, solution }
    }

    pub fn scope(&self) -> FailureScope {
        self.scope
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds an [`ErrorHandlingPolicy`] from the kinds carried by `error`.
///
/// Aggregated errors take the widest scope of their parts; the solution of the first part
/// that has one is used.
pub fn build_error_handling_policy(error: &RestoreError) -> ErrorHandlingPolicy {
    let kinds = error.kinds();

    let scope = if kinds.iter().any(|kind| is_run_scoped(*kind)) {
        FailureScope::Run
    } else {
        FailureScope::Entry
    };
    let solution = kinds.iter().find_map(|kind| solution(*kind));

    ErrorHandlingPolicy::new(scope, solution)
}

fn is_run_scoped(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::DestinationConnectionFailed
            | ErrorKind::AuthenticationError
            | ErrorKind::EncryptionError
            | ErrorKind::ConfigError
            | ErrorKind::TransformerNotFound
            | ErrorKind::EntryWorkerPanic
    )
}

fn solution(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::DestinationConnectionFailed => {
            Some("Verify the destination database is reachable and accepts connections.")
        }
        ErrorKind::AuthenticationError => {
            Some("Verify the destination credentials of the login role.")
        }
        ErrorKind::PermissionDenied => Some(
            "Grant the login role membership in the configured superuser role, or disable trigger suppression and replica mode.",
        ),
        ErrorKind::SessionTeardownFailed => Some(
            "The session could not be restored; the transaction was rolled back, verify the connection was discarded.",
        ),
        ErrorKind::ObjectNotFound => {
            Some("Verify the storage path points at the directory holding the dump.")
        }
        ErrorKind::DecompressionFailed => {
            Some("The payload is corrupt or truncated; regenerate the dump.")
        }
        ErrorKind::InvalidParameter | ErrorKind::ColumnNotFound => {
            Some("Fix the transformer configuration of the table.")
        }
        ErrorKind::TransformFailed => Some(
            "Fix the transformer configuration or set `on_transform_error` to `skip_row` to drop failing rows.",
        ),
        ErrorKind::DestinationSchemaError => {
            Some("Verify the destination schema matches the dump, restoring pre-data first.")
        }
        _ => None,
    }
}
