//! Error types and result definitions for restore operations.
//!
//! [`RestoreError`] carries a classified [`ErrorKind`], a static description, optional dynamic
//! detail, an optional source and the location where it was raised. Several errors can be
//! aggregated into one, which is how a load failure is reported together with the teardown or
//! rollback failures that followed it.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type of fallible restore operations.
pub type RestoreResult<T> = Result<T, RestoreError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the restore engine.
#[derive(Debug, Clone)]
pub struct RestoreError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Several errors reported together. The first one is the primary error.
    Many {
        errors: Vec<RestoreError>,
        location: &'static Location<'static>,
    },
}

/// Categories of restore failures, grouped by where they originate.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Destination connection and queries
    DestinationConnectionFailed,
    DestinationQueryFailed,
    DestinationSchemaError,
    DestinationLockTimeout,
    DestinationOperationCanceled,
    DestinationIoError,
    DestinationError,

    // Configuration and transformer construction
    ConfigError,
    InvalidParameter,
    ColumnNotFound,
    TransformerNotFound,
    DuplicateTransformer,

    // Per-entry session
    SessionSetupFailed,
    SessionTeardownFailed,

    // Payload and object store
    ObjectNotFound,
    StorageIoError,
    DecompressionFailed,

    // Data and transformation
    InvalidData,
    ConversionError,
    ValidationError,
    TransformFailed,

    // IO and serialization
    IoError,
    DeserializationError,

    // Security
    AuthenticationError,
    PermissionDenied,
    EncryptionError,

    // Run control
    InvalidState,
    DependencyCycle,
    RestoreCanceled,
    EntryWorkerPanic,

    Unknown,
}

impl RestoreError {
    /// Returns the kind of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every kind contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the detail of this error, or the first detail found in an aggregate.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|err| err.detail()),
        }
    }

    /// Returns the static description of this error, or of the first aggregated error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.description())
                .unwrap_or("aggregated errors"),
        }
    }

    /// Returns the aggregated errors, or a single element slice for a single error.
    pub fn errors(&self) -> &[RestoreError] {
        match self.repr {
            ErrorRepr::Single(_) => std::slice::from_ref(self),
            ErrorRepr::Many { ref errors, .. } => errors,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Attaches the originating error. Has no effect on aggregates.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        RestoreError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for RestoreError {
    fn eq(&self, other: &RestoreError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for RestoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_indented(f, "Detail:", detail)?;
                }

                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_indented(f, "Backtrace:", &backtrace)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

fn write_indented(f: &mut fmt::Formatter<'_>, header: &str, body: &str) -> fmt::Result {
    write!(f, "\n  {header}")?;
    if body.trim().is_empty() {
        return write!(f, " <empty>");
    }
    for line in body.lines() {
        write!(f, "\n    {}", line.trim_end())?;
    }

    Ok(())
}

impl error::Error for RestoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for RestoreError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> RestoreError {
        RestoreError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for RestoreError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> RestoreError {
        RestoreError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned unwrapped; nested aggregates are flattened.
impl<E> From<Vec<E>> for RestoreError
where
    E: Into<RestoreError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> RestoreError {
        let location = Location::caller();

        let mut flattened = Vec::with_capacity(errors.len());
        for error in errors {
            let error: RestoreError = error.into();
            match error.repr {
                ErrorRepr::Many { errors, .. } => flattened.extend(errors),
                ErrorRepr::Single(_) => flattened.push(error),
            }
        }

        if flattened.len() == 1 {
            if let Some(error) = flattened.pop() {
                return error;
            }
        }

        RestoreError {
            repr: ErrorRepr::Many {
                errors: flattened,
                location,
            },
        }
    }
}

/// Generates a conversion from a foreign error with a fixed kind and description.
macro_rules! impl_from_error {
    ($error:ty, $kind:expr, $desc:literal) => {
        impl From<$error> for RestoreError {
            #[track_caller]
            fn from(err: $error) -> RestoreError {
                let detail = err.to_string();
                RestoreError::from_components(
                    $kind,
                    Cow::Borrowed($desc),
                    Some(Cow::Owned(detail)),
                    Some(Arc::new(err)),
                )
            }
        }
    };
}

impl_from_error!(std::io::Error, ErrorKind::IoError, "I/O operation failed");
impl_from_error!(
    std::str::Utf8Error,
    ErrorKind::ConversionError,
    "UTF-8 conversion failed"
);
impl_from_error!(
    std::string::FromUtf8Error,
    ErrorKind::ConversionError,
    "UTF-8 string conversion failed"
);
impl_from_error!(
    std::num::ParseIntError,
    ErrorKind::ConversionError,
    "Integer parsing failed"
);
impl_from_error!(
    rustls::Error,
    ErrorKind::EncryptionError,
    "TLS configuration failed"
);
impl_from_error!(
    tokio::task::JoinError,
    ErrorKind::EntryWorkerPanic,
    "Background task failed"
);

impl From<serde_json::Error> for RestoreError {
    #[track_caller]
    fn from(err: serde_json::Error) -> RestoreError {
        let kind = match err.classify() {
            serde_json::error::Category::Io => ErrorKind::IoError,
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => ErrorKind::DeserializationError,
        };

        let detail = err.to_string();
        RestoreError::from_components(
            kind,
            Cow::Borrowed("JSON deserialization failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Classifies Postgres errors by SQLSTATE. Errors without a SQLSTATE come from the connection.
impl From<tokio_postgres::Error> for RestoreError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> RestoreError {
        use tokio_postgres::error::SqlState;

        let (kind, description) = match err.code() {
            Some(state) if *state == SqlState::INSUFFICIENT_PRIVILEGE => (
                ErrorKind::PermissionDenied,
                "Postgres permission denied",
            ),
            Some(state)
                if *state == SqlState::UNDEFINED_TABLE
                    || *state == SqlState::UNDEFINED_COLUMN
                    || *state == SqlState::UNDEFINED_SCHEMA
                    || *state == SqlState::UNDEFINED_OBJECT =>
            {
                (
                    ErrorKind::DestinationSchemaError,
                    "Postgres schema object not found",
                )
            }
            Some(state) if *state == SqlState::LOCK_NOT_AVAILABLE => (
                ErrorKind::DestinationLockTimeout,
                "Postgres lock not available",
            ),
            Some(state) => match &state.code()[..2] {
                "08" => (
                    ErrorKind::DestinationConnectionFailed,
                    "Postgres connection failed",
                ),
                "28" => (
                    ErrorKind::AuthenticationError,
                    "Postgres authentication failed",
                ),
                "22" => (
                    ErrorKind::ConversionError,
                    "Postgres data conversion failed",
                ),
                "23" => (
                    ErrorKind::ValidationError,
                    "Postgres constraint violation",
                ),
                "42" => (
                    ErrorKind::DestinationQueryFailed,
                    "Postgres syntax or access error",
                ),
                "25" | "40" | "55" => (
                    ErrorKind::InvalidState,
                    "Postgres transaction state error",
                ),
                "53" | "54" => (
                    ErrorKind::DestinationQueryFailed,
                    "Postgres resource limit exceeded",
                ),
                "57" => (
                    ErrorKind::DestinationOperationCanceled,
                    "Postgres operation canceled",
                ),
                "58" | "XX" => (ErrorKind::DestinationIoError, "Postgres system error"),
                "F0" => (ErrorKind::ConfigError, "Postgres configuration error"),
                _ => (ErrorKind::DestinationError, "Postgres error"),
            },
            None => (
                ErrorKind::DestinationConnectionFailed,
                "Postgres connection failed",
            ),
        };

        let detail = err.to_string();
        RestoreError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restore_error;

    #[test]
    fn single_error_display_contains_kind_and_detail() {
        let err = restore_error!(
            ErrorKind::ColumnNotFound,
            "Column not found",
            "column with name amount is not found"
        );

        let rendered = err.to_string();
        assert!(rendered.starts_with("[ColumnNotFound] Column not found @ "));
        assert!(rendered.contains("column with name amount is not found"));
        assert_eq!(err.detail(), Some("column with name amount is not found"));
    }

    #[test]
    fn aggregation_keeps_first_error_as_primary() {
        let err: RestoreError = vec![
            restore_error!(ErrorKind::TransformFailed, "Transform failed"),
            restore_error!(ErrorKind::SessionTeardownFailed, "Teardown failed"),
        ]
        .into();

        assert_eq!(err.kind(), ErrorKind::TransformFailed);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::TransformFailed, ErrorKind::SessionTeardownFailed]
        );
        assert_eq!(err.errors().len(), 2);
        assert!(err.to_string().starts_with("[Many] 2 errors aggregated"));
    }

    #[test]
    fn aggregation_of_one_error_is_unwrapped_and_nesting_is_flattened() {
        let single: RestoreError =
            vec![restore_error!(ErrorKind::ObjectNotFound, "Object not found")].into();
        assert_eq!(single.errors().len(), 1);
        assert_eq!(single.kind(), ErrorKind::ObjectNotFound);

        let nested: RestoreError = vec![
            RestoreError::from(vec![
                restore_error!(ErrorKind::InvalidData, "a"),
                restore_error!(ErrorKind::IoError, "b"),
            ]),
            restore_error!(ErrorKind::Unknown, "c"),
        ]
        .into();
        assert_eq!(
            nested.kinds(),
            vec![ErrorKind::InvalidData, ErrorKind::IoError, ErrorKind::Unknown]
        );
    }

    #[test]
    fn source_is_exposed() {
        let io = std::io::Error::other("disk on fire");
        let err = restore_error!(ErrorKind::StorageIoError, "Read failed", source: io);

        let source = error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "disk on fire");
    }
}
