//! Shorthands for building and returning [`crate::error::RestoreError`]s.

/// Creates a [`crate::error::RestoreError`] from a kind and a static description.
///
/// Optional dynamic detail is given either positionally (anything implementing `Display`) or
/// as `detail = <String>` to move an owned string in. A trailing `source: <error>` attaches the
/// originating error.
#[macro_export]
macro_rules! restore_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::RestoreError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::RestoreError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::RestoreError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::RestoreError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::RestoreError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::RestoreError::from(($kind, $desc, $detail.to_string()))
            .with_source($source)
    };
}

/// Returns early with a [`crate::error::RestoreError`], accepting the same arguments as
/// [`restore_error!`].
#[macro_export]
macro_rules! bail {
    ($($args:tt)+) => {
        return ::core::result::Result::Err($crate::restore_error!($($args)+))
    };
}
