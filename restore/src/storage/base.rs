use std::future::Future;
use std::io::Read;

use crate::error::RestoreResult;

/// Raw, possibly compressed, byte stream of a stored object.
pub type ObjectReader = Box<dyn Read + Send>;

/// Read access to the objects of a dump.
///
/// Implementations must report a missing object as [`crate::error::ErrorKind::ObjectNotFound`]
/// and any other failure as [`crate::error::ErrorKind::StorageIoError`], so that a caller can
/// tell a broken dump from a transient storage problem.
pub trait ObjectStore: Clone + Send + Sync + 'static {
    /// Returns the name of the store.
    fn name() -> &'static str;

    /// Opens the object stored under `key`. Keys are relative, `/`-separated paths.
    fn get_object(&self, key: &str) -> impl Future<Output = RestoreResult<ObjectReader>> + Send;
}
