use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, RestoreResult};
use crate::restore_error;
use crate::storage::{ObjectReader, ObjectStore};

/// Object store backed by a local directory holding the dump.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: Arc<PathBuf>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `key` below the root. Keys that could escape the root are rejected.
    fn resolve(&self, key: &str) -> RestoreResult<PathBuf> {
        let relative = Path::new(key);
        let is_contained = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));

        if !is_contained {
            bail!(
                ErrorKind::StorageIoError,
                "Invalid object key",
                format!("object key `{key}` is not a relative path inside the store")
            );
        }

        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalStore {
    fn name() -> &'static str {
        "local"
    }

    async fn get_object(&self, key: &str) -> RestoreResult<ObjectReader> {
        let path = self.resolve(key)?;
        debug!(path = %path.display(), "opening object");

        let opened = tokio::task::spawn_blocking({
            let path = path.clone();
            move || File::open(path)
        })
        .await?;

        match opened {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(restore_error!(
                ErrorKind::ObjectNotFound,
                "Object not found",
                format!("no object `{key}` in {}", self.root.display()),
                source: err
            )),
            Err(err) => Err(restore_error!(
                ErrorKind::StorageIoError,
                "Failed to open object",
                format!("object `{key}` at {}", path.display()),
                source: err
            )),
        }
    }
}
