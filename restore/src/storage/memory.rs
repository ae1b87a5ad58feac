use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::bail;
use crate::error::{ErrorKind, RestoreResult};
use crate::storage::{ObjectReader, ObjectStore};

/// Object store keeping objects in memory, for tests and small fixtures.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        let mut objects = self.objects.write().await;
        objects.insert(key.into(), data.into());
    }

    pub async fn remove(&self, key: &str) -> Option<Bytes> {
        let mut objects = self.objects.write().await;
        objects.remove(key)
    }
}

impl ObjectStore for MemoryStore {
    fn name() -> &'static str {
        "memory"
    }

    async fn get_object(&self, key: &str) -> RestoreResult<ObjectReader> {
        let objects = self.objects.read().await;
        let Some(data) = objects.get(key) else {
            bail!(
                ErrorKind::ObjectNotFound,
                "Object not found",
                format!("no object `{key}` in memory store")
            );
        };

        Ok(Box::new(Cursor::new(data.clone())))
    }
}
