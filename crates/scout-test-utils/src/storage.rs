//! Test storage with operation tracing and failure injection.
//!
//! Wraps [`MemoryBackend`] so persisted state can still be dumped and compared.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use scout_core::error::{Error, Result};
use scout_core::storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Head operation.
    Head {
        /// Path that was checked.
        path: String,
    },
    /// Put operation.
    Put {
        /// Path that was written.
        path: String,
        /// Size of data written.
        size: usize,
    },
    /// Delete operation.
    Delete {
        /// Path that was deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
}

impl StorageOp {
    /// Returns true for operations that change stored state.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Put { .. } | Self::Delete { .. })
    }
}

/// In-memory storage backend that records operations and fails writes on
/// demand.
///
/// Clones share objects, operations and injected failures.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    inner: MemoryBackend,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_writes: Arc<Mutex<Vec<String>>>,
}

impl TracingMemoryBackend {
    /// Creates a new empty tracing storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().unwrap().clone()
    }

    /// Returns only the recorded writes.
    pub fn writes(&self) -> Vec<StorageOp> {
        self.operations().into_iter().filter(StorageOp::is_write).collect()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().unwrap().clear();
    }

    /// Makes puts and deletes under `prefix` fail with a storage error.
    pub fn fail_writes_under(&self, prefix: impl Into<String>) {
        self.fail_writes.lock().unwrap().push(prefix.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_writes.lock().unwrap().clear();
    }

    /// Returns every stored object, keyed by path.
    pub fn dump(&self) -> BTreeMap<String, Bytes> {
        self.inner.dump().unwrap()
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().unwrap().push(op);
    }

    fn check_write(&self, path: &str) -> Result<()> {
        let fail = self.fail_writes.lock().unwrap();
        if fail.iter().any(|p| path.starts_with(p.as_str())) {
            return Err(Error::storage(format!("injected write failure for {path}")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.record(StorageOp::Get {
            path: path.to_string(),
        });
        self.inner.get(path).await
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.check_write(path)?;
        self.record(StorageOp::Put {
            path: path.to_string(),
            size: data.len(),
        });
        self.inner.put(path, data, precondition).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_write(path)?;
        self.record(StorageOp::Delete {
            path: path.to_string(),
        });
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.record(StorageOp::List {
            prefix: prefix.to_string(),
        });
        self.inner.list(prefix).await
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.record(StorageOp::Head {
            path: path.to_string(),
        });
        self.inner.head(path).await
    }
}
