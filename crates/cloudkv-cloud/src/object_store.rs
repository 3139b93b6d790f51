//! Object store backend for database files.
//!
//! Provides the object store interface the protocol consumes, an in-memory
//! mock for tests, and a directory-backed store for local deployments.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CloudError, CloudResult};

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for object store operations (S3, GCS, Azure Blob, ...).
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. A missing object is [`CloudError::ObjectNotFound`].
    fn get_object<'a>(&'a self, bucket: &'a str, key: &'a str)
        -> BoxFuture<'a, CloudResult<Vec<u8>>>;
    /// Store an object, replacing any previous version.
    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: Vec<u8>,
    ) -> BoxFuture<'a, CloudResult<()>>;
    /// Server-side copy of one object.
    fn copy_object<'a>(
        &'a self,
        src_bucket: &'a str,
        src_key: &'a str,
        dst_bucket: &'a str,
        dst_key: &'a str,
    ) -> BoxFuture<'a, CloudResult<()>>;
    /// Check whether an object exists.
    fn exists<'a>(&'a self, bucket: &'a str, key: &'a str) -> BoxFuture<'a, CloudResult<bool>>;
}

/// One operation observed by [`MockObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOp {
    /// `get_object`.
    Get {
        /// Bucket.
        bucket: String,
        /// Key.
        key: String,
    },
    /// `put_object`.
    Put {
        /// Bucket.
        bucket: String,
        /// Key.
        key: String,
    },
    /// `copy_object`.
    Copy {
        /// Source bucket.
        src_bucket: String,
        /// Source key.
        src_key: String,
        /// Destination bucket.
        dst_bucket: String,
        /// Destination key.
        dst_key: String,
    },
    /// `exists`.
    Exists {
        /// Bucket.
        bucket: String,
        /// Key.
        key: String,
    },
}

/// Statistics for the mock object store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockObjectStoreStats {
    /// Number of put operations.
    pub puts: u64,
    /// Number of get operations.
    pub gets: u64,
    /// Number of copy operations.
    pub copies: u64,
    /// Number of exists checks.
    pub exists_checks: u64,
    /// Number of operations failed by injection.
    pub injected_failures: u64,
}

/// In-memory mock object store for testing.
///
/// Keys registered with [`MockObjectStore::fail_key`] fail every get, put and
/// copy that touches them with a transport error.
#[derive(Default)]
pub struct MockObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    failing_keys: Mutex<HashSet<String>>,
    ops: Mutex<Vec<ObjectOp>>,
    stats: Mutex<MockObjectStoreStats>,
}

impl MockObjectStore {
    /// Create a new mock object store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation touching `key` fail.
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().insert(key.to_string());
    }

    /// Remove all failure injections.
    pub fn clear_failures(&self) {
        self.failing_keys.lock().clear();
    }

    /// Read an object without recording an operation.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Insert an object without recording an operation.
    pub fn insert_object(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), data);
    }

    /// Every operation issued so far, in order.
    pub fn operations(&self) -> Vec<ObjectOp> {
        self.ops.lock().clone()
    }

    /// Forget the recorded operations.
    pub fn clear_operations(&self) {
        self.ops.lock().clear();
    }

    /// Get statistics about store operations.
    pub fn stats(&self) -> MockObjectStoreStats {
        self.stats.lock().clone()
    }

    /// Get the number of stored objects.
    pub fn stored_count(&self) -> usize {
        self.objects.lock().len()
    }

    fn check_injected(&self, bucket: &str, key: &str) -> CloudResult<()> {
        if self.failing_keys.lock().contains(key) {
            self.stats.lock().injected_failures += 1;
            return Err(CloudError::Transport {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl ObjectStore for MockObjectStore {
    fn get_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, CloudResult<Vec<u8>>> {
        self.ops.lock().push(ObjectOp::Get {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.stats.lock().gets += 1;

        let result = self.check_injected(bucket, key).and_then(|()| {
            self.object(bucket, key).ok_or_else(|| CloudError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        });

        Box::pin(async move {
            debug!("Mock get_object: {}/{}", bucket, key);
            result
        })
    }

    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: Vec<u8>,
    ) -> BoxFuture<'a, CloudResult<()>> {
        self.ops.lock().push(ObjectOp::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.stats.lock().puts += 1;

        let result = self
            .check_injected(bucket, key)
            .map(|()| self.insert_object(bucket, key, data));

        Box::pin(async move {
            debug!("Mock put_object: {}/{}", bucket, key);
            result
        })
    }

    fn copy_object<'a>(
        &'a self,
        src_bucket: &'a str,
        src_key: &'a str,
        dst_bucket: &'a str,
        dst_key: &'a str,
    ) -> BoxFuture<'a, CloudResult<()>> {
        self.ops.lock().push(ObjectOp::Copy {
            src_bucket: src_bucket.to_string(),
            src_key: src_key.to_string(),
            dst_bucket: dst_bucket.to_string(),
            dst_key: dst_key.to_string(),
        });
        self.stats.lock().copies += 1;

        let result = self
            .check_injected(src_bucket, src_key)
            .and_then(|()| self.check_injected(dst_bucket, dst_key))
            .and_then(|()| {
                self.object(src_bucket, src_key)
                    .ok_or_else(|| CloudError::ObjectNotFound {
                        bucket: src_bucket.to_string(),
                        key: src_key.to_string(),
                    })
            })
            .map(|data| self.insert_object(dst_bucket, dst_key, data));

        Box::pin(async move {
            debug!(
                "Mock copy_object: {}/{} -> {}/{}",
                src_bucket, src_key, dst_bucket, dst_key
            );
            result
        })
    }

    fn exists<'a>(&'a self, bucket: &'a str, key: &'a str) -> BoxFuture<'a, CloudResult<bool>> {
        self.ops.lock().push(ObjectOp::Exists {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.stats.lock().exists_checks += 1;
        let exists = self.object(bucket, key).is_some();

        Box::pin(async move {
            debug!("Mock exists: {}/{}, result={}", bucket, key, exists);
            Ok(exists)
        })
    }
}

/// Object store kept in a local directory: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }

    async fn write_object(&self, bucket: &str, key: &str, data: &[u8]) -> CloudResult<()> {
        let path = self.object_path(bucket, key);
        let transport = |e: std::io::Error| CloudError::Transport {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(transport)?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".inflight");
        tokio::fs::write(&tmp, data).await.map_err(transport)?;
        tokio::fs::rename(&tmp, &path).await.map_err(transport)?;
        Ok(())
    }

    async fn read_object(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>> {
        match tokio::fs::read(self.object_path(bucket, key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CloudError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(CloudError::Transport {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl ObjectStore for LocalObjectStore {
    fn get_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, CloudResult<Vec<u8>>> {
        Box::pin(self.read_object(bucket, key))
    }

    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: Vec<u8>,
    ) -> BoxFuture<'a, CloudResult<()>> {
        Box::pin(async move { self.write_object(bucket, key, &data).await })
    }

    fn copy_object<'a>(
        &'a self,
        src_bucket: &'a str,
        src_key: &'a str,
        dst_bucket: &'a str,
        dst_key: &'a str,
    ) -> BoxFuture<'a, CloudResult<()>> {
        Box::pin(async move {
            let data = self.read_object(src_bucket, src_key).await?;
            self.write_object(dst_bucket, dst_key, &data).await
        })
    }

    fn exists<'a>(&'a self, bucket: &'a str, key: &'a str) -> BoxFuture<'a, CloudResult<bool>> {
        Box::pin(async move {
            match tokio::fs::metadata(self.object_path(bucket, key)).await {
                Ok(_) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(CloudError::Transport {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            }
        })
    }
}
