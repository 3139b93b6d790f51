//! Dbid registry: maps a database identity to its object prefix in a bucket.
//!
//! The reinitialization check only reads it. Entries are written once, when
//! a database first publishes its identity to a destination.

use std::sync::Arc;

use tracing::debug;

use crate::config::trim_path;
use crate::error::{CloudError, CloudResult};
use crate::object_store::{BoxFuture, ObjectStore};

/// Key prefix under which [`ObjectRegistry`] keeps its entries.
pub const REGISTRY_PREFIX: &str = ".registry/dbid";

/// Lookup and registration of dbid → object prefix mappings.
pub trait DbidRegistry: Send + Sync {
    /// Returns the registered prefix, or [`CloudError::DbidNotRegistered`].
    fn path_for_dbid<'a>(&'a self, bucket: &'a str, dbid: &'a str)
        -> BoxFuture<'a, CloudResult<String>>;
    /// Records `dbid → path` in `bucket`, replacing any previous entry.
    fn register_dbid<'a>(
        &'a self,
        bucket: &'a str,
        dbid: &'a str,
        path: &'a str,
    ) -> BoxFuture<'a, CloudResult<()>>;
}

/// Registry stored as small objects inside each bucket.
pub struct ObjectRegistry {
    store: Arc<dyn ObjectStore>,
}

impl ObjectRegistry {
    /// Create a registry backed by `store`.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Object key holding the entry for `dbid`.
    pub fn entry_key(dbid: &str) -> String {
        format!("{}/{}", REGISTRY_PREFIX, dbid)
    }
}

impl DbidRegistry for ObjectRegistry {
    fn path_for_dbid<'a>(
        &'a self,
        bucket: &'a str,
        dbid: &'a str,
    ) -> BoxFuture<'a, CloudResult<String>> {
        Box::pin(async move {
            if dbid.is_empty() {
                return Err(CloudError::InvalidArgument {
                    reason: "empty dbid".to_string(),
                });
            }
            let key = Self::entry_key(dbid);
            match self.store.get_object(bucket, &key).await {
                Ok(data) => {
                    let path = String::from_utf8_lossy(&data).trim().to_string();
                    debug!(bucket = %bucket, dbid = %dbid, path = %path, "registry lookup");
                    Ok(path)
                }
                Err(e) if e.is_not_found() => Err(CloudError::DbidNotRegistered {
                    bucket: bucket.to_string(),
                    dbid: dbid.to_string(),
                }),
                Err(e) => Err(e),
            }
        })
    }

    fn register_dbid<'a>(
        &'a self,
        bucket: &'a str,
        dbid: &'a str,
        path: &'a str,
    ) -> BoxFuture<'a, CloudResult<()>> {
        Box::pin(async move {
            if dbid.is_empty() {
                return Err(CloudError::InvalidArgument {
                    reason: "empty dbid".to_string(),
                });
            }
            let key = Self::entry_key(dbid);
            self.store
                .put_object(bucket, &key, trim_path(path).as_bytes().to_vec())
                .await?;
            debug!(bucket = %bucket, dbid = %dbid, path = %path, "registered dbid");
            Ok(())
        })
    }
}
