//! Cloud-backed database handle.
//!
//! [`CloudDb::open`] runs the bootstrap sequence before handing the
//! directory to the storage engine:
//!
//! 1. sanitize the local directory
//! 2. migrate a legacy manifest, fetch and load the CLOUDMANIFEST
//! 3. roll a new epoch if needed, then drop invisible local files
//! 4. open the engine and publish the identity to the destination

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cleanup::delete_invisible_files;
use crate::config::CloudConfig;
use crate::engine::{EngineFactory, EngineOptions, StorageEngine};
use crate::error::CloudResult;
use crate::fetch::fetch_cloud_manifest;
use crate::filename::{cloud_manifest_file, identity_file, IDENTITY_FILE};
use crate::migrate::maybe_migrate_manifest_file;
use crate::object_store::ObjectStore;
use crate::registry::ObjectRegistry;
use crate::roll::maybe_roll_new_epoch;
use crate::sanitize::sanitize_directory;
use crate::savepoint::{savepoint, SavepointReport};
use crate::session::CloudSession;

/// Manifest size at which the engine rolls its manifest. Manifests are
/// uploaded on every change, so they are kept small.
pub const MAX_MANIFEST_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// An open cloud-backed database.
pub struct CloudDb {
    session: CloudSession,
    engine: Box<dyn StorageEngine>,
    read_only: bool,
}

impl CloudDb {
    /// Opens the database in the session's local directory.
    pub async fn open(
        mut options: EngineOptions,
        mut session: CloudSession,
        factory: &dyn EngineFactory,
        read_only: bool,
    ) -> CloudResult<Self> {
        sanitize_directory(&session, &options, read_only).await?;

        let local_dir = session.local_dir().to_path_buf();
        if read_only {
            if session.env().exists(&cloud_manifest_file(&local_dir))? {
                session.load_local_cloud_manifest()?;
            }
        } else {
            maybe_migrate_manifest_file(session.env(), &local_dir)?;
            fetch_cloud_manifest(&session).await?;
            session.load_local_cloud_manifest()?;
            maybe_roll_new_epoch(&mut session, factory).await?;

            if let Err(e) = delete_invisible_files(&session) {
                info!(dir = ?local_dir, error = %e, "failed to delete invisible files");
            }
        }

        options.max_manifest_file_size = MAX_MANIFEST_FILE_SIZE;
        let engine = factory.open(&options, &session, read_only)?;

        // Every file was size-checked while opening.
        session.disable_filesize_validation();

        let dbid = engine.identity()?;
        if !read_only {
            publish_identity(&session, &dbid).await?;
        }

        info!(
            dir = ?local_dir,
            dbid = %dbid,
            epoch = %session.current_epoch(),
            read_only,
            "opened cloud db"
        );
        Ok(Self {
            session,
            engine,
            read_only,
        })
    }

    /// Opens a database from a loaded [`CloudConfig`], using an
    /// [`ObjectRegistry`] on `store`.
    pub async fn open_with_config(
        config: &CloudConfig,
        local_dir: impl Into<PathBuf>,
        store: Arc<dyn ObjectStore>,
        factory: &dyn EngineFactory,
        read_only: bool,
    ) -> CloudResult<Self> {
        let registry = Arc::new(ObjectRegistry::new(store.clone()));
        let session = CloudSession::new(config.cloud.clone(), local_dir, store, registry);
        Self::open(config.engine.clone(), session, factory, read_only).await
    }

    /// Copies live data files missing at the destination.
    pub async fn savepoint(&self) -> CloudResult<SavepointReport> {
        savepoint(&self.session, self.engine.as_ref()).await
    }

    /// Flushes the engine.
    pub fn flush(&self) -> CloudResult<()> {
        self.engine.flush()
    }

    /// The database identity.
    pub fn identity(&self) -> CloudResult<String> {
        self.engine.identity()
    }

    /// The session this database was opened with.
    pub fn session(&self) -> &CloudSession {
        &self.session
    }

    /// The underlying engine.
    pub fn engine(&self) -> &dyn StorageEngine {
        self.engine.as_ref()
    }

    /// True if opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl Drop for CloudDb {
    fn drop(&mut self) {
        if self.read_only {
            return;
        }
        if let Err(e) = self.engine.flush() {
            warn!(dir = ?self.session.local_dir(), error = %e, "flush on close failed");
        }
    }
}

/// Uploads the identity and registers `dbid → dest prefix` if the
/// destination registry does not know the dbid yet.
async fn publish_identity(session: &CloudSession, dbid: &str) -> CloudResult<bool> {
    let dest = match session.dest() {
        Some(dest) => dest,
        None => return Ok(false),
    };

    match session.registry().path_for_dbid(&dest.bucket, dbid).await {
        Ok(path) => {
            debug!(dbid = %dbid, path = %path, "dbid already registered in dest");
            return Ok(false);
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let local = identity_file(session.local_dir());
    session.put_file_object(&local, dest, IDENTITY_FILE).await?;
    session
        .registry()
        .register_dbid(&dest.bucket, dbid, dest.normalized_prefix())
        .await?;
    info!(dbid = %dbid, bucket = %dest.bucket, prefix = %dest.normalized_prefix(), "published identity");
    Ok(true)
}
