//! Per-database cloud session.
//!
//! A [`CloudSession`] carries everything the protocol steps share for one
//! local directory: options, the local filesystem, the object store, the
//! dbid registry and the loaded [`CloudManifest`]. It is owned by whoever
//! opens the database and passed explicitly to every step.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::cloud_manifest::CloudManifest;
use crate::config::{BucketLocation, CloudEnvOptions};
use crate::epoch::EpochId;
use crate::error::{CloudError, CloudResult};
use crate::filename::{
    cloud_manifest_file, data_file_with_epoch, manifest_file_with_epoch, manifest_name,
    object_key, parse_file_name, DbFileKind,
};
use crate::local_env::LocalEnv;
use crate::object_store::ObjectStore;
use crate::registry::DbidRegistry;

/// Shared context for one cloud-backed local database directory.
pub struct CloudSession {
    options: CloudEnvOptions,
    local_dir: PathBuf,
    env: LocalEnv,
    store: Arc<dyn ObjectStore>,
    registry: Arc<dyn DbidRegistry>,
    manifest: Option<CloudManifest>,
    // Read by background maintenance, cleared once after open.
    validate_filesize: AtomicBool,
}

impl CloudSession {
    /// Create a session for `local_dir`.
    pub fn new(
        options: CloudEnvOptions,
        local_dir: impl Into<PathBuf>,
        store: Arc<dyn ObjectStore>,
        registry: Arc<dyn DbidRegistry>,
    ) -> Self {
        let validate_filesize = AtomicBool::new(options.validate_filesize);
        Self {
            options,
            local_dir: local_dir.into(),
            env: LocalEnv::new(),
            store,
            registry,
            manifest: None,
            validate_filesize,
        }
    }

    /// Cloud options.
    pub fn options(&self) -> &CloudEnvOptions {
        &self.options
    }

    /// Local database directory.
    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Local filesystem.
    pub fn env(&self) -> &LocalEnv {
        &self.env
    }

    /// Object store handle.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Dbid registry handle.
    pub fn registry(&self) -> &Arc<dyn DbidRegistry> {
        &self.registry
    }

    /// Configured source location.
    pub fn src(&self) -> Option<&BucketLocation> {
        self.options.src()
    }

    /// Configured destination location.
    pub fn dest(&self) -> Option<&BucketLocation> {
        self.options.dest()
    }

    /// True when source and destination are the same location.
    pub fn dest_equal_src(&self) -> bool {
        self.options.dest_equal_src()
    }

    /// Whether data file sizes are still being validated.
    pub fn validate_filesize(&self) -> bool {
        self.validate_filesize.load(Ordering::Relaxed)
    }

    /// Stop validating data file sizes; every file was checked during open.
    pub fn disable_filesize_validation(&self) {
        self.validate_filesize.store(false, Ordering::Relaxed);
    }

    /// True once a cloud manifest is loaded.
    pub fn has_cloud_manifest(&self) -> bool {
        self.manifest.is_some()
    }

    /// The loaded cloud manifest.
    pub fn cloud_manifest(&self) -> CloudResult<&CloudManifest> {
        self.manifest
            .as_ref()
            .ok_or_else(|| CloudError::ManifestNotLoaded {
                local_dir: self.local_dir.clone(),
            })
    }

    /// The loaded cloud manifest, mutably.
    pub fn cloud_manifest_mut(&mut self) -> CloudResult<&mut CloudManifest> {
        let local_dir = &self.local_dir;
        self.manifest
            .as_mut()
            .ok_or_else(|| CloudError::ManifestNotLoaded {
                local_dir: local_dir.clone(),
            })
    }

    /// Replace the in-memory cloud manifest.
    pub fn set_cloud_manifest(&mut self, manifest: CloudManifest) {
        self.manifest = Some(manifest);
    }

    /// Load `CLOUDMANIFEST` from the local directory.
    pub fn load_local_cloud_manifest(&mut self) -> CloudResult<()> {
        let path = cloud_manifest_file(&self.local_dir);
        let manifest = CloudManifest::load_from_file(&self.env, &path)?;
        self.manifest = Some(manifest);
        Ok(())
    }

    /// Current epoch, empty when no manifest is loaded.
    pub fn current_epoch(&self) -> EpochId {
        self.manifest
            .as_ref()
            .map(CloudManifest::current_epoch)
            .unwrap_or_else(EpochId::empty)
    }

    /// Local path of the manifest for the current epoch.
    pub fn local_manifest_path(&self) -> PathBuf {
        manifest_file_with_epoch(&self.local_dir, &self.current_epoch())
    }

    /// Maps an engine file name to the name it is stored under.
    ///
    /// Manifest names resolve to the current epoch's manifest; data files get
    /// the suffix of the epoch owning their number. Other names are unchanged.
    pub fn remap_filename(&self, name: &str) -> String {
        let manifest = match &self.manifest {
            Some(m) => m,
            None => return name.to_string(),
        };
        match parse_file_name(name) {
            DbFileKind::Manifest { .. } => manifest_name(&manifest.current_epoch()),
            DbFileKind::Data { number, epoch } if epoch.is_empty() => {
                data_file_with_epoch(name, &manifest.epoch_for_file(number))
            }
            _ => name.to_string(),
        }
    }

    /// Download object `<location prefix>/<name>` into `local_path`.
    pub async fn get_object_to_file(
        &self,
        location: &BucketLocation,
        name: &str,
        local_path: &Path,
    ) -> CloudResult<()> {
        let key = object_key(&location.object_prefix, name);
        let data = self.store.get_object(&location.bucket, &key).await?;
        self.env.write_file_atomic(local_path, &data)?;
        debug!(
            bucket = %location.bucket,
            key = %key,
            path = ?local_path,
            bytes = data.len(),
            "downloaded object"
        );
        Ok(())
    }

    /// Upload `local_path` as object `<location prefix>/<name>`.
    pub async fn put_file_object(
        &self,
        local_path: &Path,
        location: &BucketLocation,
        name: &str,
    ) -> CloudResult<()> {
        let data = self.env.read_file(local_path)?;
        let key = object_key(&location.object_prefix, name);
        let bytes = data.len();
        self.store.put_object(&location.bucket, &key, data).await?;
        debug!(
            bucket = %location.bucket,
            key = %key,
            path = ?local_path,
            bytes,
            "uploaded object"
        );
        Ok(())
    }
}
