//! Common fixtures for the cloud integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use cloudkv_cloud::filename::{manifest_name, object_key};
use cloudkv_cloud::{
    BucketLocation, CloudDb, CloudEnvOptions, CloudSession, CloudType, EngineOptions, LocalEnv,
    MockEngine, MockEngineFactory, ObjectRegistry, ObjectStore, StorageEngine,
};

/// AWS-flavoured options with full local retention.
pub fn aws_options(src: Option<BucketLocation>, dest: Option<BucketLocation>) -> CloudEnvOptions {
    CloudEnvOptions {
        cloud_type: CloudType::Aws,
        src,
        dest,
        keep_local_data_files: true,
        ..Default::default()
    }
}

/// Session over `store` with an object-backed registry.
pub fn session(dir: &Path, store: Arc<dyn ObjectStore>, options: CloudEnvOptions) -> CloudSession {
    let registry = Arc::new(ObjectRegistry::new(store.clone()));
    CloudSession::new(options, dir, store, registry)
}

/// Opens a writable database.
pub async fn open(
    dir: &Path,
    store: Arc<dyn ObjectStore>,
    options: CloudEnvOptions,
    factory: &MockEngineFactory,
) -> CloudDb {
    CloudDb::open(EngineOptions::default(), session(dir, store, options), factory, false)
        .await
        .unwrap()
}

/// Uploads the engine's live data files and current manifest to `location`,
/// the way the cloud environment mirrors them during normal operation.
pub async fn mirror_engine(
    db: &CloudDb,
    engine: &MockEngine,
    store: &dyn ObjectStore,
    location: &BucketLocation,
) {
    for file in engine.live_files().unwrap() {
        let name = db.session().remap_filename(&file.name);
        let key = object_key(&location.object_prefix, &name);
        store
            .put_object(&location.bucket, &key, vec![file.file_number as u8; 16])
            .await
            .unwrap();
    }
    let manifest = LocalEnv::new().read_file(engine.manifest_path()).unwrap();
    let name = manifest_name(&db.session().current_epoch());
    let key = object_key(&location.object_prefix, &name);
    store.put_object(&location.bucket, &key, manifest).await.unwrap();
}
