#![warn(missing_docs)]

//! CloudKV cloud subsystem: epoch-versioned manifest sync for a file-based
//! key-value engine whose files are mirrored to an object store.
//!
//! Opening a database bootstraps its local directory from the cloud, decides
//! whether the manifest epoch must roll, and publishes new epochs in a
//! crash-safe order. Savepoints replicate live data files into a destination
//! bucket so clones can be materialized.

pub mod cleanup;
pub mod cloud_manifest;
pub mod config;
pub mod db;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod fetch;
pub mod filename;
pub mod local_env;
pub mod migrate;
pub mod object_store;
pub mod registry;
pub mod reinit;
pub mod roll;
pub mod sanitize;
pub mod savepoint;
pub mod session;
pub mod telemetry;

pub use cleanup::delete_invisible_files;
pub use cloud_manifest::{CloudManifest, EpochEntry, CLOUD_MANIFEST_MAGIC, CLOUD_MANIFEST_VERSION};
pub use config::{BucketLocation, CloudConfig, CloudEnvOptions, CloudType, DEFAULT_DBID_SEPARATOR};
pub use db::{CloudDb, MAX_MANIFEST_FILE_SIZE};
pub use engine::{
    EngineFactory, EngineOptions, LiveFile, MockEngine, MockEngineFactory, MockManifest,
    StorageEngine,
};
pub use epoch::{mint_epoch, EpochId, EPOCH_ID_LEN};
pub use error::{CloudError, CloudResult, ErrorKind};
pub use fetch::{fetch_cloud_manifest, FetchOutcome};
pub use local_env::{FileAttributes, LocalEnv};
pub use migrate::maybe_migrate_manifest_file;
pub use object_store::{
    BoxFuture, LocalObjectStore, MockObjectStore, MockObjectStoreStats, ObjectOp, ObjectStore,
};
pub use registry::{DbidRegistry, ObjectRegistry, REGISTRY_PREFIX};
pub use reinit::needs_reinitialization;
pub use roll::{maybe_roll_new_epoch, RollOutcome};
pub use sanitize::{clone_dbid, sanitize_directory};
pub use savepoint::{savepoint, SavepointReport};
pub use session::CloudSession;
pub use telemetry::init_tracing;
