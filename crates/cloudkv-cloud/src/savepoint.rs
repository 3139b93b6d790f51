//! Savepoint: copy every live data file of an open database into the
//! destination location.
//!
//! Files already present at the destination are skipped. The rest are copied
//! server-side by a pool of tasks that claim work through a shared cursor.
//! The first failure is kept and reported; tasks are not cancelled, so copies
//! already claimed by other tasks may still complete.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::BucketLocation;
use crate::engine::StorageEngine;
use crate::error::{CloudError, CloudResult};
use crate::filename::object_key;
use crate::object_store::ObjectStore;
use crate::session::CloudSession;

/// Counts gathered by one savepoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SavepointReport {
    /// Live data files of the engine.
    pub live_files: usize,
    /// Files found at the destination and skipped.
    pub already_present: usize,
    /// Files copied by this call.
    pub copied: usize,
}

/// Copies live data files missing at the destination.
pub async fn savepoint(
    session: &CloudSession,
    engine: &dyn StorageEngine,
) -> CloudResult<SavepointReport> {
    let dbid = engine.identity()?;
    let dest = match session.dest() {
        Some(dest) => dest.clone(),
        None => {
            info!(dbid = %dbid, "savepoint has no destination, nothing to do");
            return Ok(SavepointReport::default());
        }
    };

    let live = engine.live_files()?;
    let mut report = SavepointReport {
        live_files: live.len(),
        ..Default::default()
    };

    let store = session.store().clone();
    let mut to_copy = Vec::new();
    for file in &live {
        let name = session.remap_filename(&file.name);
        let key = object_key(&dest.object_prefix, &name);
        if store.exists(&dest.bucket, &key).await? {
            report.already_present += 1;
        } else {
            to_copy.push(name);
        }
    }

    if to_copy.is_empty() {
        info!(dbid = %dbid, live = report.live_files, "savepoint: destination up to date");
        return Ok(report);
    }

    let src = session
        .src()
        .cloned()
        .ok_or_else(|| CloudError::InvalidArgument {
            reason: "savepoint needs a source location to copy from".to_string(),
        })?;

    let threads = engine.options().max_file_opening_threads;
    info!(
        dbid = %dbid,
        live = report.live_files,
        to_copy = to_copy.len(),
        threads,
        "savepoint started"
    );

    report.copied = if threads <= 1 {
        copy_inline(store.as_ref(), &src, &dest, &to_copy).await?
    } else {
        copy_parallel(store, src, dest, to_copy, threads).await?
    };

    info!(dbid = %dbid, copied = report.copied, "savepoint finished");
    Ok(report)
}

async fn copy_one(
    store: &dyn ObjectStore,
    src: &BucketLocation,
    dest: &BucketLocation,
    name: &str,
) -> CloudResult<()> {
    let src_key = object_key(&src.object_prefix, name);
    let dest_key = object_key(&dest.object_prefix, name);
    let result = store
        .copy_object(&src.bucket, &src_key, &dest.bucket, &dest_key)
        .await;
    match &result {
        Ok(()) => debug!(src_key = %src_key, dest_key = %dest_key, "savepoint copied"),
        Err(e) => warn!(
            src_bucket = %src.bucket,
            src_key = %src_key,
            dest_bucket = %dest.bucket,
            dest_key = %dest_key,
            error = %e,
            "savepoint copy failed"
        ),
    }
    result
}

async fn copy_inline(
    store: &dyn ObjectStore,
    src: &BucketLocation,
    dest: &BucketLocation,
    names: &[String],
) -> CloudResult<usize> {
    for name in names {
        copy_one(store, src, dest, name).await?;
    }
    Ok(names.len())
}

async fn copy_parallel(
    store: Arc<dyn ObjectStore>,
    src: BucketLocation,
    dest: BucketLocation,
    names: Vec<String>,
    threads: usize,
) -> CloudResult<usize> {
    let names = Arc::new(names);
    let src = Arc::new(src);
    let dest = Arc::new(dest);
    let cursor = Arc::new(AtomicUsize::new(0));
    let copied = Arc::new(AtomicUsize::new(0));
    let first_error: Arc<Mutex<Option<CloudError>>> = Arc::new(Mutex::new(None));

    let workers = threads.min(names.len());
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let store = store.clone();
        let names = names.clone();
        let src = src.clone();
        let dest = dest.clone();
        let cursor = cursor.clone();
        let copied = copied.clone();
        let first_error = first_error.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let idx = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(name) = names.get(idx) else {
                    break;
                };
                match copy_one(store.as_ref(), &src, &dest, name).await {
                    Ok(()) => {
                        copied.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        first_error.lock().get_or_insert(e);
                        break;
                    }
                }
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            first_error.lock().get_or_insert(CloudError::TaskFailed {
                reason: e.to_string(),
            });
        }
    }

    if let Some(err) = first_error.lock().take() {
        return Err(err);
    }
    Ok(copied.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::cloud_manifest::CloudManifest;
    use crate::config::CloudEnvOptions;
    use crate::engine::{EngineOptions, LiveFile};
    use crate::epoch::EpochId;
    use crate::object_store::{MockObjectStore, ObjectOp};
    use crate::registry::ObjectRegistry;

    struct FixedEngine {
        files: Vec<LiveFile>,
        options: EngineOptions,
    }

    impl FixedEngine {
        fn new(count: u64, threads: usize) -> Self {
            let files = (1..=count)
                .map(|n| LiveFile {
                    name: format!("{:06}.sst", n),
                    file_number: n,
                    size_bytes: 100,
                })
                .collect();
            Self {
                files,
                options: EngineOptions {
                    max_file_opening_threads: threads,
                    ..Default::default()
                },
            }
        }
    }

    impl StorageEngine for FixedEngine {
        fn flush(&self) -> CloudResult<()> {
            Ok(())
        }

        fn live_files(&self) -> CloudResult<Vec<LiveFile>> {
            Ok(self.files.clone())
        }

        fn identity(&self) -> CloudResult<String> {
            Ok("abc123".to_string())
        }

        fn options(&self) -> &EngineOptions {
            &self.options
        }
    }

    fn session(dir: &Path, with_dest: bool) -> (Arc<MockObjectStore>, CloudSession) {
        let store = Arc::new(MockObjectStore::new());
        let registry = Arc::new(ObjectRegistry::new(store.clone()));
        let options = CloudEnvOptions {
            src: Some(BucketLocation::new("src", "origin")),
            dest: with_dest.then(|| BucketLocation::new("dest", "clone")),
            ..Default::default()
        };
        (store.clone(), CloudSession::new(options, dir, store, registry))
    }

    fn seed_src(store: &MockObjectStore, count: u64) {
        for n in 1..=count {
            store.insert_object("src", &format!("origin/{:06}.sst", n), vec![n as u8]);
        }
    }

    fn copy_count(store: &MockObjectStore) -> usize {
        store
            .operations()
            .iter()
            .filter(|op| matches!(op, ObjectOp::Copy { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_no_dest_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = session(dir.path(), false);
        let report = savepoint(&session, &FixedEngine::new(3, 4)).await.unwrap();
        assert_eq!(report, SavepointReport::default());
        assert!(store.operations().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_copies_only_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = session(dir.path(), true);
        seed_src(&store, 6);
        store.insert_object("dest", "clone/000002.sst", vec![2]);
        store.insert_object("dest", "clone/000005.sst", vec![5]);

        let report = savepoint(&session, &FixedEngine::new(6, 4)).await.unwrap();
        assert_eq!(
            report,
            SavepointReport {
                live_files: 6,
                already_present: 2,
                copied: 4,
            }
        );
        assert_eq!(copy_count(&store), 4);
        for n in 1..=6u8 {
            let key = format!("clone/{:06}.sst", n);
            assert_eq!(store.object("dest", &key), Some(vec![n]));
        }
    }

    #[tokio::test]
    async fn test_single_thread_copies_inline() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = session(dir.path(), true);
        seed_src(&store, 3);

        let report = savepoint(&session, &FixedEngine::new(3, 1)).await.unwrap();
        assert_eq!(report.copied, 3);
        assert_eq!(copy_count(&store), 3);
    }

    #[tokio::test]
    async fn test_up_to_date_dest_issues_no_copies() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = session(dir.path(), true);
        for n in 1..=3 {
            store.insert_object("dest", &format!("clone/{:06}.sst", n), vec![]);
        }
        let report = savepoint(&session, &FixedEngine::new(3, 8)).await.unwrap();
        assert_eq!(report.already_present, 3);
        assert_eq!(copy_count(&store), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_first_error_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = session(dir.path(), true);
        seed_src(&store, 8);
        store.fail_key("origin/000004.sst");

        let err = savepoint(&session, &FixedEngine::new(8, 4)).await.unwrap_err();
        match err {
            CloudError::Transport { key, .. } => assert_eq!(key, "origin/000004.sst"),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(store.object("dest", "clone/000004.sst").is_none());
    }

    #[tokio::test]
    async fn test_first_error_reported_inline() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = session(dir.path(), true);
        seed_src(&store, 4);
        store.fail_key("origin/000002.sst");

        let err = savepoint(&session, &FixedEngine::new(4, 0)).await.unwrap_err();
        assert!(matches!(err, CloudError::Transport { .. }));
        assert_eq!(copy_count(&store), 2);
    }

    #[tokio::test]
    async fn test_names_are_remapped_to_epochs() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut session) = session(dir.path(), true);
        let mut manifest = CloudManifest::new_empty();
        manifest
            .add_epoch(2, EpochId::from_raw("aaaaaaaaaaaaaaaa"))
            .unwrap();
        session.set_cloud_manifest(manifest);
        store.insert_object("src", "origin/000001.sst", vec![1]);
        store.insert_object("src", "origin/000002.sst-aaaaaaaaaaaaaaaa", vec![2]);

        let report = savepoint(&session, &FixedEngine::new(2, 2)).await.unwrap();
        assert_eq!(report.copied, 2);
        assert!(store.object("dest", "clone/000001.sst").is_some());
        assert!(store
            .object("dest", "clone/000002.sst-aaaaaaaaaaaaaaaa")
            .is_some());
    }
}
