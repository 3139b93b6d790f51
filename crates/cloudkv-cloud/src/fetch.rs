//! Cloud manifest fetcher.
//!
//! Makes sure a local `CLOUDMANIFEST` exists before it is loaded: the
//! destination copy wins, then the source copy, and a brand-new database gets
//! an empty document.

use tracing::{debug, info};

use crate::cloud_manifest::CloudManifest;
use crate::error::CloudResult;
use crate::filename::{cloud_manifest_file, CLOUD_MANIFEST_FILE};
use crate::session::CloudSession;

/// Where the local `CLOUDMANIFEST` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A local document already existed and no destination is configured.
    AlreadyLocal,
    /// Downloaded from the destination.
    FromDest,
    /// Downloaded from the source.
    FromSrc,
    /// Neither location had one; an empty document was written.
    CreatedEmpty,
}

/// Ensures the local `CLOUDMANIFEST` file exists.
pub async fn fetch_cloud_manifest(session: &CloudSession) -> CloudResult<FetchOutcome> {
    let env = session.env();
    let local = cloud_manifest_file(session.local_dir());

    if session.dest().is_none() && env.exists(&local)? {
        debug!(path = ?local, "using local CLOUDMANIFEST");
        return Ok(FetchOutcome::AlreadyLocal);
    }

    if let Some(dest) = session.dest() {
        match session
            .get_object_to_file(dest, CLOUD_MANIFEST_FILE, &local)
            .await
        {
            Ok(()) => {
                info!(bucket = %dest.bucket, prefix = %dest.object_prefix, "fetched CLOUDMANIFEST from dest");
                return Ok(FetchOutcome::FromDest);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    if let Some(src) = session.src() {
        if !session.dest_equal_src() {
            match session
                .get_object_to_file(src, CLOUD_MANIFEST_FILE, &local)
                .await
            {
                Ok(()) => {
                    info!(bucket = %src.bucket, prefix = %src.object_prefix, "fetched CLOUDMANIFEST from src");
                    return Ok(FetchOutcome::FromSrc);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
    }

    let mut manifest = CloudManifest::new_empty();
    manifest.finalize();
    manifest.write_to_file(env, &local)?;
    info!(path = ?local, "created empty CLOUDMANIFEST for new database");
    Ok(FetchOutcome::CreatedEmpty)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::config::{BucketLocation, CloudEnvOptions};
    use crate::epoch::EpochId;
    use crate::error::CloudError;
    use crate::local_env::LocalEnv;
    use crate::object_store::MockObjectStore;
    use crate::registry::ObjectRegistry;

    fn session(
        dir: &Path,
        src: Option<BucketLocation>,
        dest: Option<BucketLocation>,
    ) -> (Arc<MockObjectStore>, CloudSession) {
        let store = Arc::new(MockObjectStore::new());
        let registry = Arc::new(ObjectRegistry::new(store.clone()));
        let options = CloudEnvOptions {
            src,
            dest,
            ..Default::default()
        };
        (store.clone(), CloudSession::new(options, dir, store, registry))
    }

    fn encoded(start: u64, epoch: &str) -> Vec<u8> {
        let mut manifest = CloudManifest::new_empty();
        manifest.add_epoch(start, EpochId::from_raw(epoch)).unwrap();
        manifest.finalize();
        manifest.encode().unwrap()
    }

    fn load(dir: &Path) -> CloudManifest {
        CloudManifest::load_from_file(&LocalEnv::new(), &dir.join("CLOUDMANIFEST")).unwrap()
    }

    #[tokio::test]
    async fn test_creates_empty_for_new_database() {
        let dir = tempfile::tempdir().unwrap();
        let dest = BucketLocation::new("dest", "db");
        let (_store, session) = session(dir.path(), None, Some(dest));

        let outcome = fetch_cloud_manifest(&session).await.unwrap();
        assert_eq!(outcome, FetchOutcome::CreatedEmpty);
        assert!(load(dir.path()).entries().is_empty());
    }

    #[tokio::test]
    async fn test_local_kept_without_dest() {
        let dir = tempfile::tempdir().unwrap();
        let src = BucketLocation::new("src", "db");
        let (store, session) = session(dir.path(), Some(src), None);
        LocalEnv::new()
            .write_file(
                &dir.path().join("CLOUDMANIFEST"),
                &encoded(3, "aaaaaaaaaaaaaaaa"),
            )
            .unwrap();
        store.insert_object("src", "db/CLOUDMANIFEST", encoded(9, "bbbbbbbbbbbbbbbb"));

        let outcome = fetch_cloud_manifest(&session).await.unwrap();
        assert_eq!(outcome, FetchOutcome::AlreadyLocal);
        assert_eq!(load(dir.path()).current_epoch().as_str(), "aaaaaaaaaaaaaaaa");
        assert_eq!(store.stats().gets, 0);
    }

    #[tokio::test]
    async fn test_dest_preferred_over_src() {
        let dir = tempfile::tempdir().unwrap();
        let src = BucketLocation::new("src", "db");
        let dest = BucketLocation::new("dest", "clone");
        let (store, session) = session(dir.path(), Some(src), Some(dest));
        store.insert_object("src", "db/CLOUDMANIFEST", encoded(3, "aaaaaaaaaaaaaaaa"));
        store.insert_object("dest", "clone/CLOUDMANIFEST", encoded(9, "bbbbbbbbbbbbbbbb"));

        let outcome = fetch_cloud_manifest(&session).await.unwrap();
        assert_eq!(outcome, FetchOutcome::FromDest);
        assert_eq!(load(dir.path()).current_epoch().as_str(), "bbbbbbbbbbbbbbbb");
    }

    #[tokio::test]
    async fn test_falls_back_to_src() {
        let dir = tempfile::tempdir().unwrap();
        let src = BucketLocation::new("src", "db");
        let dest = BucketLocation::new("dest", "clone");
        let (store, session) = session(dir.path(), Some(src), Some(dest));
        store.insert_object("src", "db/CLOUDMANIFEST", encoded(3, "aaaaaaaaaaaaaaaa"));

        let outcome = fetch_cloud_manifest(&session).await.unwrap();
        assert_eq!(outcome, FetchOutcome::FromSrc);
        assert_eq!(load(dir.path()).current_epoch().as_str(), "aaaaaaaaaaaaaaaa");
    }

    #[tokio::test]
    async fn test_dest_overwrites_stale_local() {
        let dir = tempfile::tempdir().unwrap();
        let dest = BucketLocation::new("dest", "db");
        let (store, session) = session(dir.path(), None, Some(dest));
        LocalEnv::new()
            .write_file(
                &dir.path().join("CLOUDMANIFEST"),
                &encoded(3, "aaaaaaaaaaaaaaaa"),
            )
            .unwrap();
        store.insert_object("dest", "db/CLOUDMANIFEST", encoded(9, "bbbbbbbbbbbbbbbb"));

        fetch_cloud_manifest(&session).await.unwrap();
        assert_eq!(load(dir.path()).current_epoch().as_str(), "bbbbbbbbbbbbbbbb");
    }

    #[tokio::test]
    async fn test_transport_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let dest = BucketLocation::new("dest", "db");
        let (store, session) = session(dir.path(), None, Some(dest));
        store.fail_key("db/CLOUDMANIFEST");

        let err = fetch_cloud_manifest(&session).await.unwrap_err();
        assert!(matches!(err, CloudError::Transport { .. }));
        assert!(!dir.path().join("CLOUDMANIFEST").exists());
    }
}
