//! Removal of local files no epoch can see any more.
//!
//! After a roll, manifests of superseded epochs and data files written under
//! an epoch that does not own their number are invisible to the engine.
//! Only epochs recorded in this database's history are considered; files
//! carrying an unknown epoch may belong to another writer and are kept.

use tracing::{debug, info};

use crate::error::CloudResult;
use crate::filename::{parse_file_name, DbFileKind};
use crate::session::CloudSession;

/// Deletes invisible local files and returns how many were removed.
pub fn delete_invisible_files(session: &CloudSession) -> CloudResult<usize> {
    let manifest = session.cloud_manifest()?;
    let current = manifest.current_epoch();
    let env = session.env();
    let dir = session.local_dir();

    let mut deleted = 0;
    for entry in env.list_dir(dir)? {
        let invisible = match parse_file_name(&entry.name) {
            DbFileKind::Manifest { epoch } => {
                !epoch.is_empty() && epoch != current && manifest.contains_epoch(&epoch)
            }
            DbFileKind::Data { number, epoch } => {
                !epoch.is_empty()
                    && manifest.contains_epoch(&epoch)
                    && manifest.epoch_for_file(number) != epoch
            }
            _ => false,
        };
        if !invisible {
            continue;
        }
        let path = dir.join(&entry.name);
        match env.delete_file(&path) {
            Ok(()) => {
                debug!(path = ?path, "deleted invisible file");
                deleted += 1;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    if deleted > 0 {
        info!(dir = ?dir, deleted, epoch = %current, "removed invisible local files");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cloud_manifest::CloudManifest;
    use crate::config::CloudEnvOptions;
    use crate::epoch::EpochId;
    use crate::local_env::LocalEnv;
    use crate::object_store::MockObjectStore;
    use crate::registry::ObjectRegistry;

    #[test]
    fn test_deletes_only_superseded_files() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnv::new();
        let store = Arc::new(MockObjectStore::new());
        let registry = Arc::new(ObjectRegistry::new(store.clone()));
        let mut session = CloudSession::new(CloudEnvOptions::default(), dir.path(), store, registry);

        let mut manifest = CloudManifest::new_empty();
        manifest
            .add_epoch(5, EpochId::from_raw("aaaaaaaaaaaaaaaa"))
            .unwrap();
        manifest
            .add_epoch(10, EpochId::from_raw("bbbbbbbbbbbbbbbb"))
            .unwrap();
        session.set_cloud_manifest(manifest);

        let files = [
            "MANIFEST-aaaaaaaaaaaaaaaa",  // superseded
            "MANIFEST-bbbbbbbbbbbbbbbb",  // current
            "MANIFEST-cccccccccccccccc",  // unknown writer
            "000006.sst-aaaaaaaaaaaaaaaa", // visible
            "000011.sst-aaaaaaaaaaaaaaaa", // written after the roll by the old epoch
            "000011.sst-bbbbbbbbbbbbbbbb", // visible
            "000012.sst-cccccccccccccccc", // unknown writer
            "000003.sst",
            "IDENTITY",
            "LOG",
        ];
        for name in files {
            env.write_file(&dir.path().join(name), b"x").unwrap();
        }

        assert_eq!(delete_invisible_files(&session).unwrap(), 2);
        assert!(!dir.path().join("MANIFEST-aaaaaaaaaaaaaaaa").exists());
        assert!(!dir.path().join("000011.sst-aaaaaaaaaaaaaaaa").exists());
        for name in files
            .iter()
            .filter(|n| **n != "MANIFEST-aaaaaaaaaaaaaaaa" && **n != "000011.sst-aaaaaaaaaaaaaaaa")
        {
            assert!(dir.path().join(name).exists(), "{} was removed", name);
        }

        assert_eq!(delete_invisible_files(&session).unwrap(), 0);
    }

    #[test]
    fn test_requires_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockObjectStore::new());
        let registry = Arc::new(ObjectRegistry::new(store.clone()));
        let session = CloudSession::new(CloudEnvOptions::default(), dir.path(), store, registry);
        assert!(delete_invisible_files(&session).is_err());
    }
}
