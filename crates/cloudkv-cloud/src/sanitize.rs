//! Directory sanitizer: bootstraps a local directory before the engine opens.
//!
//! When the reinit oracle rejects the local directory, everything except
//! diagnostic logs is removed and the identity is reseeded from the cloud.
//! A directory seeded from a different source location becomes a clone with
//! its own dbid.

use tracing::{debug, info, warn};

use crate::config::CloudType;
use crate::engine::EngineOptions;
use crate::error::{CloudError, CloudResult};
use crate::filename::{
    current_file, identity_file, IDENTITY_FILE, IDENTITY_TMP_FILE, LOG_FILE_PREFIX,
    PLACEHOLDER_MANIFEST,
};
use crate::reinit::needs_reinitialization;
use crate::session::CloudSession;

/// Where the local identity came from during a reseed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentitySource {
    Dest,
    Src,
}

/// Prepares the session's local directory so the engine can open it.
pub async fn sanitize_directory(
    session: &CloudSession,
    engine_options: &EngineOptions,
    read_only: bool,
) -> CloudResult<()> {
    let options = session.options();
    match options.cloud_type {
        CloudType::None => {
            debug!(dir = ?session.local_dir(), "cloud disabled, skipping sanitize");
            return Ok(());
        }
        CloudType::Aws => {}
        other => {
            return Err(CloudError::NotSupported {
                backend: other.to_string(),
            })
        }
    }

    if session.dest().is_none() {
        if engine_options.max_open_files != -1 {
            return Err(CloudError::InvalidArgument {
                reason: "no destination bucket, set max_open_files = -1".to_string(),
            });
        }
        if !options.keep_local_data_files {
            return Err(CloudError::InvalidArgument {
                reason: "no destination bucket, set keep_local_data_files = true".to_string(),
            });
        }
    }

    if !needs_reinitialization(session).await? {
        info!(dir = ?session.local_dir(), "local directory is good");
        return Ok(());
    }
    warn!(dir = ?session.local_dir(), "local directory cleanup needed");

    clear_local_directory(session, read_only)?;

    let source = match fetch_identity(session).await? {
        Some(source) => source,
        None => {
            info!(
                src = ?session.src(),
                dest = ?session.dest(),
                "no database in src or dest, a new one will be created"
            );
            return Ok(());
        }
    };

    if source == IdentitySource::Src && session.dest().is_some() && !session.dest_equal_src() {
        let dbid = make_clone_identity(session)?;
        info!(dbid = %dbid, dir = ?session.local_dir(), "bootstrapped clone identity");
    }

    let env = session.env();
    let current = current_file(session.local_dir());
    env.write_file(&current, format!("{}\n", PLACEHOLDER_MANIFEST).as_bytes())?;
    debug!(path = ?current, "wrote CURRENT placeholder");
    Ok(())
}

/// Builds a clone dbid: `<src dbid><separator><unique suffix>`.
pub fn clone_dbid(src_dbid: &str, separator: &str, unique_suffix: &str) -> String {
    format!("{}{}{}", src_dbid, separator, unique_suffix)
}

fn clear_local_directory(session: &CloudSession, read_only: bool) -> CloudResult<()> {
    let env = session.env();
    let dir = session.local_dir();

    let entries = match env.list_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.is_not_found() => {
            if read_only {
                return Err(e);
            }
            env.create_dir_if_missing(dir)?;
            debug!(dir = ?dir, "created local directory");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    for entry in entries {
        if entry.name.starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        let path = dir.join(&entry.name);
        match env.delete_file(&path) {
            Ok(()) => info!(path = ?path, "cleaned up local file"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn fetch_identity(session: &CloudSession) -> CloudResult<Option<IdentitySource>> {
    let local = identity_file(session.local_dir());

    if let Some(dest) = session.dest() {
        match session.get_object_to_file(dest, IDENTITY_FILE, &local).await {
            Ok(()) => return Ok(Some(IdentitySource::Dest)),
            Err(e) if e.is_not_found() => {
                debug!(bucket = %dest.bucket, "no IDENTITY in dest");
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(src) = session.src() {
        if !session.dest_equal_src() {
            match session.get_object_to_file(src, IDENTITY_FILE, &local).await {
                Ok(()) => return Ok(Some(IdentitySource::Src)),
                Err(e) if e.is_not_found() => {
                    debug!(bucket = %src.bucket, "no IDENTITY in src");
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(None)
}

fn make_clone_identity(session: &CloudSession) -> CloudResult<String> {
    let env = session.env();
    let dir = session.local_dir();
    let local = identity_file(dir);

    let src_dbid = env.read_to_string(&local)?;
    let new_dbid = clone_dbid(
        src_dbid.trim(),
        &session.options().dbid_separator,
        &env.generate_unique_id(),
    );

    let tmp = dir.join(IDENTITY_TMP_FILE);
    env.write_file(&tmp, new_dbid.as_bytes())?;
    env.rename(&tmp, &local)?;
    Ok(new_dbid)
}
