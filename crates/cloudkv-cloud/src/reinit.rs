//! Directory reinitialization oracle.
//!
//! Decides whether a local working directory can be resumed as-is or must be
//! wiped and reseeded from the cloud. Only the registry is consulted; nothing
//! is written.

use tracing::{debug, info};

use crate::config::{trim_path, BucketLocation};
use crate::error::{CloudError, CloudResult};
use crate::filename::{current_file, identity_file};
use crate::session::CloudSession;

/// Returns true when the local directory must be reinitialized.
///
/// Missing local state (directory, `CURRENT` or `IDENTITY`) means reinit.
/// A destination registry entry that disagrees with the configured
/// destination prefix is a [`CloudError::DestPathMismatch`].
pub async fn needs_reinitialization(session: &CloudSession) -> CloudResult<bool> {
    let local_dir = session.local_dir();
    let src = session.src();
    let dest = session.dest();

    if src.is_none() && dest.is_none() {
        debug!(dir = ?local_dir, "no src or dest configured, reinit not possible");
        return Ok(false);
    }

    let env = session.env();
    for path in [
        local_dir.to_path_buf(),
        current_file(local_dir),
        identity_file(local_dir),
    ] {
        if !env.exists(&path)? {
            info!(dir = ?local_dir, missing = ?path, "local state missing, reinit needed");
            return Ok(true);
        }
    }

    let local_dbid = match env.read_to_string(&identity_file(local_dir)) {
        Ok(raw) => raw.trim().to_string(),
        Err(e) if e.is_not_found() => return Ok(true),
        Err(e) => return Err(e),
    };
    if local_dbid.is_empty() {
        info!(dir = ?local_dir, "local IDENTITY is empty, reinit needed");
        return Ok(true);
    }

    let src_path = match src {
        Some(loc) => registered_path(session, loc, &local_dbid).await?,
        None => None,
    };
    let dest_path = match dest {
        Some(loc) => registered_path(session, loc, &local_dbid).await?,
        None => None,
    };
    debug!(
        dbid = %local_dbid,
        src_path = ?src_path,
        dest_path = ?dest_path,
        "registry entries for local dbid"
    );

    if let (Some(loc), Some(registered)) = (dest, dest_path.as_deref()) {
        if registered != loc.normalized_prefix() {
            return Err(CloudError::DestPathMismatch {
                dbid: local_dbid,
                bucket: loc.bucket.clone(),
                configured: loc.normalized_prefix().to_string(),
                registered: registered.to_string(),
            });
        }
    }

    // Registered at the source location itself: this directory holds the
    // origin database, which cannot be resumed against a different destination.
    let is_origin = matches!(
        (src, src_path.as_deref()),
        (Some(loc), Some(registered)) if registered == loc.normalized_prefix()
    );
    if is_origin && dest.is_some() && !session.dest_equal_src() {
        info!(
            dbid = %local_dbid,
            "local dbid belongs to src but dest differs, reinit needed"
        );
        return Ok(true);
    }

    if src_path.is_none() && dest_path.is_none() {
        info!(dbid = %local_dbid, "local dbid not registered, reinit needed");
        return Ok(true);
    }

    info!(dbid = %local_dbid, dir = ?local_dir, "local directory is usable");
    Ok(false)
}

async fn registered_path(
    session: &CloudSession,
    location: &BucketLocation,
    dbid: &str,
) -> CloudResult<Option<String>> {
    match session
        .registry()
        .path_for_dbid(&location.bucket, dbid)
        .await
    {
        Ok(path) => Ok(Some(trim_path(&path).to_string())),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
