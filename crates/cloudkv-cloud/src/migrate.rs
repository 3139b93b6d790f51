//! Legacy manifest migration.
//!
//! Databases created before epochs existed keep their manifest under the
//! engine's own numbered name (`MANIFEST-000123`), named by `CURRENT`. The
//! epoch protocol resolves the legacy (empty) epoch to plain `MANIFEST`, so
//! that file is renamed once.

use std::path::Path;

use tracing::{debug, info};

use crate::epoch::EpochId;
use crate::error::CloudResult;
use crate::filename::{current_file, manifest_file_with_epoch};
use crate::local_env::LocalEnv;

/// Renames the manifest named by `CURRENT` to the epoch-less name.
///
/// Returns true if a file was renamed. A missing `CURRENT` or a missing
/// manifest skips the migration.
pub fn maybe_migrate_manifest_file(env: &LocalEnv, dir: &Path) -> CloudResult<bool> {
    let current = current_file(dir);
    if !env.exists(&current)? {
        debug!(dir = ?dir, "no CURRENT file, nothing to migrate");
        return Ok(false);
    }

    let named = env.read_to_string(&current)?;
    let named = named.trim_end_matches('\n').trim();
    if named.is_empty() {
        return Ok(false);
    }

    let from = dir.join(named);
    let to = manifest_file_with_epoch(dir, &EpochId::empty());
    if from == to || !env.exists(&from)? {
        return Ok(false);
    }

    env.rename(&from, &to)?;
    info!(from = ?from, to = ?to, "migrated legacy manifest");
    Ok(true)
}
