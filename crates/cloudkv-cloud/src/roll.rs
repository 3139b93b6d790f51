//! Epoch roller.
//!
//! Keeps the local manifest in step with the epoch recorded in the cloud
//! manifest. When the local file for the recorded epoch is missing, another
//! writer may have advanced the database, so a fresh epoch is minted and
//! published. Publication order is fixed: the renamed manifest object goes to
//! the destination before the CLOUDMANIFEST that points at it, so a reader of
//! the destination never resolves a dangling epoch.

use tracing::{debug, info};

use crate::engine::EngineFactory;
use crate::epoch::{mint_epoch, EpochId};
use crate::error::CloudResult;
use crate::filename::{
    cloud_manifest_file, manifest_file_with_epoch, manifest_name, CLOUD_MANIFEST_FILE,
    PLACEHOLDER_MANIFEST,
};
use crate::session::CloudSession;

/// Result of [`maybe_roll_new_epoch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollOutcome {
    /// The local manifest already matched the recorded epoch.
    Unchanged {
        /// The current epoch.
        epoch: EpochId,
    },
    /// A new epoch was appended and published.
    Rolled {
        /// Epoch current before the roll; empty for legacy databases.
        old_epoch: EpochId,
        /// The new current epoch.
        new_epoch: EpochId,
        /// Highest file number in the old manifest; zero for a new database.
        max_file_number: u64,
    },
}

impl RollOutcome {
    /// Epoch current after the call.
    pub fn current_epoch(&self) -> &EpochId {
        match self {
            RollOutcome::Unchanged { epoch } => epoch,
            RollOutcome::Rolled { new_epoch, .. } => new_epoch,
        }
    }
}

/// Rolls a new epoch if the local manifest for the current one is missing.
///
/// The session must have a cloud manifest loaded. On success the in-memory
/// manifest is finalized.
pub async fn maybe_roll_new_epoch(
    session: &mut CloudSession,
    factory: &dyn EngineFactory,
) -> CloudResult<RollOutcome> {
    let old_epoch = session.cloud_manifest()?.current_epoch();
    let dir = session.local_dir().to_path_buf();
    let old_path = manifest_file_with_epoch(&dir, &old_epoch);

    let exists = session.env().exists(&old_path)?;
    if exists && !old_epoch.is_empty() {
        session.cloud_manifest_mut()?.finalize();
        debug!(epoch = %old_epoch, "local manifest matches current epoch, no roll");
        return Ok(RollOutcome::Unchanged { epoch: old_epoch });
    }

    if !exists && !old_epoch.is_empty() {
        let fetched = fetch_epoch_manifest(session, &old_epoch).await?;
        debug!(epoch = %old_epoch, fetched, "local manifest for current epoch missing");
    }

    let placeholder = dir.join(session.remap_filename(PLACEHOLDER_MANIFEST));
    let max_file_number = match factory.max_file_number(session.env(), &placeholder) {
        Ok(n) => n,
        Err(e) if e.is_not_found() => {
            debug!(path = ?placeholder, "no manifest, new database");
            0
        }
        Err(e) => return Err(e),
    };

    let new_epoch = mint_epoch(&session.env().generate_unique_id());
    {
        let manifest = session.cloud_manifest_mut()?;
        manifest.add_epoch(max_file_number, new_epoch.clone())?;
        manifest.finalize();
    }

    let new_path = manifest_file_with_epoch(&dir, &new_epoch);
    if max_file_number > 0 {
        session.env().rename(&old_path, &new_path)?;
    }

    let cloud_manifest_path = cloud_manifest_file(&dir);
    if let Some(dest) = session.dest() {
        if max_file_number > 0 {
            session
                .put_file_object(&new_path, dest, &manifest_name(&new_epoch))
                .await?;
        }
        session
            .cloud_manifest()?
            .write_to_file(session.env(), &cloud_manifest_path)?;
        session
            .put_file_object(&cloud_manifest_path, dest, CLOUD_MANIFEST_FILE)
            .await?;
    } else {
        session
            .cloud_manifest()?
            .write_to_file(session.env(), &cloud_manifest_path)?;
    }

    info!(
        old_epoch = %old_epoch,
        new_epoch = %new_epoch,
        max_file_number,
        dir = ?dir,
        "rolled new epoch"
    );
    Ok(RollOutcome::Rolled {
        old_epoch,
        new_epoch,
        max_file_number,
    })
}

/// Downloads `MANIFEST-<epoch>` from the destination, then the source.
async fn fetch_epoch_manifest(session: &CloudSession, epoch: &EpochId) -> CloudResult<bool> {
    let name = manifest_name(epoch);
    let local = session.local_dir().join(&name);

    let mut locations = Vec::with_capacity(2);
    if let Some(dest) = session.dest() {
        locations.push(dest);
    }
    if let Some(src) = session.src() {
        if !session.dest_equal_src() {
            locations.push(src);
        }
    }

    for location in locations {
        match session.get_object_to_file(location, &name, &local).await {
            Ok(()) => {
                info!(bucket = %location.bucket, name = %name, "fetched manifest for current epoch");
                return Ok(true);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    debug!(name = %name, "manifest for current epoch not found in cloud");
    Ok(false)
}
