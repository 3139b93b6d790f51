//! Local file names and object keys used by the cloud protocol.

use std::path::{Path, PathBuf};

use crate::config::trim_path;
use crate::epoch::EpochId;

/// Name of the file holding the database identity.
pub const IDENTITY_FILE: &str = "IDENTITY";
/// Scratch name used while writing a new identity.
pub const IDENTITY_TMP_FILE: &str = "IDENTITY.tmp";
/// Name of the engine's manifest pointer file.
pub const CURRENT_FILE: &str = "CURRENT";
/// Name of the epoch history document.
pub const CLOUD_MANIFEST_FILE: &str = "CLOUDMANIFEST";
/// Stem shared by every manifest file.
pub const MANIFEST_PREFIX: &str = "MANIFEST";
/// Manifest name the CURRENT file always points at; resolved through the epoch.
pub const PLACEHOLDER_MANIFEST: &str = "MANIFEST-000001";
/// Diagnostic log files start with this prefix and survive reinitialization.
pub const LOG_FILE_PREFIX: &str = "LOG";
/// Extension of engine data (table) files.
pub const DATA_FILE_SUFFIX: &str = ".sst";

/// Path of the identity file in `dir`.
pub fn identity_file(dir: &Path) -> PathBuf {
    dir.join(IDENTITY_FILE)
}

/// Path of the CURRENT file in `dir`.
pub fn current_file(dir: &Path) -> PathBuf {
    dir.join(CURRENT_FILE)
}

/// Path of the CLOUDMANIFEST document in `dir`.
pub fn cloud_manifest_file(dir: &Path) -> PathBuf {
    dir.join(CLOUD_MANIFEST_FILE)
}

/// `MANIFEST-<epoch>`, or plain `MANIFEST` for the empty epoch.
pub fn manifest_name(epoch: &EpochId) -> String {
    if epoch.is_empty() {
        MANIFEST_PREFIX.to_string()
    } else {
        format!("{}-{}", MANIFEST_PREFIX, epoch)
    }
}

/// Path of the manifest file for `epoch` in `dir`.
pub fn manifest_file_with_epoch(dir: &Path, epoch: &EpochId) -> PathBuf {
    dir.join(manifest_name(epoch))
}

/// Object key for `name` under `prefix`.
pub fn object_key(prefix: &str, name: &str) -> String {
    let prefix = trim_path(prefix);
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Classification of a file name found in a database directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbFileKind {
    /// `NNNNNN.sst` with an optional `-<epoch>` suffix.
    Data {
        /// Engine file number.
        number: u64,
        /// Epoch suffix; empty when the name carries none.
        epoch: EpochId,
    },
    /// `MANIFEST` or `MANIFEST-<suffix>`.
    Manifest {
        /// Suffix after the dash; empty for the epoch-less name.
        epoch: EpochId,
    },
    /// `IDENTITY`.
    Identity,
    /// `CURRENT`.
    Current,
    /// `CLOUDMANIFEST`.
    CloudManifest,
    /// Anything else.
    Other,
}

/// Classifies a bare file name (no directory component).
pub fn parse_file_name(name: &str) -> DbFileKind {
    match name {
        IDENTITY_FILE => return DbFileKind::Identity,
        CURRENT_FILE => return DbFileKind::Current,
        CLOUD_MANIFEST_FILE => return DbFileKind::CloudManifest,
        MANIFEST_PREFIX => {
            return DbFileKind::Manifest {
                epoch: EpochId::empty(),
            }
        }
        _ => {}
    }

    if let Some(suffix) = name
        .strip_prefix(MANIFEST_PREFIX)
        .and_then(|rest| rest.strip_prefix('-'))
    {
        if !suffix.is_empty() {
            return DbFileKind::Manifest {
                epoch: EpochId::from_raw(suffix),
            };
        }
    }

    if let Some(pos) = name.find(DATA_FILE_SUFFIX) {
        let (digits, rest) = name.split_at(pos);
        let rest = &rest[DATA_FILE_SUFFIX.len()..];
        let epoch = match rest {
            "" => Some(EpochId::empty()),
            _ => rest.strip_prefix('-').filter(|e| !e.is_empty()).map(EpochId::from_raw),
        };
        if let (Ok(number), Some(epoch)) = (digits.parse::<u64>(), epoch) {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return DbFileKind::Data { number, epoch };
            }
        }
    }

    DbFileKind::Other
}

/// Name of a data file stored under `epoch`.
pub fn data_file_with_epoch(name: &str, epoch: &EpochId) -> String {
    if epoch.is_empty() {
        name.to_string()
    } else {
        format!("{}-{}", name, epoch)
    }
}
