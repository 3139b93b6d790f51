//! CLOUDMANIFEST: the epoch history of one database.
//!
//! The document is an ordered list of `(start file number, epoch)` entries.
//! Files numbered below the first entry belong to the legacy empty epoch;
//! every other file belongs to the last entry whose start is not above its
//! number. The last entry is the current epoch.
//!
//! On disk the document is a record log:
//!
//! ```text
//! [crc32 u32 LE][len u32 LE][bincode payload]   Header { magic, version }
//! [crc32 u32 LE][len u32 LE][bincode payload]   Epoch { start, epoch } ...
//! [crc32 u32 LE][len u32 LE][bincode payload]   Seal { epoch_count }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::epoch::EpochId;
use crate::error::{CloudError, CloudResult};
use crate::local_env::LocalEnv;

/// Magic number in the header record: "CKVM".
pub const CLOUD_MANIFEST_MAGIC: u32 = 0x434b_564d;
/// Current document format version.
pub const CLOUD_MANIFEST_VERSION: u32 = 1;

const RECORD_HEADER_LEN: usize = 8;

/// One epoch transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochEntry {
    /// First engine file number owned by this epoch.
    pub start_file_number: u64,
    /// The epoch id.
    pub epoch: EpochId,
}

#[derive(Debug, Serialize, Deserialize)]
enum ManifestRecord {
    Header { magic: u32, version: u32 },
    Epoch { start: u64, epoch: EpochId },
    Seal { epoch_count: u64 },
}

/// In-memory epoch history.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloudManifest {
    entries: Vec<EpochEntry>,
    finalized: bool,
}

impl CloudManifest {
    /// A document with no epochs, describing a brand-new database.
    pub fn new_empty() -> Self {
        Self::default()
    }

    /// Current epoch: the last entry, or the empty epoch when there is none.
    pub fn current_epoch(&self) -> EpochId {
        self.entries
            .last()
            .map(|e| e.epoch.clone())
            .unwrap_or_else(EpochId::empty)
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[EpochEntry] {
        &self.entries
    }

    /// True once [`CloudManifest::finalize`] was called.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Freezes the document. Idempotent.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Appends an epoch starting at `start_file_number`.
    ///
    /// A start equal to the current last start replaces that entry's epoch:
    /// the superseded epoch never owned a file.
    pub fn add_epoch(&mut self, start_file_number: u64, epoch: EpochId) -> CloudResult<()> {
        if self.finalized {
            return Err(CloudError::ManifestFinalized);
        }
        if let Some(last) = self.entries.last_mut() {
            if start_file_number < last.start_file_number {
                return Err(CloudError::InvalidArgument {
                    reason: format!(
                        "epoch start {} precedes current epoch start {}",
                        start_file_number, last.start_file_number
                    ),
                });
            }
            if start_file_number == last.start_file_number {
                debug!(
                    start = start_file_number,
                    replaced = %last.epoch,
                    epoch = %epoch,
                    "replacing empty epoch"
                );
                last.epoch = epoch;
                return Ok(());
            }
        }
        self.entries.push(EpochEntry {
            start_file_number,
            epoch,
        });
        Ok(())
    }

    /// Epoch that owns engine file `file_number`.
    pub fn epoch_for_file(&self, file_number: u64) -> EpochId {
        self.entries
            .iter()
            .rev()
            .find(|e| e.start_file_number <= file_number)
            .map(|e| e.epoch.clone())
            .unwrap_or_else(EpochId::empty)
    }

    /// True if `epoch` appears anywhere in the history.
    pub fn contains_epoch(&self, epoch: &EpochId) -> bool {
        self.entries.iter().any(|e| &e.epoch == epoch)
    }

    /// Serializes the sealed record log. Requires a finalized document.
    pub fn encode(&self) -> CloudResult<Vec<u8>> {
        if !self.finalized {
            return Err(CloudError::ManifestNotFinalized);
        }

        let mut out = Vec::new();
        append_record(
            &mut out,
            &ManifestRecord::Header {
                magic: CLOUD_MANIFEST_MAGIC,
                version: CLOUD_MANIFEST_VERSION,
            },
        )?;
        for entry in &self.entries {
            append_record(
                &mut out,
                &ManifestRecord::Epoch {
                    start: entry.start_file_number,
                    epoch: entry.epoch.clone(),
                },
            )?;
        }
        append_record(
            &mut out,
            &ManifestRecord::Seal {
                epoch_count: self.entries.len() as u64,
            },
        )?;
        Ok(out)
    }

    /// Parses a sealed record log. The result is not finalized.
    pub fn decode(data: &[u8]) -> CloudResult<Self> {
        let mut offset = 0;
        let mut records = Vec::new();
        while offset < data.len() {
            let (record, next) = read_record(data, offset)?;
            records.push(record);
            offset = next;
        }

        let mut iter = records.into_iter();
        match iter.next() {
            Some(ManifestRecord::Header { magic, version }) => {
                if magic != CLOUD_MANIFEST_MAGIC {
                    return Err(corrupted(format!("invalid magic {:#x}", magic)));
                }
                if version != CLOUD_MANIFEST_VERSION {
                    return Err(corrupted(format!("unsupported version {}", version)));
                }
            }
            Some(_) => return Err(corrupted("first record is not a header".to_string())),
            None => return Err(corrupted("empty document".to_string())),
        }

        let mut manifest = CloudManifest::new_empty();
        let mut sealed = false;
        for record in iter {
            if sealed {
                return Err(corrupted("record after seal".to_string()));
            }
            match record {
                ManifestRecord::Epoch { start, epoch } => {
                    if let Some(last) = manifest.entries.last() {
                        if start <= last.start_file_number {
                            return Err(corrupted(format!(
                                "epoch start {} not above {}",
                                start, last.start_file_number
                            )));
                        }
                    }
                    manifest.entries.push(EpochEntry {
                        start_file_number: start,
                        epoch,
                    });
                }
                ManifestRecord::Seal { epoch_count } => {
                    if epoch_count != manifest.entries.len() as u64 {
                        return Err(corrupted(format!(
                            "seal counts {} epochs, found {}",
                            epoch_count,
                            manifest.entries.len()
                        )));
                    }
                    sealed = true;
                }
                ManifestRecord::Header { .. } => {
                    return Err(corrupted("duplicate header".to_string()));
                }
            }
        }

        if !sealed {
            return Err(corrupted("missing seal record".to_string()));
        }
        Ok(manifest)
    }

    /// Writes the document to a local file through a temp file and rename.
    pub fn write_to_file(&self, env: &LocalEnv, path: &Path) -> CloudResult<()> {
        let bytes = self.encode()?;
        env.write_file_atomic(path, &bytes)?;
        debug!(path = ?path, epochs = self.entries.len(), "wrote cloud manifest");
        Ok(())
    }

    /// Loads the document from a local file.
    pub fn load_from_file(env: &LocalEnv, path: &Path) -> CloudResult<Self> {
        let bytes = env.read_file(path)?;
        let manifest = Self::decode(&bytes)?;
        debug!(
            path = ?path,
            epochs = manifest.entries.len(),
            current = %manifest.current_epoch(),
            "loaded cloud manifest"
        );
        Ok(manifest)
    }
}

fn corrupted(reason: String) -> CloudError {
    CloudError::CorruptedManifest { reason }
}

fn append_record(out: &mut Vec<u8>, record: &ManifestRecord) -> CloudResult<()> {
    let payload = bincode::serialize(record).map_err(|e| corrupted(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| corrupted(format!("record too large: {} bytes", payload.len())))?;
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

fn read_record(data: &[u8], offset: usize) -> CloudResult<(ManifestRecord, usize)> {
    let header = data
        .get(offset..offset + RECORD_HEADER_LEN)
        .ok_or_else(|| corrupted(format!("truncated record header at offset {}", offset)))?;
    let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let start = offset + RECORD_HEADER_LEN;
    let payload = data
        .get(start..start + len)
        .ok_or_else(|| corrupted(format!("truncated record payload at offset {}", offset)))?;
    let actual = crc32fast::hash(payload);
    if actual != crc {
        return Err(corrupted(format!(
            "checksum mismatch at offset {}: expected {:#x}, actual {:#x}",
            offset, crc, actual
        )));
    }

    let record = bincode::deserialize(payload).map_err(|e| corrupted(e.to_string()))?;
    Ok((record, start + len))
}
