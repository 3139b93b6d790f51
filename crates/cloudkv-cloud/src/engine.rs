//! Storage engine bridge.
//!
//! The embedded key-value engine is an external collaborator. This module
//! defines the small surface the cloud protocol needs from it
//! ([`StorageEngine`], [`EngineFactory`]) with a mock implementation for
//! testing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CloudError, CloudResult};
use crate::filename::{current_file, identity_file, DATA_FILE_SUFFIX, PLACEHOLDER_MANIFEST};
use crate::local_env::LocalEnv;
use crate::session::CloudSession;

/// Options handed to the storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Number of table files kept open; `-1` keeps all of them open and local.
    pub max_open_files: i32,
    /// Threads used to open files; also sizes the savepoint copy pool.
    pub max_file_opening_threads: usize,
    /// Size at which the engine rolls its manifest file.
    pub max_manifest_file_size: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_open_files: -1,
            max_file_opening_threads: 16,
            max_manifest_file_size: 1024 * 1024 * 1024, // 1GB
        }
    }
}

/// One live data file of an open engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveFile {
    /// Engine file name, e.g. `000012.sst` (no epoch suffix).
    pub name: String,
    /// Engine file number.
    pub file_number: u64,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// An open storage engine.
pub trait StorageEngine: Send + Sync {
    /// Flush memtables so the manifest reflects all writes.
    fn flush(&self) -> CloudResult<()>;
    /// Enumerate live data files.
    fn live_files(&self) -> CloudResult<Vec<LiveFile>>;
    /// The database identity.
    fn identity(&self) -> CloudResult<String>;
    /// Options the engine was opened with.
    fn options(&self) -> &EngineOptions;
}

/// Opens engines and reads their manifests.
pub trait EngineFactory: Send + Sync {
    /// Open the engine on the session's local directory.
    fn open(
        &self,
        options: &EngineOptions,
        session: &CloudSession,
        read_only: bool,
    ) -> CloudResult<Box<dyn StorageEngine>>;

    /// Highest file number referenced by a manifest file. A missing file is
    /// [`CloudError::NotFound`].
    fn max_file_number(&self, env: &LocalEnv, manifest_path: &Path) -> CloudResult<u64>;
}

const NEXT_FILE_KEY: &str = "next_file_number";
const LIVE_FILE_KEY: &str = "live";

/// Text manifest used by [`MockEngine`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockManifest {
    /// Next file number to hand out.
    pub next_file_number: u64,
    /// Live files as `(name, size)`.
    pub live: Vec<(String, u64)>,
}

impl MockManifest {
    /// Render as `key=value` lines.
    pub fn encode(&self) -> String {
        let mut out = format!("{}={}\n", NEXT_FILE_KEY, self.next_file_number);
        for (name, size) in &self.live {
            out.push_str(&format!("{}={}:{}\n", LIVE_FILE_KEY, name, size));
        }
        out
    }

    /// Parse the `key=value` form.
    pub fn decode(text: &str) -> CloudResult<Self> {
        let bad = |line: &str| CloudError::Engine {
            reason: format!("malformed manifest line '{}'", line),
        };
        let mut manifest = MockManifest::default();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (key, value) = line.split_once('=').ok_or_else(|| bad(line))?;
            match key {
                NEXT_FILE_KEY => {
                    manifest.next_file_number = value.parse().map_err(|_| bad(line))?;
                }
                LIVE_FILE_KEY => {
                    let (name, size) = value.split_once(':').ok_or_else(|| bad(line))?;
                    let size = size.parse().map_err(|_| bad(line))?;
                    manifest.live.push((name.to_string(), size));
                }
                _ => return Err(bad(line)),
            }
        }
        Ok(manifest)
    }
}

/// In-memory engine for testing; persists only its manifest and identity.
pub struct MockEngine {
    options: EngineOptions,
    manifest_path: PathBuf,
    identity: String,
    read_only: bool,
    state: Mutex<MockManifest>,
    flushes: AtomicU64,
    env: LocalEnv,
}

impl MockEngine {
    /// Add a live data file of `size_bytes` and persist the manifest.
    pub fn add_data_file(&self, size_bytes: u64) -> CloudResult<LiveFile> {
        let mut state = self.state.lock();
        let file_number = state.next_file_number.max(1);
        state.next_file_number = file_number + 1;
        let name = format!("{:06}{}", file_number, DATA_FILE_SUFFIX);
        state.live.push((name.clone(), size_bytes));
        if !self.read_only {
            self.env
                .write_file(&self.manifest_path, state.encode().as_bytes())?;
        }
        debug!(name = %name, "mock engine added data file");
        Ok(LiveFile {
            name,
            file_number,
            size_bytes,
        })
    }

    /// Number of flushes issued.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Path of the manifest this engine writes.
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }
}

impl StorageEngine for MockEngine {
    fn flush(&self) -> CloudResult<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn live_files(&self) -> CloudResult<Vec<LiveFile>> {
        let state = self.state.lock();
        state
            .live
            .iter()
            .map(|(name, size)| {
                let file_number = name
                    .trim_end_matches(DATA_FILE_SUFFIX)
                    .parse()
                    .map_err(|_| CloudError::Engine {
                        reason: format!("bad data file name '{}'", name),
                    })?;
                Ok(LiveFile {
                    name: name.clone(),
                    file_number,
                    size_bytes: *size,
                })
            })
            .collect()
    }

    fn identity(&self) -> CloudResult<String> {
        Ok(self.identity.clone())
    }

    fn options(&self) -> &EngineOptions {
        &self.options
    }
}

/// Factory for [`MockEngine`]; keeps a handle to the last engine opened.
#[derive(Default)]
pub struct MockEngineFactory {
    opened: Mutex<Option<std::sync::Arc<MockEngine>>>,
}

impl MockEngineFactory {
    /// Create a factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently opened engine.
    pub fn last_opened(&self) -> Option<std::sync::Arc<MockEngine>> {
        self.opened.lock().clone()
    }
}

struct SharedMockEngine(std::sync::Arc<MockEngine>);

impl StorageEngine for SharedMockEngine {
    fn flush(&self) -> CloudResult<()> {
        self.0.flush()
    }

    fn live_files(&self) -> CloudResult<Vec<LiveFile>> {
        self.0.live_files()
    }

    fn identity(&self) -> CloudResult<String> {
        self.0.identity()
    }

    fn options(&self) -> &EngineOptions {
        self.0.options()
    }
}

impl EngineFactory for MockEngineFactory {
    fn open(
        &self,
        options: &EngineOptions,
        session: &CloudSession,
        read_only: bool,
    ) -> CloudResult<Box<dyn StorageEngine>> {
        let env = LocalEnv::new();
        let dir = session.local_dir();
        let manifest_path = session.local_manifest_path();
        let id_path = identity_file(dir);

        let identity = match env.read_to_string(&id_path) {
            Ok(id) => id.trim().to_string(),
            Err(e) if e.is_not_found() && !read_only => {
                env.create_dir_if_missing(dir)?;
                let id = env.generate_unique_id();
                env.write_file_atomic(&id_path, id.as_bytes())?;
                id
            }
            Err(e) => return Err(e),
        };

        let current = current_file(dir);
        if !read_only && !env.exists(&current)? {
            env.write_file(&current, format!("{}\n", PLACEHOLDER_MANIFEST).as_bytes())?;
        }

        let state = match env.read_to_string(&manifest_path) {
            Ok(text) => MockManifest::decode(&text)?,
            Err(e) if e.is_not_found() && !read_only => {
                let fresh = MockManifest {
                    next_file_number: 2,
                    live: Vec::new(),
                };
                env.write_file(&manifest_path, fresh.encode().as_bytes())?;
                fresh
            }
            Err(e) => return Err(e),
        };

        debug!(
            dir = ?dir,
            identity = %identity,
            manifest = ?manifest_path,
            read_only,
            "mock engine opened"
        );

        let engine = std::sync::Arc::new(MockEngine {
            options: options.clone(),
            manifest_path,
            identity,
            read_only,
            state: Mutex::new(state),
            flushes: AtomicU64::new(0),
            env,
        });
        *self.opened.lock() = Some(engine.clone());
        Ok(Box::new(SharedMockEngine(engine)))
    }

    fn max_file_number(&self, env: &LocalEnv, manifest_path: &Path) -> CloudResult<u64> {
        let text = env.read_to_string(manifest_path)?;
        Ok(MockManifest::decode(&text)?.next_file_number)
    }
}
