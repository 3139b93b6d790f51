//! Configuration for the cloud-backed database environment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;
use crate::error::{CloudError, CloudResult};

/// Default separator placed between a source dbid and a clone suffix.
pub const DEFAULT_DBID_SEPARATOR: &str = "rockset";

/// Cloud backend flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CloudType {
    /// Cloud integration disabled.
    #[default]
    None,
    /// Amazon S3 compatible object store.
    Aws,
    /// Google Cloud Storage.
    Gcs,
    /// Azure Blob Storage.
    Azure,
}

impl std::fmt::Display for CloudType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudType::None => write!(f, "none"),
            CloudType::Aws => write!(f, "aws"),
            CloudType::Gcs => write!(f, "gcs"),
            CloudType::Azure => write!(f, "azure"),
        }
    }
}

/// A bucket plus the object prefix under which one database lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketLocation {
    /// Bucket name.
    pub bucket: String,
    /// Object path prefix inside the bucket.
    pub object_prefix: String,
}

impl BucketLocation {
    /// Creates a location.
    pub fn new(bucket: impl Into<String>, object_prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object_prefix: object_prefix.into(),
        }
    }

    /// A location counts as configured once it names a bucket.
    pub fn is_configured(&self) -> bool {
        !self.bucket.trim().is_empty()
    }

    /// Object prefix with surrounding whitespace and trailing separators removed.
    pub fn normalized_prefix(&self) -> &str {
        trim_path(&self.object_prefix)
    }
}

impl PartialEq for BucketLocation {
    fn eq(&self, other: &Self) -> bool {
        self.bucket == other.bucket && self.normalized_prefix() == other.normalized_prefix()
    }
}

impl Eq for BucketLocation {}

/// Trims whitespace and trailing `/` from an object path.
pub fn trim_path(path: &str) -> &str {
    path.trim().trim_end_matches('/')
}

/// Options governing how a local database directory relates to the cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudEnvOptions {
    /// Which cloud backend is in use.
    pub cloud_type: CloudType,
    /// Location the database is read from (clone origin).
    pub src: Option<BucketLocation>,
    /// Location the database writes to.
    pub dest: Option<BucketLocation>,
    /// Keep every data file on local disk and never evict it.
    pub keep_local_data_files: bool,
    /// Verify data file sizes while opening.
    pub validate_filesize: bool,
    /// Separator between a source dbid and a clone suffix.
    pub dbid_separator: String,
}

impl Default for CloudEnvOptions {
    fn default() -> Self {
        Self {
            cloud_type: CloudType::None,
            src: None,
            dest: None,
            keep_local_data_files: false,
            validate_filesize: true,
            dbid_separator: DEFAULT_DBID_SEPARATOR.to_string(),
        }
    }
}

impl CloudEnvOptions {
    /// Configured source location, ignoring blank entries.
    pub fn src(&self) -> Option<&BucketLocation> {
        self.src.as_ref().filter(|l| l.is_configured())
    }

    /// Configured destination location, ignoring blank entries.
    pub fn dest(&self) -> Option<&BucketLocation> {
        self.dest.as_ref().filter(|l| l.is_configured())
    }

    /// True when source and destination are both configured and identical.
    pub fn dest_equal_src(&self) -> bool {
        match (self.src(), self.dest()) {
            (Some(src), Some(dest)) => src == dest,
            _ => false,
        }
    }
}

/// Full on-disk configuration: cloud options plus engine options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Cloud environment options.
    pub cloud: CloudEnvOptions,
    /// Storage engine options.
    pub engine: EngineOptions,
}

impl CloudConfig {
    /// Loads a configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> CloudResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CloudError::from_io(path, e))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config_err = |reason: String| CloudError::Config {
            path: path.to_path_buf(),
            reason,
        };

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| config_err(e.to_string())),
            "json" => serde_json::from_str(&contents).map_err(|e| config_err(e.to_string())),
            _ => Err(CloudError::InvalidArgument {
                reason: format!("unsupported config file extension: '{}'", ext),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let opts = CloudEnvOptions::default();
        assert_eq!(opts.cloud_type, CloudType::None);
        assert!(opts.src.is_none());
        assert!(opts.dest.is_none());
        assert!(!opts.keep_local_data_files);
        assert!(opts.validate_filesize);
        assert_eq!(opts.dbid_separator, "rockset");
    }

    #[test]
    fn test_location_equality_ignores_trailing_separator() {
        let a = BucketLocation::new("bucket", "db/one/");
        let b = BucketLocation::new("bucket", "db/one");
        let c = BucketLocation::new("bucket", "db/two");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_blank_locations_are_unconfigured() {
        let opts = CloudEnvOptions {
            src: Some(BucketLocation::new("", "db")),
            dest: Some(BucketLocation::new("dest", "db")),
            ..Default::default()
        };
        assert!(opts.src().is_none());
        assert!(opts.dest().is_some());
        assert!(!opts.dest_equal_src());
    }

    #[test]
    fn test_dest_equal_src() {
        let opts = CloudEnvOptions {
            src: Some(BucketLocation::new("b", "db")),
            dest: Some(BucketLocation::new("b", "db/")),
            ..Default::default()
        };
        assert!(opts.dest_equal_src());
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[cloud]
cloud_type = "aws"
keep_local_data_files = true

[cloud.dest]
bucket = "dest-bucket"
object_prefix = "dbs/main"

[engine]
max_open_files = -1
max_file_opening_threads = 8
"#
        )
        .unwrap();

        let config = CloudConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cloud.cloud_type, CloudType::Aws);
        assert!(config.cloud.keep_local_data_files);
        assert_eq!(config.cloud.dbid_separator, "rockset");
        let dest = config.cloud.dest().unwrap();
        assert_eq!(dest.bucket, "dest-bucket");
        assert_eq!(dest.object_prefix, "dbs/main");
        assert!(config.cloud.src().is_none());
        assert_eq!(config.engine.max_open_files, -1);
        assert_eq!(config.engine.max_file_opening_threads, 8);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{
                "cloud": {{
                    "cloud_type": "aws",
                    "src": {{ "bucket": "src", "object_prefix": "a" }}
                }}
            }}"#
        )
        .unwrap();

        let config = CloudConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cloud.src().unwrap().bucket, "src");
        assert!(config.cloud.dest().is_none());
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        let result = CloudConfig::from_file(file.path());
        assert!(matches!(result, Err(CloudError::InvalidArgument { .. })));
    }

    #[test]
    fn test_from_file_missing() {
        let result = CloudConfig::from_file(Path::new("/nonexistent/cloudkv.toml"));
        assert!(result.unwrap_err().is_not_found());
    }

    #[test]
    fn test_from_file_malformed() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "cloud = [[[").unwrap();
        let result = CloudConfig::from_file(file.path());
        assert!(matches!(result, Err(CloudError::Config { .. })));
    }
}
