//! The dataset metadata document and shard listing file.
//!
//! Both are written by the sharder once every shard is flushed and are the
//! read-only contract consumed by the loader. All paths inside them are
//! relative to the data root (the directory holding `metadata.json`), so a
//! dataset can be remounted elsewhere without rewriting them.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SeerError;
use crate::manifest::CategoryIndex;
use crate::record::RECORD_SCHEMA_VERSION;

fn default_schema_version() -> u32 {
    RECORD_SCHEMA_VERSION
}

/// Description of one sharded dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// Version of the record feature schema.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Side length of every (square) image.
    pub image_size: u32,

    /// Maximum records per shard.
    #[serde(alias = "records")]
    pub shard_size: usize,

    pub category_index: CategoryIndex,

    /// Directory holding the shard files.
    pub shard_dir: String,

    /// The listing file enumerating `shard_file_list`, one path per line.
    pub listing_file: String,

    /// Every shard file, in shard order.
    pub shard_file_list: Vec<String>,

    #[serde(alias = "total_records")]
    pub total_record_count: usize,

    #[serde(alias = "total_files")]
    pub total_shard_count: usize,

    /// RFC 3339 UTC time at which the dataset was generated.
    #[serde(alias = "generated")]
    pub generation_timestamp: String,
}

impl DatasetMetadata {
    /// Loads and validates a metadata document.
    ///
    /// # Errors
    /// Fails if the document is unreadable, is missing a required field, or
    /// describes an unusable dataset (zero sizes, unknown schema version,
    /// shard count disagreeing with the file list).
    pub fn load(path: &Path) -> Result<Self, SeerError> {
        let file = File::open(path).map_err(SeerError::Io)?;
        let metadata: DatasetMetadata = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| SeerError::MetadataParse {
                path: path.to_path_buf(),
                source,
            })?;
        metadata.validate(path)?;
        Ok(metadata)
    }

    /// Parses a metadata document from a string.
    pub fn from_json_str(json: &str) -> Result<Self, SeerError> {
        let path = Path::new("<string>");
        let metadata: DatasetMetadata =
            serde_json::from_str(json).map_err(|source| SeerError::MetadataParse {
                path: path.to_path_buf(),
                source,
            })?;
        metadata.validate(path)?;
        Ok(metadata)
    }

    /// Writes the document as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<(), SeerError> {
        let file = File::create(path).map_err(SeerError::Io)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|source| {
            SeerError::MetadataWrite {
                path: path.to_path_buf(),
                source,
            }
        })?;
        writer.write_all(b"\n").map_err(SeerError::Io)?;
        writer.flush().map_err(SeerError::Io)?;
        Ok(())
    }

    fn validate(&self, path: &Path) -> Result<(), SeerError> {
        let invalid = |message: String| SeerError::MetadataInvalid {
            path: path.to_path_buf(),
            message,
        };

        if self.schema_version != RECORD_SCHEMA_VERSION {
            return Err(invalid(format!(
                "unsupported schema_version {} (expected {})",
                self.schema_version, RECORD_SCHEMA_VERSION
            )));
        }
        if self.image_size == 0 {
            return Err(invalid("image_size must be at least 1".to_string()));
        }
        if self.shard_size == 0 {
            return Err(invalid("shard_size must be at least 1".to_string()));
        }
        if self.total_shard_count != self.shard_file_list.len() {
            return Err(invalid(format!(
                "total_shard_count is {} but shard_file_list has {} entries",
                self.total_shard_count,
                self.shard_file_list.len()
            )));
        }
        Ok(())
    }

    /// Resolves the shard file list against a data root.
    pub fn shard_paths(&self, data_root: &Path) -> Vec<PathBuf> {
        self.shard_file_list
            .iter()
            .map(|rel| data_root.join(rel))
            .collect()
    }
}

/// Writes one relative shard path per line.
pub fn write_listing(path: &Path, shard_files: &[String]) -> Result<(), SeerError> {
    let file = File::create(path).map_err(SeerError::Io)?;
    let mut writer = BufWriter::new(file);
    for line in shard_files {
        writeln!(writer, "{}", line).map_err(SeerError::Io)?;
    }
    writer.flush().map_err(SeerError::Io)?;
    Ok(())
}

/// Reads a listing file, skipping blank lines.
pub fn read_listing(path: &Path) -> Result<Vec<String>, SeerError> {
    let file = File::open(path).map_err(SeerError::Io)?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(SeerError::Io)?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    Ok(lines)
}

/// Removes a file or directory if present.
pub(crate) fn remove_existing(path: &Path) -> Result<bool, SeerError> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        return Ok(false);
    };
    result.map_err(|source| SeerError::Cleanup {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}
