//! Manifest CSV reader and the dense category index.
//!
//! # Manifest Format
//!
//! A manifest is a headerless CSV with one row per source image:
//!
//! ```text
//! cats/001.jpg,cat,0
//! dogs/001.jpg,dog,1
//! ```
//!
//! - column 0: image path relative to the image root
//! - column 1: category name
//! - column 2: dense category index
//!
//! Extra columns are ignored. Row order is significant: it defines record
//! order and therefore shard assignment.

pub mod index;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SeerError;

/// One manifest row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path of the image relative to the image root.
    pub relative_path: String,
    pub label_name: String,
    pub label_index: i64,
}

impl ManifestEntry {
    pub fn new(
        relative_path: impl Into<String>,
        label_name: impl Into<String>,
        label_index: i64,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            label_name: label_name.into(),
            label_index,
        }
    }
}

/// Reader options for manifest CSVs.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManifestOptions {
    /// Skip the first row as a header.
    pub has_header: bool,
}

/// Reads every row of a manifest file, in file order.
///
/// # Errors
/// Fails if the file cannot be opened, a row has fewer than three columns, or
/// a label index is not an integer.
pub fn read_manifest(
    path: &Path,
    options: &ManifestOptions,
) -> Result<Vec<ManifestEntry>, SeerError> {
    let file = File::open(path).map_err(SeerError::Io)?;
    parse_manifest(BufReader::new(file), path, options)
}

/// Reads a manifest from a CSV string.
///
/// Useful for testing without file I/O.
pub fn from_manifest_str(
    csv_str: &str,
    options: &ManifestOptions,
) -> Result<Vec<ManifestEntry>, SeerError> {
    parse_manifest(csv_str.as_bytes(), Path::new("<string>"), options)
}

fn parse_manifest<R: Read>(
    reader: R,
    path: &Path,
    options: &ManifestOptions,
) -> Result<Vec<ManifestEntry>, SeerError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(options.has_header)
        .flexible(true)
        .from_reader(reader);

    let mut entries = Vec::new();
    for result in csv_reader.records() {
        let row = result.map_err(|source| SeerError::ManifestRead {
            path: path.to_path_buf(),
            source,
        })?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);

        if row.len() < 3 {
            return Err(SeerError::ManifestInvalid {
                path: path.to_path_buf(),
                message: format!(
                    "line {}: expected at least 3 columns, found {}",
                    line,
                    row.len()
                ),
            });
        }

        let label_index: i64 =
            row[2]
                .trim()
                .parse()
                .map_err(|_| SeerError::ManifestInvalid {
                    path: path.to_path_buf(),
                    message: format!("line {}: label index '{}' is not an integer", line, &row[2]),
                })?;

        entries.push(ManifestEntry::new(
            row[0].trim(),
            row[1].trim(),
            label_index,
        ));
    }

    Ok(entries)
}

/// Writes manifest rows as a headerless CSV.
pub fn write_manifest(path: &Path, entries: &[ManifestEntry]) -> Result<(), SeerError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|source| SeerError::ManifestWrite {
            path: path.to_path_buf(),
            source,
        })?;

    for entry in entries {
        csv_writer
            .write_record([
                entry.relative_path.as_str(),
                entry.label_name.as_str(),
                entry.label_index.to_string().as_str(),
            ])
            .map_err(|source| SeerError::ManifestWrite {
                path: path.to_path_buf(),
                source,
            })?;
    }

    csv_writer.flush().map_err(SeerError::Io)?;
    Ok(())
}

/// Bidirectional mapping between category names and dense indices `0..N`.
///
/// Serialized as a JSON object of `name -> index`; deserialization enforces
/// the same density rules as construction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, i64>",
    into = "BTreeMap<String, i64>"
)]
pub struct CategoryIndex {
    names: Vec<String>,
}

impl CategoryIndex {
    /// Builds the index from category names in index order.
    pub fn from_names<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pairs = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.into(), i as i64));
        Self::from_pairs(pairs)
    }

    /// Builds the index from every manifest row's `(label_name, label_index)`.
    pub fn from_entries(entries: &[ManifestEntry], path: &Path) -> Result<Self, SeerError> {
        let pairs = entries
            .iter()
            .map(|e| (e.label_name.clone(), e.label_index));
        Self::from_pairs(pairs).map_err(|message| SeerError::ManifestInvalid {
            path: PathBuf::from(path),
            message,
        })
    }

    fn from_pairs<I>(pairs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (String, i64)>,
    {
        let mut by_index: BTreeMap<i64, String> = BTreeMap::new();
        let mut by_name: BTreeMap<String, i64> = BTreeMap::new();

        for (name, index) in pairs {
            if let Some(existing) = by_name.get(&name) {
                if *existing != index {
                    return Err(format!(
                        "category '{}' has conflicting indices {} and {}",
                        name, existing, index
                    ));
                }
                continue;
            }
            if let Some(existing) = by_index.get(&index) {
                return Err(format!(
                    "index {} is shared by categories '{}' and '{}'",
                    index, existing, name
                ));
            }
            by_index.insert(index, name.clone());
            by_name.insert(name, index);
        }

        // BTreeMap iteration is ordered, so density means keys are exactly 0..N.
        for (expected, index) in by_index.keys().enumerate() {
            if *index != expected as i64 {
                return Err(format!(
                    "category indices must be dense 0..{}; index {} is missing",
                    by_index.len(),
                    expected
                ));
            }
        }

        Ok(Self {
            names: by_index.into_values().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Category names ordered by index.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: i64) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
    }

    pub fn index(&self, name: &str) -> Option<i64> {
        self.names.iter().position(|n| n == name).map(|i| i as i64)
    }
}

impl TryFrom<BTreeMap<String, i64>> for CategoryIndex {
    type Error = String;

    fn try_from(map: BTreeMap<String, i64>) -> Result<Self, Self::Error> {
        Self::from_pairs(map)
    }
}

impl From<CategoryIndex> for BTreeMap<String, i64> {
    fn from(index: CategoryIndex) -> Self {
        index
            .names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i as i64))
            .collect()
    }
}
