//! Sharding report types.

use std::fmt;

use super::metadata::DatasetMetadata;

/// A manifest row the sharder could not turn into a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedImage {
    /// Zero-based position of the row in the manifest.
    pub row: usize,
    pub relative_path: String,
    pub reason: String,
}

/// The outcome of one sharding run.
#[derive(Clone, Debug)]
pub struct ShardReport {
    pub metadata: DatasetMetadata,
    /// Record count of each shard, in shard order.
    pub shard_counts: Vec<usize>,
    pub skipped: Vec<SkippedImage>,
    /// Number of manifest rows read.
    pub manifest_rows: usize,
}

impl ShardReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

impl fmt::Display for ShardReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Sharded {} of {} image(s) into {} shard(s) of up to {} record(s)",
            self.metadata.total_record_count,
            self.manifest_rows,
            self.metadata.total_shard_count,
            self.metadata.shard_size
        )?;
        writeln!(
            f,
            "  image size: {0}x{0}x3",
            self.metadata.image_size
        )?;
        writeln!(
            f,
            "  categories: {}",
            self.metadata.category_index.names().join(", ")
        )?;

        if !self.skipped.is_empty() {
            writeln!(f)?;
            writeln!(f, "Skipped {} image(s):", self.skipped.len())?;
            for skipped in &self.skipped {
                writeln!(
                    f,
                    "  row {}: {}: {}",
                    skipped.row, skipped.relative_path, skipped.reason
                )?;
            }
        }

        Ok(())
    }
}
