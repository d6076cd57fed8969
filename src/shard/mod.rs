//! Manifest sharder: labeled images in, fixed-size TFRecord shards out.
//!
//! # Output Layout
//!
//! Everything is written under the output directory, which is also the data
//! root that every recorded path is relative to:
//!
//! ```text
//! output_dir/
//!   shards/images0_16.tfrecords
//!   shards/images1_16.tfrecords
//!   shards.txt        one relative shard path per line
//!   metadata.json     DatasetMetadata
//! ```
//!
//! # Determinism
//!
//! Records are written in manifest order. The shard a record lands in depends
//! only on how many records were written before it, never on which decode
//! worker finished first.

pub mod decode;
pub mod metadata;
pub mod report;

pub use metadata::{read_listing, write_listing, DatasetMetadata};
pub use report::{ShardReport, SkippedImage};

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::error::SeerError;
use crate::manifest::{self, CategoryIndex, ManifestEntry, ManifestOptions};
use crate::record::tfrecord::ShardWriter;
use crate::record::{Record, RECORD_SCHEMA_VERSION};

/// Directory (under the output directory) holding shard files.
pub const SHARD_DIR: &str = "shards";
/// Listing file name.
pub const LISTING_FILE: &str = "shards.txt";
/// Metadata document name.
pub const METADATA_FILE: &str = "metadata.json";

pub const DEFAULT_SHARD_SIZE: usize = 16;
pub const DEFAULT_IMAGE_SIZE: u32 = 160;

/// Manifest rows handed to each worker per decode window.
const ROWS_PER_WORKER: usize = 8;

/// Sharding options.
#[derive(Clone, Debug)]
pub struct ShardOptions {
    pub manifest_path: PathBuf,
    /// Directory the manifest's relative image paths resolve against.
    pub image_root: PathBuf,
    pub output_dir: PathBuf,
    pub shard_size: usize,
    pub image_size: u32,
    /// Delete previous output before writing.
    pub force: bool,
    /// Upper bound on concurrent image decodes.
    pub workers: usize,
    pub manifest: ManifestOptions,
}

impl ShardOptions {
    pub fn new(
        manifest_path: impl Into<PathBuf>,
        image_root: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            image_root: image_root.into(),
            output_dir: output_dir.into(),
            shard_size: DEFAULT_SHARD_SIZE,
            image_size: DEFAULT_IMAGE_SIZE,
            force: false,
            workers: 1,
            manifest: ManifestOptions::default(),
        }
    }

    fn validate(&self) -> Result<(), SeerError> {
        if self.shard_size == 0 {
            return Err(SeerError::InvalidShardOptions {
                message: "shard size must be at least 1".to_string(),
            });
        }
        if self.image_size == 0 {
            return Err(SeerError::InvalidShardOptions {
                message: "image size must be at least 1".to_string(),
            });
        }
        if self.workers == 0 {
            return Err(SeerError::InvalidShardOptions {
                message: "workers must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn shard_dir(&self) -> PathBuf {
        self.output_dir.join(SHARD_DIR)
    }

    pub fn listing_path(&self) -> PathBuf {
        self.output_dir.join(LISTING_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.output_dir.join(METADATA_FILE)
    }
}

/// Deterministic shard file name for a shard ordinal.
pub fn shard_file_name(ordinal: usize, shard_size: usize) -> String {
    format!("images{}_{}.tfrecords", ordinal, shard_size)
}

/// Shards a manifest and returns the dataset metadata.
pub fn shard(options: &ShardOptions) -> Result<DatasetMetadata, SeerError> {
    shard_with_report(options).map(|report| report.metadata)
}

/// Shards a manifest and returns a report including skipped rows.
///
/// # Errors
/// Fatal: invalid options, unreadable or malformed manifest, previous output
/// present without `force`, cleanup failure, a non-RGB record, or any write
/// failure. Per-image decode failures are skipped and reported instead.
pub fn shard_with_report(options: &ShardOptions) -> Result<ShardReport, SeerError> {
    options.validate()?;

    let entries = manifest::read_manifest(&options.manifest_path, &options.manifest)?;
    let category_index = CategoryIndex::from_entries(&entries, &options.manifest_path)?;
    info!(
        manifest = %options.manifest_path.display(),
        rows = entries.len(),
        categories = category_index.len(),
        "loaded manifest"
    );

    prepare_output(options)?;

    let shard_dir = options.shard_dir();
    fs::create_dir_all(&shard_dir).map_err(SeerError::Io)?;

    let pool = if options.workers > 1 {
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .build()
            .map_err(|e| SeerError::InvalidShardOptions {
                message: format!("cannot start {} decode workers: {}", options.workers, e),
            })?;
        Some(pool)
    } else {
        None
    };

    let mut sink = ShardSink::new(&shard_dir, options.shard_size);
    let mut skipped = Vec::new();
    let window = options.workers * ROWS_PER_WORKER;

    for (window_index, rows) in entries.chunks(window).enumerate() {
        let first_row = window_index * window;
        let decoded = decode_window(rows, &options.image_root, options.image_size, pool.as_ref());

        for (offset, (entry, result)) in rows.iter().zip(decoded).enumerate() {
            match result {
                Ok(record) => {
                    sink.push(&record)?;
                    debug!(path = %entry.relative_path, label = entry.label_index, "wrote record");
                }
                Err(err @ SeerError::ImageDecode { .. }) => {
                    warn!(path = %entry.relative_path, error = %err, "skipping image");
                    skipped.push(SkippedImage {
                        row: first_row + offset,
                        relative_path: entry.relative_path.clone(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    let (shard_files, shard_counts) = sink.finish()?;
    let total_record_count = shard_counts.iter().sum();

    write_listing(&options.listing_path(), &shard_files)?;

    let metadata = DatasetMetadata {
        schema_version: RECORD_SCHEMA_VERSION,
        image_size: options.image_size,
        shard_size: options.shard_size,
        category_index,
        shard_dir: SHARD_DIR.to_string(),
        listing_file: LISTING_FILE.to_string(),
        total_shard_count: shard_files.len(),
        shard_file_list: shard_files,
        total_record_count,
        generation_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    metadata.write(&options.metadata_path())?;

    info!(
        records = metadata.total_record_count,
        shards = metadata.total_shard_count,
        skipped = skipped.len(),
        "sharding complete"
    );

    Ok(ShardReport {
        metadata,
        shard_counts,
        skipped,
        manifest_rows: entries.len(),
    })
}

/// Clears or rejects previous output so generations never mix.
fn prepare_output(options: &ShardOptions) -> Result<(), SeerError> {
    let targets = [
        options.shard_dir(),
        options.listing_path(),
        options.metadata_path(),
    ];

    for target in &targets {
        if !target.exists() {
            continue;
        }
        if !options.force {
            return Err(SeerError::OutputExists {
                path: target.clone(),
            });
        }
        if metadata::remove_existing(target)? {
            info!(path = %target.display(), "removed previous output");
        }
    }

    Ok(())
}

/// Decodes a window of rows, preserving row order in the result.
fn decode_window(
    rows: &[ManifestEntry],
    image_root: &Path,
    image_size: u32,
    pool: Option<&ThreadPool>,
) -> Vec<Result<Record, SeerError>> {
    let decode_one = |entry: &ManifestEntry| {
        decode::load_record(
            &image_root.join(&entry.relative_path),
            entry.label_index,
            image_size,
        )
    };

    match pool {
        Some(pool) => pool.install(|| rows.par_iter().map(decode_one).collect()),
        None => rows.iter().map(decode_one).collect(),
    }
}

/// Rolls records over into numbered shard files.
struct ShardSink<'a> {
    shard_dir: &'a Path,
    shard_size: usize,
    written: usize,
    current: Option<ShardWriter>,
    files: Vec<String>,
    counts: Vec<usize>,
}

impl<'a> ShardSink<'a> {
    fn new(shard_dir: &'a Path, shard_size: usize) -> Self {
        Self {
            shard_dir,
            shard_size,
            written: 0,
            current: None,
            files: Vec::new(),
            counts: Vec::new(),
        }
    }

    fn push(&mut self, record: &Record) -> Result<(), SeerError> {
        if self.written % self.shard_size == 0 {
            self.close_current()?;
            let name = shard_file_name(self.written / self.shard_size, self.shard_size);
            let path = self.shard_dir.join(&name);
            let writer = ShardWriter::create(&path)?;
            info!(shard = %writer.path().display(), "opening shard");
            self.current = Some(writer);
            self.files.push(format!("{}/{}", SHARD_DIR, name));
        }

        if let Some(writer) = self.current.as_mut() {
            writer.write(&record.to_bytes())?;
        }
        self.written += 1;
        Ok(())
    }

    fn close_current(&mut self) -> Result<(), SeerError> {
        if let Some(writer) = self.current.take() {
            debug!(
                shard = %writer.path().display(),
                records = writer.count(),
                "closing shard"
            );
            self.counts.push(writer.finish()?);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(Vec<String>, Vec<usize>), SeerError> {
        self.close_current()?;
        Ok((self.files, self.counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tfrecord::count_records;
    use image::{Rgb, RgbImage};

    fn write_png(path: &Path, color: [u8; 3]) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        RgbImage::from_pixel(6, 4, Rgb(color))
            .save(path)
            .expect("save png");
    }

    fn fixture(rows: usize, broken: &[usize]) -> (tempfile::TempDir, ShardOptions) {
        let dir = tempfile::tempdir().expect("tempdir");
        let images = dir.path().join("images");
        let mut manifest = String::new();
        for i in 0..rows {
            let (label, index) = if i % 2 == 0 { ("even", 0) } else { ("odd", 1) };
            let rel = format!("{}/{:03}.png", label, i);
            if broken.contains(&i) {
                fs::create_dir_all(images.join(label)).expect("mkdir");
                fs::write(images.join(&rel), b"garbage").expect("write");
            } else {
                write_png(&images.join(&rel), [i as u8, 0, 0]);
            }
            manifest.push_str(&format!("{},{},{}\n", rel, label, index));
        }
        let manifest_path = dir.path().join("manifest.csv");
        fs::write(&manifest_path, manifest).expect("write manifest");

        let mut options = ShardOptions::new(manifest_path, images, dir.path().join("out"));
        options.image_size = 2;
        (dir, options)
    }

    #[test]
    fn test_seventeen_rows_in_shards_of_five() {
        let (_dir, mut options) = fixture(17, &[]);
        options.shard_size = 5;

        let report = shard_with_report(&options).expect("shard failed");

        assert_eq!(report.shard_counts, vec![5, 5, 5, 2]);
        assert_eq!(report.metadata.total_record_count, 17);
        assert_eq!(report.metadata.total_shard_count, 4);
        assert_eq!(
            report.metadata.shard_file_list,
            vec![
                "shards/images0_5.tfrecords",
                "shards/images1_5.tfrecords",
                "shards/images2_5.tfrecords",
                "shards/images3_5.tfrecords",
            ]
        );
        for (path, expected) in report
            .metadata
            .shard_paths(&options.output_dir)
            .iter()
            .zip(&report.shard_counts)
        {
            assert_eq!(count_records(path).expect("count"), *expected);
        }
    }

    #[test]
    fn test_broken_images_are_skipped_not_fatal() {
        let (_dir, mut options) = fixture(6, &[1, 4]);
        options.shard_size = 3;

        let report = shard_with_report(&options).expect("shard failed");

        assert_eq!(report.metadata.total_record_count, 4);
        assert_eq!(report.shard_counts, vec![3, 1]);
        let rows: Vec<usize> = report.skipped.iter().map(|s| s.row).collect();
        assert_eq!(rows, vec![1, 4]);
    }

    #[test]
    fn test_parallel_decode_keeps_manifest_order() {
        let (_dir, mut options) = fixture(23, &[7]);
        options.shard_size = 4;
        options.workers = 3;

        let metadata = shard(&options).expect("shard failed");

        let mut reds = Vec::new();
        for path in metadata.shard_paths(&options.output_dir) {
            for frame in crate::record::tfrecord::ShardReader::open(&path).expect("open") {
                let record = Record::from_bytes(&frame.expect("frame")).expect("record");
                reds.push((record.image.data[0] * 255.0).round() as usize);
            }
        }
        let expected: Vec<usize> = (0..23).filter(|i| *i != 7).collect();
        assert_eq!(reds, expected);
    }

    #[test]
    fn test_empty_manifest_yields_no_shards() {
        let (_dir, options) = fixture(0, &[]);

        let metadata = shard(&options).expect("shard failed");

        assert_eq!(metadata.total_record_count, 0);
        assert_eq!(metadata.total_shard_count, 0);
        assert!(metadata.category_index.is_empty());
        assert!(options.metadata_path().exists());
        assert_eq!(read_listing(&options.listing_path()).expect("listing").len(), 0);
    }

    #[test]
    fn test_existing_output_requires_force() {
        let (_dir, mut options) = fixture(3, &[]);
        shard(&options).expect("first run");

        let err = shard(&options).unwrap_err();
        assert!(matches!(err, SeerError::OutputExists { .. }));

        options.force = true;
        shard(&options).expect("forced run");
    }

    #[test]
    fn test_force_removes_stale_shards() {
        let (_dir, mut options) = fixture(9, &[]);
        options.shard_size = 2;
        shard(&options).expect("first run");

        options.force = true;
        options.shard_size = 9;
        let metadata = shard(&options).expect("second run");

        let on_disk = fs::read_dir(options.shard_dir()).expect("read dir").count();
        assert_eq!(on_disk, 1);
        assert_eq!(metadata.total_shard_count, 1);
    }

    #[test]
    fn test_zero_shard_size_rejected() {
        let (_dir, mut options) = fixture(1, &[]);
        options.shard_size = 0;
        assert!(matches!(
            shard(&options),
            Err(SeerError::InvalidShardOptions { .. })
        ));
    }

    #[test]
    fn test_missing_manifest_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = ShardOptions::new(
            dir.path().join("missing.csv"),
            dir.path(),
            dir.path().join("out"),
        );
        assert!(matches!(shard(&options), Err(SeerError::Io(_))));
    }
}
