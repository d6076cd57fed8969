//! Split-and-stream loader.
//!
//! The loader reads a dataset's metadata, partitions its shard files into
//! train/test/validation subsets, and builds lazy batch streams over each.
//!
//! # Split Policy
//!
//! Splitting is positional, not random: the ordered shard list is cut at
//! `floor(N * r0 / sum)` and then `floor(N * r1 / sum) + 1` further shards go
//! to the test split. The extra test shard is kept so that datasets split by
//! earlier versions of the pipeline land in the same partitions.

pub mod stream;

pub use stream::{build_stream, Batch, BatchStream, Example, Repeat, StreamOptions};

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::SeerError;
use crate::record::{parse_record, ImageTensor, RGB_DEPTH};
use crate::shard::DatasetMetadata;

/// Default train/test/validation ratios.
pub const DEFAULT_SPLIT_RATIOS: [u32; 3] = [8, 1, 1];

/// Partitions an ordered list into `(train, test, validation)`.
///
/// # Errors
/// Fails unless exactly three ratios are given and their sum is positive.
///
/// # Example
/// ```
/// use seer::loader::split_manifest;
///
/// let shards: Vec<u32> = (0..10).collect();
/// let (train, test, val) = split_manifest(&shards, &[8, 1, 1])?;
/// assert_eq!(train, (0..8).collect::<Vec<_>>());
/// assert_eq!(test, vec![8, 9]);
/// assert!(val.is_empty());
/// # Ok::<(), seer::SeerError>(())
/// ```
pub fn split_manifest<T: Clone>(
    items: &[T],
    ratios: &[u32],
) -> Result<(Vec<T>, Vec<T>, Vec<T>), SeerError> {
    if ratios.len() != 3 {
        return Err(SeerError::InvalidSplit {
            message: format!("expected 3 ratios, got {}", ratios.len()),
        });
    }
    let sum: u64 = ratios.iter().map(|&r| u64::from(r)).sum();
    if sum == 0 {
        return Err(SeerError::InvalidSplit {
            message: "ratios must not all be zero".to_string(),
        });
    }

    let n = items.len();
    let train_idx = (n as u64 * u64::from(ratios[0]) / sum) as usize;
    let eval_idx = (n as u64 * u64::from(ratios[1]) / sum) as usize;
    let test_end = (train_idx + eval_idx + 1).min(n);

    Ok((
        items[..train_idx].to_vec(),
        items[train_idx..test_end].to_vec(),
        items[test_end..].to_vec(),
    ))
}

/// Parses `--ratios`-style input such as `8,1,1`.
pub fn parse_ratios(s: &str) -> Result<Vec<u32>, SeerError> {
    s.split(',')
        .map(|part| {
            part.trim().parse::<u32>().map_err(|_| SeerError::InvalidSplit {
                message: format!("'{}' is not a non-negative integer", part.trim()),
            })
        })
        .collect()
}

/// One of the three dataset partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
    Validation,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
            Split::Validation => "validation",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dataset opened for training.
#[derive(Clone, Debug)]
pub struct Loader {
    metadata: DatasetMetadata,
    train: Vec<PathBuf>,
    test: Vec<PathBuf>,
    validation: Vec<PathBuf>,
}

impl Loader {
    /// Opens the dataset described by `metadata_path`.
    ///
    /// Shard paths resolve against the directory containing the metadata.
    pub fn open(metadata_path: &Path, ratios: &[u32]) -> Result<Self, SeerError> {
        let metadata = DatasetMetadata::load(metadata_path)?;
        let data_root = metadata_path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_metadata(metadata, data_root, ratios)
    }

    pub fn from_metadata(
        metadata: DatasetMetadata,
        data_root: &Path,
        ratios: &[u32],
    ) -> Result<Self, SeerError> {
        let shards = metadata.shard_paths(data_root);
        let (train, test, validation) = split_manifest(&shards, ratios)?;
        info!(
            train = train.len(),
            test = test.len(),
            validation = validation.len(),
            "split shards"
        );
        Ok(Self {
            metadata,
            train,
            test,
            validation,
        })
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    /// `[image_size, image_size, 3]`.
    pub fn image_shape(&self) -> [usize; 3] {
        let side = self.metadata.image_size as usize;
        [side, side, RGB_DEPTH]
    }

    pub fn shards(&self, split: Split) -> &[PathBuf] {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
            Split::Validation => &self.validation,
        }
    }

    /// Batches needed to cover a split once, assuming full shards.
    pub fn steps_per_epoch(&self, split: Split, batch_size: usize) -> usize {
        let records = self.shards(split).len() * self.metadata.shard_size;
        records.div_ceil(batch_size.max(1))
    }

    /// Builds a stream over one split.
    ///
    /// Records whose shape differs from the metadata's image shape fail the
    /// stream with a schema error.
    pub fn stream(
        &self,
        split: Split,
        options: StreamOptions,
    ) -> Result<BatchStream<impl Fn(&[u8]) -> Result<(ImageTensor, i64), SeerError>>, SeerError>
    {
        let expected = self.image_shape();
        let parse = move |bytes: &[u8]| -> Result<(ImageTensor, i64), SeerError> {
            let (image, label) = parse_record(bytes)?;
            if image.shape != expected {
                return Err(SeerError::RecordSchema {
                    message: format!(
                        "record shape {:?} does not match dataset shape {:?}",
                        image.shape, expected
                    ),
                });
            }
            Ok((image, label))
        };
        build_stream(self.shards(split).to_vec(), parse, options)
    }

    pub fn train_stream(
        &self,
        options: StreamOptions,
    ) -> Result<BatchStream<impl Fn(&[u8]) -> Result<(ImageTensor, i64), SeerError>>, SeerError>
    {
        self.stream(Split::Train, options)
    }

    /// A single ordered pass over the test split.
    pub fn test_stream(
        &self,
        batch_size: usize,
    ) -> Result<BatchStream<impl Fn(&[u8]) -> Result<(ImageTensor, i64), SeerError>>, SeerError>
    {
        self.stream(Split::Test, StreamOptions::sequential(batch_size))
    }

    /// A single ordered pass over the validation split.
    pub fn val_stream(
        &self,
        batch_size: usize,
    ) -> Result<BatchStream<impl Fn(&[u8]) -> Result<(ImageTensor, i64), SeerError>>, SeerError>
    {
        self.stream(Split::Validation, StreamOptions::sequential(batch_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ten_shards() -> Vec<String> {
        (0..10).map(|i| format!("shards/images{}_16.tfrecords", i)).collect()
    }

    #[test]
    fn test_ten_shards_default_ratios() {
        let shards = ten_shards();
        let (train, test, val) = split_manifest(&shards, &DEFAULT_SPLIT_RATIOS).expect("split");

        assert_eq!(train, shards[0..8].to_vec());
        assert_eq!(
            test,
            vec![
                "shards/images8_16.tfrecords".to_string(),
                "shards/images9_16.tfrecords".to_string(),
            ]
        );
        assert!(val.is_empty());
    }

    #[test]
    fn test_twenty_shards_leave_a_validation_tail() {
        let shards: Vec<usize> = (0..20).collect();
        let (train, test, val) = split_manifest(&shards, &[8, 1, 1]).expect("split");

        assert_eq!(train, (0..16).collect::<Vec<_>>());
        assert_eq!(test, vec![16, 17, 18]);
        assert_eq!(val, vec![19]);
    }

    #[test]
    fn test_ratios_are_normalized() {
        let shards: Vec<usize> = (0..10).collect();
        let scaled = split_manifest(&shards, &[80, 10, 10]).expect("split");
        let plain = split_manifest(&shards, &[8, 1, 1]).expect("split");
        assert_eq!(scaled, plain);
    }

    #[test]
    fn test_empty_list_splits_into_empty_lists() {
        let shards: Vec<String> = Vec::new();
        let (train, test, val) = split_manifest(&shards, &DEFAULT_SPLIT_RATIOS).expect("split");
        assert!(train.is_empty() && test.is_empty() && val.is_empty());
    }

    #[test]
    fn test_single_shard_goes_to_test() {
        let (train, test, val) = split_manifest(&["only"], &[8, 1, 1]).expect("split");
        assert!(train.is_empty());
        assert_eq!(test, vec!["only"]);
        assert!(val.is_empty());
    }

    #[test]
    fn test_bad_ratios_rejected() {
        assert!(split_manifest(&[1, 2, 3], &[1, 1]).is_err());
        assert!(split_manifest(&[1, 2, 3], &[0, 0, 0]).is_err());
    }

    #[test]
    fn test_parse_ratios() {
        assert_eq!(parse_ratios("8, 1,1").expect("parse"), vec![8, 1, 1]);
        assert!(parse_ratios("8,x,1").is_err());
    }
}
