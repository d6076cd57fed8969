//! Training records and their on-disk encoding.
//!
//! A [`Record`] is one labeled RGB image with explicit dimensions. Records are
//! encoded as `tf.train.Example` protobufs with a fixed feature schema and
//! framed into shard files by [`tfrecord`].
//!
//! # Record Schema (version 1)
//!
//! | feature  | type      | meaning                          |
//! |----------|-----------|----------------------------------|
//! | `height` | int64     | image height in pixels           |
//! | `width`  | int64     | image width in pixels            |
//! | `depth`  | int64     | channel count, always 3          |
//! | `label`  | int64     | dense category index             |
//! | `image`  | float[]   | HWC pixels scaled to `[0, 1]`    |

pub mod example;
pub mod tfrecord;

use std::collections::BTreeMap;

use prost::Message;

use crate::error::SeerError;
use example::{Example, Feature, FeatureKind, Features};

/// Version of the feature schema written into every dataset's metadata.
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// The only supported channel count.
pub const RGB_DEPTH: usize = 3;

const FEATURE_HEIGHT: &str = "height";
const FEATURE_WIDTH: &str = "width";
const FEATURE_DEPTH: &str = "depth";
const FEATURE_LABEL: &str = "label";
const FEATURE_IMAGE: &str = "image";

/// A dense image tensor in height-width-channel layout.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageTensor {
    /// `[height, width, depth]`.
    pub shape: [usize; 3],
    /// Row-major pixel values, `height * width * depth` long.
    pub data: Vec<f32>,
}

impl ImageTensor {
    /// Creates a tensor, checking that `data` fills `shape` exactly.
    pub fn new(shape: [usize; 3], data: Vec<f32>) -> Result<Self, SeerError> {
        let expected = shape[0]
            .checked_mul(shape[1])
            .and_then(|n| n.checked_mul(shape[2]))
            .ok_or_else(|| SeerError::RecordSchema {
                message: format!("shape {:?} overflows the pixel count", shape),
            })?;
        if data.len() != expected {
            return Err(SeerError::RecordSchema {
                message: format!(
                    "pixel count {} does not match shape {:?} ({} values)",
                    data.len(),
                    shape,
                    expected
                ),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn height(&self) -> usize {
        self.shape[0]
    }

    pub fn width(&self) -> usize {
        self.shape[1]
    }

    pub fn depth(&self) -> usize {
        self.shape[2]
    }
}

/// One labeled training example.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub image: ImageTensor,
    pub label: i64,
}

impl Record {
    /// Builds a record from HWC pixel data.
    ///
    /// Fails with [`SeerError::ChannelDepth`] unless `depth == 3`.
    pub fn new(
        height: usize,
        width: usize,
        depth: usize,
        label: i64,
        pixels: Vec<f32>,
    ) -> Result<Self, SeerError> {
        if depth != RGB_DEPTH {
            return Err(SeerError::ChannelDepth { depth });
        }
        let image = ImageTensor::new([height, width, depth], pixels)?;
        Ok(Self { image, label })
    }

    /// Encodes the record as a serialized `tf.train.Example`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut feature = BTreeMap::new();
        feature.insert(
            FEATURE_HEIGHT.to_string(),
            Feature::int64(self.image.height() as i64),
        );
        feature.insert(
            FEATURE_WIDTH.to_string(),
            Feature::int64(self.image.width() as i64),
        );
        feature.insert(
            FEATURE_DEPTH.to_string(),
            Feature::int64(self.image.depth() as i64),
        );
        feature.insert(FEATURE_LABEL.to_string(), Feature::int64(self.label));
        feature.insert(
            FEATURE_IMAGE.to_string(),
            Feature::floats(self.image.data.clone()),
        );

        Example {
            features: Some(Features { feature }),
        }
        .encode_to_vec()
    }

    /// Decodes a serialized `tf.train.Example` back into a record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SeerError> {
        let example = Example::decode(bytes)?;
        let mut features = example
            .features
            .map(|f| f.feature)
            .ok_or_else(|| SeerError::RecordSchema {
                message: "example has no features".to_string(),
            })?;

        let height = dimension(&features, FEATURE_HEIGHT)?;
        let width = dimension(&features, FEATURE_WIDTH)?;
        let depth = dimension(&features, FEATURE_DEPTH)?;
        let label = single_int64(&features, FEATURE_LABEL)?;

        let pixels = match features.remove(FEATURE_IMAGE).and_then(|f| f.kind) {
            Some(FeatureKind::FloatList(list)) => list.value,
            // A zero-length float list encodes to nothing on the wire.
            None => Vec::new(),
            Some(_) => {
                return Err(SeerError::RecordSchema {
                    message: format!("feature '{}' is not a float list", FEATURE_IMAGE),
                })
            }
        };

        if depth != RGB_DEPTH {
            return Err(SeerError::RecordSchema {
                message: format!("depth {} (expected {})", depth, RGB_DEPTH),
            });
        }

        Record::new(height, width, depth, label, pixels)
    }
}

/// Parses one serialized record into `(image, label)`.
///
/// This is the default `parse_fn` handed to the loader's streams.
pub fn parse_record(bytes: &[u8]) -> Result<(ImageTensor, i64), SeerError> {
    let record = Record::from_bytes(bytes)?;
    Ok((record.image, record.label))
}

/// Fuzz-only entrypoint: frame-decode a whole shard and parse every record.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_shard(bytes: &[u8]) -> Result<usize, SeerError> {
    let frames = tfrecord::read_frames_from_slice(bytes)?;
    for frame in &frames {
        parse_record(frame)?;
    }
    Ok(frames.len())
}

fn single_int64(features: &BTreeMap<String, Feature>, name: &str) -> Result<i64, SeerError> {
    match features.get(name).and_then(|f| f.kind.as_ref()) {
        Some(FeatureKind::Int64List(list)) if list.value.len() == 1 => Ok(list.value[0]),
        Some(FeatureKind::Int64List(list)) => Err(SeerError::RecordSchema {
            message: format!(
                "feature '{}' has {} values (expected 1)",
                name,
                list.value.len()
            ),
        }),
        Some(_) => Err(SeerError::RecordSchema {
            message: format!("feature '{}' is not an int64 list", name),
        }),
        None => Err(SeerError::RecordSchema {
            message: format!("missing feature '{}'", name),
        }),
    }
}

fn dimension(features: &BTreeMap<String, Feature>, name: &str) -> Result<usize, SeerError> {
    let value = single_int64(features, name)?;
    usize::try_from(value).map_err(|_| SeerError::RecordSchema {
        message: format!("feature '{}' is negative ({})", name, value),
    })
}
