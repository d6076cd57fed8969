//! Protobuf messages for the `tf.train.Example` record payload.
//!
//! These mirror `tensorflow/core/example/{example,feature}.proto` field for
//! field, so shards written here can be read by any TFRecord consumer. The
//! feature map is a `BTreeMap` so that encoding is byte-stable across runs.

use std::collections::BTreeMap;

/// A single training example: a named map of features.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

/// Container for the feature map.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Features {
    #[prost(btree_map = "string, message", tag = "1")]
    pub feature: BTreeMap<String, Feature>,
}

/// One feature value: a list of bytes, floats, or 64-bit integers.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Feature {
    #[prost(oneof = "FeatureKind", tags = "1, 2, 3")]
    pub kind: Option<FeatureKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum FeatureKind {
    #[prost(message, tag = "1")]
    BytesList(BytesList),
    #[prost(message, tag = "2")]
    FloatList(FloatList),
    #[prost(message, tag = "3")]
    Int64List(Int64List),
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

impl Feature {
    /// A feature holding a single 64-bit integer.
    pub fn int64(value: i64) -> Self {
        Self {
            kind: Some(FeatureKind::Int64List(Int64List { value: vec![value] })),
        }
    }

    /// A feature holding a flat float list.
    pub fn floats(value: Vec<f32>) -> Self {
        Self {
            kind: Some(FeatureKind::FloatList(FloatList { value })),
        }
    }
}
