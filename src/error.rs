use std::path::PathBuf;
use thiserror::Error;

/// The main error type for seer operations.
#[derive(Debug, Error)]
pub enum SeerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Invalid manifest {path}: {message}")]
    ManifestInvalid { path: PathBuf, message: String },

    #[error("Failed to write manifest {path}: {source}")]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Unsupported channel depth {depth} (expected 3)")]
    ChannelDepth { depth: usize },

    #[error("Invalid shard options: {message}")]
    InvalidShardOptions { message: String },

    #[error("Output already exists at {path} (use --force to replace it)")]
    OutputExists { path: PathBuf },

    #[error("Failed to remove previous output {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt shard {path} at record {index}: {message}")]
    CorruptShard {
        path: PathBuf,
        index: usize,
        message: String,
    },

    #[error("Failed to decode record: {0}")]
    RecordDecode(#[from] prost::DecodeError),

    #[error("Record schema mismatch: {message}")]
    RecordSchema { message: String },

    #[error("Failed to parse metadata {path}: {source}")]
    MetadataParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write metadata {path}: {source}")]
    MetadataWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid metadata {path}: {message}")]
    MetadataInvalid { path: PathBuf, message: String },

    #[error("Invalid split ratios: {message}")]
    InvalidSplit { message: String },

    #[error("Invalid stream options: {message}")]
    InvalidStreamOptions { message: String },

    #[error("Training step failed: {message}")]
    TrainStep { message: String },
}
