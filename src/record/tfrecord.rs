//! TFRecord shard framing.
//!
//! Each record in a shard file is framed as:
//!
//! ```text
//! u64  length            (little endian)
//! u32  masked_crc32c(length bytes)
//! [u8] payload           (length bytes)
//! u32  masked_crc32c(payload)
//! ```
//!
//! Writers append frames sequentially; readers stream them back one at a time
//! and treat any checksum or framing mismatch as a corrupt shard.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::SeerError;

const MASK_DELTA: u32 = 0xa282_ead8;

/// Applies the TFRecord CRC mask.
pub fn masked_crc(bytes: &[u8]) -> u32 {
    let crc = crc32c::crc32c(bytes);
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Writes one framed record to `out`.
pub fn write_frame<W: Write>(out: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = (payload.len() as u64).to_le_bytes();
    out.write_all(&len)?;
    out.write_all(&masked_crc(&len).to_le_bytes())?;
    out.write_all(payload)?;
    out.write_all(&masked_crc(payload).to_le_bytes())?;
    Ok(())
}

/// Reads one framed record from `input`.
///
/// Returns `Ok(None)` on a clean end of input (no bytes at a frame boundary).
/// A short read anywhere else, or a checksum mismatch, is an error message.
pub fn read_frame<R: Read>(input: &mut R) -> Result<Option<Vec<u8>>, String> {
    let mut len_bytes = [0u8; 8];
    let filled = read_up_to(input, &mut len_bytes).map_err(|e| e.to_string())?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < len_bytes.len() {
        return Err("truncated length header".to_string());
    }

    let mut crc_bytes = [0u8; 4];
    read_exact(input, &mut crc_bytes, "length checksum")?;
    if u32::from_le_bytes(crc_bytes) != masked_crc(&len_bytes) {
        return Err("length checksum mismatch".to_string());
    }

    let len = u64::from_le_bytes(len_bytes);
    let mut payload = Vec::new();
    Read::take(&mut *input, len)
        .read_to_end(&mut payload)
        .map_err(|e| e.to_string())?;
    if payload.len() as u64 != len {
        return Err(format!(
            "truncated payload ({} of {} bytes)",
            payload.len(),
            len
        ));
    }

    read_exact(input, &mut crc_bytes, "payload checksum")?;
    if u32::from_le_bytes(crc_bytes) != masked_crc(&payload) {
        return Err("payload checksum mismatch".to_string());
    }

    Ok(Some(payload))
}

/// Reads every frame in an in-memory shard.
///
/// Useful for fuzzing and tests without file I/O.
pub fn read_frames_from_slice(mut bytes: &[u8]) -> Result<Vec<Vec<u8>>, SeerError> {
    let mut frames = Vec::new();
    loop {
        match read_frame(&mut bytes) {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => return Ok(frames),
            Err(message) => {
                return Err(SeerError::CorruptShard {
                    path: PathBuf::from("<bytes>"),
                    index: frames.len(),
                    message,
                })
            }
        }
    }
}

fn read_up_to<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_exact<R: Read>(input: &mut R, buf: &mut [u8], what: &str) -> Result<(), String> {
    let filled = read_up_to(input, buf).map_err(|e| e.to_string())?;
    if filled < buf.len() {
        return Err(format!("truncated {}", what));
    }
    Ok(())
}

/// Appends framed records to a single shard file.
///
/// Call [`ShardWriter::finish`] to flush and surface write errors; dropping
/// the writer still closes the file.
pub struct ShardWriter {
    path: PathBuf,
    out: BufWriter<File>,
    count: usize,
}

impl ShardWriter {
    /// Creates (or truncates) the shard file at `path`.
    pub fn create(path: &Path) -> Result<Self, SeerError> {
        let file = File::create(path).map_err(SeerError::Io)?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            count: 0,
        })
    }

    /// Appends one serialized record.
    pub fn write(&mut self, payload: &[u8]) -> Result<(), SeerError> {
        write_frame(&mut self.out, payload).map_err(SeerError::Io)?;
        self.count += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and closes the shard, returning its record count.
    pub fn finish(mut self) -> Result<usize, SeerError> {
        self.out.flush().map_err(SeerError::Io)?;
        Ok(self.count)
    }
}

/// Streams framed records out of a single shard file.
///
/// The iterator stops after the first error.
pub struct ShardReader {
    path: PathBuf,
    input: BufReader<File>,
    index: usize,
    done: bool,
}

impl ShardReader {
    pub fn open(path: &Path) -> Result<Self, SeerError> {
        let file = File::open(path).map_err(SeerError::Io)?;
        Ok(Self {
            path: path.to_path_buf(),
            input: BufReader::new(file),
            index: 0,
            done: false,
        })
    }
}

impl Iterator for ShardReader {
    type Item = Result<Vec<u8>, SeerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match read_frame(&mut self.input) {
            Ok(Some(payload)) => {
                self.index += 1;
                Some(Ok(payload))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(message) => {
                self.done = true;
                Some(Err(SeerError::CorruptShard {
                    path: self.path.clone(),
                    index: self.index,
                    message,
                }))
            }
        }
    }
}

/// Counts the records in a shard file, failing on any corrupt frame.
pub fn count_records(path: &Path) -> Result<usize, SeerError> {
    let mut count = 0;
    for frame in ShardReader::open(path)? {
        frame?;
        count += 1;
    }
    Ok(count)
}
