//! Fuzz target for shard reading.
//!
//! Frame-decodes arbitrary bytes as a whole shard and parses every record
//! found in it.

#![no_main]

use libfuzzer_sys::fuzz_target;
use seer::record::fuzz_parse_shard;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = fuzz_parse_shard(data);
});
