//! Fuzz target for record parsing.
//!
//! This fuzzer feeds arbitrary byte sequences to the record parser,
//! checking for panics, crashes, or hangs.

#![no_main]

use libfuzzer_sys::fuzz_target;
use seer::record::parse_record;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = parse_record(data);
});
