//! Fuzz target for manifest CSV parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use seer::manifest::{from_manifest_str, CategoryIndex, ManifestOptions};
use std::path::Path;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(entries) = from_manifest_str(text, &ManifestOptions::default()) {
        let _ = CategoryIndex::from_entries(&entries, Path::new("<fuzz>"));
    }
});
