#![allow(dead_code)]

use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Three split ratios with a positive sum.
pub fn arb_ratios() -> BoxedStrategy<[u32; 3]> {
    (0u32..=20, 0u32..=20, 0u32..=20)
        .prop_filter("ratios must not all be zero", |(a, b, c)| a + b + c > 0)
        .prop_map(|(a, b, c)| [a, b, c])
        .boxed()
}

/// Between zero and `max_frames` payloads of up to `max_len` bytes.
pub fn arb_payloads(max_frames: usize, max_len: usize) -> BoxedStrategy<Vec<Vec<u8>>> {
    proptest::collection::vec(
        proptest::collection::vec(any::<u8>(), 0..=max_len),
        0..=max_frames,
    )
    .boxed()
}
