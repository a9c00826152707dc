//! Word count whose callbacks randomly crash or stall. Results are identical
//! to [`wc`](super::wc) whenever a call returns.

use std::path::Path;
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::KeyValue;

use super::wc;

const MAX_STALL_MS: u64 = 200;

// Reduce is invoked once per key.
fn maybe_crash(crash_permille: u32, stall_permille: u32) {
    let mut rng = rand::thread_rng();
    let r = rng.gen_range(0..1000);
    if r < crash_permille {
        panic!("simulated worker crash");
    } else if r < crash_permille + stall_permille {
        thread::sleep(Duration::from_millis(rng.gen_range(0..MAX_STALL_MS)));
    }
}

pub fn map(filename: &Path, contents: &str) -> Vec<KeyValue> {
    maybe_crash(250, 250);
    wc::map(filename, contents)
}

pub fn reduce(key: &str, values: &[String]) -> String {
    maybe_crash(2, 0);
    wc::reduce(key, values)
}
