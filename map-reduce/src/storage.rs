//! Intermediate storage protocol.
//!
//! Map task `m` writes bucket `b` to `mr-<m>-<b>`, one JSON record per line.
//! Reduce task `b` writes `mr-out-<b>`, one `key value` line per distinct key.
//! Every file is written to a temporary name in the same directory and then
//! renamed, so a reader never observes a partially written file and
//! concurrent writers of the same name are serialized by the rename.

use std::fs::File;
use std::hash::Hasher;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use atomicwrites::{AllowOverwrite, AtomicFile};
use fnv::FnvHasher;
use log::trace;

use crate::KeyValue;

pub fn intermediate_path(dir: &Path, map_id: usize, bucket: usize) -> PathBuf {
    dir.join(format!("mr-{}-{}", map_id, bucket))
}

pub fn output_path(dir: &Path, bucket: usize) -> PathBuf {
    dir.join(format!("mr-out-{}", bucket))
}

/// FNV-1a of the key, truncated to 31 bits.
pub fn ihash(key: &str) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(key.as_bytes());
    (hasher.finish() & 0x7fff_ffff) as u32
}

/// Panics if `nreduce` is zero.
pub fn bucket_of(key: &str, nreduce: usize) -> usize {
    ihash(key) as usize % nreduce
}

/// Splits `records` into exactly `nreduce` buckets, preserving emission order
/// within each bucket.
pub fn partition(records: Vec<KeyValue>, nreduce: usize) -> Result<Vec<Vec<KeyValue>>> {
    ensure!(nreduce > 0, "nreduce must be non-zero");
    let mut buckets = vec![Vec::new(); nreduce];
    for kv in records {
        buckets[bucket_of(&kv.key, nreduce)].push(kv);
    }
    Ok(buckets)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    AtomicFile::new(path, AllowOverwrite)
        .write(|f| f.write_all(contents))
        .with_context(|| format!("unable to write {}", path.display()))?;
    trace!("wrote {:?} ({} bytes)", path, contents.len());
    Ok(())
}

pub fn write_records(path: &Path, records: &[KeyValue]) -> Result<()> {
    let mut buf = Vec::new();
    for kv in records {
        serde_json::to_writer(&mut buf, kv)?;
        buf.push(b'\n');
    }
    write_atomic(path, &buf)
}

pub fn read_records(path: &Path) -> Result<Vec<KeyValue>> {
    let f = File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    let mut records = Vec::new();
    for line in BufReader::new(f).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let kv = serde_json::from_str(&line)
            .with_context(|| format!("corrupt record in {}", path.display()))?;
        records.push(kv);
    }
    Ok(records)
}

/// Sorts by key and groups consecutive equal keys. Values keep their relative
/// order from `records`.
pub fn shuffle(mut records: Vec<KeyValue>) -> Vec<(String, Vec<String>)> {
    records.sort_by(|a, b| a.key.cmp(&b.key));
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for KeyValue { key, value } in records {
        match groups.last_mut() {
            Some((k, vs)) if *k == key => vs.push(value),
            _ => groups.push((key, vec![value])),
        }
    }
    groups
}

pub fn write_output(path: &Path, lines: &[(String, String)]) -> Result<()> {
    let mut s = String::new();
    for (k, v) in lines {
        s.push_str(k);
        s.push(' ');
        s.push_str(v);
        s.push('\n');
    }
    write_atomic(path, s.as_bytes())
}
