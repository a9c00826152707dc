//! Distributed MapReduce.
//!
//! A [`Coordinator`] owns the scheduling state of one job and hands out map
//! and reduce tasks over a tarpc [`Service`]. [`Worker`]s are stateless: they
//! pull an [`Assignment`], run the user callbacks, materialize their output
//! through the file protocol in [`storage`] and report back.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub mod app;
mod coordinator;
mod registry;
pub mod storage;
mod worker;

pub use coordinator::{Coordinator, CoordinatorHandle, CoordinatorServer, Scheduler};
pub use registry::{Job, Task, TaskState};
pub use worker::{run_map, run_reduce, Worker};

/// Identity a worker presents on every call. The bundled worker uses its pid.
pub type WorkerId = u64;

/// Map callback: `(filename, contents) -> records`.
pub type MapFn = fn(&Path, &str) -> Vec<KeyValue>;

/// Reduce callback: `(key, values) -> aggregated value`.
pub type ReduceFn = fn(&str, &[String]) -> String;

#[tarpc::service]
pub trait Service {
    /// Ask for work. Never blocks on job progress; answers `Wait` instead.
    async fn get_task(worker: WorkerId) -> Assignment;
    /// Report the outcome of an assignment previously handed to `worker`.
    async fn report_task(worker: WorkerId, phase: Phase, id: usize, success: bool) -> ReportReply;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Phase {
    Map,
    Reduce,
}

/// What a worker should do next.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Assignment {
    /// Partition `file` into `nreduce` buckets.
    Map {
        id: usize,
        file: PathBuf,
        nreduce: usize,
    },
    /// Aggregate bucket `id` over the output of all `nmap` map tasks.
    Reduce { id: usize, nmap: usize },
    /// Nothing assignable right now; poll again later.
    Wait,
    /// The job is done.
    Exit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportReply {
    pub ok: bool,
}

/// An intermediate record. Field names match the on-disk JSON encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "PascalCase")]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
