use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tarpc::{client, context, tokio_serde::formats::Json};

use crate::storage::{
    intermediate_path, output_path, partition, read_records, shuffle, write_output, write_records,
};
use crate::{Assignment, MapFn, Phase, ReduceFn, ServiceClient, WorkerId};

/// Reads `file`, maps it and writes one intermediate file per bucket.
pub fn run_map(dir: &Path, id: usize, file: &Path, nreduce: usize, map: MapFn) -> Result<()> {
    let contents =
        fs::read_to_string(file).with_context(|| format!("unable to read {}", file.display()))?;
    let buckets = partition(map(file, &contents), nreduce)?;
    for (bucket, records) in buckets.iter().enumerate() {
        write_records(&intermediate_path(dir, id, bucket), records)?;
    }
    Ok(())
}

/// Gathers bucket `id` from all `nmap` map outputs, groups by key and writes
/// the reduced result.
pub fn run_reduce(dir: &Path, id: usize, nmap: usize, reduce: ReduceFn) -> Result<()> {
    let mut records = Vec::new();
    for m in 0..nmap {
        records.extend(read_records(&intermediate_path(dir, m, id))?);
    }
    let lines: Vec<(String, String)> = shuffle(records)
        .into_iter()
        .map(|(k, vs)| {
            let v = reduce(&k, &vs);
            (k, v)
        })
        .collect();
    write_output(&output_path(dir, id), &lines)
}

pub struct Worker {
    pub id: WorkerId,
    /// Coordinator address, `host:port`.
    pub server: String,
    /// Directory holding intermediate and output files, shared by all workers.
    pub dir: PathBuf,
    /// Sleep between polls while the coordinator answers `Wait`.
    pub backoff: Duration,
    pub map: MapFn,
    pub reduce: ReduceFn,
}

impl Worker {
    /// Runs tasks until the coordinator says the job is done. Any transport
    /// or execution failure ends the loop without reporting; the coordinator
    /// reassigns the task once it times out.
    pub async fn launch(&self) -> Result<()> {
        let transport = tarpc::serde_transport::tcp::connect(self.server.as_str(), Json::default)
            .await
            .with_context(|| format!("unable to connect to {}", self.server))?;
        let client = ServiceClient::new(client::Config::default(), transport).spawn();
        info!("worker {} connected to {}", self.id, self.server);

        loop {
            let assignment = client.get_task(context::current(), self.id).await?;
            let (phase, id) = match assignment {
                Assignment::Wait => {
                    tokio::time::sleep(self.backoff).await;
                    continue;
                }
                Assignment::Exit => {
                    info!("worker {} exiting", self.id);
                    return Ok(());
                }
                Assignment::Map { id, file, nreduce } => {
                    debug!("worker {} mapping {:?} as task {}", self.id, file, id);
                    let (dir, map) = (self.dir.clone(), self.map);
                    tokio::task::spawn_blocking(move || run_map(&dir, id, &file, nreduce, map))
                        .await??;
                    (Phase::Map, id)
                }
                Assignment::Reduce { id, nmap } => {
                    debug!("worker {} reducing bucket {}", self.id, id);
                    let (dir, reduce) = (self.dir.clone(), self.reduce);
                    tokio::task::spawn_blocking(move || run_reduce(&dir, id, nmap, reduce))
                        .await??;
                    (Phase::Reduce, id)
                }
            };

            let reply = client
                .report_task(context::current(), self.id, phase, id, true)
                .await?;
            if !reply.ok {
                warn!(
                    "worker {}: {:?} task {} was already reassigned, report ignored",
                    self.id, phase, id
                );
            }
        }
    }
}
