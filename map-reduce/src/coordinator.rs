use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::{future, prelude::*};
use log::{debug, info, warn};
use tarpc::{
    context,
    server::{self, Channel},
    tokio_serde::formats::Json,
};
use tokio::task::JoinHandle;

use crate::registry::Job;
use crate::{Assignment, Phase, ReportReply, Service, WorkerId};

const DONE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const EXIT_GRACE: Duration = Duration::from_secs(1);
const MAX_CONNECTIONS: usize = 256;

/// Lock-guarded scheduling core. Every operation holds the registry lock for
/// its full duration and performs no I/O under it.
#[derive(Debug, Clone)]
pub struct Scheduler {
    job: Arc<Mutex<Job>>,
    timeout: Duration,
}

impl Scheduler {
    pub fn new(job: Job, timeout: Duration) -> Self {
        Self {
            job: Arc::new(Mutex::new(job)),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Job> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_task(&self, worker: WorkerId, now: Instant) -> Assignment {
        let mut job = self.lock();
        job.sweep_timeouts(now, self.timeout);

        if job.all_done() {
            return Assignment::Exit;
        }

        let phase = if job.map_done() {
            Phase::Reduce
        } else {
            Phase::Map
        };
        let id = match job.find_idle(phase) {
            Some(id) => id,
            None => return Assignment::Wait,
        };
        job.mark_in_progress(phase, id, worker, now);

        let assignment = match phase {
            Phase::Map => Assignment::Map {
                id,
                file: job.files()[id].clone(),
                nreduce: job.nreduce(),
            },
            Phase::Reduce => Assignment::Reduce {
                id,
                nmap: job.nmap(),
            },
        };
        debug!("assigned {:?} to worker {}", assignment, worker);
        assignment
    }

    pub fn report_task(&self, worker: WorkerId, phase: Phase, id: usize, success: bool) -> bool {
        if !success {
            // Left to the timeout sweep.
            warn!("worker {} failed {:?} task {}", worker, phase, id);
            return false;
        }

        let mut job = self.lock();
        let was_map_done = job.map_done();
        if !job.mark_completed(phase, id, worker) {
            warn!(
                "stale report of {:?} task {} from worker {}, ignored",
                phase, id, worker
            );
            return false;
        }
        debug!("{:?} task {} completed by worker {}", phase, id, worker);
        if !was_map_done && job.map_done() {
            info!("map phase done, starting {} reduce tasks", job.nreduce());
        }
        if job.all_done() {
            info!("all tasks completed");
        }
        true
    }

    pub fn done(&self) -> bool {
        self.lock().all_done()
    }

    /// Snapshot of the registry.
    pub fn job(&self) -> Job {
        self.lock().clone()
    }
}

// This is the type that implements the generated Service trait.
#[derive(Debug, Clone)]
pub struct CoordinatorServer {
    scheduler: Scheduler,
}

impl CoordinatorServer {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

impl Service for CoordinatorServer {
    async fn get_task(self, _: context::Context, worker: WorkerId) -> Assignment {
        self.scheduler.get_task(worker, Instant::now())
    }

    async fn report_task(
        self,
        _: context::Context,
        worker: WorkerId,
        phase: Phase,
        id: usize,
        success: bool,
    ) -> ReportReply {
        ReportReply {
            ok: self.scheduler.report_task(worker, phase, id, success),
        }
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// Job submission: input files, reduce partition count and the endpoint to
/// serve workers on.
pub struct Coordinator {
    pub addr: SocketAddr,
    /// Age at which an unreported assignment goes back to idle. Shorter values
    /// reassign healthy but slow workers, longer values delay recovery from
    /// crashed ones.
    pub timeout: Duration,
    pub files: Vec<PathBuf>,
    pub nreduce: usize,
}

impl Coordinator {
    /// Binds the endpoint and starts serving in the background.
    pub async fn start(&self) -> Result<CoordinatorHandle> {
        let scheduler = Scheduler::new(Job::new(self.files.clone(), self.nreduce)?, self.timeout);
        let server = CoordinatorServer::new(scheduler.clone());

        let mut listener = tarpc::serde_transport::tcp::listen(&self.addr, Json::default)
            .await
            .with_context(|| format!("unable to listen on {}", self.addr))?;
        listener.config_mut().max_frame_length(usize::MAX);
        let addr = listener.local_addr();
        info!(
            "coordinator listening on {}: {} map tasks, {} reduce tasks",
            addr,
            self.files.len(),
            self.nreduce
        );

        let serving = tokio::spawn(
            listener
                // Ignore accept errors.
                .filter_map(|r| future::ready(r.ok()))
                .map(server::BaseChannel::with_defaults)
                // Every request is handled on its own task.
                .map(move |channel| channel.execute(server.clone().serve()).for_each(spawn))
                .buffer_unordered(MAX_CONNECTIONS)
                .for_each(|_| async {}),
        );

        Ok(CoordinatorHandle {
            addr,
            scheduler,
            serving,
        })
    }

    /// Runs the job to completion.
    pub async fn launch(&self) -> Result<()> {
        self.start().await?.wait().await;
        Ok(())
    }
}

pub struct CoordinatorHandle {
    addr: SocketAddr,
    scheduler: Scheduler,
    serving: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn done(&self) -> bool {
        self.scheduler.done()
    }

    /// Waits for the job to finish, keeps answering `Exit` for a grace period
    /// and then stops serving.
    pub async fn wait(self) {
        while !self.done() {
            tokio::time::sleep(DONE_POLL_INTERVAL).await;
        }
        info!("job finished");
        tokio::time::sleep(EXIT_GRACE).await;
        self.serving.abort();
    }
}
