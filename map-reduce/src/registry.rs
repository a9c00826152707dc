use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{ensure, Result};
use log::warn;

use crate::{Phase, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    InProgress {
        worker: WorkerId,
        assigned_at: Instant,
    },
    Completed,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: usize,
    pub phase: Phase,
    pub state: TaskState,
    /// Source file of a map task. Reduce tasks locate their input by `id`.
    pub file: Option<PathBuf>,
}

impl Task {
    fn holder(&self) -> Option<WorkerId> {
        match self.state {
            TaskState::InProgress { worker, .. } => Some(worker),
            _ => None,
        }
    }
}

/// Scheduling state of one job.
///
/// Tasks only move `Idle -> InProgress -> Completed`, with `InProgress ->
/// Idle` on timeout only. `Completed` is terminal and both phase flags
/// only ever go from false to true.
#[derive(Debug, Clone)]
pub struct Job {
    files: Vec<PathBuf>,
    nreduce: usize,
    map_tasks: Vec<Task>,
    reduce_tasks: Vec<Task>,
    map_done: bool,
    all_done: bool,
}

impl Job {
    pub fn new(files: Vec<PathBuf>, nreduce: usize) -> Result<Self> {
        ensure!(!files.is_empty(), "no input files");
        ensure!(nreduce > 0, "nreduce must be non-zero");

        let map_tasks = files
            .iter()
            .enumerate()
            .map(|(id, file)| Task {
                id,
                phase: Phase::Map,
                state: TaskState::Idle,
                file: Some(file.clone()),
            })
            .collect();
        let reduce_tasks = (0..nreduce)
            .map(|id| Task {
                id,
                phase: Phase::Reduce,
                state: TaskState::Idle,
                file: None,
            })
            .collect();
        Ok(Self {
            files,
            nreduce,
            map_tasks,
            reduce_tasks,
            map_done: false,
            all_done: false,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn nmap(&self) -> usize {
        self.map_tasks.len()
    }

    pub fn nreduce(&self) -> usize {
        self.nreduce
    }

    pub fn map_done(&self) -> bool {
        self.map_done
    }

    pub fn all_done(&self) -> bool {
        self.all_done
    }

    pub fn tasks(&self, phase: Phase) -> &[Task] {
        match phase {
            Phase::Map => &self.map_tasks,
            Phase::Reduce => &self.reduce_tasks,
        }
    }

    fn tasks_mut(&mut self, phase: Phase) -> &mut [Task] {
        match phase {
            Phase::Map => &mut self.map_tasks,
            Phase::Reduce => &mut self.reduce_tasks,
        }
    }

    pub fn task(&self, phase: Phase, id: usize) -> Option<&Task> {
        self.tasks(phase).get(id)
    }

    /// First idle task of `phase` in registration order.
    pub fn find_idle(&self, phase: Phase) -> Option<usize> {
        self.tasks(phase)
            .iter()
            .position(|t| t.state == TaskState::Idle)
    }

    /// Returns false if the task is not idle.
    pub fn mark_in_progress(
        &mut self,
        phase: Phase,
        id: usize,
        worker: WorkerId,
        now: Instant,
    ) -> bool {
        match self.tasks_mut(phase).get_mut(id) {
            Some(t) if t.state == TaskState::Idle => {
                t.state = TaskState::InProgress {
                    worker,
                    assigned_at: now,
                };
                true
            }
            _ => false,
        }
    }

    /// Completes the task if `worker` currently holds it, then recomputes the
    /// phase flags. Returns whether the task transitioned.
    pub fn mark_completed(&mut self, phase: Phase, id: usize, worker: WorkerId) -> bool {
        match self.tasks_mut(phase).get_mut(id) {
            Some(t) if t.holder() == Some(worker) => t.state = TaskState::Completed,
            _ => return false,
        }
        match phase {
            Phase::Map => self.map_done = self.map_done || self.all_completed(Phase::Map),
            Phase::Reduce => {
                self.all_done = self.all_done || (self.map_done && self.all_completed(Phase::Reduce))
            }
        }
        true
    }

    pub fn all_completed(&self, phase: Phase) -> bool {
        self.tasks(phase)
            .iter()
            .all(|t| t.state == TaskState::Completed)
    }

    /// Reverts every assignment older than `timeout` to idle. Returns how
    /// many tasks were reclaimed.
    pub fn sweep_timeouts(&mut self, now: Instant, timeout: Duration) -> usize {
        let mut reclaimed = 0;
        for t in self.map_tasks.iter_mut().chain(self.reduce_tasks.iter_mut()) {
            if let TaskState::InProgress {
                worker,
                assigned_at,
            } = t.state
            {
                if now.saturating_duration_since(assigned_at) > timeout {
                    warn!(
                        "{:?} task {} timed out on worker {}, reassigning",
                        t.phase, t.id, worker
                    );
                    t.state = TaskState::Idle;
                    reclaimed += 1;
                }
            }
        }
        reclaimed
    }

    pub fn in_progress(&self, phase: Phase) -> usize {
        self.tasks(phase)
            .iter()
            .filter(|t| matches!(t.state, TaskState::InProgress { .. }))
            .count()
    }
}
