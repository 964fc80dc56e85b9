//! Admission control for jobs.
//!
//! Jobs of one requester run one after another in submission order; across
//! requesters at most `workers` jobs run at once and the rest wait in a FIFO.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use super::{Job, JobId, JobReport};

/// Anything that can drive a job to a terminal state
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: Job) -> JobReport;
}

/// Result of submitting a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A worker picked the job up immediately
    Started,

    /// The job waits at `position` (1-based) in its queue
    Queued { position: usize },

    /// The same URL is already active or queued for this requester
    Duplicate { existing: JobId },
}

#[derive(Debug)]
struct ActiveEntry {
    id: JobId,
    url: String,
}

/// Scheduler bookkeeping. Pure state, no I/O.
#[derive(Debug)]
pub struct SchedulerState {
    workers: usize,
    running: usize,

    /// The job of each requester that holds the requester slot
    active: HashMap<i64, ActiveEntry>,

    /// Jobs waiting behind their requester's active job
    backlog: HashMap<i64, VecDeque<Job>>,

    /// Jobs holding a requester slot but waiting for a worker
    ready: VecDeque<Job>,
}

impl SchedulerState {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            running: 0,
            active: HashMap::new(),
            backlog: HashMap::new(),
            ready: VecDeque::new(),
        }
    }

    /// Admit a job. Returns the job back when it should start right away.
    pub fn submit(&mut self, job: Job) -> (Admission, Option<Job>) {
        let requester = job.requester();

        if let Some(existing) = self.duplicate_of(requester, &job.url) {
            return (Admission::Duplicate { existing }, None);
        }

        if self.active.contains_key(&requester) {
            let queue = self.backlog.entry(requester).or_default();
            queue.push_back(job);
            return (Admission::Queued { position: queue.len() }, None);
        }

        self.active.insert(
            requester,
            ActiveEntry {
                id: job.id,
                url: job.url.clone(),
            },
        );

        if self.running < self.workers {
            self.running += 1;
            (Admission::Started, Some(job))
        } else {
            self.ready.push_back(job);
            (Admission::Queued { position: self.ready.len() }, None)
        }
    }

    /// Release the slots held by a finished job of `requester` and return
    /// the jobs that may start now.
    pub fn complete(&mut self, requester: i64) -> Vec<Job> {
        self.running = self.running.saturating_sub(1);
        self.active.remove(&requester);

        // The requester's next job joins the global queue behind everyone else
        let next = self.backlog.get_mut(&requester).and_then(VecDeque::pop_front);
        if self.backlog.get(&requester).is_some_and(VecDeque::is_empty) {
            self.backlog.remove(&requester);
        }
        if let Some(job) = next {
            self.active.insert(
                requester,
                ActiveEntry {
                    id: job.id,
                    url: job.url.clone(),
                },
            );
            self.ready.push_back(job);
        }

        let mut start = Vec::new();
        while self.running < self.workers {
            let Some(job) = self.ready.pop_front() else {
                break;
            };
            self.running += 1;
            start.push(job);
        }
        start
    }

    fn duplicate_of(&self, requester: i64, url: &str) -> Option<JobId> {
        if let Some(active) = self.active.get(&requester) {
            if active.url == url {
                return Some(active.id);
            }
        }
        self.backlog
            .get(&requester)?
            .iter()
            .find(|job| job.url == url)
            .map(|job| job.id)
    }

    pub fn running(&self) -> usize {
        self.running
    }

    /// Jobs admitted but not finished
    pub fn outstanding(&self) -> usize {
        self.running + self.ready.len() + self.backlog.values().map(VecDeque::len).sum::<usize>()
    }

    pub fn is_active(&self, requester: i64) -> bool {
        self.active.contains_key(&requester)
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    runner: Arc<dyn JobRunner>,
    outstanding: watch::Sender<usize>,
}

/// Spawns admitted jobs onto tokio tasks and keeps [`SchedulerState`] current
#[derive(Clone)]
pub struct JobScheduler {
    shared: Arc<Shared>,
}

impl JobScheduler {
    pub fn new(runner: Arc<dyn JobRunner>, workers: usize) -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::new(workers)),
                runner,
                outstanding,
            }),
        }
    }

    pub async fn submit(&self, job: Job) -> Admission {
        let id = job.id;
        let (admission, start) = {
            let mut state = self.shared.state.lock().await;
            let result = state.submit(job);
            self.shared.outstanding.send_replace(state.outstanding());
            result
        };

        tracing::info!(job = %id, ?admission, "Job submitted");
        if let Some(job) = start {
            spawn_worker(self.shared.clone(), job);
        }
        admission
    }

    /// Jobs admitted but not finished
    pub async fn outstanding(&self) -> usize {
        self.shared.state.lock().await.outstanding()
    }

    /// Wait until every admitted job reached a terminal state
    pub async fn wait_idle(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        // The sender lives in `shared`, so the channel cannot close here
        let _ = outstanding.wait_for(|count| *count == 0).await;
    }
}

fn spawn_worker(shared: Arc<Shared>, job: Job) {
    tokio::spawn(async move {
        let mut current = Some(job);
        while let Some(job) = current.take() {
            let id = job.id;
            let runner = shared.runner.clone();

            // A panicking job must not leak its slots
            match tokio::spawn(async move { runner.run(job).await }).await {
                Ok(report) => {
                    tracing::debug!(job = %id, status = %report.status, "Job finished");
                }
                Err(error) => {
                    tracing::error!(job = %id, %error, "Job task aborted");
                }
            }

            let mut ready = {
                let mut state = shared.state.lock().await;
                let ready = state.complete(id.requester);
                shared.outstanding.send_replace(state.outstanding());
                ready
            };

            // Keep this task busy with the first ready job, hand the rest to new tasks
            if !ready.is_empty() {
                current = Some(ready.remove(0));
            }
            for job in ready {
                spawn_worker(shared.clone(), job);
            }
        }
    });
}
