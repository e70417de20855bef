//! One status-polling task per job, owned by a private registry.
//!
//! Every patch a poll task wants to make goes through its [`PatchGate`], which
//! holds the registry lock while checking that the task's handle is still the
//! current one for the job. `stop` takes the same lock, so once it returns no
//! result from the stopped task can reach the log.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use shared::domain::{JobId, JobStatus, MessageId};
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    job_client::JobClient,
    status::{classify, Classification},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    Failed { error: Option<String> },
}

/// Receives the classified results of one job's poll loop.
#[async_trait]
pub trait PollObserver: Send + Sync {
    fn on_update(&self, gate: &PatchGate, progress: &Classification);
    async fn on_terminal(&self, gate: &PatchGate, outcome: TerminalOutcome);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTicket {
    pub job_id: JobId,
    pub message_id: MessageId,
    generation: u64,
}

struct JobHandle {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    handles: HashMap<JobId, JobHandle>,
    next_generation: u64,
}

impl Registry {
    fn is_current(&self, ticket: &PollTicket) -> bool {
        self.handles
            .get(&ticket.job_id)
            .is_some_and(|handle| handle.generation == ticket.generation)
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct PatchGate {
    registry: Arc<Mutex<Registry>>,
    ticket: PollTicket,
}

impl PatchGate {
    pub fn ticket(&self) -> &PollTicket {
        &self.ticket
    }

    pub fn is_current(&self) -> bool {
        lock(&self.registry).is_current(&self.ticket)
    }

    /// Runs `patch` only while this gate's handle is still live. Returns
    /// `None` when the job was stopped or re-polled in the meantime.
    pub fn apply<R>(&self, patch: impl FnOnce() -> R) -> Option<R> {
        let registry = lock(&self.registry);
        if !registry.is_current(&self.ticket) {
            debug!(job_id = %self.ticket.job_id, "discarding result from a stopped poll");
            return None;
        }
        Some(patch())
    }

    fn release(&self) {
        let mut registry = lock(&self.registry);
        if registry.is_current(&self.ticket) {
            registry.handles.remove(&self.ticket.job_id);
        }
    }
}

pub struct Poller {
    client: Arc<dyn JobClient>,
    interval: Duration,
    registry: Arc<Mutex<Registry>>,
}

impl Poller {
    pub fn new(client: Arc<dyn JobClient>, interval: Duration) -> Self {
        Self {
            client,
            interval: interval.max(MIN_POLL_INTERVAL),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts polling `job_id`, replacing (and cancelling) any poll already
    /// running for it. Must be called from within a tokio runtime.
    pub fn start(
        &self,
        job_id: JobId,
        message_id: MessageId,
        observer: Arc<dyn PollObserver>,
    ) -> PollTicket {
        let mut registry = lock(&self.registry);
        if let Some(previous) = registry.handles.remove(&job_id) {
            previous.task.abort();
            info!(%job_id, "replaced existing poll for job");
        }

        registry.next_generation += 1;
        let ticket = PollTicket {
            job_id: job_id.clone(),
            message_id,
            generation: registry.next_generation,
        };
        let gate = PatchGate {
            registry: Arc::clone(&self.registry),
            ticket: ticket.clone(),
        };
        let task = tokio::spawn(poll_job(
            Arc::clone(&self.client),
            self.interval,
            gate,
            observer,
        ));
        registry.handles.insert(
            job_id.clone(),
            JobHandle {
                generation: ticket.generation,
                task,
            },
        );
        info!(%job_id, %message_id, interval_ms = self.interval.as_millis() as u64, "polling job");
        ticket
    }

    /// Cancels the poll for `job_id`. Safe to call when none is running.
    pub fn stop(&self, job_id: &JobId) -> bool {
        let removed = lock(&self.registry).handles.remove(job_id);
        match removed {
            Some(handle) => {
                handle.task.abort();
                info!(%job_id, "stopped polling job");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) -> usize {
        let handles: Vec<_> = lock(&self.registry).handles.drain().collect();
        for (job_id, handle) in &handles {
            handle.task.abort();
            debug!(%job_id, "stopped polling job");
        }
        handles.len()
    }

    pub fn is_polling(&self, job_id: &JobId) -> bool {
        lock(&self.registry).handles.contains_key(job_id)
    }

    pub fn active_jobs(&self) -> Vec<JobId> {
        lock(&self.registry).handles.keys().cloned().collect()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        let stopped = self.stop_all();
        if stopped > 0 {
            debug!(stopped, "poller dropped with live polls");
        }
    }
}

async fn poll_job(
    client: Arc<dyn JobClient>,
    period: Duration,
    gate: PatchGate,
    observer: Arc<dyn PollObserver>,
) {
    let job_id = gate.ticket().job_id.clone();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        ticker.tick().await;

        let report = match client.fetch_status(&job_id).await {
            Ok(report) => report,
            Err(error) => {
                warn!(%job_id, %error, "status poll failed; retrying on next tick");
                continue;
            }
        };
        if report.stage.trim().is_empty() {
            warn!(%job_id, "executor reported an empty stage; retrying on next tick");
            continue;
        }

        let stage = report.stage.as_str();
        let classification = classify(stage);
        match classification.status {
            JobStatus::Completed => break TerminalOutcome::Completed,
            JobStatus::Failed => break TerminalOutcome::Failed { error: report.error },
            _ => {
                debug!(%job_id, stage, "job progressed");
                observer.on_update(&gate, &classification);
            }
        }
    };
    drop(ticker);

    if !gate.is_current() {
        return;
    }
    info!(%job_id, ?outcome, "job reached a terminal state");
    observer.on_terminal(&gate, outcome).await;
    gate.release();
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
