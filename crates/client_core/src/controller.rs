use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::domain::{JobId, JobStatus, MessageId};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    config::{ClientConfig, ConfigError},
    job_client::{HttpJobClient, JobClient, SubmissionError},
    message_log::{LogError, MessageLog, MessagePatch, MessageRecord},
    poller::{PatchGate, PollObserver, Poller, TerminalOutcome},
    status::Classification,
};

pub const PROCESSING_MESSAGE: &str = "Processing your request...";
pub const JOB_ACCEPTED_MESSAGE: &str = "Generating solution...";
pub const COMPLETED_MESSAGE: &str = "Your visualization is ready! Here's what I found:";
pub const SUBMISSION_TRANSPORT_MESSAGE: &str =
    "Sorry, there was an error processing your request. Please try again.";
const UNKNOWN_STAGE_ERROR: &str = "Unknown error";

/// Change notifications for whatever renders the conversation.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageAppended(MessageRecord),
    MessageUpdated(MessageRecord),
    BusyChanged(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyPrompt,
    Busy,
    /// The log refused the new records.
    LogRejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Ignored(IgnoreReason),
    /// Job creation failed; the assistant record already carries the error.
    Rejected { message_id: MessageId },
    Polling {
        message_id: MessageId,
        job_id: JobId,
    },
}

struct Session {
    log: Mutex<MessageLog>,
    busy: AtomicBool,
    /// Job whose terminal patch will clear `busy`.
    in_flight: Mutex<Option<JobId>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    fn log(&self) -> MutexGuard<'_, MessageLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<JobId>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, record: MessageRecord) -> Result<MessageId, LogError> {
        let record = self.log().append(record).cloned()?;
        let id = record.id;
        let _ = self.events.send(SessionEvent::MessageAppended(record));
        Ok(id)
    }

    fn patch(&self, id: MessageId, patch: MessagePatch) {
        let patched = self.log().patch(id, patch).cloned();
        match patched {
            Ok(record) => {
                let _ = self.events.send(SessionEvent::MessageUpdated(record));
            }
            Err(error) => warn!(message_id = %id, %error, "dropping message patch"),
        }
    }

    fn try_acquire(&self) -> bool {
        let acquired = self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if acquired {
            let _ = self.events.send(SessionEvent::BusyChanged(true));
        }
        acquired
    }

    fn track(&self, job_id: JobId) {
        *self.in_flight() = Some(job_id);
    }

    fn release(&self) {
        self.in_flight().take();
        if self.busy.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(SessionEvent::BusyChanged(false));
        }
    }

    /// Releases the session only if `job_id` is the job holding it.
    fn release_job(&self, job_id: &JobId) -> bool {
        {
            let mut in_flight = self.in_flight();
            if in_flight.as_ref() != Some(job_id) {
                return false;
            }
            in_flight.take();
        }
        self.release();
        true
    }
}

struct JobObserver {
    session: Arc<Session>,
    client: Arc<dyn JobClient>,
}

#[async_trait]
impl PollObserver for JobObserver {
    fn on_update(&self, gate: &PatchGate, progress: &Classification) {
        let message_id = gate.ticket().message_id;
        gate.apply(|| {
            self.session.patch(
                message_id,
                MessagePatch::content(progress.label.clone()).with_status(progress.status.clone()),
            )
        });
    }

    async fn on_terminal(&self, gate: &PatchGate, outcome: TerminalOutcome) {
        let ticket = gate.ticket();
        let patch = match outcome {
            TerminalOutcome::Failed { error } => {
                let error = error
                    .filter(|error| !error.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_STAGE_ERROR.to_string());
                warn!(job_id = %ticket.job_id, %error, "job failed");
                MessagePatch::content(format!("Error generating visualization: {error}"))
                    .with_status(JobStatus::Failed)
            }
            TerminalOutcome::Completed => match self.client.fetch_artifacts(&ticket.job_id).await {
                Ok(artifacts) => MessagePatch::content(COMPLETED_MESSAGE)
                    .with_status(JobStatus::Completed)
                    .with_video_ref(self.client.video_ref(&ticket.job_id))
                    .with_solution_text(artifacts.solution_text)
                    .with_code_text(artifacts.code_text),
                Err(error) => {
                    warn!(job_id = %ticket.job_id, %error, "job completed but artifacts are unavailable");
                    MessagePatch::content(format!("Error retrieving visualization results: {error}"))
                        .with_status(JobStatus::Failed)
                }
            },
        };

        gate.apply(|| {
            self.session.patch(ticket.message_id, patch);
            self.session.release();
        });
    }
}

/// Turns prompts into conversation records and drives each job's poll to a
/// terminal state.
pub struct SubmissionController {
    client: Arc<dyn JobClient>,
    poller: Poller,
    session: Arc<Session>,
}

impl SubmissionController {
    pub fn new(client: Arc<dyn JobClient>, poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            poller: Poller::new(Arc::clone(&client), poll_interval),
            client,
            session: Arc::new(Session {
                log: Mutex::new(MessageLog::new()),
                busy: AtomicBool::new(false),
                in_flight: Mutex::new(None),
                events,
            }),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let client = HttpJobClient::from_config(config)?;
        Ok(Self::new(Arc::new(client), config.poll_interval()?))
    }

    pub async fn submit(&self, prompt: &str) -> SubmitOutcome {
        if prompt.trim().is_empty() {
            return SubmitOutcome::Ignored(IgnoreReason::EmptyPrompt);
        }
        if !self.session.try_acquire() {
            return SubmitOutcome::Ignored(IgnoreReason::Busy);
        }

        let appended = self
            .session
            .append(MessageRecord::user(prompt))
            .and_then(|_| {
                self.session
                    .append(MessageRecord::assistant(PROCESSING_MESSAGE, JobStatus::Processing))
            });
        let message_id = match appended {
            Ok(message_id) => message_id,
            Err(error) => {
                warn!(%error, "failed to record submission");
                self.session.release();
                return SubmitOutcome::Ignored(IgnoreReason::LogRejected);
            }
        };

        let job_id = match self.client.create_job(prompt).await {
            Ok(job_id) => job_id,
            Err(error) => {
                warn!(%error, "job submission failed");
                let content = match &error {
                    SubmissionError::Rejected { message, .. } => format!("Error: {message}"),
                    SubmissionError::Transport(_) => SUBMISSION_TRANSPORT_MESSAGE.to_string(),
                };
                self.session.patch(
                    message_id,
                    MessagePatch::content(content).with_status(JobStatus::Failed),
                );
                self.session.release();
                return SubmitOutcome::Rejected { message_id };
            }
        };

        info!(%job_id, %message_id, "job accepted");
        self.session.patch(
            message_id,
            MessagePatch::content(JOB_ACCEPTED_MESSAGE).with_job_id(job_id.clone()),
        );
        self.session.track(job_id.clone());
        let observer = Arc::new(JobObserver {
            session: Arc::clone(&self.session),
            client: Arc::clone(&self.client),
        });
        self.poller.start(job_id.clone(), message_id, observer);

        SubmitOutcome::Polling { message_id, job_id }
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.session.log().records().to_vec()
    }

    pub fn message(&self, id: MessageId) -> Option<MessageRecord> {
        self.session.log().get(id).cloned()
    }

    pub fn is_busy(&self) -> bool {
        self.session.busy.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.events.subscribe()
    }

    pub fn is_polling(&self, job_id: &JobId) -> bool {
        self.poller.is_polling(job_id)
    }

    pub fn active_jobs(&self) -> Vec<JobId> {
        self.poller.active_jobs()
    }

    /// Cancels the poll for `job_id`. Its record keeps the last status it
    /// reached; if it was the in-flight job, new prompts are accepted again.
    pub fn stop(&self, job_id: &JobId) -> bool {
        let stopped = self.poller.stop(job_id);
        if self.session.release_job(job_id) {
            info!(%job_id, "stopped the in-flight job");
        }
        stopped
    }

    /// Stops every outstanding poll. Records that were still in progress keep
    /// their last status.
    pub fn shutdown(&self) {
        let stopped = self.poller.stop_all();
        if stopped > 0 {
            info!(stopped, "stopped outstanding job polls");
        }
        self.session.release();
    }
}

impl Drop for SubmissionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
