//! In-process stand-in for the job executor.
//!
//! Replays a fixed sequence of poll results for every job it creates and
//! serves canned artifacts. Once a job's script runs out the last entry is
//! repeated.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use shared::domain::JobId;
use tokio::sync::Mutex;
use url::Url;

use crate::job_client::{
    endpoint, ArtifactFetchError, Artifacts, JobClient, StatusReport, SubmissionError,
    TransportError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedTick {
    Stage {
        stage: String,
        error: Option<String>,
    },
    TransportFailure(String),
}

impl ScriptedTick {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Stage {
            stage: "failed".into(),
            error: Some(error.into()),
        }
    }
}

#[derive(Default)]
struct ScriptState {
    next_job: u64,
    cursors: HashMap<JobId, usize>,
}

pub struct ScriptedJobClient {
    base: Url,
    ticks: Vec<ScriptedTick>,
    artifacts: Option<Artifacts>,
    rejection: Option<String>,
    status_latency: Option<Duration>,
    state: Mutex<ScriptState>,
    status_calls: AtomicUsize,
    artifact_calls: AtomicUsize,
}

impl ScriptedJobClient {
    /// `base` only feeds [`JobClient::video_ref`]; nothing is ever requested.
    pub fn new<I, S>(base: Url, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_ticks(base, stages.into_iter().map(ScriptedTick::stage).collect())
    }

    pub fn from_ticks(base: Url, ticks: Vec<ScriptedTick>) -> Self {
        Self {
            base,
            ticks,
            artifacts: Some(Artifacts {
                solution_text: "Split the range in half until the target is found.".into(),
                code_text: "class BinarySearchScene(Scene):\n    def construct(self):\n        pass\n"
                    .into(),
            }),
            rejection: None,
            status_latency: None,
            state: Mutex::new(ScriptState::default()),
            status_calls: AtomicUsize::new(0),
            artifact_calls: AtomicUsize::new(0),
        }
    }

    /// The stage walk the demo executor goes through for a healthy job.
    pub fn demo(base: Url) -> Self {
        Self::new(
            base,
            [
                "understanding_problem",
                "generating_solution",
                "generating_code",
                "video_rendering",
                "completed",
            ],
        )
    }

    pub fn with_artifacts(mut self, artifacts: Artifacts) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Artifact fetches fail after the job completes.
    pub fn without_artifacts(mut self) -> Self {
        self.artifacts = None;
        self
    }

    pub fn rejecting(mut self, message: impl Into<String>) -> Self {
        self.rejection = Some(message.into());
        self
    }

    /// Delays every status response, leaving a window where a poll is in flight.
    pub fn with_status_latency(mut self, latency: Duration) -> Self {
        self.status_latency = Some(latency);
        self
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn artifact_calls(&self) -> usize {
        self.artifact_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobClient for ScriptedJobClient {
    async fn create_job(&self, _prompt: &str) -> Result<JobId, SubmissionError> {
        if let Some(message) = &self.rejection {
            return Err(SubmissionError::Rejected {
                status: 400,
                message: message.clone(),
            });
        }
        let mut state = self.state.lock().await;
        state.next_job += 1;
        let job_id = JobId::new(format!("scripted-{}", state.next_job));
        state.cursors.insert(job_id.clone(), 0);
        Ok(job_id)
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusReport, TransportError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.status_latency {
            tokio::time::sleep(latency).await;
        }

        let tick = {
            let mut state = self.state.lock().await;
            let cursor = state.cursors.entry(job_id.clone()).or_insert(0);
            let tick = self
                .ticks
                .get(*cursor)
                .or_else(|| self.ticks.last())
                .cloned();
            *cursor += 1;
            tick
        };

        match tick {
            Some(ScriptedTick::Stage { stage, error }) => Ok(StatusReport { stage, error }),
            Some(ScriptedTick::TransportFailure(reason)) => {
                Err(TransportError::Unavailable(reason))
            }
            None => Err(TransportError::Unavailable(format!(
                "no script for job {job_id}"
            ))),
        }
    }

    async fn fetch_artifacts(&self, job_id: &JobId) -> Result<Artifacts, ArtifactFetchError> {
        self.artifact_calls.fetch_add(1, Ordering::SeqCst);
        self.artifacts.clone().ok_or_else(|| {
            ArtifactFetchError::Solution(TransportError::Unavailable(format!(
                "no artifacts for job {job_id}"
            )))
        })
    }

    fn video_ref(&self, job_id: &JobId) -> Url {
        endpoint(&self.base, &["video", job_id.as_str()])
    }
}
