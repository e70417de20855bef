//! In-memory jobs whose stage is a pure function of elapsed time.

use std::{collections::HashMap, time::Duration};

use shared::{domain::JobId, protocol::StatusResponse};
use tokio::{sync::RwLock, time::Instant};
use tracing::debug;
use uuid::Uuid;

pub const HEALTHY_STAGES: [&str; 5] = [
    "understanding_problem",
    "generating_solution",
    "generating_code",
    "video_rendering",
    "completed",
];
pub const SIMULATED_FAILURE: &str = "render crash";
/// How long a finished job stays queryable before `create` evicts it.
pub const FINISHED_JOB_RETENTION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Plan {
    Succeeds,
    Fails,
}

#[derive(Debug, Clone)]
struct DemoJob {
    prompt: String,
    started_at: Instant,
    plan: Plan,
}

impl DemoJob {
    fn stage_index(&self, now: Instant, stage_duration: Duration) -> usize {
        let elapsed = now.saturating_duration_since(self.started_at).as_millis();
        let step = elapsed / stage_duration.as_millis().max(1);
        usize::try_from(step)
            .unwrap_or(usize::MAX)
            .min(HEALTHY_STAGES.len() - 1)
    }

    fn status(&self, now: Instant, stage_duration: Duration) -> StatusResponse {
        let index = self.stage_index(now, stage_duration);
        let finished = index == HEALTHY_STAGES.len() - 1;
        if finished && self.plan == Plan::Fails {
            return StatusResponse {
                status: "failed".into(),
                error: Some(SIMULATED_FAILURE.into()),
            };
        }
        StatusResponse {
            status: HEALTHY_STAGES[index].into(),
            error: None,
        }
    }

    /// `None` when the run is too long to represent as an `Instant`.
    fn finished_at(&self, stage_duration: Duration) -> Option<Instant> {
        let final_stage = u32::try_from(HEALTHY_STAGES.len() - 1).ok()?;
        self.started_at
            .checked_add(stage_duration.checked_mul(final_stage)?)
    }

    fn is_expired(&self, now: Instant, stage_duration: Duration) -> bool {
        self.finished_at(stage_duration)
            .is_some_and(|at| now.saturating_duration_since(at) >= FINISHED_JOB_RETENTION)
    }

    fn is_completed(&self, now: Instant, stage_duration: Duration) -> bool {
        self.plan == Plan::Succeeds
            && self.stage_index(now, stage_duration) == HEALTHY_STAGES.len() - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactError {
    UnknownJob,
    NotReady,
}

#[derive(Default)]
pub struct JobTable {
    jobs: RwLock<HashMap<JobId, DemoJob>>,
}

impl JobTable {
    /// Registers a new job and evicts those finished longer than
    /// [`FINISHED_JOB_RETENTION`] ago.
    pub async fn create(&self, prompt: &str, stage_duration: Duration) -> JobId {
        let job_id = JobId::new(Uuid::new_v4().simple().to_string());
        let plan = if prompt
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word.eq_ignore_ascii_case("fail"))
        {
            Plan::Fails
        } else {
            Plan::Succeeds
        };
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !job.is_expired(now, stage_duration));
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!(evicted, "evicted finished jobs");
        }
        jobs.insert(
            job_id.clone(),
            DemoJob {
                prompt: prompt.trim().to_string(),
                started_at: now,
                plan,
            },
        );
        job_id
    }

    pub async fn status(&self, job_id: &JobId, stage_duration: Duration) -> Option<StatusResponse> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id)
            .map(|job| job.status(Instant::now(), stage_duration))
    }

    async fn completed_prompt(
        &self,
        job_id: &JobId,
        stage_duration: Duration,
    ) -> Result<String, ArtifactError> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(job_id).ok_or(ArtifactError::UnknownJob)?;
        if !job.is_completed(Instant::now(), stage_duration) {
            return Err(ArtifactError::NotReady);
        }
        Ok(job.prompt.clone())
    }

    pub async fn solution(
        &self,
        job_id: &JobId,
        stage_duration: Duration,
    ) -> Result<String, ArtifactError> {
        let prompt = self.completed_prompt(job_id, stage_duration).await?;
        Ok(format!(
            "Problem: {prompt}\n\n1. Restate the problem and its inputs.\n2. Work through a small example by hand.\n3. Generalize the steps into an algorithm and check the edge cases."
        ))
    }

    pub async fn code(
        &self,
        job_id: &JobId,
        stage_duration: Duration,
    ) -> Result<String, ArtifactError> {
        let prompt = self.completed_prompt(job_id, stage_duration).await?;
        Ok(format!(
            "from manim import *\n\n\nclass Visualization(Scene):\n    def construct(self):\n        title = Text({prompt:?})\n        self.play(Write(title))\n        self.wait(1)\n"
        ))
    }

    pub async fn video_ready(
        &self,
        job_id: &JobId,
        stage_duration: Duration,
    ) -> Result<(), ArtifactError> {
        self.completed_prompt(job_id, stage_duration).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAGE: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn stages_advance_with_elapsed_time() {
        let table = JobTable::default();
        let job_id = table.create("binary search", STAGE).await;

        let mut seen = Vec::new();
        for _ in 0..7 {
            let status = table.status(&job_id, STAGE).await.expect("job");
            seen.push(status.status);
            tokio::time::advance(STAGE).await;
        }

        assert_eq!(
            seen,
            vec![
                "understanding_problem",
                "generating_solution",
                "generating_code",
                "video_rendering",
                "completed",
                "completed",
                "completed",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn prompts_asking_to_fail_end_in_failure() {
        let table = JobTable::default();
        let job_id = table.create("please FAIL this one", STAGE).await;

        tokio::time::advance(STAGE * 10).await;
        let status = table.status(&job_id, STAGE).await.expect("job");
        assert_eq!(status.status, "failed");
        assert_eq!(status.error.as_deref(), Some(SIMULATED_FAILURE));
        assert_eq!(
            table.solution(&job_id, STAGE).await,
            Err(ArtifactError::NotReady)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn artifacts_wait_for_completion() {
        let table = JobTable::default();
        let job_id = table.create("heap sort", STAGE).await;

        assert_eq!(table.code(&job_id, STAGE).await, Err(ArtifactError::NotReady));
        tokio::time::advance(STAGE * 5).await;

        let solution = table.solution(&job_id, STAGE).await.expect("solution");
        assert!(solution.contains("heap sort"));
        let code = table.code(&job_id, STAGE).await.expect("code");
        assert!(code.contains("class Visualization(Scene)"));
        assert_eq!(table.video_ready(&job_id, STAGE).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_jobs_are_evicted_after_retention() {
        let table = JobTable::default();
        let old = table.create("bubble sort", STAGE).await;
        let same_age = table.create("merge sort", STAGE).await;

        tokio::time::advance(STAGE * 4 + FINISHED_JOB_RETENTION - Duration::from_millis(1)).await;
        let fresh = table.create("quick sort", STAGE).await;
        assert!(table.status(&old, STAGE).await.is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        table.create("radix sort", STAGE).await;
        assert!(table.status(&old, STAGE).await.is_none());
        assert!(table.status(&same_age, STAGE).await.is_none());
        assert_eq!(
            table.status(&fresh, STAGE).await.map(|s| s.status),
            Some("understanding_problem".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_jobs_are_reported() {
        let table = JobTable::default();
        let missing = JobId::new("nope");
        assert!(table.status(&missing, STAGE).await.is_none());
        assert_eq!(
            table.solution(&missing, STAGE).await,
            Err(ArtifactError::UnknownJob)
        );
    }
}
