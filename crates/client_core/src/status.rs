//! Maps executor stage tokens onto record statuses and progress labels.

use shared::domain::JobStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: JobStatus,
    pub label: String,
}

impl Classification {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Classifies a non-empty stage token. Unknown tokens are treated as
/// intermediate stages.
pub fn classify(stage: &str) -> Classification {
    debug_assert!(!stage.trim().is_empty(), "stage token must not be empty");
    match JobStatus::from_token(stage) {
        status @ (JobStatus::Completed | JobStatus::Failed) => Classification {
            label: humanize_stage(stage),
            status,
        },
        status => Classification {
            label: format!("Generating visualization: {}...", humanize_stage(stage)),
            status,
        },
    }
}

/// `"video_rendering"` -> `"video rendering"`.
pub fn humanize_stage(stage: &str) -> String {
    stage.replace(['_', '-'], " ").trim().to_string()
}
