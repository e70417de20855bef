use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::domain::{JobId, JobStatus, MessageId, Sender};
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub status: Option<JobStatus>,
    pub job_id: Option<JobId>,
    pub video_ref: Option<Url>,
    pub solution_text: Option<String>,
    pub code_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content.into(), None)
    }

    pub fn assistant(content: impl Into<String>, status: JobStatus) -> Self {
        Self::new(Sender::Assistant, content.into(), Some(status))
    }

    fn new(sender: Sender, content: String, status: Option<JobStatus>) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            content,
            status,
            job_id: None,
            video_ref: None,
            solution_text: None,
            code_text: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.as_ref().is_some_and(JobStatus::is_terminal)
    }

    fn has_assistant_fields(&self) -> bool {
        self.status.is_some()
            || self.job_id.is_some()
            || self.video_ref.is_some()
            || self.solution_text.is_some()
            || self.code_text.is_some()
    }
}

/// Partial update applied to one record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub status: Option<JobStatus>,
    pub job_id: Option<JobId>,
    pub video_ref: Option<Url>,
    pub solution_text: Option<String>,
    pub code_text: Option<String>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_video_ref(mut self, video_ref: Url) -> Self {
        self.video_ref = Some(video_ref);
        self
    }

    pub fn with_solution_text(mut self, text: impl Into<String>) -> Self {
        self.solution_text = Some(text.into());
        self
    }

    pub fn with_code_text(mut self, text: impl Into<String>) -> Self {
        self.code_text = Some(text.into());
        self
    }

    fn touches_assistant_fields(&self) -> bool {
        self.status.is_some()
            || self.job_id.is_some()
            || self.video_ref.is_some()
            || self.solution_text.is_some()
            || self.code_text.is_some()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("message {0} already exists")]
    DuplicateId(MessageId),
    #[error("message {0} not found")]
    UnknownMessage(MessageId),
    #[error("message {id} is already {status} and can no longer change")]
    TerminalRecord { id: MessageId, status: JobStatus },
    #[error("user message {0} cannot carry job status or artifacts")]
    AssistantFieldOnUserRecord(MessageId),
}

/// Append-only conversation log. Insertion order is display order.
#[derive(Debug, Default)]
pub struct MessageLog {
    records: Vec<MessageRecord>,
    index: HashMap<MessageId, usize>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: MessageRecord) -> Result<&MessageRecord, LogError> {
        if self.index.contains_key(&record.id) {
            return Err(LogError::DuplicateId(record.id));
        }
        if record.sender == Sender::User && record.has_assistant_fields() {
            return Err(LogError::AssistantFieldOnUserRecord(record.id));
        }
        let position = self.records.len();
        self.index.insert(record.id, position);
        self.records.push(record);
        Ok(&self.records[position])
    }

    pub fn patch(&mut self, id: MessageId, patch: MessagePatch) -> Result<&MessageRecord, LogError> {
        let position = *self.index.get(&id).ok_or(LogError::UnknownMessage(id))?;
        let record = &mut self.records[position];

        if let Some(status) = record.status.as_ref().filter(|status| status.is_terminal()) {
            return Err(LogError::TerminalRecord {
                id,
                status: status.clone(),
            });
        }
        if record.sender == Sender::User && patch.touches_assistant_fields() {
            return Err(LogError::AssistantFieldOnUserRecord(id));
        }

        if let Some(content) = patch.content {
            record.content = content;
        }
        if let Some(status) = patch.status {
            record.status = Some(status);
        }
        if let Some(job_id) = patch.job_id {
            record.job_id = Some(job_id);
        }
        if let Some(video_ref) = patch.video_ref {
            record.video_ref = Some(video_ref);
        }
        if let Some(text) = patch.solution_text {
            record.solution_text = Some(text);
        }
        if let Some(text) = patch.code_text {
            record.code_text = Some(text);
        }
        Ok(record)
    }

    pub fn get(&self, id: MessageId) -> Option<&MessageRecord> {
        self.index.get(&id).map(|&position| &self.records[position])
    }

    pub fn records(&self) -> &[MessageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
