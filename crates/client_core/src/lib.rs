//! Conversation and job-orchestration engine for the visualization chat.
//!
//! A [`SubmissionController`] records each prompt in the [`MessageLog`],
//! creates a job through a [`JobClient`], and hands the job to the [`Poller`],
//! which polls until the executor reports `completed` or `failed`.

pub mod config;
pub mod controller;
pub mod job_client;
pub mod message_log;
pub mod poller;
pub mod scripted;
pub mod status;

pub use config::{load_client_config, ClientConfig, ConfigError};
pub use controller::{IgnoreReason, SessionEvent, SubmissionController, SubmitOutcome};
pub use job_client::{
    ArtifactFetchError, Artifacts, HttpJobClient, JobClient, StatusReport, SubmissionError,
    TransportError,
};
pub use message_log::{LogError, MessageLog, MessagePatch, MessageRecord};
pub use poller::{PatchGate, PollObserver, PollTicket, Poller, TerminalOutcome};
pub use scripted::{ScriptedJobClient, ScriptedTick};
pub use status::{classify, Classification};
