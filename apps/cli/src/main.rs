use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use client_core::{
    load_client_config, IgnoreReason, MessageRecord, ScriptedJobClient, SessionEvent,
    SubmissionController, SubmitOutcome,
};
use shared::domain::{JobStatus, MessageId};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod render;

/// Ask the executor for a visualization and follow the job until it finishes.
#[derive(Parser, Debug)]
struct Args {
    /// The problem to visualize.
    prompt: String,
    /// Overrides the configured executor base URL.
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// Run against a built-in scripted executor instead of the network.
    #[arg(long)]
    demo: bool,
    /// Give up waiting after this many seconds.
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let args = Args::parse();

    let mut config = load_client_config();
    if let Some(url) = args.api_base_url {
        config.api_base_url = url;
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = ms;
    }

    let controller = if args.demo {
        let client = ScriptedJobClient::demo(config.base_url()?);
        SubmissionController::new(Arc::new(client), config.poll_interval()?)
    } else {
        SubmissionController::from_config(&config)?
    };
    info!(base_url = %config.api_base_url, demo = args.demo, "submitting prompt");

    let mut events = controller.subscribe();
    let message_id = match controller.submit(&args.prompt).await {
        SubmitOutcome::Ignored(IgnoreReason::EmptyPrompt) => bail!("prompt is empty"),
        SubmitOutcome::Ignored(reason) => bail!("submission ignored: {reason:?}"),
        SubmitOutcome::Rejected { message_id } => {
            let record = controller
                .message(message_id)
                .context("rejected submission left no record")?;
            bail!("{}", record.content);
        }
        SubmitOutcome::Polling { message_id, job_id } => {
            println!("job {job_id} accepted");
            message_id
        }
    };

    let timeout = tokio::time::sleep(Duration::from_secs(args.timeout_secs));
    tokio::pin!(timeout);
    let finished = tokio::select! {
        record = follow(&mut events, &controller, message_id) => record,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, abandoning job");
            None
        }
        _ = &mut timeout => {
            warn!(timeout_secs = args.timeout_secs, "gave up waiting for the job");
            None
        }
    };
    controller.shutdown();

    let record = finished.ok_or_else(|| anyhow!("job did not finish"))?;
    println!("\n{}", render::render_record(&record));
    if record.status == Some(JobStatus::Failed) {
        bail!("visualization failed");
    }
    Ok(())
}

/// Prints each change to `message_id` and returns the record once it is
/// terminal.
async fn follow(
    events: &mut broadcast::Receiver<SessionEvent>,
    controller: &SubmissionController,
    message_id: MessageId,
) -> Option<MessageRecord> {
    loop {
        match events.recv().await {
            Ok(SessionEvent::MessageUpdated(record)) if record.id == message_id => {
                println!("{}", render::progress_line(&record));
                if record.is_terminal() {
                    return Some(record);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "missed session events");
                if let Some(record) = controller.message(message_id).filter(MessageRecord::is_terminal) {
                    return Some(record);
                }
            }
            Err(RecvError::Closed) => {
                return controller.message(message_id).filter(MessageRecord::is_terminal);
            }
        }
    }
}
