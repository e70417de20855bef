use super::*;
use crate::scripted::{ScriptedJobClient, ScriptedTick};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use shared::{domain::Sender, protocol::GenerateRequest};
use std::sync::atomic::AtomicUsize;
use tokio::{net::TcpListener, time::sleep};
use url::Url;

const PERIOD: Duration = Duration::from_millis(2000);

fn base() -> Url {
    Url::parse("http://localhost:5000/api").expect("url")
}

fn controller_with(client: &Arc<ScriptedJobClient>) -> SubmissionController {
    SubmissionController::new(Arc::clone(client) as Arc<dyn JobClient>, PERIOD)
}

async fn wait_for_terminal(controller: &SubmissionController, id: MessageId) -> MessageRecord {
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match controller.message(id) {
                Some(record) if record.is_terminal() => return record,
                _ => sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await
    .expect("message reached a terminal status")
}

fn assistant_statuses(events: &mut broadcast::Receiver<SessionEvent>, id: MessageId) -> Vec<JobStatus> {
    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::MessageUpdated(record) = event {
            if record.id == id {
                statuses.extend(record.status);
            }
        }
    }
    statuses
}

fn polling_ids(outcome: SubmitOutcome) -> (MessageId, JobId) {
    match outcome {
        SubmitOutcome::Polling { message_id, job_id } => (message_id, job_id),
        other => panic!("expected polling outcome, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn binary_search_prompt_ends_completed_with_artifacts() {
    let client = Arc::new(ScriptedJobClient::new(
        base(),
        ["queued", "rendering", "completed"],
    ));
    let controller = controller_with(&client);
    let mut events = controller.subscribe();

    let (message_id, job_id) = polling_ids(controller.submit("binary search").await);

    let messages = controller.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, Sender::User);
    assert_eq!(messages[0].content, "binary search");
    assert_eq!(messages[0].status, None);
    assert_eq!(messages[1].id, message_id);
    assert_eq!(messages[1].sender, Sender::Assistant);
    assert_eq!(messages[1].status, Some(JobStatus::Processing));
    assert_eq!(messages[1].job_id, Some(job_id.clone()));
    assert_eq!(messages[1].content, JOB_ACCEPTED_MESSAGE);
    assert!(controller.is_busy());

    let record = wait_for_terminal(&controller, message_id).await;
    assert_eq!(record.status, Some(JobStatus::Completed));
    assert_eq!(record.content, COMPLETED_MESSAGE);
    assert!(record.solution_text.as_deref().is_some_and(|text| !text.is_empty()));
    assert!(record.code_text.as_deref().is_some_and(|text| !text.is_empty()));
    assert_eq!(
        record.video_ref.as_ref().map(Url::as_str),
        Some(format!("http://localhost:5000/api/video/{job_id}").as_str())
    );
    assert!(!controller.is_busy());
    assert!(controller.active_jobs().is_empty());

    sleep(PERIOD * 5).await;
    assert_eq!(
        assistant_statuses(&mut events, message_id),
        vec![
            JobStatus::Processing,
            JobStatus::Stage("queued".into()),
            JobStatus::Stage("rendering".into()),
            JobStatus::Completed,
        ]
    );
    assert_eq!(client.status_calls(), 3);
    assert_eq!(client.artifact_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn progress_labels_replace_assistant_content() {
    let client = Arc::new(ScriptedJobClient::new(base(), ["video_rendering"]));
    let controller = controller_with(&client);
    let (message_id, _) = polling_ids(controller.submit("sorting").await);

    sleep(PERIOD + Duration::from_millis(100)).await;

    let record = controller.message(message_id).expect("record");
    assert_eq!(record.content, "Generating visualization: video rendering...");
    assert_eq!(record.status, Some(JobStatus::Stage("video_rendering".into())));
    controller.shutdown();
}

#[tokio::test(start_paused = true)]
async fn blank_prompts_are_ignored() {
    let client = Arc::new(ScriptedJobClient::demo(base()));
    let controller = controller_with(&client);

    assert_eq!(
        controller.submit("   \n").await,
        SubmitOutcome::Ignored(IgnoreReason::EmptyPrompt)
    );
    assert!(controller.messages().is_empty());
    assert!(!controller.is_busy());
}

#[tokio::test(start_paused = true)]
async fn second_submission_is_ignored_while_a_job_is_running() {
    let client = Arc::new(ScriptedJobClient::new(base(), ["queued", "completed"]));
    let controller = controller_with(&client);

    let (first, _) = polling_ids(controller.submit("first").await);
    assert_eq!(
        controller.submit("second").await,
        SubmitOutcome::Ignored(IgnoreReason::Busy)
    );
    assert_eq!(controller.messages().len(), 2);

    wait_for_terminal(&controller, first).await;
    let (second, _) = polling_ids(controller.submit("second").await);
    assert_ne!(first, second);
    assert_eq!(controller.messages().len(), 4);
    controller.shutdown();
}

#[tokio::test(start_paused = true)]
async fn rejected_prompt_never_starts_polling() {
    let client = Arc::new(ScriptedJobClient::demo(base()).rejecting("bad prompt"));
    let controller = controller_with(&client);

    let outcome = controller.submit("x").await;
    let SubmitOutcome::Rejected { message_id } = outcome else {
        panic!("expected rejection, got {outcome:?}");
    };

    let record = controller.message(message_id).expect("record");
    assert_eq!(record.content, "Error: bad prompt");
    assert_eq!(record.status, Some(JobStatus::Failed));
    assert_eq!(record.job_id, None);
    assert!(controller.active_jobs().is_empty());
    assert!(!controller.is_busy());

    sleep(PERIOD * 5).await;
    assert_eq!(client.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_stage_surfaces_executor_error() {
    let client = Arc::new(ScriptedJobClient::from_ticks(
        base(),
        vec![ScriptedTick::stage("queued"), ScriptedTick::failed("render crash")],
    ));
    let controller = controller_with(&client);
    let (message_id, _) = polling_ids(controller.submit("y").await);

    let record = wait_for_terminal(&controller, message_id).await;
    assert_eq!(record.status, Some(JobStatus::Failed));
    assert_eq!(record.content, "Error generating visualization: render crash");
    assert!(record.video_ref.is_none());
    assert_eq!(client.artifact_calls(), 0);
    assert!(!controller.is_busy());
}

#[tokio::test(start_paused = true)]
async fn failed_stage_without_error_text_uses_default() {
    let client = Arc::new(ScriptedJobClient::new(base(), ["failed"]));
    let controller = controller_with(&client);
    let (message_id, _) = polling_ids(controller.submit("y").await);

    let record = wait_for_terminal(&controller, message_id).await;
    assert_eq!(record.content, "Error generating visualization: Unknown error");
}

#[tokio::test(start_paused = true)]
async fn artifact_fetch_failure_marks_the_job_failed() {
    let client = Arc::new(ScriptedJobClient::new(base(), ["completed"]).without_artifacts());
    let controller = controller_with(&client);
    let (message_id, _) = polling_ids(controller.submit("graph coloring").await);

    let record = wait_for_terminal(&controller, message_id).await;
    assert_eq!(record.status, Some(JobStatus::Failed));
    assert!(record
        .content
        .starts_with("Error retrieving visualization results:"));
    assert!(record.video_ref.is_none());
    assert!(record.solution_text.is_none());
    assert!(!controller.is_busy());
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_log_untouched_afterwards() {
    let client = Arc::new(ScriptedJobClient::demo(base()));
    let controller = controller_with(&client);
    let (message_id, job_id) = polling_ids(controller.submit("heap sort").await);

    controller.shutdown();
    assert!(!controller.is_polling(&job_id));
    assert!(!controller.is_busy());

    sleep(PERIOD * 10).await;
    assert_eq!(client.status_calls(), 0);
    let record = controller.message(message_id).expect("record");
    assert_eq!(record.status, Some(JobStatus::Processing));
    assert_eq!(record.content, JOB_ACCEPTED_MESSAGE);
}

#[tokio::test(start_paused = true)]
async fn stopping_the_running_job_frees_the_session() {
    let client = Arc::new(ScriptedJobClient::demo(base()));
    let controller = controller_with(&client);
    let (message_id, job_id) = polling_ids(controller.submit("heap sort").await);
    assert!(controller.is_busy());

    assert!(controller.stop(&job_id));
    assert!(!controller.is_polling(&job_id));
    assert!(!controller.is_busy());

    sleep(PERIOD * 10).await;
    assert_eq!(client.status_calls(), 0);
    let record = controller.message(message_id).expect("record");
    assert_eq!(record.status, Some(JobStatus::Processing));

    let (next, _) = polling_ids(controller.submit("quick sort").await);
    assert_ne!(next, message_id);
    assert!(!controller.stop(&JobId::new("never-submitted")));
    assert!(controller.is_busy());
    controller.shutdown();
}

#[tokio::test(start_paused = true)]
async fn stopping_a_finished_job_leaves_the_next_one_running() {
    let client = Arc::new(ScriptedJobClient::new(base(), ["completed"]));
    let controller = controller_with(&client);
    let (first, first_job) = polling_ids(controller.submit("first").await);
    wait_for_terminal(&controller, first).await;

    let (_, second_job) = polling_ids(controller.submit("second").await);
    assert!(!controller.stop(&first_job));
    assert!(controller.is_busy());
    assert!(controller.is_polling(&second_job));
    controller.shutdown();
}

#[derive(Clone, Default)]
struct ExecutorState {
    status_hits: Arc<AtomicUsize>,
}

const EXECUTOR_STAGES: [&str; 3] = ["queued", "rendering", "completed"];

async fn executor_generate(Json(body): Json<GenerateRequest>) -> impl IntoResponse {
    if body.prompt == "x" {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad prompt" })));
    }
    (StatusCode::OK, Json(json!({ "job_id": "job-77" })))
}

async fn executor_status(
    State(state): State<ExecutorState>,
    Path(_job_id): Path<String>,
) -> Json<serde_json::Value> {
    let hit = state.status_hits.fetch_add(1, Ordering::SeqCst);
    let stage = EXECUTOR_STAGES[hit.min(EXECUTOR_STAGES.len() - 1)];
    Json(json!({ "status": stage }))
}

async fn spawn_executor() -> anyhow::Result<(Url, ExecutorState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let state = ExecutorState::default();
    let app = Router::new()
        .route("/api/generate", post(executor_generate))
        .route("/api/status/:job_id", get(executor_status))
        .route(
            "/api/solution/:job_id",
            get(|| async { Json(json!({ "solution": "Halve the search interval each step." })) }),
        )
        .route(
            "/api/code/:job_id",
            get(|| async { Json(json!({ "manim_code": "class BinarySearch(Scene): ..." })) }),
        )
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((Url::parse(&format!("http://{addr}/api"))?, state))
}

fn http_controller(base: Url) -> SubmissionController {
    let client = HttpJobClient::new(base).expect("client");
    SubmissionController::new(Arc::new(client), Duration::from_millis(20))
}

#[tokio::test]
async fn http_round_trip_merges_artifacts_into_the_assistant_record() {
    let (base, state) = spawn_executor().await.expect("spawn executor");
    let controller = http_controller(base.clone());

    let (message_id, job_id) = polling_ids(controller.submit("binary search").await);
    assert_eq!(job_id, JobId::new("job-77"));

    let record = wait_for_terminal(&controller, message_id).await;
    assert_eq!(record.status, Some(JobStatus::Completed));
    assert_eq!(
        record.solution_text.as_deref(),
        Some("Halve the search interval each step.")
    );
    assert_eq!(
        record.code_text.as_deref(),
        Some("class BinarySearch(Scene): ...")
    );
    assert_eq!(
        record.video_ref.map(String::from),
        Some(format!("{base}/video/job-77"))
    );
    assert_eq!(state.status_hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn http_rejection_reports_error_and_never_polls() {
    let (base, state) = spawn_executor().await.expect("spawn executor");
    let controller = http_controller(base);

    let outcome = controller.submit("x").await;
    let SubmitOutcome::Rejected { message_id } = outcome else {
        panic!("expected rejection, got {outcome:?}");
    };

    sleep(Duration::from_millis(200)).await;
    let record = controller.message(message_id).expect("record");
    assert_eq!(record.content, "Error: bad prompt");
    assert_eq!(state.status_hits.load(Ordering::SeqCst), 0);
    assert!(controller.active_jobs().is_empty());
}

#[tokio::test]
async fn unreachable_executor_yields_apology_message() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let controller = http_controller(Url::parse(&format!("http://{addr}/api")).expect("url"));

    let outcome = controller.submit("binary search").await;
    let SubmitOutcome::Rejected { message_id } = outcome else {
        panic!("expected rejection, got {outcome:?}");
    };
    let record = controller.message(message_id).expect("record");
    assert_eq!(record.content, SUBMISSION_TRANSPORT_MESSAGE);
    assert_eq!(record.status, Some(JobStatus::Failed));
    assert!(!controller.is_busy());
}
