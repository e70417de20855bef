use std::fmt::Write as _;

use client_core::MessageRecord;
use shared::domain::Sender;

/// One-line progress form of a record, as printed while a job is running.
pub fn progress_line(record: &MessageRecord) -> String {
    let who = match record.sender {
        Sender::User => "you",
        Sender::Assistant => "assistant",
    };
    match &record.status {
        Some(status) => format!("[{who}] ({status}) {}", record.content),
        None => format!("[{who}] {}", record.content),
    }
}

/// Full form of a finished assistant record, including any artifacts.
pub fn render_record(record: &MessageRecord) -> String {
    let mut out = record.content.clone();
    if let Some(video) = &record.video_ref {
        let _ = write!(out, "\n\nVideo: {video}");
    }
    if let Some(solution) = &record.solution_text {
        let _ = write!(out, "\n\n--- Solution ---\n{}", solution.trim_end());
    }
    if let Some(code) = &record.code_text {
        let _ = write!(out, "\n\n--- Manim code ---\n{}", code.trim_end());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::JobStatus;
    use url::Url;

    #[test]
    fn progress_line_shows_status_for_assistant_records() {
        let record = MessageRecord::assistant("Generating solution...", JobStatus::Processing);
        assert_eq!(
            progress_line(&record),
            "[assistant] (processing) Generating solution..."
        );
        let prompt = MessageRecord::user("binary search");
        assert_eq!(progress_line(&prompt), "[you] binary search");
    }

    #[test]
    fn completed_record_lists_artifacts() {
        let mut record = MessageRecord::assistant("Your visualization is ready!", JobStatus::Completed);
        record.video_ref = Some(Url::parse("http://localhost:5000/api/video/job-1").expect("url"));
        record.solution_text = Some("Halve the range.\n".into());
        record.code_text = Some("class Visualization(Scene): ...".into());

        let rendered = render_record(&record);
        assert!(rendered.starts_with("Your visualization is ready!"));
        assert!(rendered.contains("Video: http://localhost:5000/api/video/job-1"));
        assert!(rendered.contains("--- Solution ---\nHalve the range."));
        assert!(rendered.ends_with("--- Manim code ---\nclass Visualization(Scene): ..."));
    }

    #[test]
    fn failed_record_is_just_its_message() {
        let record = MessageRecord::assistant("Error: bad prompt", JobStatus::Failed);
        assert_eq!(render_record(&record), "Error: bad prompt");
    }
}
