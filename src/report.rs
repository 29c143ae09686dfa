//! Progress bars and the end of run summary
use std::{collections::HashMap, fmt::Write as _, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::debug;
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver},
    task::JoinHandle,
};

use crate::{
    coordinator::Summary,
    worker::{ProgressEvent, ProgressSender, TaskState},
};

/// Renders worker transitions as one spinner per task
pub struct Reporter {
    /// Bars of every task seen so far
    bars: HashMap<String, ProgressBar>,
    /// Shared drawing target
    multi: MultiProgress,
}

impl Reporter {
    /// Create the progress stream and the task drawing it.
    ///
    /// The task ends once every sender is dropped.
    pub fn start() -> (ProgressSender, JoinHandle<()>) {
        let (tx, rx) = unbounded_channel();
        (tx, Self::spawn(rx))
    }

    /// Draw the events of `rx` until the stream closes
    pub fn spawn(mut rx: UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut reporter = Reporter {
                bars: HashMap::new(),
                multi: MultiProgress::new(),
            };
            while let Some(event) = rx.recv().await {
                reporter.handle(&event);
            }
            debug!("Progress stream closed");
        })
    }

    /// Update the bar of the task behind `event`
    fn handle(&mut self, event: &ProgressEvent) {
        let index = self.bars.len() + 1;
        let multi = &self.multi;
        let bar = self.bars.entry(event.task_name.clone()).or_insert_with(|| {
            let pb = multi.add(ProgressBar::new_spinner());
            if let Some(style) = get_style() {
                pb.set_style(style);
            }
            pb.set_prefix(format!("[{index}]"));
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        });
        let message = state_message(&event.task_name, event.state);
        if event.state.is_terminal() {
            bar.finish_with_message(message);
        } else {
            bar.set_message(message);
        }
    }
}

/// get ProgressStyle
fn get_style() -> Option<ProgressStyle> {
    match ProgressStyle::with_template("{prefix:.bold.dim} {spinner} {wide_msg}") {
        Ok(s) => Some(s.tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")),
        Err(_) => None,
    }
}

/// Line shown for a task entering `state`
fn state_message(task: &str, state: TaskState) -> String {
    match state {
        TaskState::Pending => format!("{task}: waiting"),
        TaskState::Cloning => format!("{task}: cloning..."),
        TaskState::Creating => format!("{task}: creating destination..."),
        TaskState::Pushing => format!("{task}: pushing..."),
        TaskState::Succeeded => format!("{task}: successfully synced"),
        TaskState::Failed => format!("{task}: failed"),
        TaskState::Skipped => format!("{task}: skipped"),
    }
}

/// Human readable summary of a run
pub fn render_summary(summary: &Summary) -> String {
    let mut out = String::new();
    if summary.dry_run {
        let _ = writeln!(out, "Dry run, nothing was changed. Planned actions:");
        for result in &summary.results {
            if let Some(plan) = &result.planned_action {
                let _ = writeln!(out, "  {plan}");
            }
        }
        let _ = writeln!(out, "{} repositories would be backed up", summary.total());
        return out;
    }

    let _ = writeln!(out, "Backup summary");
    let _ = writeln!(out, "  Total:      {}", summary.total());
    let _ = writeln!(out, "  Successful: {}", summary.succeeded);
    let _ = writeln!(out, "  Failed:     {}", summary.failed);
    if summary.skipped > 0 {
        let _ = writeln!(out, "  Skipped:    {}", summary.skipped);
    }
    if let Some(rate) = summary.success_rate() {
        let _ = writeln!(out, "  Success rate: {:.1}%", rate * 100.0);
    }
    let failures = summary.failures();
    if !failures.is_empty() {
        let _ = writeln!(out, "Failures:");
        for failure in failures {
            let detail = failure
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown error".to_string());
            let _ = writeln!(
                out,
                "  - {} -> {}: {detail}",
                failure.source_name, failure.destination_name
            );
        }
    }
    if summary.interrupted {
        let _ = writeln!(
            out,
            "Run interrupted, skipped repositories were not attempted"
        );
    }
    out
}

/// Print the summary of a run
pub fn print_summary(summary: &Summary) {
    print!("{}", render_summary(summary));
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        errors::ErrorKind,
        worker::{Outcome, TaskError, TransferResult},
    };
    use chrono::Utc;

    fn result(name: &str, outcome: Outcome) -> TransferResult {
        TransferResult {
            source_name: name.to_string(),
            destination_name: format!("backup-{name}"),
            outcome,
            error: None,
            planned_action: None,
            attempts: 1,
            duration_ms: 10,
        }
    }

    #[test]
    fn summary_lists_counts_and_failures() {
        let mut failed = result("api", Outcome::Failed);
        failed.error = Some(TaskError {
            step: TaskState::Pushing,
            kind: ErrorKind::PushRejected,
            message: "remote rejected refs/heads/main".to_string(),
            attempts: 1,
        });
        let summary = Summary::from_results(
            vec![result("web", Outcome::Succeeded), failed],
            false,
            false,
        );

        let text = render_summary(&summary);
        assert!(text.contains("Total:      2"));
        assert!(text.contains("Successful: 1"));
        assert!(text.contains("Failed:     1"));
        assert!(text.contains("Success rate: 50.0%"));
        assert!(text.contains(
            "  - api -> backup-api: pushing failed after 1 attempt(s): remote rejected refs/heads/main"
        ));
        assert!(!text.contains("Skipped"));
    }

    #[test]
    fn dry_run_lists_the_plan() {
        let mut planned = result("web", Outcome::Skipped);
        planned.planned_action = Some("web -> backup-web (private)".to_string());
        let summary = Summary::from_results(vec![planned], true, false);

        let text = render_summary(&summary);
        assert!(text.starts_with("Dry run"));
        assert!(text.contains("  web -> backup-web (private)"));
        assert!(text.contains("1 repositories would be backed up"));
    }

    #[test]
    fn interrupted_runs_say_so() {
        let summary = Summary::from_results(vec![result("web", Outcome::Skipped)], false, true);
        let text = render_summary(&summary);
        assert!(text.contains("Skipped:    1"));
        assert!(text.contains("Run interrupted"));
    }

    #[tokio::test]
    async fn reporter_stops_when_senders_are_gone() {
        let (tx, handle) = Reporter::start();
        for state in [TaskState::Cloning, TaskState::Succeeded] {
            tx.send(ProgressEvent {
                task_name: "web".to_string(),
                state,
                timestamp: Utc::now(),
            })
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();
    }

    #[test]
    fn every_state_has_a_message() {
        assert_eq!(state_message("web", TaskState::Cloning), "web: cloning...");
        assert_eq!(
            state_message("web", TaskState::Succeeded),
            "web: successfully synced"
        );
    }
}
