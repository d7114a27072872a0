//! Plain-text dashboard shared by `/api/summary` and terminal mode.

use std::fmt::Write as _;

use chrono::{DateTime, Local, Utc};
use steer_runner::io::run_state::RunState;

const BAR_WIDTH: usize = 30;
const OUTPUT_LINES: usize = 10;
const RULE: &str = "============================================================";
const NO_OUTPUT: &str = "No output yet...";

/// Render the dashboard for `state` as seen at `now`.
pub fn render_summary(state: &RunState, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "  STEER MONITOR  [{}]", state.status.as_str().to_uppercase());
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out);

    let _ = writeln!(out, "  Iteration:  {}", iteration_line(state));
    let _ = writeln!(
        out,
        "  Code:       {} lines in {} files",
        state.code_metrics.total_lines, state.code_metrics.file_count
    );
    let _ = writeln!(
        out,
        "  Task:       {} ({})",
        state.current_task.description,
        state.current_task.status.as_str()
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "  Recent output:");
    for line in tail_lines(&state.last_output, OUTPUT_LINES) {
        let _ = writeln!(out, "    {line}");
    }
    let _ = writeln!(out);

    let local = state.timestamp.with_timezone(&Local);
    let ago = (now - state.timestamp).num_seconds().max(0);
    let _ = writeln!(
        out,
        "  Last update: {} ({ago}s ago)",
        local.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "{RULE}");
    out
}

fn iteration_line(state: &RunState) -> String {
    let current = state.iteration.current;
    let specified = state.iteration.specified;
    if specified == 0 {
        return format!("{current}/inf (continuous)");
    }
    let ratio = f64::from(current) / f64::from(specified);
    format!(
        "{current}/{specified} [{}] {:.0}%",
        progress_bar(ratio),
        ratio * 100.0
    )
}

fn progress_bar(ratio: f64) -> String {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let filled = ((ratio.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

fn tail_lines(text: &str, count: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return vec![NO_OUTPUT];
    }
    lines[lines.len().saturating_sub(count)..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use steer_runner::io::run_state::{RunStatus, TaskStatus};

    fn running(current: u32, specified: u32) -> RunState {
        let mut state = RunState::waiting(specified);
        state.status = RunStatus::Running;
        state.iteration.current = current;
        state.current_task.description = "Iteration 3 starting...".to_string();
        state.current_task.status = TaskStatus::InProgress;
        state
    }

    #[test]
    fn renders_status_and_progress_bar() {
        let state = running(15, 50);
        let text = render_summary(&state, state.timestamp);
        assert!(text.contains("[RUNNING]"));
        assert!(text.contains(&format!("15/50 [{}{}] 30%", "#".repeat(9), "-".repeat(21))));
        assert!(text.contains("Iteration 3 starting... (in_progress)"));
    }

    #[test]
    fn continuous_mode_has_no_bar() {
        let state = running(7, 0);
        let text = render_summary(&state, state.timestamp);
        assert!(text.contains("7/inf (continuous)"));
        assert!(!text.contains('%'));
    }

    #[test]
    fn bar_is_capped_past_budget() {
        assert_eq!(progress_bar(1.4), "#".repeat(BAR_WIDTH));
        assert_eq!(progress_bar(0.0), "-".repeat(BAR_WIDTH));
    }

    #[test]
    fn shows_last_ten_output_lines() {
        let mut state = running(1, 5);
        state.last_output = (1..=14)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let text = render_summary(&state, state.timestamp);
        assert!(!text.contains("line 4\n"));
        assert!(text.contains("line 5\n"));
        assert!(text.contains("line 14\n"));
    }

    #[test]
    fn empty_output_has_placeholder() {
        let state = RunState::waiting(50);
        let text = render_summary(&state, state.timestamp);
        assert!(text.contains(NO_OUTPUT));
        assert!(text.contains("[WAITING]"));
    }

    #[test]
    fn reports_seconds_since_update() {
        let state = running(1, 5);
        let text = render_summary(&state, state.timestamp + Duration::seconds(42));
        assert!(text.contains("(42s ago)"));

        // Clock skew never shows negative ages.
        let text = render_summary(&state, state.timestamp - Duration::seconds(5));
        assert!(text.contains("(0s ago)"));
    }
}
