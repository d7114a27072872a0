//! Checkbox task list parsing for task-driven runs.
//!
//! `tasks.md` uses Markdown checkboxes: `- [ ]` pending, `- [-]` in progress,
//! `- [x]` completed.

use std::sync::LazyLock;

use regex::Regex;

static CHECKBOX_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s+\[([ xX-])\]\s*(.*)$").ok());

/// Checkbox tallies for a task list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: u32,
    pub in_progress: u32,
    pub completed: u32,
}

impl TaskCounts {
    pub fn total(&self) -> u32 {
        self.pending + self.in_progress + self.completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Pending,
    InProgress,
    Completed,
}

fn parse_line(line: &str) -> Option<(Mark, &str)> {
    let re = CHECKBOX_RE.as_ref()?;
    let caps = re.captures(line)?;
    let mark = match caps.get(1)?.as_str() {
        " " => Mark::Pending,
        "-" => Mark::InProgress,
        _ => Mark::Completed,
    };
    let text = caps.get(2).map_or("", |m| m.as_str().trim());
    Some((mark, text))
}

/// Count checkbox states across the whole document.
pub fn count_tasks(content: &str) -> TaskCounts {
    let mut counts = TaskCounts::default();
    for (mark, _) in content.lines().filter_map(parse_line) {
        match mark {
            Mark::Pending => counts.pending += 1,
            Mark::InProgress => counts.in_progress += 1,
            Mark::Completed => counts.completed += 1,
        }
    }
    counts
}

/// Description of the first in-progress task, if any.
///
/// An in-progress checkbox with no text yields a placeholder description.
pub fn current_task(content: &str) -> Option<String> {
    content
        .lines()
        .filter_map(parse_line)
        .find(|(mark, _)| *mark == Mark::InProgress)
        .map(|(_, text)| {
            if text.is_empty() {
                "In progress task (no description)".to_string()
            } else {
                text.to_string()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TASKS: &str = "# Tasks\n\n- [x] 1. Scaffold project\n- [-] 2. Implement auth\n  - [ ] 2.1 Login form\n- [ ] 3. Billing\n* [X] 4. Docs\n";

    #[test]
    fn counts_each_checkbox_state() {
        let counts = count_tasks(TASKS);
        assert_eq!(
            counts,
            TaskCounts {
                pending: 2,
                in_progress: 1,
                completed: 2
            }
        );
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn first_line_checkbox_is_counted() {
        let counts = count_tasks("- [ ] first\n- [ ] second");
        assert_eq!(counts.pending, 2);
    }

    #[test]
    fn current_task_is_first_in_progress() {
        assert_eq!(current_task(TASKS).as_deref(), Some("2. Implement auth"));
        assert_eq!(current_task("- [x] done\n- [ ] todo"), None);
    }

    #[test]
    fn empty_in_progress_uses_placeholder() {
        assert_eq!(
            current_task("- [-]").as_deref(),
            Some("In progress task (no description)")
        );
    }

    #[test]
    fn prose_is_ignored() {
        assert_eq!(count_tasks("no tasks here\n-[ ] missing space"), TaskCounts::default());
    }
}
