//! Daily review input: a deterministic digest of a session's tasks.

use time::UtcOffset;

use crate::duration::{format_hours_minutes, format_local_time};
use crate::error::CoreResult;
use crate::model::Task;
use crate::summarizer::Summarizer;

/// Returned instead of an empty digest; never handed to the summarizer.
pub const NO_TASKS_SENTINEL: &str = "No tasks were recorded today.";

const NOT_COMPLETED: &str = "not completed";
const UNKNOWN_DURATION: &str = "unknown";

/// One line pair per task, in the order given (start time ascending).
pub fn build_daily_summary_input(tasks: &[Task], tz_offset: UtcOffset) -> String {
    if tasks.is_empty() {
        return NO_TASKS_SENTINEL.to_string();
    }

    tasks
        .iter()
        .map(|task| {
            let start = format_local_time(task.start_time, tz_offset);
            let end = task
                .end_time
                .map(|t| format_local_time(t, tz_offset))
                .unwrap_or_else(|| NOT_COMPLETED.to_string());
            let duration = task
                .duration_ms()
                .map(format_hours_minutes)
                .unwrap_or_else(|| UNKNOWN_DURATION.to_string());
            format!(
                "- Task: {}\n  Start: {start}, End: {end}, Duration: {duration}",
                task.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_review_prompt(task_block: &str) -> String {
    format!(
        r#"The following is the list of tasks the user worked on today:

{task_block}

Based on this list, write a review of the user's day. Include:
1. Which task took the most time today
2. Patterns visible in how the work went (for example focus periods or how often tasks switched)
3. Suggestions for being more productive
4. Advice for tomorrow

Write in a friendly, encouraging tone."#
    )
}

/// Produces the day's review for an already persisted session.
///
/// An empty task list short-circuits to [`NO_TASKS_SENTINEL`] without calling
/// the summarizer.
pub async fn generate_review(
    summarizer: &dyn Summarizer,
    tasks: &[Task],
    tz_offset: UtcOffset,
) -> CoreResult<String> {
    if tasks.is_empty() {
        return Ok(NO_TASKS_SENTINEL.to_string());
    }
    let block = build_daily_summary_input(tasks, tz_offset);
    let prompt = build_review_prompt(&block);
    summarizer.summarize(&prompt).await
}
