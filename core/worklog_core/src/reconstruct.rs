//! Hydrates sessions from store rows and renders them for clients.

use std::collections::BTreeMap;

use serde::Serialize;
use time::{Date, OffsetDateTime, UtcOffset};

use crate::codec::ContentCodec;
use crate::duration::{format_hms, from_unix_ms, to_rfc3339};
use crate::error::{CoreError, CoreResult};
use crate::model::{DurationPolicy, Session, Task};
use crate::store::{SessionRow, TaskRow};

fn instant(ms: i64) -> CoreResult<OffsetDateTime> {
    from_unix_ms(ms).ok_or(CoreError::InvalidInput("malformed timestamp"))
}

/// Builds a decoded session with tasks ordered by start time.
///
/// The rows are expected to come from owner-scoped queries; a row for another
/// owner is treated as absent.
pub fn reconstruct(
    session: &SessionRow,
    tasks: Vec<TaskRow>,
    owner_id: &str,
    codec: &dyn ContentCodec,
) -> CoreResult<Session> {
    hydrate(session, tasks, owner_id, |content| codec.decode(content, owner_id))
}

/// Same shape as [`reconstruct`] but leaves task content encoded. Lifecycle
/// transitions never look at content.
pub(crate) fn reconstruct_encoded(
    session: &SessionRow,
    tasks: Vec<TaskRow>,
    owner_id: &str,
) -> CoreResult<Session> {
    hydrate(session, tasks, owner_id, |content| Ok(content.to_string()))
}

fn hydrate<F>(
    session: &SessionRow,
    tasks: Vec<TaskRow>,
    owner_id: &str,
    content: F,
) -> CoreResult<Session>
where
    F: Fn(&str) -> CoreResult<String>,
{
    if session.owner_id != owner_id {
        return Err(CoreError::NotFound);
    }

    let mut hydrated = Vec::with_capacity(tasks.len());
    for row in tasks {
        if row.session_id != session.id || row.owner_id != owner_id {
            return Err(CoreError::InvalidInput("task does not belong to session"));
        }
        hydrated.push(Task {
            content: content(&row.content)?,
            start_time: instant(row.start_ms)?,
            end_time: row.end_ms.map(instant).transpose()?,
            id: row.id,
            session_id: row.session_id,
        });
    }
    // a zero-length task can share its start with the open one; the open task goes last
    hydrated.sort_by_key(|t| (t.start_time, t.is_open()));

    Ok(Session {
        id: session.id.clone(),
        owner_id: session.owner_id.clone(),
        start_time: instant(session.start_ms)?,
        end_time: session.end_ms.map(instant).transpose()?,
        tasks: hydrated,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub open: bool,
    /// Closed span, or elapsed so far for the open task.
    pub duration_ms: i64,
    pub duration: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: String,
    #[serde(skip)]
    pub started_at: OffsetDateTime,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_task_id: Option<String>,
    pub tasks: Vec<TaskView>,
    pub total_duration_ms: i64,
    pub total_duration: String,
}

impl TaskView {
    pub fn new(task: &Task, now: OffsetDateTime) -> Self {
        let duration_ms = task.elapsed_ms(now);
        Self {
            id: task.id.clone(),
            session_id: task.session_id.clone(),
            content: task.content.clone(),
            start_time: to_rfc3339(task.start_time),
            end_time: task.end_time.map(to_rfc3339),
            open: task.is_open(),
            duration_ms,
            duration: format_hms(duration_ms),
        }
    }
}

impl SessionView {
    pub fn new(session: &Session, policy: DurationPolicy, now: OffsetDateTime) -> Self {
        let total_duration_ms = session.total_duration_ms(policy, now);
        Self {
            id: session.id.clone(),
            started_at: session.start_time,
            start_time: to_rfc3339(session.start_time),
            end_time: session.end_time.map(to_rfc3339),
            active: session.is_active(),
            open_task_id: session.open_task().map(|t| t.id.clone()),
            tasks: session.tasks.iter().map(|t| TaskView::new(t, now)).collect(),
            total_duration_ms,
            total_duration: format_hms(total_duration_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DayGroup {
    /// Local calendar date, `YYYY-MM-DD`.
    pub date: String,
    pub total_duration_ms: i64,
    pub sessions: Vec<SessionView>,
}

/// Groups sessions by the local date they started on, newest day first.
///
/// Sessions keep their relative order inside a day.
pub fn group_by_day(sessions: Vec<SessionView>, tz_offset: UtcOffset) -> Vec<DayGroup> {
    let mut days: BTreeMap<Date, Vec<SessionView>> = BTreeMap::new();
    for s in sessions {
        let date = s.started_at.to_offset(tz_offset).date();
        days.entry(date).or_default().push(s);
    }

    days.into_iter()
        .rev()
        .map(|(date, sessions)| DayGroup {
            date: date.to_string(),
            total_duration_ms: sessions.iter().map(|s| s.total_duration_ms).sum(),
            sessions,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IdentityCodec, KeyedCodec};
    use proptest::prelude::*;
    use crate::duration::to_unix_ms;
    use time::macros::datetime;

    fn ms(t: OffsetDateTime) -> i64 {
        to_unix_ms(t)
    }

    fn session_row(end: Option<OffsetDateTime>) -> SessionRow {
        SessionRow {
            id: "s1".to_string(),
            owner_id: "alice".to_string(),
            start_ms: ms(datetime!(2024-01-01 09:00:00 UTC)),
            end_ms: end.map(ms),
        }
    }

    fn task_row(id: &str, start: OffsetDateTime, end: Option<OffsetDateTime>) -> TaskRow {
        TaskRow {
            id: id.to_string(),
            session_id: "s1".to_string(),
            owner_id: "alice".to_string(),
            content: id.to_string(),
            start_ms: ms(start),
            end_ms: end.map(ms),
        }
    }

    #[test]
    fn sorts_tasks_regardless_of_row_order() {
        let rows = vec![
            task_row("c", datetime!(2024-01-01 11:00:00 UTC), None),
            task_row(
                "a",
                datetime!(2024-01-01 09:00:00 UTC),
                Some(datetime!(2024-01-01 10:00:00 UTC)),
            ),
            task_row(
                "b",
                datetime!(2024-01-01 10:00:00 UTC),
                Some(datetime!(2024-01-01 11:00:00 UTC)),
            ),
        ];
        let s = reconstruct(&session_row(None), rows, "alice", &IdentityCodec).unwrap();
        let ids: Vec<&str> = s.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(s.open_task().map(|t| t.id.as_str()), Some("c"));
    }

    #[test]
    fn decodes_content_with_the_owner_key() {
        let codec = KeyedCodec::new("secret").unwrap();
        let mut row = task_row("t1", datetime!(2024-01-01 09:00:00 UTC), None);
        row.content = codec.encode("design review", "alice").unwrap();

        let s = reconstruct(&session_row(None), vec![row], "alice", &codec).unwrap();
        assert_eq!(s.tasks[0].content, "design review");
    }

    #[test]
    fn tolerates_empty_and_open_sessions() {
        let s = reconstruct(&session_row(None), Vec::new(), "alice", &IdentityCodec).unwrap();
        assert!(s.tasks.is_empty());
        assert!(s.is_active());

        let now = datetime!(2024-01-01 09:45:00 UTC);
        let live = SessionView::new(&s, DurationPolicy::LiveElapsed, now);
        assert_eq!(live.total_duration, "00:45:00");
        let fin = SessionView::new(&s, DurationPolicy::FinalDuration, now);
        assert_eq!(fin.total_duration_ms, 0);
        assert_eq!(fin.total_duration, "00:00:00");
    }

    #[test]
    fn foreign_session_row_is_not_found() {
        let err = reconstruct(&session_row(None), Vec::new(), "bob", &IdentityCodec).unwrap_err();
        assert!(matches!(err, CoreError::NotFound));
    }

    #[test]
    fn rejects_tasks_from_another_session() {
        let mut row = task_row("t1", datetime!(2024-01-01 09:00:00 UTC), None);
        row.session_id = "s2".to_string();
        let err = reconstruct(&session_row(None), vec![row], "alice", &IdentityCodec).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn view_reports_open_task_elapsed_and_session_total() {
        let rows = vec![
            task_row(
                "design",
                datetime!(2024-01-01 09:00:00 UTC),
                Some(datetime!(2024-01-01 09:30:00 UTC)),
            ),
            task_row("code", datetime!(2024-01-01 09:30:00 UTC), None),
        ];
        let s = reconstruct(&session_row(None), rows, "alice", &IdentityCodec).unwrap();
        let now = datetime!(2024-01-01 10:00:01 UTC);
        let view = SessionView::new(&s, DurationPolicy::FinalDuration, now);

        assert!(view.active);
        assert_eq!(view.open_task_id.as_deref(), Some("code"));
        assert_eq!(view.tasks[0].duration, "00:30:00");
        assert!(!view.tasks[0].open);
        assert_eq!(view.tasks[1].duration, "00:30:01");
        assert!(view.tasks[1].open);
        assert_eq!(view.total_duration, "01:00:01");
        assert_eq!(view.start_time, "2024-01-01T09:00:00Z");
    }

    #[test]
    fn groups_sessions_by_local_day_newest_first() {
        let now = datetime!(2024-01-03 12:00:00 UTC);
        let view_at = |id: &str, start: OffsetDateTime| {
            let mut row = session_row(Some(start + time::Duration::hours(1)));
            row.id = id.to_string();
            row.start_ms = ms(start);
            let s = reconstruct(&row, Vec::new(), "alice", &IdentityCodec).unwrap();
            SessionView::new(&s, DurationPolicy::FinalDuration, now)
        };
        let sessions = vec![
            view_at("late", datetime!(2024-01-02 16:00:00 UTC)),
            view_at("early", datetime!(2024-01-02 08:00:00 UTC)),
            view_at("first", datetime!(2024-01-01 10:00:00 UTC)),
        ];

        let utc = group_by_day(sessions.clone(), UtcOffset::UTC);
        let dates: Vec<&str> = utc.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, ["2024-01-02", "2024-01-01"]);
        let ids: Vec<&str> = utc[0].sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["late", "early"]);
        assert_eq!(utc[0].total_duration_ms, 2 * 60 * 60 * 1000);

        // 16:00 UTC is already the next day at UTC+9
        let tokyo = group_by_day(sessions, UtcOffset::from_hms(9, 0, 0).unwrap());
        let dates: Vec<&str> = tokyo.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, ["2024-01-03", "2024-01-02", "2024-01-01"]);
    }

    #[test]
    fn open_task_sorts_after_a_closed_one_with_the_same_start() {
        let at = datetime!(2024-01-01 09:30:00 UTC);
        let rows = vec![
            task_row("open", at, None),
            task_row("blip", at, Some(at)),
            task_row("first", datetime!(2024-01-01 09:00:00 UTC), Some(at)),
        ];
        let s = reconstruct(&session_row(None), rows, "alice", &IdentityCodec).unwrap();
        let ids: Vec<&str> = s.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["first", "blip", "open"]);
        assert_eq!(s.tasks.last().map(|t| t.is_open()), Some(true));
    }

    fn chained_rows(n: usize) -> Vec<TaskRow> {
        let base = datetime!(2024-01-01 09:00:00 UTC);
        (0..n)
            .map(|i| {
                let start = base + time::Duration::minutes(10 * i as i64);
                let end = (i + 1 < n).then(|| start + time::Duration::minutes(10));
                task_row(&format!("t{i:02}"), start, end)
            })
            .collect()
    }

    proptest! {
        #[test]
        fn sorts_any_row_permutation(
            rows in (1usize..25).prop_flat_map(|n| Just(chained_rows(n)).prop_shuffle()),
        ) {
            let n = rows.len();
            let s = reconstruct(&session_row(None), rows, "alice", &IdentityCodec).unwrap();
            let ids: Vec<String> = s.tasks.iter().map(|t| t.id.clone()).collect();
            let expected: Vec<String> = (0..n).map(|i| format!("t{i:02}")).collect();
            prop_assert_eq!(ids, expected);
            prop_assert_eq!(s.open_task().map(|t| t.id.clone()), Some(format!("t{:02}", n - 1)));
        }
    }
}
