//! Work sessions and the tasks inside them.
//!
//! These are transient in-memory reconstructions of what the store holds.
//! Transitions here only validate and mutate memory; persisting the outcome is
//! the caller's job (see `service`).

use time::OffsetDateTime;

use crate::duration::duration_ms;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub start_time: OffsetDateTime,
    pub end_time: Option<OffsetDateTime>,
}

impl Task {
    pub fn open(
        id: impl Into<String>,
        session_id: impl Into<String>,
        content: impl Into<String>,
        at: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            content: content.into(),
            start_time: at,
            end_time: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// OPEN -> CLOSED. A closed task is terminal.
    pub fn close(&mut self, at: OffsetDateTime) -> CoreResult<()> {
        if self.end_time.is_some() {
            return Err(CoreError::AlreadyEnded);
        }
        if at < self.start_time {
            return Err(CoreError::InvalidTimeOrder);
        }
        self.end_time = Some(at);
        Ok(())
    }

    /// Span of a closed task; `None` while it is still open.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| duration_ms(self.start_time, end))
    }

    /// Span so far, measuring an open task up to `now`.
    pub fn elapsed_ms(&self, now: OffsetDateTime) -> i64 {
        duration_ms(self.start_time, self.end_time.unwrap_or(now)).max(0)
    }
}

/// Which total to report for an active session that has no tasks yet.
///
/// Every other session state yields the same number under both policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationPolicy {
    /// Time since the session began (current-session dashboard).
    LiveElapsed,
    /// Zero (history and detail views).
    FinalDuration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub owner_id: String,
    pub start_time: OffsetDateTime,
    pub end_time: Option<OffsetDateTime>,
    /// Ordered by `start_time` ascending.
    pub tasks: Vec<Task>,
}

impl Session {
    pub fn begin(id: impl Into<String>, owner_id: impl Into<String>, at: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            start_time: at,
            end_time: None,
            tasks: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// The task still in progress, derived from the task list on every call.
    pub fn open_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.is_open())
    }

    fn open_task_mut(&mut self) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.is_open())
    }

    /// Earliest instant a new task may start or the session may end at.
    fn earliest_next_instant(&self) -> OffsetDateTime {
        self.tasks
            .last()
            .map(|t| t.end_time.unwrap_or(t.start_time))
            .unwrap_or(self.start_time)
            .max(self.start_time)
    }

    /// Appends a new open task, closing the current one at the same instant.
    ///
    /// Returns the id of the task that was closed, if any.
    pub fn start_task(
        &mut self,
        task_id: impl Into<String>,
        content: impl Into<String>,
        at: OffsetDateTime,
    ) -> CoreResult<Option<String>> {
        if !self.is_active() {
            return Err(CoreError::AlreadyEnded);
        }
        if at < self.earliest_next_instant() {
            return Err(CoreError::InvalidTimeOrder);
        }

        let closed = match self.open_task_mut() {
            Some(open) => {
                open.close(at)?;
                Some(open.id.clone())
            }
            None => None,
        };

        let task = Task::open(task_id, self.id.clone(), content, at);
        self.tasks.push(task);
        Ok(closed)
    }

    /// ACTIVE -> ENDED, closing the open task at the same instant first.
    ///
    /// Returns the id of the task that was closed, if any.
    pub fn end(&mut self, at: OffsetDateTime) -> CoreResult<Option<String>> {
        if !self.is_active() {
            return Err(CoreError::AlreadyEnded);
        }
        if at < self.earliest_next_instant() {
            return Err(CoreError::InvalidTimeOrder);
        }

        let closed = match self.open_task_mut() {
            Some(open) => {
                open.close(at)?;
                Some(open.id.clone())
            }
            None => None,
        };
        self.end_time = Some(at);
        Ok(closed)
    }

    fn total_ms(&self, now: OffsetDateTime, empty_active: impl FnOnce() -> i64) -> i64 {
        if let Some(end) = self.end_time {
            return duration_ms(self.start_time, end);
        }
        match self.tasks.last() {
            Some(last) => duration_ms(self.start_time, last.end_time.unwrap_or(now)).max(0),
            None => empty_active(),
        }
    }

    /// Total for a live dashboard: an empty active session counts from its start.
    pub fn live_elapsed_ms(&self, now: OffsetDateTime) -> i64 {
        self.total_ms(now, || duration_ms(self.start_time, now).max(0))
    }

    /// Total for history: an empty active session counts as zero.
    pub fn final_duration_ms(&self, now: OffsetDateTime) -> i64 {
        self.total_ms(now, || 0)
    }

    pub fn total_duration_ms(&self, policy: DurationPolicy, now: OffsetDateTime) -> i64 {
        match policy {
            DurationPolicy::LiveElapsed => self.live_elapsed_ms(now),
            DurationPolicy::FinalDuration => self.final_duration_ms(now),
        }
    }
}
