//! Surface operations over the record store.
//!
//! Writes run inside `RecordStore::atomically`; every operation re-derives the
//! session from stored rows instead of trusting anything cached.

use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::codec::ContentCodec;
use crate::duration::to_unix_ms;
use crate::error::{CoreError, CoreResult};
use crate::model::{DurationPolicy, Session};
use crate::reconstruct::{reconstruct, reconstruct_encoded, SessionView};
use crate::store::{RecordStore, SessionRow, TaskRow};

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Opens a workday, or resumes the owner's active one.
pub fn begin_session<S: RecordStore>(
    store: &mut S,
    owner_id: &str,
    at: OffsetDateTime,
) -> CoreResult<String> {
    store.atomically(|s| {
        if let Some(active) = s.find_active_session(owner_id)? {
            info!(session_id = %active.id, "resuming active session");
            return Ok(active.id);
        }

        let session = Session::begin(new_id(), owner_id, at);
        s.insert_session(&SessionRow {
            id: session.id.clone(),
            owner_id: session.owner_id.clone(),
            start_ms: to_unix_ms(session.start_time),
            end_ms: None,
        })?;
        info!(session_id = %session.id, "session started");
        Ok(session.id)
    })
}

fn load_encoded<S: RecordStore>(
    store: &mut S,
    owner_id: &str,
    session_id: &str,
) -> CoreResult<Session> {
    let row = store
        .find_session(owner_id, session_id)?
        .ok_or(CoreError::NotFound)?;
    let tasks = store.list_tasks(owner_id, session_id)?;
    reconstruct_encoded(&row, tasks, owner_id)
}

/// Closes the open task (if any) and the session at `at`.
pub fn end_session<S: RecordStore>(
    store: &mut S,
    owner_id: &str,
    session_id: &str,
    at: OffsetDateTime,
) -> CoreResult<()> {
    store.atomically(|s| {
        let mut session = load_encoded(s, owner_id, session_id)?;
        let closed = session.end(at)?;
        let at_ms = to_unix_ms(at);

        if let Some(task_id) = closed {
            if !s.close_task(owner_id, &task_id, at_ms)? {
                warn!(session_id, task_id = %task_id, "open task vanished while ending session");
                return Err(CoreError::ConflictOpenTask);
            }
        }
        if !s.end_session(owner_id, session_id, at_ms)? {
            return Err(CoreError::AlreadyEnded);
        }
        info!(session_id, "session ended");
        Ok(())
    })
}

/// Appends a task to the session, closing the previous open task at `at`.
pub fn start_task<S: RecordStore>(
    store: &mut S,
    codec: &dyn ContentCodec,
    owner_id: &str,
    session_id: &str,
    content: &str,
    at: OffsetDateTime,
) -> CoreResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(CoreError::InvalidInput("task content must not be empty"));
    }
    let encoded = codec.encode(content, owner_id)?;

    store.atomically(|s| {
        let mut session = load_encoded(s, owner_id, session_id)?;
        let task_id = new_id();
        let closed = session.start_task(task_id.clone(), encoded.clone(), at)?;
        let at_ms = to_unix_ms(at);

        if let Some(prev) = closed {
            if !s.close_task(owner_id, &prev, at_ms)? {
                return Err(CoreError::ConflictOpenTask);
            }
        }
        // The store may not serialize concurrent writers; look again before opening.
        if let Some(open) = s.find_open_task(owner_id, session_id)? {
            warn!(session_id, open_task_id = %open.id, "refusing second open task");
            return Err(CoreError::ConflictOpenTask);
        }

        s.insert_task(&TaskRow {
            id: task_id.clone(),
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            content: encoded,
            start_ms: at_ms,
            end_ms: None,
        })?;
        info!(session_id, task_id = %task_id, "task started");
        Ok(task_id)
    })
}

/// Starts a task in the owner's active session, beginning one if needed.
pub fn track_task<S: RecordStore>(
    store: &mut S,
    codec: &dyn ContentCodec,
    owner_id: &str,
    content: &str,
    at: OffsetDateTime,
) -> CoreResult<(String, String)> {
    if content.trim().is_empty() {
        return Err(CoreError::InvalidInput("task content must not be empty"));
    }
    let session_id = begin_session(store, owner_id, at)?;
    let task_id = start_task(store, codec, owner_id, &session_id, content, at)?;
    Ok((session_id, task_id))
}

/// Decoded session with tasks in start order.
pub fn load_session<S: RecordStore>(
    store: &mut S,
    codec: &dyn ContentCodec,
    owner_id: &str,
    session_id: &str,
) -> CoreResult<Session> {
    let row = store
        .find_session(owner_id, session_id)?
        .ok_or(CoreError::NotFound)?;
    let tasks = store.list_tasks(owner_id, session_id)?;
    reconstruct(&row, tasks, owner_id, codec)
}

pub fn get_session<S: RecordStore>(
    store: &mut S,
    codec: &dyn ContentCodec,
    owner_id: &str,
    session_id: &str,
    now: OffsetDateTime,
) -> CoreResult<SessionView> {
    let session = load_session(store, codec, owner_id, session_id)?;
    Ok(SessionView::new(&session, DurationPolicy::FinalDuration, now))
}

/// All of the owner's sessions, newest first.
pub fn list_sessions<S: RecordStore>(
    store: &mut S,
    codec: &dyn ContentCodec,
    owner_id: &str,
    now: OffsetDateTime,
) -> CoreResult<Vec<SessionView>> {
    let rows = store.list_sessions(owner_id)?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let tasks = store.list_tasks(owner_id, &row.id)?;
        let session = reconstruct(&row, tasks, owner_id, codec)?;
        out.push(SessionView::new(&session, DurationPolicy::FinalDuration, now));
    }
    Ok(out)
}

pub fn get_active_session<S: RecordStore>(
    store: &mut S,
    codec: &dyn ContentCodec,
    owner_id: &str,
    now: OffsetDateTime,
) -> CoreResult<Option<SessionView>> {
    let Some(row) = store.find_active_session(owner_id)? else {
        return Ok(None);
    };
    let tasks = store.list_tasks(owner_id, &row.id)?;
    let session = reconstruct(&row, tasks, owner_id, codec)?;
    Ok(Some(SessionView::new(&session, DurationPolicy::LiveElapsed, now)))
}
