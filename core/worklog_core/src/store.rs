//! Record store for sessions and tasks.
//!
//! Every query is scoped by owner id. Rows carry encoded task content and
//! epoch-millisecond timestamps; decoding and hydration happen in `reconstruct`.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row};
use tracing::warn;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub id: String,
    pub owner_id: String,
    pub start_ms: i64,
    pub end_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub id: String,
    pub session_id: String,
    pub owner_id: String,
    /// Encoded by the content codec.
    pub content: String,
    pub start_ms: i64,
    pub end_ms: Option<i64>,
}

pub trait RecordStore {
    /// Runs `f` as one all-or-nothing unit against the store.
    fn atomically<T, F>(&mut self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Self) -> CoreResult<T>;

    fn insert_session(&mut self, row: &SessionRow) -> CoreResult<()>;

    /// Sets the end of an active session. Returns false if no active session matched.
    fn end_session(&mut self, owner_id: &str, session_id: &str, end_ms: i64) -> CoreResult<bool>;

    fn find_session(&mut self, owner_id: &str, session_id: &str) -> CoreResult<Option<SessionRow>>;

    /// Most recently started session without an end.
    fn find_active_session(&mut self, owner_id: &str) -> CoreResult<Option<SessionRow>>;

    /// All sessions of the owner, newest first.
    fn list_sessions(&mut self, owner_id: &str) -> CoreResult<Vec<SessionRow>>;

    /// Tasks of one session, oldest first.
    fn list_tasks(&mut self, owner_id: &str, session_id: &str) -> CoreResult<Vec<TaskRow>>;

    fn find_open_task(&mut self, owner_id: &str, session_id: &str) -> CoreResult<Option<TaskRow>>;

    /// Fails with `ConflictOpenTask` if the session already holds an open task
    /// and the new row is open too.
    fn insert_task(&mut self, row: &TaskRow) -> CoreResult<()>;

    /// Sets the end of an open task. Returns false if no open task matched.
    fn close_task(&mut self, owner_id: &str, task_id: &str, end_ms: i64) -> CoreResult<bool>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { conn })
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
  id TEXT PRIMARY KEY,
  owner_id TEXT NOT NULL,
  start_ms INTEGER NOT NULL,
  end_ms INTEGER
);
CREATE INDEX IF NOT EXISTS idx_sessions_owner_start ON sessions(owner_id, start_ms);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
  ON sessions(owner_id) WHERE end_ms IS NULL;

CREATE TABLE IF NOT EXISTS tasks (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  owner_id TEXT NOT NULL,
  content TEXT NOT NULL,
  start_ms INTEGER NOT NULL,
  end_ms INTEGER
);
CREATE INDEX IF NOT EXISTS idx_tasks_session_start ON tasks(session_id, start_ms);
CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_one_open
  ON tasks(session_id) WHERE end_ms IS NULL;
"#,
    )
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        start_ms: row.get(2)?,
        end_ms: row.get(3)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        owner_id: row.get(2)?,
        content: row.get(3)?,
        start_ms: row.get(4)?,
        end_ms: row.get(5)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl RecordStore for SqliteStore {
    fn atomically<T, F>(&mut self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Self) -> CoreResult<T>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(v) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(v)
            }
            Err(err) => {
                if let Err(rb) = self.conn.execute_batch("ROLLBACK") {
                    warn!("rollback failed: {rb}");
                }
                Err(err)
            }
        }
    }

    fn insert_session(&mut self, row: &SessionRow) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO sessions (id, owner_id, start_ms, end_ms) VALUES (?1, ?2, ?3, ?4)",
            (&row.id, &row.owner_id, row.start_ms, row.end_ms),
        )?;
        Ok(())
    }

    fn end_session(&mut self, owner_id: &str, session_id: &str, end_ms: i64) -> CoreResult<bool> {
        let n = self.conn.execute(
            "UPDATE sessions SET end_ms = ?1 WHERE id = ?2 AND owner_id = ?3 AND end_ms IS NULL",
            (end_ms, session_id, owner_id),
        )?;
        Ok(n == 1)
    }

    fn find_session(&mut self, owner_id: &str, session_id: &str) -> CoreResult<Option<SessionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner_id, start_ms, end_ms FROM sessions WHERE id = ?1 AND owner_id = ?2",
        )?;
        Ok(stmt
            .query_row((session_id, owner_id), session_from_row)
            .optional()?)
    }

    fn find_active_session(&mut self, owner_id: &str) -> CoreResult<Option<SessionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner_id, start_ms, end_ms FROM sessions WHERE owner_id = ?1 AND end_ms IS NULL ORDER BY start_ms DESC LIMIT 1",
        )?;
        Ok(stmt.query_row([owner_id], session_from_row).optional()?)
    }

    fn list_sessions(&mut self, owner_id: &str) -> CoreResult<Vec<SessionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner_id, start_ms, end_ms FROM sessions WHERE owner_id = ?1 ORDER BY start_ms DESC",
        )?;
        let rows = stmt.query_map([owner_id], session_from_row)?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn list_tasks(&mut self, owner_id: &str, session_id: &str) -> CoreResult<Vec<TaskRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, owner_id, content, start_ms, end_ms FROM tasks WHERE owner_id = ?1 AND session_id = ?2 ORDER BY start_ms ASC, rowid ASC",
        )?;
        let rows = stmt.query_map((owner_id, session_id), task_from_row)?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn find_open_task(&mut self, owner_id: &str, session_id: &str) -> CoreResult<Option<TaskRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, owner_id, content, start_ms, end_ms FROM tasks WHERE owner_id = ?1 AND session_id = ?2 AND end_ms IS NULL LIMIT 1",
        )?;
        Ok(stmt
            .query_row((owner_id, session_id), task_from_row)
            .optional()?)
    }

    fn insert_task(&mut self, row: &TaskRow) -> CoreResult<()> {
        let res = self.conn.execute(
            "INSERT INTO tasks (id, session_id, owner_id, content, start_ms, end_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                &row.id,
                &row.session_id,
                &row.owner_id,
                &row.content,
                row.start_ms,
                row.end_ms,
            ),
        );
        match res {
            Ok(_) => Ok(()),
            Err(err) if is_constraint_violation(&err) && row.end_ms.is_none() => {
                Err(CoreError::ConflictOpenTask)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn close_task(&mut self, owner_id: &str, task_id: &str, end_ms: i64) -> CoreResult<bool> {
        let n = self.conn.execute(
            "UPDATE tasks SET end_ms = ?1 WHERE id = ?2 AND owner_id = ?3 AND end_ms IS NULL",
            (end_ms, task_id, owner_id),
        )?;
        Ok(n == 1)
    }
}
