//! SQLite-backed session store

use super::SessionStore;
use crate::error::{Error, Result};
use crate::types::RecordingSession;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SESSION_COLUMNS: &str =
    "id, start_time, end_time, data_file_path, event_count, uploaded";

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets `roadlog upload` read while a replay is writing
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        super::schema::run_migrations(&conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Internal(format!("database lock poisoned: {}", e)))
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<RecordingSession> {
        let start_str: String = row.get("start_time")?;
        let end_str: Option<String> = row.get("end_time")?;
        let path_str: String = row.get("data_file_path")?;

        Ok(RecordingSession {
            id: row.get("id")?,
            start_time: parse_timestamp(&start_str)?,
            end_time: end_str.as_deref().map(parse_timestamp).transpose()?,
            data_file_path: PathBuf::from(path_str),
            event_count: row.get("event_count")?,
            uploaded: row.get("uploaded")?,
        })
    }

    /// Count all recorded sessions
    pub fn count_sessions(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Count sessions that are finished but not yet uploaded
    pub fn count_unsynced(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE uploaded = 0 AND end_time IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    }
}

fn parse_timestamp(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

impl SessionStore for Database {
    fn open_session(
        &self,
        start_time: DateTime<Utc>,
        data_file_path: &Path,
    ) -> Result<RecordingSession> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (start_time, data_file_path) VALUES (?1, ?2)",
            params![
                start_time.to_rfc3339(),
                data_file_path.to_string_lossy().to_string()
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(session_id = id, path = %data_file_path.display(), "Session opened");

        Ok(RecordingSession {
            id,
            start_time,
            end_time: None,
            data_file_path: data_file_path.to_path_buf(),
            event_count: 0,
            uploaded: false,
        })
    }

    fn append_event(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sessions SET event_count = event_count + 1 WHERE id = ?1",
            [id],
        )?;
        if updated == 0 {
            return Err(Error::SessionNotFound(id));
        }
        Ok(())
    }

    fn finish_session(
        &self,
        id: i64,
        event_count: i64,
        end_time: DateTime<Utc>,
    ) -> Result<RecordingSession> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sessions SET event_count = ?2, end_time = ?3 WHERE id = ?1",
            params![id, event_count, end_time.to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(Error::SessionNotFound(id));
        }

        let sql = format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS);
        let session = conn.query_row(&sql, [id], Self::row_to_session)?;
        Ok(session)
    }

    fn list_unsynced(&self) -> Result<Vec<RecordingSession>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sessions WHERE uploaded = 0 AND end_time IS NOT NULL ORDER BY id",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map([], Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn mark_uploaded(&self, ids: &[i64]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut marked = 0;
        {
            let mut stmt = tx.prepare("UPDATE sessions SET uploaded = 1 WHERE id = ?1")?;
            for id in ids {
                if stmt.execute([id])? == 0 {
                    // Dropping the transaction rolls back every earlier update
                    return Err(Error::SessionNotFound(*id));
                }
                marked += 1;
            }
        }

        tx.commit()?;
        Ok(marked)
    }

    fn get_session(&self, id: i64) -> Result<Option<RecordingSession>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS);
        conn.query_row(&sql, [id], Self::row_to_session)
            .optional()
            .map_err(Error::from)
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<RecordingSession>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sessions ORDER BY start_time DESC, id DESC LIMIT ?",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map([limit as i64], Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}
