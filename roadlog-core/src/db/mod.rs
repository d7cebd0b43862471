//! Session store for roadlog
//!
//! The pipeline and the upload synchronizer only see the narrow
//! [`SessionStore`] trait. [`Database`] implements it on SQLite with:
//! - Schema migrations
//! - WAL mode so uploads can run alongside a recording

pub mod repo;
pub mod schema;

pub use repo::Database;

use crate::error::Result;
use crate::types::RecordingSession;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Persistence for recording session records.
pub trait SessionStore: Send + Sync {
    /// Insert a new open session and return it with its assigned id.
    fn open_session(
        &self,
        start_time: DateTime<Utc>,
        data_file_path: &Path,
    ) -> Result<RecordingSession>;

    /// Bump the stored event count of an open session.
    fn append_event(&self, id: i64) -> Result<()>;

    /// Stamp the end time and final event count.
    fn finish_session(
        &self,
        id: i64,
        event_count: i64,
        end_time: DateTime<Utc>,
    ) -> Result<RecordingSession>;

    /// Finished sessions not yet uploaded, oldest first.
    fn list_unsynced(&self) -> Result<Vec<RecordingSession>>;

    /// Flag sessions as uploaded. Either every id is marked or none is.
    fn mark_uploaded(&self, ids: &[i64]) -> Result<usize>;

    fn get_session(&self, id: i64) -> Result<Option<RecordingSession>>;

    /// Most recent sessions first.
    fn list_sessions(&self, limit: usize) -> Result<Vec<RecordingSession>>;
}
