//! Session recorder
//!
//! Owns the lifecycle of one recording session: the open session record in
//! the store and the append-only data file its events are written to.

use crate::db::SessionStore;
use crate::error::{Error, Result};
use crate::types::{data_file_name, PotholeEvent, RecordingSession, DATA_FILE_HEADER};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Write buffer size for the data file sink
pub const SINK_BUFFER_SIZE: usize = 512 * 1024;

/// A finished session together with the size of its data file.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedSession {
    pub session: RecordingSession,
    pub file_size: u64,
}

pub struct SessionRecorder {
    store: Arc<dyn SessionStore>,
    session: RecordingSession,
    sink: Mutex<Option<BufWriter<File>>>,
    events_logged: AtomicI64,
}

impl std::fmt::Debug for SessionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecorder")
            .field("session", &self.session)
            .field("events_logged", &self.events_logged())
            .finish_non_exhaustive()
    }
}

impl SessionRecorder {
    /// Open the session record and its data file.
    ///
    /// The file is `data_dir/data<start_ms>.log`, created along with any
    /// missing parent directories and headed by the column line. An existing
    /// file with that name is never reused; the collision is an Io error.
    pub fn start(
        store: Arc<dyn SessionStore>,
        data_dir: &Path,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let path = data_dir.join(data_file_name(now));
        std::fs::create_dir_all(data_dir)?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        let mut writer = BufWriter::with_capacity(SINK_BUFFER_SIZE, file);
        writeln!(writer, "{}", DATA_FILE_HEADER)?;

        let session = store.open_session(now, &path)?;
        tracing::info!(
            session_id = session.id,
            path = %path.display(),
            "Recording session started"
        );

        Ok(Self {
            store,
            session,
            sink: Mutex::new(Some(writer)),
            events_logged: AtomicI64::new(0),
        })
    }

    fn sink(&self) -> Result<MutexGuard<'_, Option<BufWriter<File>>>> {
        self.sink
            .lock()
            .map_err(|e| Error::Internal(format!("recorder sink lock poisoned: {}", e)))
    }

    /// Append one event line and bump the stored count.
    ///
    /// Only a failed write is an error. The stored count is refreshed on a
    /// best-effort basis; `finish` writes the final count either way.
    pub fn record_event(&self, event: &PotholeEvent) -> Result<()> {
        let mut sink = self.sink()?;
        let writer = sink.as_mut().ok_or(Error::SessionClosed)?;
        writeln!(writer, "{}", event.to_line())?;
        self.events_logged.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = self.store.append_event(self.session.id) {
            tracing::warn!(
                session_id = self.session.id,
                error = %e,
                "Failed to update stored event count"
            );
        }

        tracing::debug!(
            session_id = self.session.id,
            severity = event.severity,
            "Event recorded"
        );
        Ok(())
    }

    /// Flush the data file, finalize the session record, then close the file.
    ///
    /// On error the recorder stays open and `finish` may be called again.
    pub fn finish(&self, now: DateTime<Utc>) -> Result<FinishedSession> {
        let mut sink = self.sink()?;
        let writer = sink.as_mut().ok_or(Error::SessionClosed)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        let file_size = writer.get_ref().metadata()?.len();

        let session = self
            .store
            .finish_session(self.session.id, self.events_logged(), now)?;
        sink.take();
        drop(sink);
        tracing::info!(
            session_id = session.id,
            events = session.event_count,
            file_size,
            "Recording session finished"
        );

        Ok(FinishedSession { session, file_size })
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    pub fn session_id(&self) -> i64 {
        self.session.id
    }

    pub fn data_file_path(&self) -> &PathBuf {
        &self.session.data_file_path
    }

    pub fn events_logged(&self) -> i64 {
        self.events_logged.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.sink
            .lock()
            .map(|sink| sink.is_none())
            .unwrap_or(true)
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        let sink = self
            .sink
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(mut writer) = sink.take() {
            tracing::warn!(
                session_id = self.session.id,
                "Recorder dropped without finish, flushing data file"
            );
            if let Err(e) = writer.flush() {
                tracing::warn!(session_id = self.session.id, error = %e, "Final flush failed");
            }
        }
    }
}
