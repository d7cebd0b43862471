//! Upload of finished sessions
//!
//! The synchronizer reads unsent sessions from the store, posts them as one
//! JSON batch through an [`UploadTransport`], and marks them uploaded only
//! after the transport reports success. A failed attempt leaves every
//! session unsent so the next run retries the whole batch.
//!
//! Only one run may be in flight per synchronizer. A concurrent call returns
//! [`UploadStatus::AlreadyRunning`] without touching the store.

mod client;

pub use client::HttpTransport;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::db::SessionStore;
use crate::error::{Error, Result};
use crate::types::RecordingSession;

/// Delivers a serialized batch to the server.
pub trait UploadTransport: Send + Sync {
    fn send(&self, body: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

/// Outcome of one synchronizer run
#[derive(Debug)]
pub enum UploadStatus {
    /// Batch delivered and marked; `uploaded` is 0 when nothing was pending
    Completed { uploaded: usize },
    /// Another run was still in flight
    AlreadyRunning,
    /// Nothing was marked
    Failed(Error),
}

impl UploadStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadStatus::Completed { .. })
    }
}

/// Serialize sessions as the upload payload: a JSON array of session records.
pub fn serialize(sessions: &[RecordingSession]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(sessions)?)
}

pub struct UploadSynchronizer<T> {
    store: Arc<dyn SessionStore>,
    transport: T,
    running: AtomicBool,
}

/// Clears the in-flight flag when a run ends, whichever way it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: UploadTransport> UploadSynchronizer<T> {
    pub fn new(store: Arc<dyn SessionStore>, transport: T) -> Self {
        Self {
            store,
            transport,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Upload every finished, unsent session in one batch.
    pub async fn run(&self) -> UploadStatus {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Upload already in flight, skipping");
            return UploadStatus::AlreadyRunning;
        }
        let _guard = RunGuard(&self.running);

        match self.upload_pending().await {
            Ok(uploaded) => UploadStatus::Completed { uploaded },
            Err(e) => {
                tracing::warn!(error = %e, "Upload failed, sessions left unsent");
                UploadStatus::Failed(e)
            }
        }
    }

    async fn upload_pending(&self) -> Result<usize> {
        let sessions = self.store.list_unsynced()?;
        if sessions.is_empty() {
            tracing::debug!("No sessions to upload");
            return Ok(0);
        }

        let body = serialize(&sessions)?;
        let ids: Vec<i64> = sessions.iter().map(|s| s.id).collect();
        tracing::info!(sessions = ids.len(), bytes = body.len(), "Uploading sessions");

        self.transport.send(body).await?;
        let marked = self.store.mark_uploaded(&ids)?;

        tracing::info!(uploaded = marked, "Upload complete");
        Ok(marked)
    }
}

impl<T: UploadTransport + 'static> UploadSynchronizer<T> {
    /// Run on the tokio runtime and deliver the status on a completion channel.
    pub fn spawn(self: Arc<Self>) -> oneshot::Receiver<UploadStatus> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let status = self.run().await;
            // Receiver may have been dropped; the store already reflects the outcome
            let _ = tx.send(status);
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::{Duration, TimeZone, Utc};
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingTransport {
        bodies: Mutex<Vec<Vec<u8>>>,
    }

    impl UploadTransport for RecordingTransport {
        fn send(&self, body: Vec<u8>) -> impl Future<Output = Result<()>> + Send {
            self.bodies.lock().unwrap().push(body);
            async { Ok(()) }
        }
    }

    #[derive(Default)]
    struct FailingTransport {
        attempts: AtomicUsize,
    }

    impl UploadTransport for FailingTransport {
        fn send(&self, _body: Vec<u8>) -> impl Future<Output = Result<()>> + Send {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Upload("connection refused".to_string())) }
        }
    }

    /// Blocks inside `send` until released.
    #[derive(Default)]
    struct GatedTransport {
        entered: Notify,
        release: Notify,
    }

    impl UploadTransport for GatedTransport {
        fn send(&self, _body: Vec<u8>) -> impl Future<Output = Result<()>> + Send {
            async move {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(())
            }
        }
    }

    fn store_with_finished(count: usize) -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let start = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        for i in 0..count {
            let begin = start + Duration::minutes(i as i64);
            let session = db.open_session(begin, Path::new("/tmp/data.log")).unwrap();
            db.finish_session(session.id, i as i64, begin + Duration::seconds(30))
                .unwrap();
        }
        Arc::new(db)
    }

    #[test]
    fn test_serialize_payload_shape() {
        let db = store_with_finished(1);
        let sessions = db.list_unsynced().unwrap();
        let body = serialize(&sessions).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        let array = json.as_array().unwrap();
        assert_eq!(array.len(), 1);
        let record = &array[0];
        for key in [
            "id",
            "startTime",
            "endTime",
            "dataFilePath",
            "eventCount",
            "uploaded",
        ] {
            assert!(record.get(key).is_some(), "missing {key}");
        }
        assert_eq!(record["uploaded"], false);
    }

    #[tokio::test]
    async fn test_uploads_and_marks_sessions() {
        let db = store_with_finished(2);
        let sync = UploadSynchronizer::new(db.clone(), RecordingTransport::default());

        let status = sync.run().await;
        assert!(matches!(status, UploadStatus::Completed { uploaded: 2 }));
        assert!(db.list_unsynced().unwrap().is_empty());
        assert_eq!(sync.transport().bodies.lock().unwrap().len(), 1);
        assert!(!sync.is_running());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let db = store_with_finished(2);
        let sync = UploadSynchronizer::new(db.clone(), RecordingTransport::default());

        sync.run().await;
        let status = sync.run().await;

        assert!(matches!(status, UploadStatus::Completed { uploaded: 0 }));
        // No network exchange for an empty batch
        assert_eq!(sync.transport().bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_marks_nothing() {
        let db = store_with_finished(3);
        let sync = UploadSynchronizer::new(db.clone(), FailingTransport::default());

        let status = sync.run().await;
        assert!(matches!(status, UploadStatus::Failed(Error::Upload(_))));
        assert_eq!(db.list_unsynced().unwrap().len(), 3);
        assert!(!sync.is_running());

        // The guard was released, so a retry is attempted
        sync.run().await;
        assert_eq!(sync.transport().attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_run_reports_already_running() {
        let db = store_with_finished(1);
        let sync = Arc::new(UploadSynchronizer::new(db.clone(), GatedTransport::default()));

        let first = Arc::clone(&sync).spawn();
        sync.transport().entered.notified().await;
        assert!(sync.is_running());

        let second = sync.run().await;
        assert!(matches!(second, UploadStatus::AlreadyRunning));

        sync.transport().release.notify_one();
        let status = first.await.unwrap();
        assert!(matches!(status, UploadStatus::Completed { uploaded: 1 }));
        assert!(db.list_unsynced().unwrap().is_empty());
    }
}
