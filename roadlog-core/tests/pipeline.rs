//! End-to-end tests for the roadlog pipeline
//!
//! These tests replay `tests/fixtures/one-pothole.trace` through a
//! `LoggerService` backed by an on-disk database, then upload the
//! resulting session.

use roadlog_core::trace::{read_trace_file, TraceRecord};
use roadlog_core::{
    Database, DetectionSettings, Error, LoggerService, MotionObserver, MotionUpdate, RawSample,
    RingBuffer, SampleStatus, ServiceState, SessionStore, UploadStatus, UploadSynchronizer,
    UploadTransport,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

struct Harness {
    _dir: TempDir,
    data_dir: PathBuf,
    db: Arc<Database>,
    service: Arc<LoggerService>,
}

fn harness() -> Harness {
    roadlog_core::logging::init_test();
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("sessions.db")).unwrap();
    db.migrate().unwrap();
    let db = Arc::new(db);
    let data_dir = dir.path().join("sessions");

    let settings = DetectionSettings::default();
    let buffer = RingBuffer::shared(settings.buffer_capacity).unwrap();
    let service = Arc::new(LoggerService::new(
        db.clone(),
        settings,
        data_dir.clone(),
        buffer,
    ));

    Harness {
        _dir: dir,
        data_dir,
        db,
        service,
    }
}

fn replay(service: &LoggerService, records: &[TraceRecord]) -> Vec<SampleStatus> {
    let mut statuses = Vec::new();
    for record in records {
        match record {
            TraceRecord::Sample(sample) => statuses.push(service.on_sample(*sample)),
            TraceRecord::Fix { location, .. } => service.on_location(*location).unwrap(),
        }
    }
    statuses
}

#[derive(Default)]
struct CapturingTransport {
    bodies: Mutex<Vec<Vec<u8>>>,
}

impl UploadTransport for CapturingTransport {
    fn send(&self, body: Vec<u8>) -> impl Future<Output = roadlog_core::Result<()>> + Send {
        self.bodies.lock().unwrap().push(body);
        async { Ok(()) }
    }
}

// ============================================
// Recording
// ============================================

#[test]
fn test_replay_records_one_pothole() {
    let h = harness();
    let records = read_trace_file(&fixture_path("one-pothole.trace")).unwrap();
    assert_eq!(records.len(), 194);

    h.service.start(false).unwrap();
    let statuses = replay(&h.service, &records);
    let events: Vec<_> = statuses
        .iter()
        .filter_map(|s| match s {
            SampleStatus::Recorded(event) => Some(*event),
            _ => None,
        })
        .collect();

    assert_eq!(events.len(), 1);
    let event = events[0];
    assert!(event.severity >= 2.0);
    assert!(event.timestamp_ms > 1_700_000_000_520);
    assert!(event.timestamp_ms < 1_700_000_000_700);
    assert_eq!(
        (event.latitude, event.longitude, event.speed),
        (52.52, 13.405, 8.0)
    );

    let finished = h.service.stop().unwrap().unwrap();
    assert_eq!(finished.session.event_count, 1);
    assert_eq!(h.service.state(), ServiceState::Idle);

    // The data file holds the header plus the event line
    let path = &finished.session.data_file_path;
    assert!(path.starts_with(&h.data_dir));
    let content = std::fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "Time, Severity, Lat, Lon, Speed");
    assert_eq!(lines[1], event.to_line());
    assert_eq!(finished.file_size, content.len() as u64);

    let stored = h.db.get_session(finished.session.id).unwrap().unwrap();
    assert!(stored.is_finished());
    assert!(!stored.uploaded);
}

#[test]
fn test_samples_before_fix_are_not_recorded() {
    let h = harness();
    let records = read_trace_file(&fixture_path("one-pothole.trace")).unwrap();

    // Drop the fix: the service never leaves WaitingForFix
    let samples: Vec<_> = records
        .into_iter()
        .filter(|r| matches!(r, TraceRecord::Sample(_)))
        .collect();

    h.service.start(false).unwrap();
    let statuses = replay(&h.service, &samples);
    assert!(statuses.iter().all(|s| *s == SampleStatus::Ignored));
    assert!(h.service.stop().unwrap().is_none());
    assert!(h.db.list_sessions(10).unwrap().is_empty());
}

#[test]
fn test_sessions_do_not_share_detector_state() {
    let h = harness();
    let records = read_trace_file(&fixture_path("one-pothole.trace")).unwrap();

    for _ in 0..2 {
        h.service.start(true).unwrap();
        replay(&h.service, &records);
        let finished = h.service.stop().unwrap().unwrap();
        assert_eq!(finished.session.event_count, 1);
        // Distinct start times keep data files apart
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(h.db.list_sessions(10).unwrap().len(), 2);
}

// ============================================
// Concurrency
// ============================================

#[test]
fn test_fixes_and_samples_on_separate_threads() {
    let h = harness();
    h.service.start(false).unwrap();
    h.service
        .on_location(roadlog_core::Location::new(1.0, 2.0, 3.0))
        .unwrap();

    let fixes = {
        let service = Arc::clone(&h.service);
        thread::spawn(move || {
            for i in 0..500 {
                let f = i as f64;
                service
                    .on_location(roadlog_core::Location::new(f, f, f))
                    .unwrap();
            }
        })
    };
    let samples = {
        let service = Arc::clone(&h.service);
        thread::spawn(move || {
            for ts in 0..2_000 {
                let z = if ts % 97 == 0 { 40.0 } else { 9.81 };
                service.on_sample(RawSample::new(0.0, 0.0, z, ts));
            }
        })
    };
    fixes.join().unwrap();
    samples.join().unwrap();

    assert_eq!(h.service.samples_processed(), 2_000);
    let finished = h.service.stop().unwrap().unwrap();
    let stored = h.db.get_session(finished.session.id).unwrap().unwrap();
    assert_eq!(stored.event_count, h.service.events_logged());
}

#[test]
fn test_display_consumer_wakes_on_append() {
    let h = harness();
    let signal = h.service.append_signal();
    let buffer = h.service.buffer();

    let consumer = thread::spawn(move || {
        let mut seen = 0;
        let mut renders = 0;
        while let Some(generation) = signal.wait_newer(seen, Duration::from_secs(5)) {
            seen = generation;
            renders += 1;
            assert!(buffer.actual_size() > 0);
        }
        renders
    });

    h.service.start(true).unwrap();
    for ts in 0..100 {
        h.service.on_sample(RawSample::new(0.0, 0.0, 9.81, ts));
    }
    h.service.stop().unwrap();
    h.service.append_signal().close();

    let renders = consumer.join().unwrap();
    assert!(renders >= 1);
    assert!(renders <= 100);
}

struct StopOnFirstMotion {
    service: Mutex<Option<Arc<LoggerService>>>,
    motions: AtomicUsize,
}

impl MotionObserver for StopOnFirstMotion {
    fn on_motion(&self, _update: &MotionUpdate) {
        self.motions.fetch_add(1, Ordering::SeqCst);
        if let Some(service) = self.service.lock().unwrap().take() {
            service.stop().unwrap();
        }
    }
}

#[test]
fn test_observer_may_stop_service() {
    let h = harness();
    let observer = Arc::new(StopOnFirstMotion {
        service: Mutex::new(Some(Arc::clone(&h.service))),
        motions: AtomicUsize::new(0),
    });
    h.service.observers().register(observer.clone());

    h.service.start(true).unwrap();
    h.service.on_sample(RawSample::new(0.0, 0.0, 9.81, 0));
    assert_eq!(h.service.state(), ServiceState::Idle);
    assert_eq!(
        h.service.on_sample(RawSample::new(0.0, 0.0, 9.81, 1)),
        SampleStatus::Ignored
    );
    assert_eq!(observer.motions.load(Ordering::SeqCst), 1);
}

// ============================================
// Upload
// ============================================

fn record_sessions(h: &Harness, count: usize) {
    let records = read_trace_file(&fixture_path("one-pothole.trace")).unwrap();
    for _ in 0..count {
        h.service.start(true).unwrap();
        replay(&h.service, &records);
        h.service.stop().unwrap();
        thread::sleep(Duration::from_millis(2));
    }
}

#[tokio::test]
async fn test_upload_after_recording() {
    let h = harness();
    record_sessions(&h, 2);

    let sync = Arc::new(UploadSynchronizer::new(
        h.db.clone(),
        CapturingTransport::default(),
    ));
    let status = Arc::clone(&sync).spawn().await.unwrap();
    assert!(matches!(status, UploadStatus::Completed { uploaded: 2 }));

    let bodies = sync.transport().bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    let payload: serde_json::Value = serde_json::from_slice(&bodies[0]).unwrap();
    let sessions = payload.as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["eventCount"], 1);
    assert!(Path::new(sessions[0]["dataFilePath"].as_str().unwrap()).exists());

    assert!(h.db.list_unsynced().unwrap().is_empty());
    let again = sync.run().await;
    assert!(matches!(again, UploadStatus::Completed { uploaded: 0 }));
}

#[tokio::test]
async fn test_open_session_is_not_uploaded() {
    let h = harness();
    h.service.start(true).unwrap();

    let sync = UploadSynchronizer::new(h.db.clone(), CapturingTransport::default());
    let status = sync.run().await;
    assert!(matches!(status, UploadStatus::Completed { uploaded: 0 }));
    assert!(sync.transport().bodies.lock().unwrap().is_empty());

    h.service.stop().unwrap();
    assert!(matches!(
        h.service.stop(),
        Err(Error::NotRunning)
    ));
}
