//! Logger service
//!
//! Drives the pipeline for one device. A session starts either immediately
//! (GPS bypass) or on the first location fix after [`LoggerService::start`].
//! While recording, every accelerometer sample flows through
//!
//! ```text
//! conditioner -> ring buffer (+ append signal) -> detector -> recorder
//! ```
//!
//! and a [`MotionUpdate`] is published to registered observers.
//!
//! Samples and fixes may arrive on different threads. The last fix is kept
//! in its own cell and read once per sample. Sample handling and `stop`
//! share the session mutex, so a sample in flight completes before the data
//! file is closed.

use crate::conditioner::SignalConditioner;
use crate::config::DetectionSettings;
use crate::db::SessionStore;
use crate::detector::EventDetector;
use crate::error::{Error, Result};
use crate::observer::{MotionUpdate, ObserverRegistry};
use crate::recorder::{FinishedSession, SessionRecorder};
use crate::ring_buffer::{AppendSignal, SharedRingBuffer};
use crate::types::{Location, PotholeEvent, RawSample, RecordingSession};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    WaitingForFix,
    Recording,
}

/// Result of feeding one sample
#[derive(Debug, Clone, PartialEq)]
pub enum SampleStatus {
    /// No session is recording
    Ignored,
    Processed { magnitude: f64 },
    Recorded(PotholeEvent),
    /// The event could not be persisted; carries the error kind
    RecordFailed(&'static str),
}

struct ActiveSession {
    conditioner: SignalConditioner,
    detector: EventDetector,
    recorder: SessionRecorder,
    started: Instant,
}

enum Lifecycle {
    Idle,
    WaitingForFix,
    Recording(Box<ActiveSession>),
}

pub struct LoggerService {
    store: Arc<dyn SessionStore>,
    settings: DetectionSettings,
    data_dir: PathBuf,
    buffer: SharedRingBuffer,
    signal: Arc<AppendSignal>,
    observers: ObserverRegistry,
    location: Mutex<Option<Location>>,
    lifecycle: Mutex<Lifecycle>,
    samples_processed: AtomicU64,
    events_logged: AtomicI64,
}

impl std::fmt::Debug for LoggerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerService")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

impl LoggerService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        settings: DetectionSettings,
        data_dir: impl Into<PathBuf>,
        buffer: SharedRingBuffer,
    ) -> Self {
        Self {
            store,
            settings,
            data_dir: data_dir.into(),
            buffer,
            signal: Arc::new(AppendSignal::new()),
            observers: ObserverRegistry::new(),
            location: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::Idle),
            samples_processed: AtomicU64::new(0),
            events_logged: AtomicI64::new(0),
        }
    }

    fn lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>> {
        self.lifecycle
            .lock()
            .map_err(|e| Error::Internal(format!("session lock poisoned: {}", e)))
    }

    fn last_location(&self) -> Option<Location> {
        *self
            .location
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin logging.
    ///
    /// With `bypass_gps` the session opens immediately; otherwise the service
    /// waits for the first location fix.
    pub fn start(&self, bypass_gps: bool) -> Result<()> {
        let started = {
            let mut lifecycle = self.lifecycle()?;
            if !matches!(*lifecycle, Lifecycle::Idle) {
                return Err(Error::AlreadyRunning);
            }
            if bypass_gps {
                let active = self.open_session()?;
                let session = active.recorder.session().clone();
                *lifecycle = Lifecycle::Recording(Box::new(active));
                Some(session)
            } else {
                tracing::info!("Waiting for location fix");
                *lifecycle = Lifecycle::WaitingForFix;
                None
            }
        };

        if let Some(session) = started {
            self.observers.publish_session_started(&session);
        }
        Ok(())
    }

    fn open_session(&self) -> Result<ActiveSession> {
        let recorder =
            SessionRecorder::start(Arc::clone(&self.store), &self.data_dir, Utc::now())?;
        self.events_logged.store(0, Ordering::SeqCst);
        self.samples_processed.store(0, Ordering::SeqCst);
        Ok(ActiveSession {
            conditioner: SignalConditioner::from_settings(&self.settings),
            detector: EventDetector::from_settings(&self.settings),
            recorder,
            started: Instant::now(),
        })
    }

    /// Record a location fix. The first fix while waiting opens the session.
    pub fn on_location(&self, location: Location) -> Result<()> {
        let first_fix = self
            .location
            .lock()
            .map(|mut cell| cell.replace(location).is_none())
            .unwrap_or(false);
        if first_fix {
            tracing::info!(
                latitude = location.latitude,
                longitude = location.longitude,
                "First location fix"
            );
        }

        let started = {
            let mut lifecycle = self.lifecycle()?;
            if !matches!(*lifecycle, Lifecycle::WaitingForFix) {
                return Ok(());
            }
            let active = self.open_session()?;
            let session = active.recorder.session().clone();
            *lifecycle = Lifecycle::Recording(Box::new(active));
            session
        };

        self.observers.publish_session_started(&started);
        Ok(())
    }

    /// Feed one accelerometer sample through the pipeline.
    pub fn on_sample(&self, sample: RawSample) -> SampleStatus {
        let (status, magnitude, location) = {
            let mut lifecycle = match self.lifecycle() {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::error!(error = %e, "Dropping sample");
                    return SampleStatus::Ignored;
                }
            };
            let Lifecycle::Recording(active) = &mut *lifecycle else {
                return SampleStatus::Ignored;
            };

            let magnitude = active.conditioner.process(&sample);
            self.buffer.append(magnitude);
            self.signal.notify();
            self.samples_processed.fetch_add(1, Ordering::Relaxed);

            let location = self.last_location();
            let status = match active
                .detector
                .process(magnitude, sample.timestamp_ms, location)
            {
                None => SampleStatus::Processed { magnitude },
                Some(event) => match active.recorder.record_event(&event) {
                    Ok(()) => {
                        self.events_logged.fetch_add(1, Ordering::SeqCst);
                        SampleStatus::Recorded(event)
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            severity = event.severity,
                            "Failed to record event"
                        );
                        SampleStatus::RecordFailed(e.kind())
                    }
                },
            };
            (status, magnitude, location)
        };

        self.observers.publish_motion(&MotionUpdate {
            magnitude,
            buffer: Arc::clone(&self.buffer),
            location,
            timestamp_ms: sample.timestamp_ms,
        });
        status
    }

    /// Stop logging.
    ///
    /// Cancels a pending fix wait, or flushes and finalizes the running
    /// session and returns it. If finalizing fails the session keeps
    /// recording and `stop` may be called again.
    pub fn stop(&self) -> Result<Option<FinishedSession>> {
        let finished = {
            let mut lifecycle = self.lifecycle()?;
            let finished = match &mut *lifecycle {
                Lifecycle::Idle => return Err(Error::NotRunning),
                Lifecycle::WaitingForFix => None,
                Lifecycle::Recording(active) => {
                    let finished = active.recorder.finish(Utc::now())?;
                    tracing::info!(
                        session_id = finished.session.id,
                        samples = active.conditioner.samples_processed(),
                        discarded = active.detector.intervals_discarded(),
                        "Logging stopped"
                    );
                    Some(finished)
                }
            };
            *lifecycle = Lifecycle::Idle;
            finished
        };

        match finished {
            Some(finished) => {
                self.observers.publish_session_closed(&finished.session);
                Ok(Some(finished))
            }
            None => {
                tracing::info!("Stopped before a location fix arrived");
                Ok(None)
            }
        }
    }

    pub fn state(&self) -> ServiceState {
        match self.lifecycle.lock().as_deref() {
            Ok(Lifecycle::Idle) | Err(_) => ServiceState::Idle,
            Ok(Lifecycle::WaitingForFix) => ServiceState::WaitingForFix,
            Ok(Lifecycle::Recording(_)) => ServiceState::Recording,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state() != ServiceState::Idle
    }

    pub fn has_fix(&self) -> bool {
        self.last_location().is_some()
    }

    /// Events written in the current (or last) session
    pub fn events_logged(&self) -> i64 {
        self.events_logged.load(Ordering::SeqCst)
    }

    /// Samples processed in the current (or last) session
    pub fn samples_processed(&self) -> u64 {
        self.samples_processed.load(Ordering::Relaxed)
    }

    /// Time since the running session opened
    pub fn elapsed(&self) -> Option<Duration> {
        match &*self.lifecycle.lock().ok()? {
            Lifecycle::Recording(active) => Some(active.started.elapsed()),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<i64> {
        self.current_session().map(|s| s.id)
    }

    pub fn current_session(&self) -> Option<RecordingSession> {
        match &*self.lifecycle.lock().ok()? {
            Lifecycle::Recording(active) => Some(active.recorder.session().clone()),
            _ => None,
        }
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub fn buffer(&self) -> SharedRingBuffer {
        Arc::clone(&self.buffer)
    }

    pub fn append_signal(&self) -> Arc<AppendSignal> {
        Arc::clone(&self.signal)
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
