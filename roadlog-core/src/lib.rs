//! # roadlog-core
//!
//! Core library for roadlog - accelerometer based pothole logging.
//!
//! This library provides:
//! - The signal pipeline: gravity removal, differential smoothing, and
//!   hysteresis event detection
//! - A shared ring buffer of recent magnitudes for display consumers
//! - Session recording to append-only data files
//! - Session storage with SQLite and batched upload of finished sessions
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! RawSample -> SignalConditioner -> magnitude -> RingBuffer
//!                                            \-> EventDetector -> SessionRecorder -> data file
//!                                                                        \-> SessionStore
//! SessionStore -> UploadSynchronizer -> server
//! ```
//!
//! [`LoggerService`] wires the stages together and gates session start on
//! the first location fix.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roadlog_core::{Config, Database, LoggerService, RawSample, RingBuffer};
//!
//! let config = Config::load().expect("failed to load config");
//! let settings = config.detection.settings();
//!
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let buffer = RingBuffer::shared(settings.buffer_capacity).expect("invalid capacity");
//! let service = LoggerService::new(Arc::new(db), settings, config.storage.data_dir(), buffer);
//! service.start(true).expect("failed to start");
//! service.on_sample(RawSample::new(0.0, 0.0, 9.81, 0));
//! service.stop().expect("failed to stop");
//! ```

// Re-export commonly used items at the crate root
pub use conditioner::SignalConditioner;
pub use config::{Config, DetectionSettings};
pub use db::{Database, SessionStore};
pub use detector::{CrossingAlert, EventDetector};
pub use error::{Error, Result};
pub use observer::{MotionObserver, MotionUpdate, ObserverId, ObserverRegistry};
pub use recorder::{FinishedSession, SessionRecorder};
pub use ring_buffer::{AppendSignal, RingBuffer, SharedRingBuffer};
pub use service::{LoggerService, SampleStatus, ServiceState};
pub use types::*;
pub use upload::{HttpTransport, UploadStatus, UploadSynchronizer, UploadTransport};

// Public modules
pub mod conditioner;
pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod format;
pub mod logging;
pub mod observer;
pub mod recorder;
pub mod ring_buffer;
pub mod service;
pub mod trace;
pub mod types;
pub mod upload;
