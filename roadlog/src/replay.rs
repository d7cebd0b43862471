//! `roadlog replay` - feed a recorded sensor trace through the logger.
//!
//! Accelerometer samples are delivered on the calling thread. Location fixes
//! are handed to a separate feeder thread, the way a device delivers them
//! on its own callback thread, and the sample loop waits for each fix to be
//! applied so the trace order is preserved.

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use roadlog_core::format::{format_duration, format_readable_bytes};
use roadlog_core::trace::{read_trace_file, TraceRecord};
use roadlog_core::{
    Config, CrossingAlert, Database, DetectionSettings, FinishedSession, Location, LoggerService,
    RingBuffer, SampleStatus,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Options for a replay run
pub struct ReplayOptions {
    pub trace: PathBuf,
    pub bypass_gps: bool,
    pub threshold: Option<f64>,
    pub filter_factor: Option<i64>,
    pub quiet: bool,
}

/// Counters collected while replaying
#[derive(Debug, Default)]
struct ReplayStats {
    samples: u64,
    ignored: u64,
    events: u64,
    record_failures: u64,
    fixes: u64,
}

pub fn run(config: &Config, db: Database, options: ReplayOptions) -> Result<()> {
    let records = read_trace_file(&options.trace)
        .with_context(|| format!("failed to read trace {}", options.trace.display()))?;

    let settings = resolve_settings(config, &options);
    tracing::info!(
        trace = %options.trace.display(),
        records = records.len(),
        threshold = settings.threshold,
        filter_factor = settings.filter_factor,
        "Replaying trace"
    );

    let buffer = RingBuffer::shared(settings.buffer_capacity)
        .context("invalid detection.buffer_capacity")?;
    let service = Arc::new(LoggerService::new(
        Arc::new(db),
        settings,
        config.storage.data_dir(),
        buffer,
    ));
    let alert = Arc::new(CrossingAlert::new(settings.threshold));
    service.observers().register(alert.clone());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nStopping replay...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    service
        .start(options.bypass_gps)
        .context("failed to start logger")?;

    let (fix_tx, fix_rx) = mpsc::channel::<Location>();
    let (ack_tx, ack_rx) = mpsc::channel::<roadlog_core::Result<()>>();
    let feeder = {
        let service = Arc::clone(&service);
        thread::Builder::new()
            .name("location-feed".to_string())
            .spawn(move || {
                for location in fix_rx {
                    if ack_tx.send(service.on_location(location)).is_err() {
                        break;
                    }
                }
            })
            .context("failed to spawn location thread")?
    };

    let sample_count = records
        .iter()
        .filter(|r| matches!(r, TraceRecord::Sample(_)))
        .count() as u64;
    let pb = if options.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(sample_count)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let started = Instant::now();
    let mut stats = ReplayStats::default();
    let mut feed_result = Ok(());
    for record in &records {
        if !running.load(Ordering::SeqCst) {
            tracing::info!("Replay interrupted");
            break;
        }
        match record {
            TraceRecord::Sample(sample) => {
                stats.samples += 1;
                match service.on_sample(*sample) {
                    SampleStatus::Ignored => stats.ignored += 1,
                    SampleStatus::Processed { .. } => {}
                    SampleStatus::Recorded(_) => {
                        stats.events += 1;
                        pb.set_message(format!("{} event(s)", stats.events));
                    }
                    SampleStatus::RecordFailed(_) => stats.record_failures += 1,
                }
                pb.inc(1);
            }
            TraceRecord::Fix { location, .. } => {
                stats.fixes += 1;
                feed_result = deliver_fix(&fix_tx, &ack_rx, *location);
                if feed_result.is_err() {
                    break;
                }
            }
        }
    }
    pb.finish_and_clear();

    drop(fix_tx);
    if feeder.join().is_err() {
        tracing::error!("Location thread panicked");
    }

    // Always close the session, even when a fix failed to open one
    let finished = service.stop();
    service.append_signal().close();
    feed_result?;
    let finished = finished.context("failed to stop logger")?;

    print_summary(&options, &stats, alert.crossings(), finished.as_ref(), started);
    tracing::info!(
        samples = stats.samples,
        events = stats.events,
        record_failures = stats.record_failures,
        "Replay complete"
    );

    if stats.record_failures > 0 {
        bail!("{} event(s) could not be written", stats.record_failures);
    }
    Ok(())
}

fn deliver_fix(
    fix_tx: &mpsc::Sender<Location>,
    ack_rx: &mpsc::Receiver<roadlog_core::Result<()>>,
    location: Location,
) -> Result<()> {
    fix_tx
        .send(location)
        .context("location thread stopped unexpectedly")?;
    ack_rx
        .recv()
        .context("location thread stopped unexpectedly")?
        .context("failed to open recording session")
}

fn resolve_settings(config: &Config, options: &ReplayOptions) -> DetectionSettings {
    let mut settings = config.detection.settings();
    if let Some(threshold) = options.threshold {
        settings.threshold = threshold;
    }
    if let Some(filter_factor) = options.filter_factor {
        settings.filter_factor = roadlog_core::config::clamp_filter_factor(filter_factor);
    }
    settings
}

fn print_summary(
    options: &ReplayOptions,
    stats: &ReplayStats,
    crossings: u64,
    finished: Option<&FinishedSession>,
    started: Instant,
) {
    println!("Replayed {}", options.trace.display());
    println!("  Samples:            {}", stats.samples);
    println!("  Location fixes:     {}", stats.fixes);
    println!("  Threshold crossings: {}", crossings);

    match finished {
        Some(finished) => {
            let session = &finished.session;
            println!("  Session:            #{}", session.id);
            println!("  Events recorded:    {}", session.event_count);
            println!(
                "  Data file:          {} ({})",
                session.data_file_path.display(),
                format_readable_bytes(finished.file_size)
            );
        }
        None => {
            println!("  No location fix in trace; nothing recorded (try --bypass-gps)");
        }
    }
    if stats.ignored > 0 && finished.is_some() {
        println!("  Samples before fix: {}", stats.ignored);
    }
    println!("  Elapsed:            {}", format_duration(started.elapsed()));
}
