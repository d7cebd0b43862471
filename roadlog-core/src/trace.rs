//! Recorded sensor traces
//!
//! A trace is a text file with one record per line:
//!
//! ```text
//! # comment
//! A,<timestamp_ms>,<x>,<y>,<z>
//! L,<timestamp_ms>,<lat>,<lon>,<speed>
//! ```
//!
//! `A` lines are accelerometer samples and `L` lines are location fixes.
//! Blank lines and lines starting with `#` are skipped.

use crate::error::{Error, Result};
use crate::types::{Location, RawSample};
use std::io::BufRead;
use std::path::Path;

/// One parsed trace line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceRecord {
    Sample(RawSample),
    Fix { timestamp_ms: i64, location: Location },
}

impl TraceRecord {
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            TraceRecord::Sample(sample) => sample.timestamp_ms,
            TraceRecord::Fix { timestamp_ms, .. } => *timestamp_ms,
        }
    }
}

/// Parse a single line. Returns `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<TraceRecord>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 5 {
        return Err(Error::Trace(format!(
            "expected 5 fields, found {}: {:?}",
            fields.len(),
            line
        )));
    }

    let timestamp_ms: i64 = fields[1]
        .parse()
        .map_err(|_| Error::Trace(format!("invalid timestamp {:?}", fields[1])))?;
    let number = |i: usize| -> Result<f64> {
        fields[i]
            .parse::<f64>()
            .map_err(|_| Error::Trace(format!("invalid number {:?}", fields[i])))
    };

    let record = match fields[0] {
        "A" => TraceRecord::Sample(RawSample::new(
            number(2)?,
            number(3)?,
            number(4)?,
            timestamp_ms,
        )),
        "L" => TraceRecord::Fix {
            timestamp_ms,
            location: Location::new(number(2)?, number(3)?, number(4)?),
        },
        other => {
            return Err(Error::Trace(format!("unknown record type {:?}", other)));
        }
    };
    Ok(Some(record))
}

/// Read every record from a trace, reporting the line number of the first bad line.
pub fn read_records(reader: impl BufRead) -> Result<Vec<TraceRecord>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_line(&line) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(Error::Trace(msg)) => {
                return Err(Error::Trace(format!("line {}: {}", index + 1, msg)));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(records)
}

/// Read a trace file from disk.
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceRecord>> {
    let file = std::fs::File::open(path)?;
    read_records(std::io::BufReader::new(file))
}
