//! Chrome trace (`chrome://tracing` / Perfetto) JSON output.
//!
//! Each section gets its own track, so `B`/`E` pairs nest correctly even when
//! frames overlap in the pipeline. Predicted starts are instant events on
//! track 0; latency samples are counter events.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::PacingError;
use crate::pacing::{FrameId, FrameRecord, MarkType};
use crate::{Interval, Timestamp};

/// One trace event in the Trace Event Format.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub name: String,
    pub cat: &'static str,
    pub ph: &'static str,
    pub pid: u32,
    pub tid: u64,
    /// Microseconds.
    pub ts: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl TraceEvent {
    fn new(name: String, cat: &'static str, ph: &'static str, tid: u64, ts: Timestamp) -> Self {
        Self {
            name,
            cat,
            ph,
            pid: std::process::id(),
            tid,
            ts: ts as f64 / 1_000.0,
            s: None,
            args: None,
        }
    }
}

/// Streams events into a JSON array.
///
/// The closing bracket is written on drop. Callers stop using the writer
/// after the first I/O error.
pub struct TraceWriter {
    out: Box<dyn Write + Send>,
    events: u64,
}

impl TraceWriter {
    pub fn create(path: &Path) -> Result<Self, PacingError> {
        let file = File::create(path).map_err(|source| PacingError::Trace {
            path: path.to_path_buf(),
            source,
        })?;
        let writer = Self::from_writer(Box::new(BufWriter::new(file))).map_err(|source| {
            PacingError::Trace {
                path: path.to_path_buf(),
                source,
            }
        })?;
        log::info!("writing pacing trace to {}", path.display());
        Ok(writer)
    }

    pub fn from_writer(mut out: Box<dyn Write + Send>) -> io::Result<Self> {
        out.write_all(b"[\n")?;
        Ok(Self { out, events: 0 })
    }

    pub fn event(&mut self, event: &TraceEvent) -> io::Result<()> {
        if self.events > 0 {
            self.out.write_all(b",\n")?;
        }
        serde_json::to_writer(&mut self.out, event)?;
        self.events += 1;
        Ok(())
    }

    pub(crate) fn predicted_start(&mut self, frame: FrameId, target: Timestamp) -> io::Result<()> {
        let mut event = TraceEvent::new(format!("start {frame}"), "PACING", "i", 0, target);
        event.s = Some("p");
        self.event(&event)
    }

    pub(crate) fn frame_marks(&mut self, frame: FrameId, record: &FrameRecord) -> io::Result<()> {
        for mark in record.marks() {
            let ph = match mark.kind {
                MarkType::Begin => "B",
                MarkType::End => "E",
            };
            let event = TraceEvent::new(
                format!("frame {frame}"),
                "SECTION",
                ph,
                u64::from(mark.section) + 1,
                mark.timestamp,
            );
            self.event(&event)?;
        }
        Ok(())
    }

    pub(crate) fn latency(
        &mut self,
        frame: FrameId,
        latency: Interval,
        queueing_delay: Interval,
        at: Timestamp,
    ) -> io::Result<()> {
        let mut event = TraceEvent::new("latency".to_owned(), "LATENCY", "C", 0, at);
        event.args = Some(json!({
            "frame": frame.0,
            "latency_us": latency as f64 / 1_000.0,
            "queueing_us": queueing_delay as f64 / 1_000.0,
        }));
        self.event(&event)
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        let closed = self.out.write_all(b"\n]\n").and_then(|()| self.out.flush());
        if let Err(err) = closed {
            log::warn!("failed to finish trace output: {err}");
        }
    }
}
