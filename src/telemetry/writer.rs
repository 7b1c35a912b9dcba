//! Chrome Trace Event serialization ("Array Format").
//!
//! ## File layout
//! ```text
//! [\n
//! {"ph":"X","pid":1234,"tid":8,"name":"copyBuffer","ts":10.250,"dur":3.000},\n
//! {"ph":"s","pid":1234,"tid":8,"name":"Command","cat":"Commands","ts":10.250,"id":7},\n
//! {"ph":"M","pid":1234,"tid":0.1,"name":"thread_name","args":{"name":"Compute Queue"}},\n
//! ...
//! {"ph":"M","pid":1234,"name":"trace_shutdown"}\n
//! ]\n
//! ```
//!
//! Every record is one line terminated by `,\n`. The terminating metadata
//! record, written when the writer is dropped, omits the trailing comma so
//! the array stays syntactically closed. `ts`/`dur` are microseconds with 3
//! decimal places; in-memory times stay in nanoseconds and conversion happens
//! at the wire boundary.
//!
//! Formatting goes through a pre-sized scratch `String` and a single
//! `write_all` per record. Printing into a pre-allocated buffer and then
//! writing is measurably faster than direct stream insertion at trace-volume
//! rates.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::telemetry::records::{MetadataArgs, TraceRecord};

/// Name of the process-wide start-time metadata marker.
pub const TRACE_START_TIME_NAME: &str = "trace_start_time";
/// Name of the terminating metadata record.
pub const TRACE_SHUTDOWN_NAME: &str = "trace_shutdown";

const SCRATCH_CAPACITY: usize = 256;

/// Formats trace records and appends them to the output sink, batching them
/// in a bounded in-process buffer.
///
/// Buffer capacity 0 means write-through: each record goes straight to the
/// sink. Otherwise records accumulate and are flushed when the buffer reaches
/// capacity, on an explicit [`flush`](Self::flush), or on drop.
///
/// A sink write failure is fatal to trace output only: the writer disables
/// itself and drops all future records rather than surfacing errors into the
/// instrumented application.
pub struct ChromeTraceWriter {
    sink: Box<dyn Write + Send>,
    pid: u32,
    buffer: Vec<TraceRecord>,
    buffer_size: usize,
    scratch: String,
    disabled: bool,
}

impl ChromeTraceWriter {
    /// Create the trace file at `path` and write the array opener.
    pub fn create(path: impl AsRef<Path>, pid: u32, buffer_size: usize) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::with_sink(Box::new(BufWriter::new(file)), pid, buffer_size)
    }

    /// Writer over an arbitrary sink. Used by in-memory tests; `create` is
    /// the normal path.
    pub fn with_sink(
        mut sink: Box<dyn Write + Send>,
        pid: u32,
        buffer_size: usize,
    ) -> io::Result<Self> {
        sink.write_all(b"[\n")?;
        Ok(Self {
            sink,
            pid,
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            scratch: String::with_capacity(SCRATCH_CAPACITY),
            disabled: false,
        })
    }

    /// Queue one record, or write it through when unbuffered.
    pub fn emit(&mut self, record: TraceRecord) {
        if self.disabled {
            return;
        }
        if self.buffer_size == 0 {
            if let Err(err) = self.write_record(&record) {
                self.disable(&err);
            }
            return;
        }
        self.buffer.push(record);
        if self.buffer.len() >= self.buffer_size {
            self.flush_records();
        }
    }

    pub fn emit_all<I: IntoIterator<Item = TraceRecord>>(&mut self, records: I) {
        for record in records {
            self.emit(record);
        }
    }

    /// Serialize every buffered record in append order and flush the sink.
    /// Idempotent on an empty buffer.
    pub fn flush(&mut self) {
        self.flush_records();
        if self.disabled {
            return;
        }
        if let Err(err) = self.sink.flush() {
            self.disable(&err);
        }
    }

    /// Number of records currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn flush_records(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        if self.disabled {
            self.buffer.clear();
            return;
        }
        let mut records = std::mem::take(&mut self.buffer);
        for record in &records {
            if let Err(err) = self.write_record(record) {
                self.disable(&err);
                break;
            }
        }
        records.clear();
        // Hand the allocation back so steady-state flushing doesn't churn.
        self.buffer = records;
    }

    fn write_record(&mut self, record: &TraceRecord) -> io::Result<()> {
        self.scratch.clear();
        format_record(&mut self.scratch, self.pid, record);
        self.sink.write_all(self.scratch.as_bytes())
    }

    fn disable(&mut self, err: &io::Error) {
        if !self.disabled {
            eprintln!("devtrace: trace sink write failed ({err}); disabling trace output");
        }
        self.disabled = true;
        self.buffer.clear();
    }
}

impl Drop for ChromeTraceWriter {
    fn drop(&mut self) {
        self.flush_records();
        if self.disabled {
            return;
        }
        self.scratch.clear();
        let _ = write!(
            self.scratch,
            "{{\"ph\":\"M\",\"pid\":{},\"name\":\"{TRACE_SHUTDOWN_NAME}\"}}\n]\n",
            self.pid
        );
        let _ = self.sink.write_all(self.scratch.as_bytes());
        let _ = self.sink.flush();
    }
}

/// Format one record as a single `…,\n`-terminated line.
///
/// Writing to a `String` cannot fail, so the `fmt` results are discarded.
fn format_record(out: &mut String, pid: u32, record: &TraceRecord) {
    match record {
        TraceRecord::Duration {
            name,
            tag,
            track,
            start_nanos,
            duration_nanos,
            link_id,
            color,
        } => {
            let _ = write!(out, "{{\"ph\":\"X\",\"pid\":{pid},\"tid\":{track},\"name\":\"");
            push_json_escaped(out, name);
            if let Some(tag) = tag {
                out.push_str("( ");
                push_json_escaped(out, tag);
                out.push_str(" )");
            }
            out.push('"');
            if let Some(color) = color {
                let _ = write!(out, ",\"cname\":\"{color}\"");
            }
            let _ = write!(
                out,
                ",\"ts\":{:.3},\"dur\":{:.3}",
                micros(*start_nanos),
                micros(*duration_nanos as i64)
            );
            if let Some(id) = link_id {
                let _ = write!(out, ",\"args\":{{\"id\":{id}}}");
            }
            out.push_str("},\n");
        }
        TraceRecord::FlowStart {
            track,
            time_nanos,
            link_id,
        } => {
            let _ = write!(
                out,
                "{{\"ph\":\"s\",\"pid\":{pid},\"tid\":{track},\"name\":\"Command\",\
                 \"cat\":\"Commands\",\"ts\":{:.3},\"id\":{link_id}}},\n",
                micros(*time_nanos)
            );
        }
        TraceRecord::FlowFinish {
            track,
            time_nanos,
            link_id,
        } => {
            let _ = write!(
                out,
                "{{\"ph\":\"f\",\"pid\":{pid},\"tid\":{track},\"name\":\"Command\",\
                 \"cat\":\"Commands\",\"ts\":{:.3},\"id\":{link_id}}},\n",
                micros(*time_nanos)
            );
        }
        TraceRecord::Metadata { name, track, args } => {
            let _ = write!(
                out,
                "{{\"ph\":\"M\",\"pid\":{pid},\"tid\":{track},\"name\":\"{name}\""
            );
            match args {
                MetadataArgs::Name(value) => {
                    out.push_str(",\"args\":{\"name\":\"");
                    push_json_escaped(out, value);
                    out.push_str("\"}");
                }
                MetadataArgs::SortIndex(index) => {
                    let _ = write!(out, ",\"args\":{{\"sort_index\":\"{index}\"}}");
                }
                MetadataArgs::StartTime(nanos) => {
                    let _ = write!(out, ",\"args\":{{\"start_time\":{nanos}}}");
                }
            }
            out.push_str("},\n");
        }
    }
}

fn micros(nanos: i64) -> f64 {
    nanos as f64 / 1000.0
}

/// Append `text` as JSON string content. Names come from the instrumented
/// application's API surface and can contain quotes, backslashes, or control
/// characters; escaping them keeps every record line parseable.
fn push_json_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
}
