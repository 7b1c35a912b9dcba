//! Validates that emitted trace files are well-formed Chrome Trace Event
//! array files, line by line and as a whole.

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Instant;

use assert2::check;
use devtrace::{DeviceKey, TelemetryEngine, TraceConfig};
use serde_json::Value;

use common::{timestamps, SimBackend};

fn emit_sample_trace(path: &std::path::Path, buffer_size: usize) {
    let epoch = Instant::now();
    let backend = SimBackend::new(epoch);
    let device = DeviceKey::from_u64(1);
    backend.set_clock(device, 0, 1.0);

    let config = TraceConfig {
        output_path: path.to_path_buf(),
        buffer_size,
        stage_expansion: true,
        flow_events: true,
        ..TraceConfig::default()
    };
    let engine = TelemetryEngine::with_epoch(config, Arc::new(backend.clone()), epoch).unwrap();
    let queue = engine.register_queue(device, "Compute Queue");

    for i in 0..10u64 {
        let (op_id, handle) = backend.submit();
        let start = engine.now_nanos();
        let sequence = engine.operation_submitted("opA", device, queue, None, false, handle);
        engine.host_call_logged("enqueue", None, Some(sequence), start, start + 1_000);
        let base = i * 1_000;
        backend.complete(op_id, timestamps(base, base + 100, base + 200, base + 700));
        engine.after_blocking_wait();
    }
    // Engine drop flushes and closes the array.
}

/// Parse every record line individually: strip the trailing comma, require
/// valid JSON with a `ph` and `pid`.
fn parse_lines(text: &str) -> Vec<Value> {
    let lines: Vec<&str> = text.lines().collect();
    check!(lines.first() == Some(&"["));
    check!(lines.last() == Some(&"]"));

    let records = &lines[1..lines.len() - 1];
    let (last, rest) = records.split_last().unwrap();
    check!(!last.ends_with(','));

    let mut parsed = Vec::new();
    for line in rest {
        check!(line.ends_with(','), "record line missing separator: {line}");
        let value: Value = serde_json::from_str(&line[..line.len() - 1]).unwrap();
        parsed.push(value);
    }
    parsed.push(serde_json::from_str(last).unwrap());

    for record in &parsed {
        check!(record.get("ph").is_some());
        check!(record.get("pid").is_some());
    }
    parsed
}

#[test]
fn test_whole_file_is_valid_json_array() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("trace.json");
    emit_sample_trace(&path, 1024);

    let text = fs::read_to_string(&path).unwrap();
    let value: Value = serde_json::from_str(&text).unwrap();
    check!(value.is_array());
    check!(!value.as_array().unwrap().is_empty());
}

#[test]
fn test_every_line_is_one_record() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("trace.json");
    emit_sample_trace(&path, 0);

    let text = fs::read_to_string(&path).unwrap();
    let records = parse_lines(&text);

    // 10 ops * 3 stages + flow starts/finishes + host calls + metadata.
    check!(records.len() > 50);

    let last = records.last().unwrap();
    check!(last["ph"] == "M");
    check!(last["name"] == "trace_shutdown");

    let phases: Vec<&str> = records.iter().filter_map(|r| r["ph"].as_str()).collect();
    check!(phases.contains(&"X"));
    check!(phases.contains(&"s"));
    check!(phases.contains(&"f"));
    check!(phases.contains(&"M"));
}

#[test]
fn test_timestamps_are_micros_with_three_decimals() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("trace.json");
    emit_sample_trace(&path, 0);

    let text = fs::read_to_string(&path).unwrap();
    // Device-side records have deterministic tick-derived times.
    check!(text.contains("\"ts\":0.200,\"dur\":0.500"));
    for line in text.lines().filter(|l| l.contains("\"ts\":")) {
        let after = &line[line.find("\"ts\":").unwrap() + 5..];
        let number: String = after
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        let decimals = number.split('.').nth(1).unwrap_or("");
        check!(decimals.len() == 3, "ts not micros.3f: {line}");
    }
}

#[test]
fn test_queue_and_thread_metadata_present() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("trace.json");
    emit_sample_trace(&path, 0);

    let text = fs::read_to_string(&path).unwrap();
    check!(text.contains("\"name\":\"process_name\""));
    check!(text.contains("\"name\":\"trace_start_time\""));
    check!(text.contains("\"tid\":0.1,\"name\":\"thread_name\",\"args\":{\"name\":\"Compute Queue\"}"));
    check!(text.contains("\"name\":\"thread_sort_index\""));
}
