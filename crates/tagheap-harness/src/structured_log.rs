//! Structured logging contract for tagheap replay/stress workflows.
//!
//! Provides:
//! - [`LogEntry`]: canonical JSONL log record with required + optional fields.
//! - [`LogEmitter`]: writes JSONL lines to a file or an in-memory buffer.
//! - Conversions from allocator and tracker lifecycle records.
//! - [`validate_log_line`]: validates a single JSONL line against the schema.
//! - [`validate_log_file`]: validates an entire JSONL file.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use tagheap_core::{HeapLogLevel, HeapLogRecord};
use tagheap_tracker::TrackerLogRecord;

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<HeapLogLevel> for LogLevel {
    fn from(level: HeapLogLevel) -> Self {
        match level {
            HeapLogLevel::Trace => Self::Trace,
            HeapLogLevel::Debug => Self::Debug,
            HeapLogLevel::Info => Self::Info,
            HeapLogLevel::Warn => Self::Warn,
            HeapLogLevel::Error => Self::Error,
        }
    }
}

/// Harness step verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
}

/// Workflow that produced the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Unit,
    Replay,
    Stress,
}

/// Layer that produced the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Heap,
    Tracker,
    Harness,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<Component>,
    /// API symbol (`allocate`, `release`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<u64>,
    /// Replay/stress step index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    /// Tracker session number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Machine-readable outcome label from the emitting layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_id: None,
            stream: None,
            component: None,
            symbol: None,
            decision_id: None,
            step: None,
            session: None,
            addr: None,
            size: None,
            outcome: None,
            verdict: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: StreamKind) -> Self {
        self.stream = Some(stream);
        self
    }

    #[must_use]
    pub fn with_component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }

    /// Set the address and size an event concerns.
    #[must_use]
    pub fn with_block(mut self, addr: Option<usize>, size: Option<usize>) -> Self {
        self.addr = addr;
        self.size = size;
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    #[must_use]
    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    /// Set free-form details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&HeapLogRecord> for LogEntry {
    fn from(record: &HeapLogRecord) -> Self {
        let mut entry = LogEntry::new(&record.trace_id, record.level.into(), record.event)
            .with_component(Component::Heap)
            .with_symbol(record.symbol)
            .with_block(record.addr, record.size)
            .with_outcome(record.outcome)
            .with_details(serde_json::json!({
                "message": record.details,
                "region_bytes": record.region_bytes,
                "allocated_blocks": record.allocated_blocks,
                "allocated_bytes": record.allocated_bytes,
                "growths": record.growths,
            }));
        entry.decision_id = Some(record.decision_id);
        entry
    }
}

impl From<&TrackerLogRecord> for LogEntry {
    fn from(record: &TrackerLogRecord) -> Self {
        let mut entry = LogEntry::new(&record.trace_id, record.level.into(), record.event)
            .with_component(Component::Tracker)
            .with_block(record.addr, record.size)
            .with_details(serde_json::json!({
                "message": record.details,
                "ledger_len": record.ledger_len,
                "invalid_releases": record.invalid_releases,
            }));
        entry.decision_id = Some(record.decision_id);
        entry.session = Some(record.session);
        entry
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// Writes structured JSONL log entries.
pub struct LogEmitter<W = Box<dyn Write>> {
    writer: W,
    seq: u64,
    run_id: String,
    stream: StreamKind,
}

impl LogEmitter<Box<dyn Write>> {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str, stream: StreamKind) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(
            Box::new(std::io::BufWriter::new(file)),
            run_id,
            stream,
        ))
    }
}

impl LogEmitter<Vec<u8>> {
    /// Create an emitter that writes to a Vec<u8> buffer (for testing).
    #[must_use]
    pub fn to_buffer(run_id: &str, stream: StreamKind) -> Self {
        Self::new(Vec::new(), run_id, stream)
    }
}

impl<W: Write> LogEmitter<W> {
    pub fn new(writer: W, run_id: &str, stream: StreamKind) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.to_string(),
            stream,
        }
    }

    /// Generate the next trace ID.
    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("harness::{}::{:03}", self.run_id, self.seq)
    }

    fn write_line(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    /// Emit a harness entry with auto-generated trace_id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let trace_id = self.next_trace_id();
        let entry = LogEntry::new(&trace_id, level, event)
            .with_run(&self.run_id)
            .with_stream(self.stream)
            .with_component(Component::Harness);
        self.write_line(&entry)?;
        Ok(entry)
    }

    /// Emit a fully-populated log entry, filling in run, stream and trace_id
    /// when absent.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id.clone());
        }
        if entry.stream.is_none() {
            entry.stream = Some(self.stream);
        }
        self.write_line(&entry)
    }

    /// Emit allocator lifecycle records, tagged with the step that caused them.
    pub fn emit_heap_records(
        &mut self,
        records: &[HeapLogRecord],
        step: Option<usize>,
    ) -> std::io::Result<()> {
        for record in records {
            let mut entry = LogEntry::from(record);
            entry.step = step;
            self.emit_entry(entry)?;
        }
        Ok(())
    }

    /// Emit tracker session records, tagged with the step that caused them.
    pub fn emit_tracker_records(
        &mut self,
        records: &[TrackerLogRecord],
        step: Option<usize>,
    ) -> std::io::Result<()> {
        for record in records {
            let mut entry = LogEntry::from(record);
            entry.step = step;
            self.emit_entry(entry)?;
        }
        Ok(())
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

fn check_enum(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &str,
    allowed: &[&str],
    line_number: usize,
    errors: &mut Vec<LogValidationError>,
) {
    if let Some(value) = obj.get(field).and_then(|v| v.as_str())
        && !allowed.contains(&value)
    {
        errors.push(LogValidationError {
            line_number,
            field: field.to_string(),
            message: format!("invalid {field}: '{value}'"),
        });
    }
}

/// Validate a single JSONL line against the schema.
///
/// Returns the parsed entry if valid, or a list of validation errors.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            errors.push(LogValidationError {
                line_number,
                field: "<json>".to_string(),
                message: format!("invalid JSON: {e}"),
            });
            return Err(errors);
        }
    };

    let Some(obj) = value.as_object() else {
        errors.push(LogValidationError {
            line_number,
            field: "<root>".to_string(),
            message: "expected JSON object".to_string(),
        });
        return Err(errors);
    };

    // Required fields
    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(LogValidationError {
                line_number,
                field: field.to_string(),
                message: "required field missing".to_string(),
            });
        }
    }

    check_enum(
        obj,
        "level",
        &["trace", "debug", "info", "warn", "error"],
        line_number,
        &mut errors,
    );
    check_enum(
        obj,
        "verdict",
        &["pass", "fail", "error"],
        line_number,
        &mut errors,
    );
    check_enum(
        obj,
        "stream",
        &["unit", "replay", "stress"],
        line_number,
        &mut errors,
    );
    check_enum(
        obj,
        "component",
        &["heap", "tracker", "harness"],
        line_number,
        &mut errors,
    );

    // Heap and tracker records are correlated through decision ids.
    if matches!(
        obj.get("component").and_then(|v| v.as_str()),
        Some("heap" | "tracker")
    ) && !obj.get("decision_id").is_some_and(serde_json::Value::is_u64)
    {
        errors.push(LogValidationError {
            line_number,
            field: "decision_id".to_string(),
            message: "heap/tracker events must carry a numeric decision_id".to_string(),
        });
    }

    // trace_id format: <layer>::<...>::<seq>
    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && !trace_id.contains("::")
    {
        errors.push(LogValidationError {
            line_number,
            field: "trace_id".to_string(),
            message: format!("trace_id should contain '::' separators, got: '{trace_id}'"),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    match serde_json::from_value::<LogEntry>(value) {
        Ok(entry) => Ok(entry),
        Err(e) => {
            errors.push(LogValidationError {
                line_number,
                field: "<deserialization>".to_string(),
                message: format!("failed to deserialize: {e}"),
            });
            Err(errors)
        }
    }
}

/// Validate an entire JSONL file.
///
/// Returns the total line count and any validation errors found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    Ok(validate_log_text(&content))
}

/// Validate JSONL content already in memory.
#[must_use]
pub fn validate_log_text(content: &str) -> (usize, Vec<LogValidationError>) {
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    (line_count, all_errors)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_utc() -> String {
    // Simple format without a calendar dependency
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();
    // Approximate UTC formatting (good enough for structured logs)
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        1970 + secs / 31_557_600,            // approximate year
        (secs % 31_557_600) / 2_629_800 + 1, // approximate month
        (secs % 2_629_800) / 86400 + 1,      // approximate day
        (secs % 86400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        millis,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagheap_core::{HeapAllocator, HeapConfig};
    use tagheap_tracker::Tracker;

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new("harness::run-1::001", LogLevel::Info, "replay_start");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "harness::run-1::001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "replay_start");
        // Optional fields should be absent
        assert!(parsed.get("run_id").is_none());
        assert!(parsed.get("component").is_none());
        assert!(parsed.get("addr").is_none());
    }

    #[test]
    fn heap_records_convert_and_validate() {
        let mut heap = HeapAllocator::with_config(0x1000, HeapConfig::default());
        let a = heap.allocate(32).unwrap();
        heap.release(a).unwrap();
        let records = heap.drain_lifecycle_logs();

        let mut emitter = LogEmitter::to_buffer("run-7", StreamKind::Unit);
        emitter.emit_heap_records(&records, Some(0)).unwrap();
        let text = String::from_utf8(emitter.into_inner()).unwrap();

        let (lines, errors) = validate_log_text(&text);
        assert_eq!(lines, records.len());
        assert!(errors.is_empty(), "{errors:?}");
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["component"], "heap");
        assert_eq!(first["symbol"], "allocate");
        assert_eq!(first["run_id"], "run-7");
        assert_eq!(first["step"], 0);
        assert!(first["details"]["region_bytes"].is_u64());
    }

    #[test]
    fn tracker_records_carry_session() {
        let mut tracker = Tracker::new(0x2000);
        tracker.enable();
        let _ = tracker.release(0x2004);
        let records = tracker.drain_lifecycle_logs();
        let entry = LogEntry::from(&records[1]);
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.event, "invalid_release");
        assert_eq!(entry.session, Some(1));
        assert_eq!(entry.component, Some(Component::Tracker));
    }

    #[test]
    fn validate_missing_required_field() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","level":"info","event":"test"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert!(
            errors.iter().any(|e| e.field == "trace_id"),
            "Should report missing trace_id"
        );
    }

    #[test]
    fn validate_invalid_level() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","trace_id":"a::b::c","level":"fatal","event":"test"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "level"));
    }

    #[test]
    fn validate_invalid_json() {
        let errors = validate_log_line("not json at all", 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "<json>"));
    }

    #[test]
    fn validate_bad_trace_id_format() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","trace_id":"no-separator","level":"info","event":"test"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "trace_id"));
    }

    #[test]
    fn validate_heap_event_without_decision_id() {
        let json = r#"{"timestamp":"t","trace_id":"core::heap::x","level":"trace","event":"alloc","component":"heap"}"#;
        let errors = validate_log_line(json, 3).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "decision_id" && e.line_number == 3));
    }

    #[test]
    fn emitter_generates_sequential_trace_ids() {
        let mut emitter = LogEmitter::to_buffer("run-42", StreamKind::Stress);
        let e1 = emitter.emit(LogLevel::Info, "start").unwrap();
        let e2 = emitter.emit(LogLevel::Info, "end").unwrap();
        assert!(e1.trace_id.ends_with("::001"));
        assert!(e2.trace_id.ends_with("::002"));
        assert!(e1.trace_id.starts_with("harness::run-42::"));
        assert_eq!(e1.stream, Some(StreamKind::Stress));
    }

    #[test]
    fn roundtrip_deserialization() {
        let entry = LogEntry::new("harness::run-1::001", LogLevel::Warn, "step_failed")
            .with_step(4)
            .with_verdict(Verdict::Fail)
            .with_block(Some(0x1004), Some(16));
        let json = entry.to_jsonl().unwrap();
        let restored: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.trace_id, "harness::run-1::001");
        assert_eq!(restored.level, LogLevel::Warn);
        assert_eq!(restored.step, Some(4));
        assert_eq!(restored.verdict, Some(Verdict::Fail));
        assert_eq!(restored.addr, Some(0x1004));
    }
}
