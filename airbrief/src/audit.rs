use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

/// Outcome categories for audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Fetch,
    FlightLog,
    GuardrailPass,
    GuardrailFail,
    Reflection,
    SafeFail,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEventEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub ts: i64,
    pub payload: Value,
}

impl AuditEventEntry {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            ts: now_ms(),
            payload,
        }
    }
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    trace_id: &'a str,
    category: AuditCategory,
    ts: i64,
    context: &'a Value,
    events: &'a [AuditEventEntry],
}

/// Append-only JSONL sink. One serialized line per record, written whole
/// under a lock, so a reader never sees a partial record. Write failures are
/// logged and swallowed; auditing never fails the request.
#[derive(Debug)]
pub struct AuditSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl AuditSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                warn!("Failed to open audit log {:?}: {}", path, e);
                e
            })
            .ok();
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    pub fn next_trace_id(&self) -> String {
        format!("{}-{:04x}", now_ms(), rand::rng().random::<u16>())
    }

    /// Appends one record and returns its trace id.
    pub fn record(
        &self,
        category: AuditCategory,
        context: Value,
        events: Vec<AuditEventEntry>,
    ) -> String {
        let trace_id = self.next_trace_id();
        self.record_with_id(&trace_id, category, context, events);
        trace_id
    }

    pub fn record_with_id(
        &self,
        trace_id: &str,
        category: AuditCategory,
        context: Value,
        events: Vec<AuditEventEntry>,
    ) {
        let record = AuditRecord {
            trace_id,
            category,
            ts: now_ms(),
            context: &context,
            events: &events,
        };
        let mut line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit record {}: {}", trace_id, e);
                return;
            }
        };
        line.push('\n');
        let mut guard = self.file.lock().expect("audit sink lock poisoned");
        let Some(file) = guard.as_mut() else {
            warn!("Audit log {:?} unavailable, dropping record {}", self.path, trace_id);
            return;
        };
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|()| file.flush()) {
            error!("Failed to append audit record {}: {}", trace_id, e);
        }
    }
}

pub fn now_ms() -> i64 {
    jiff::Timestamp::now().as_millisecond()
}
