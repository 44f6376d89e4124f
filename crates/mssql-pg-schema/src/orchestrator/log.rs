//! Append-only execution log and its sinks.

use crate::error::{MigrateError, Result};
use crate::plan::UnitKind;
use crate::resolver::MappingAuditRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// What happened to a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    Started,
    BatchCommitted,
    Retrying,
    Committed,
    Failed,
    Skipped,
}

/// Immutable record of one unit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Position in the log, starting at zero.
    pub sequence: u64,
    pub unit_id: String,
    pub unit_kind: UnitKind,
    pub object: String,
    pub outcome: LogOutcome,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    /// Batch index for data events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<u64>,
    /// Rows written by a committed batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionLogEntry {
    /// Entry with the sequence left at zero; [`ExecutionLog::append`] assigns it.
    pub fn new(unit_id: &str, unit_kind: UnitKind, object: &str, outcome: LogOutcome) -> Self {
        Self {
            sequence: 0,
            unit_id: unit_id.to_string(),
            unit_kind,
            object: object.to_string(),
            outcome,
            timestamp: Utc::now(),
            error: None,
            retry_count: 0,
            batch: None,
            rows: None,
            duration_ms: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_batch(mut self, batch: u64, rows: u64, duration_ms: u64) -> Self {
        self.batch = Some(batch);
        self.rows = Some(rows);
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Consumer of log entries and mapping-audit records.
pub trait LogSink: Send + Sync {
    fn record(&self, entry: &ExecutionLogEntry);

    fn record_mapping(&self, records: &[MappingAuditRecord]);

    /// Called once when the run ends.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Emits every entry as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&self, entry: &ExecutionLogEntry) {
        match entry.outcome {
            LogOutcome::Failed => error!(
                unit = %entry.unit_id,
                retries = entry.retry_count,
                "{}: failed - {}",
                entry.unit_id,
                entry.error.as_deref().unwrap_or("unknown error")
            ),
            LogOutcome::Retrying => warn!(
                unit = %entry.unit_id,
                retries = entry.retry_count,
                "{}: transient failure, retrying - {}",
                entry.unit_id,
                entry.error.as_deref().unwrap_or("unknown error")
            ),
            LogOutcome::Skipped => warn!(
                unit = %entry.unit_id,
                "{}: skipped - {}",
                entry.unit_id,
                entry.error.as_deref().unwrap_or("not run")
            ),
            LogOutcome::Committed => info!(unit = %entry.unit_id, "{}: committed", entry.unit_id),
            LogOutcome::BatchCommitted => tracing::debug!(
                unit = %entry.unit_id,
                batch = entry.batch.unwrap_or_default(),
                rows = entry.rows.unwrap_or_default(),
                duration_ms = entry.duration_ms.unwrap_or_default(),
                "{}: batch committed",
                entry.unit_id
            ),
            LogOutcome::Started => tracing::debug!(unit = %entry.unit_id, "{}: started", entry.unit_id),
        }
    }

    fn record_mapping(&self, records: &[MappingAuditRecord]) {
        for record in records {
            tracing::debug!(
                object = %record.object,
                item = %record.item,
                source_type = %record.source_type,
                "type mapping: {:?}",
                record.resolution
            );
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AuditRecord {
    Mapping(MappingAuditRecord),
    Execution(ExecutionLogEntry),
}

/// Collects the audit trail and writes it as a JSON array on flush.
#[derive(Debug)]
pub struct JsonFileSink {
    path: PathBuf,
    records: Mutex<Vec<AuditRecord>>,
}

impl JsonFileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            records: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, record: AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

impl LogSink for JsonFileSink {
    fn record(&self, entry: &ExecutionLogEntry) {
        self.push(AuditRecord::Execution(entry.clone()));
    }

    fn record_mapping(&self, records: &[MappingAuditRecord]) {
        for record in records {
            self.push(AuditRecord::Mapping(record.clone()));
        }
    }

    fn flush(&self) -> Result<()> {
        let records = self
            .records
            .lock()
            .map_err(|_| MigrateError::State("audit log lock poisoned".to_string()))?;
        let content = serde_json::to_string_pretty(&*records)?;
        std::fs::write(&self.path, content)?;
        info!("Wrote {} audit records to {}", records.len(), self.path.display());
        Ok(())
    }
}

/// The run's execution log. Appends are serialized; readers get a snapshot.
#[derive(Default)]
pub struct ExecutionLog {
    entries: Mutex<Vec<ExecutionLogEntry>>,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl ExecutionLog {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks,
        }
    }

    /// Append an entry, assigning its sequence number, and forward it to
    /// every sink.
    pub fn append(&self, mut entry: ExecutionLogEntry) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entry.sequence = entries.len() as u64;
        for sink in &self.sinks {
            sink.record(&entry);
        }
        entries.push(entry);
    }

    pub fn record_mapping(&self, records: &[MappingAuditRecord]) {
        for sink in &self.sinks {
            sink.record_mapping(records);
        }
    }

    pub fn entries(&self) -> Vec<ExecutionLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush every sink, returning the first error.
    pub fn flush(&self) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.flush() {
                warn!("Failed to flush log sink: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
