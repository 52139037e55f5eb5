//! Append-only audit trail for admin backup operations.
//!
//! Appends return a `Result`; the caller decides how to log a failure. An
//! audit failure never aborts the operation being audited.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::SharedClock;
use crate::storage::{Document, SharedStore, StoreError};

/// Collection holding audit records.
pub const AUDIT_COLLECTION: &str = "adminAuditLogs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    DryRun,
    ImportStart,
    ImportSuccess,
    ImportFail,
    LockDenied,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::DryRun => "DRY_RUN",
            AuditEvent::ImportStart => "IMPORT_START",
            AuditEvent::ImportSuccess => "IMPORT_SUCCESS",
            AuditEvent::ImportFail => "IMPORT_FAIL",
            AuditEvent::LockDenied => "LOCK_DENIED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub event: AuditEvent,
    pub action: String,
    pub import_id: String,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_email: Option<String>,
    pub at: i64,
    /// Event-specific payload: summary, reason, conflicting lock, ...
    #[serde(default)]
    pub details: Value,
}

#[derive(Clone)]
pub struct AuditLog {
    store: SharedStore,
    clock: SharedClock,
}

impl AuditLog {
    pub fn new(store: SharedStore, clock: SharedClock) -> Self { Self { store, clock } }

    /// Append one record, stamping `at` from the clock. Returns the new record id.
    pub fn append(&self, event: AuditEvent, import_id: &str, actor_id: &str, actor_email: Option<&str>, details: Value) -> Result<String, StoreError> {
        let record = AuditRecord {
            event,
            action: "ADMIN_IMPORT".to_string(),
            import_id: import_id.to_string(),
            actor_id: actor_id.to_string(),
            actor_email: actor_email.map(|s| s.to_string()),
            at: self.clock.now_ms(),
            details,
        };
        let doc: Document = match serde_json::to_value(&record)? {
            Value::Object(m) => m,
            _ => Document::new(),
        };
        self.store.add(AUDIT_COLLECTION, doc)
    }

    /// All records for one import attempt, oldest first.
    pub fn records_for(&self, import_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        let mut out: Vec<AuditRecord> = Vec::new();
        for (_, doc) in crate::storage::scan_all(self.store.as_ref(), AUDIT_COLLECTION)? {
            let rec: AuditRecord = serde_json::from_value(Value::Object(doc))?;
            if rec.import_id == import_id { out.push(rec); }
        }
        out.sort_by_key(|r| r.at);
        Ok(out)
    }
}
