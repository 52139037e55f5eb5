//!
//! Backup import coordinator
//! -------------------------
//! Validates an uploaded backup, takes the import lock, wipes the eight
//! application collections and restores them from the payload.
//!
//! Guarantees and non-guarantees:
//! - Validation happens before any mutation; a rejected payload touches
//!   nothing but the audit trail.
//! - A dry run never takes the lock and never writes outside the audit trail.
//! - Wipe and restore are sequential and not atomic across collections. A
//!   failure part way leaves a mix of old and new data; re-running the same
//!   import converges because every collection is fully cleared first and
//!   restore writes by `id`.
//! - The lock is released on every path that did not get a denial. Release
//!   and audit failures are logged and never change the outcome.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{split_record, validate, Collection, ImportSummary, ValidatedBackup, ValidationError, PLAYLIST_SONGS};
use crate::audit::{AuditEvent, AuditLog};
use crate::clock::SharedClock;
use crate::lock::{ImportLock, LockState, ReleaseOutcome, DEFAULT_LOCK_TTL};
use crate::storage::{subcollection, wipe_collection, SetMode, SharedStore, StoreError, SCAN_PAGE_SIZE};

/// The authenticated administrator driving an import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requestor {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub lock_ttl: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self { Self { lock_ttl: DEFAULT_LOCK_TTL } }
}

/// What a restore actually wrote, per collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub wiped: BTreeMap<String, usize>,
    pub restored: BTreeMap<String, usize>,
    pub playlist_songs: usize,
    /// Records dropped for lacking an `id`.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    DryRun { import_id: String, summary: ImportSummary },
    Imported { import_id: String, imported_at: i64, summary: ImportSummary, report: RestoreReport },
    LockDenied { import_id: String, summary: ImportSummary, lock: LockState },
}

#[derive(Debug, Clone, Error)]
pub enum ImportError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unauthorized")]
    Unauthorized { import_id: String },
    #[error("forbidden")]
    Forbidden { import_id: String },
    #[error("import {import_id} failed: {reason}")]
    Failed { import_id: String, reason: String },
}

impl ImportError {
    fn classify(import_id: &str, err: &StoreError) -> Self {
        match err {
            StoreError::Unauthenticated(_) => ImportError::Unauthorized { import_id: import_id.to_string() },
            StoreError::PermissionDenied(_) => ImportError::Forbidden { import_id: import_id.to_string() },
            other => ImportError::Failed { import_id: import_id.to_string(), reason: other.to_string() },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ImportError::Validation(v) => v.code(),
            ImportError::Unauthorized { .. } => "UNAUTHORIZED",
            ImportError::Forbidden { .. } => "FORBIDDEN",
            ImportError::Failed { .. } => "IMPORT_FAIL",
        }
    }
}

enum Locked {
    Denied(LockState),
    Done(RestoreReport),
}

/// Where a locked import stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Lock,
    Wipe,
    Restore,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Lock => "lock",
            Stage::Wipe => "wipe",
            Stage::Restore => "restore",
        }
    }
}

pub fn new_import_id() -> String { uuid::Uuid::new_v4().to_string() }

#[derive(Clone)]
pub struct ImportCoordinator {
    store: SharedStore,
    lock: ImportLock,
    audit: AuditLog,
    clock: SharedClock,
    options: ImportOptions,
}

impl ImportCoordinator {
    pub fn new(store: SharedStore, clock: SharedClock, options: ImportOptions) -> Self {
        Self {
            lock: ImportLock::new(store.clone(), clock.clone()),
            audit: AuditLog::new(store.clone(), clock.clone()),
            store,
            clock,
            options,
        }
    }

    pub fn lock(&self) -> &ImportLock { &self.lock }
    pub fn audit_log(&self) -> &AuditLog { &self.audit }
    pub fn options(&self) -> ImportOptions { self.options }

    pub fn import(&self, payload: &Value, requestor: &Requestor, dry_run: bool) -> Result<ImportOutcome, ImportError> {
        let backup = match validate(payload) {
            Ok(b) => b,
            Err(v) => {
                let import_id = new_import_id();
                warn!(target: "import", requestor = %requestor.id, import_id = %import_id, code = v.code(), "rejected backup payload: {}", v);
                self.audit(AuditEvent::ImportFail, &import_id, requestor, json!({
                    "stage": "validation",
                    "code": v.code(),
                    "reason": v.to_string(),
                }));
                return Err(v.into());
            }
        };
        let summary = backup.summary();

        if dry_run {
            let import_id = new_import_id();
            info!(target: "import", requestor = %requestor.id, import_id = %import_id, total = summary.total(), "dry run");
            self.audit(AuditEvent::DryRun, &import_id, requestor, json!({ "summary": summary }));
            return Ok(ImportOutcome::DryRun { import_id, summary });
        }

        let import_id = new_import_id();
        let result = self.run_locked(&backup, &summary, &import_id, requestor);
        let outcome = match result {
            Ok(Locked::Done(report)) => {
                let imported_at = self.clock.now_ms();
                info!(target: "import", requestor = %requestor.id, import_id = %import_id, skipped = report.skipped, "import completed");
                self.audit(AuditEvent::ImportSuccess, &import_id, requestor, json!({
                    "summary": summary,
                    "report": report,
                    "completedAt": imported_at,
                }));
                Ok(ImportOutcome::Imported { import_id: import_id.clone(), imported_at, summary, report })
            }
            Ok(Locked::Denied(lock)) => {
                // The lock belongs to someone else, so there is nothing to release.
                self.audit(AuditEvent::LockDenied, &import_id, requestor, json!({
                    "summary": summary,
                    "lock": lock,
                }));
                return Ok(ImportOutcome::LockDenied { import_id, summary, lock });
            }
            Err((stage, e)) => {
                error!(target: "import", requestor = %requestor.id, import_id = %import_id, stage = stage.as_str(), "import failed: {}", e);
                let err = ImportError::classify(&import_id, &e);
                self.audit(AuditEvent::ImportFail, &import_id, requestor, json!({
                    "stage": stage.as_str(),
                    "code": err.code(),
                    "reason": e.to_string(),
                    "summary": summary,
                }));
                Err(err)
            }
        };
        self.release_quietly(requestor, &import_id);
        outcome
    }

    /// Steps that run under the lock.
    fn run_locked(&self, backup: &ValidatedBackup<'_>, summary: &ImportSummary, import_id: &str, requestor: &Requestor) -> Result<Locked, (Stage, StoreError)> {
        let acquired = self.lock.acquire(&requestor.id, import_id, self.options.lock_ttl).map_err(|e| (Stage::Lock, e))?;
        if !acquired.granted {
            warn!(target: "import", requestor = %requestor.id, import_id, holder = ?acquired.state.owner_id, "import already in progress");
            return Ok(Locked::Denied(acquired.state));
        }
        self.audit(AuditEvent::ImportStart, import_id, requestor, json!({ "summary": summary }));

        let mut report = RestoreReport::default();
        for c in Collection::WIPE_ORDER {
            let wiped = if c == Collection::Playlists { self.wipe_playlists() } else { wipe_collection(self.store.as_ref(), c.name()) };
            let n = wiped.map_err(|e| (Stage::Wipe, e))?;
            debug!(target: "import", import_id, collection = c.name(), removed = n, "wiped");
            report.wiped.insert(c.name().to_string(), n);
        }

        let restored_at = self.clock.now_ms();
        for c in Collection::RESTORE_ORDER {
            let n = self.restore_collection(c, backup.records(c), restored_at, &mut report).map_err(|e| (Stage::Restore, e))?;
            debug!(target: "import", import_id, collection = c.name(), written = n, "restored");
            report.restored.insert(c.name().to_string(), n);
        }
        Ok(Locked::Done(report))
    }

    /// Playlists carry a subordinate `songs` collection that goes with them.
    fn wipe_playlists(&self) -> Result<usize, StoreError> {
        let name = Collection::Playlists.name();
        let mut removed = 0usize;
        loop {
            let page = self.store.list_page(name, None, SCAN_PAGE_SIZE)?;
            if page.is_empty() { break; }
            for (id, _) in page.iter() {
                wipe_collection(self.store.as_ref(), &subcollection(name, id, PLAYLIST_SONGS))?;
                self.store.delete(name, id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn restore_collection(&self, c: Collection, records: &[Value], restored_at: i64, report: &mut RestoreReport) -> Result<usize, StoreError> {
        let mut written = 0usize;
        for record in records {
            let Some((id, mut fields)) = split_record(record) else {
                report.skipped += 1;
                debug!(target: "import", collection = c.name(), "skipping record without id");
                continue;
            };
            let nested = if c == Collection::Playlists { fields.remove(PLAYLIST_SONGS) } else { None };
            fields.insert("restoredAt".into(), json!(restored_at));
            self.store.set(c.name(), &id, fields, SetMode::Overwrite)?;
            written += 1;

            if let Some(Value::Array(songs)) = nested {
                let sub = subcollection(c.name(), &id, PLAYLIST_SONGS);
                for song in songs.iter() {
                    let Some((song_id, mut song_fields)) = split_record(song) else {
                        report.skipped += 1;
                        continue;
                    };
                    song_fields.insert("restoredAt".into(), json!(restored_at));
                    self.store.set(&sub, &song_id, song_fields, SetMode::Overwrite)?;
                    report.playlist_songs += 1;
                }
            }
        }
        Ok(written)
    }

    fn audit(&self, event: AuditEvent, import_id: &str, requestor: &Requestor, details: Value) {
        if let Err(e) = self.audit.append(event, import_id, &requestor.id, requestor.email.as_deref(), details) {
            warn!(target: "audit", event = event.as_str(), import_id, "audit append failed: {}", e);
        }
    }

    fn release_quietly(&self, requestor: &Requestor, import_id: &str) {
        match self.lock.release(&requestor.id, import_id) {
            Ok(ReleaseOutcome::Released) => {}
            Ok(other) => debug!(target: "lock", import_id, outcome = ?other, "release was a no-op"),
            Err(e) => error!(target: "lock", import_id, "failed to release import lock: {}", e),
        }
    }
}
