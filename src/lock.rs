//! Import lock: a single shared document that grants at most one live
//! destructive import at a time.
//!
//! The lock lives at a fixed path outside the backed-up collections. Both
//! acquire and release are single `DocumentStore::update` calls, so the read
//! and the conditional write cannot interleave with another acquire. A held
//! lock whose `expiresAt` has passed is treated as free; that expiry is the
//! only recovery path for an import that died without releasing.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::storage::{Document, SharedStore, StoreResult, Update};

pub const LOCK_COLLECTION: &str = "_system";
pub const LOCK_DOC_ID: &str = "importLock";

/// Default lifetime of a granted lock. Must exceed the import execution budget.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(12 * 60);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockState {
    pub locked: bool,
    pub owner_id: Option<String>,
    pub import_id: Option<String>,
    pub acquired_at: Option<i64>,
    pub expires_at: Option<i64>,
}

impl LockState {
    /// Lenient read of the stored document; unknown or mistyped fields read as absent.
    pub fn from_doc(doc: Option<&Document>) -> Self {
        let Some(d) = doc else { return Self::default(); };
        let s = |k: &str| d.get(k).and_then(|v| v.as_str()).map(|v| v.to_string());
        let n = |k: &str| d.get(k).and_then(|v| v.as_i64());
        Self {
            locked: d.get("locked").and_then(|v| v.as_bool()).unwrap_or(false),
            owner_id: s("ownerId"),
            import_id: s("importId"),
            acquired_at: n("acquiredAt"),
            expires_at: n("expiresAt"),
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.locked && self.expires_at.map(|e| e <= now_ms).unwrap_or(false)
    }

    /// Held and not yet expired.
    pub fn is_active(&self, now_ms: i64) -> bool { self.locked && !self.is_expired(now_ms) }

    fn held_by(&self, owner_id: &str, import_id: &str) -> bool {
        self.owner_id.as_deref() == Some(owner_id) && self.import_id.as_deref() == Some(import_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquireOutcome {
    pub granted: bool,
    /// State after the call: the new grant, or the untouched conflicting holder.
    pub state: LockState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// Someone else holds the lock now; nothing was changed.
    NotOwner,
    /// Lock document missing or already unlocked.
    NotHeld,
}

#[derive(Clone)]
pub struct ImportLock {
    store: SharedStore,
    clock: SharedClock,
}

impl ImportLock {
    pub fn new(store: SharedStore, clock: SharedClock) -> Self { Self { store, clock } }

    pub fn acquire(&self, owner_id: &str, import_id: &str, ttl: Duration) -> StoreResult<AcquireOutcome> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let mut outcome: Option<AcquireOutcome> = None;
        self.store.update(LOCK_COLLECTION, LOCK_DOC_ID, &mut |doc| {
            let now = self.clock.now_ms();
            let current = LockState::from_doc(doc);
            if current.is_active(now) {
                outcome = Some(AcquireOutcome { granted: false, state: current });
                return Update::Keep;
            }
            if current.is_expired(now) {
                debug!(target: "lock", stale_owner = ?current.owner_id, stale_import = ?current.import_id, "reclaiming expired import lock");
            }
            let next = LockState {
                locked: true,
                owner_id: Some(owner_id.to_string()),
                import_id: Some(import_id.to_string()),
                acquired_at: Some(now),
                expires_at: Some(now.saturating_add(ttl_ms)),
            };
            let patch = match serde_json::to_value(&next) { Ok(Value::Object(m)) => m, _ => Document::new() };
            outcome = Some(AcquireOutcome { granted: true, state: next });
            Update::Merge(patch)
        })?;
        let out = outcome.unwrap_or(AcquireOutcome { granted: false, state: LockState::default() });
        if out.granted {
            info!(target: "lock", owner = owner_id, import_id, expires_at = ?out.state.expires_at, "import lock acquired");
        } else {
            info!(target: "lock", owner = owner_id, import_id, holder = ?out.state.owner_id, holder_import = ?out.state.import_id, "import lock denied");
        }
        Ok(out)
    }

    /// Clear the lock only when `(owner_id, import_id)` still holds it.
    pub fn release(&self, owner_id: &str, import_id: &str) -> StoreResult<ReleaseOutcome> {
        let mut outcome = ReleaseOutcome::NotHeld;
        self.store.update(LOCK_COLLECTION, LOCK_DOC_ID, &mut |doc| {
            let current = LockState::from_doc(doc);
            if !current.locked {
                outcome = ReleaseOutcome::NotHeld;
                return Update::Keep;
            }
            if !current.held_by(owner_id, import_id) {
                outcome = ReleaseOutcome::NotOwner;
                return Update::Keep;
            }
            outcome = ReleaseOutcome::Released;
            let mut patch = Document::new();
            patch.insert("locked".into(), json!(false));
            patch.insert("releasedAt".into(), json!(self.clock.now_ms()));
            Update::Merge(patch)
        })?;
        debug!(target: "lock", owner = owner_id, import_id, outcome = ?outcome, "import lock release");
        Ok(outcome)
    }

    pub fn state(&self) -> StoreResult<LockState> {
        Ok(LockState::from_doc(self.store.get(LOCK_COLLECTION, LOCK_DOC_ID)?.as_ref()))
    }

    pub fn now_ms(&self) -> i64 { self.clock.now_ms() }
}
