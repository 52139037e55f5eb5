//! Import coordinator integration tests: lock exclusivity and expiry, dry-run
//! isolation, idempotent restore, malformed records and the version gate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use encore::audit::{AuditEvent, AUDIT_COLLECTION};
use encore::backup::{Collection, ImportCoordinator, ImportError, ImportOptions, ImportOutcome, Requestor, ValidationError};
use encore::clock::ManualClock;
use encore::lock::{ReleaseOutcome, LOCK_COLLECTION, LOCK_DOC_ID};
use encore::storage::{subcollection, Document, DocumentStore, MemoryStore, SetMode};

const T0: i64 = 1_700_000_000_000;

fn doc(v: Value) -> Document { v.as_object().cloned().unwrap() }

fn admin() -> Requestor { Requestor { id: "admin@encore.fm".into(), email: Some("admin@encore.fm".into()) } }

fn setup() -> (ImportCoordinator, MemoryStore, ManualClock) {
    let store = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let c = ImportCoordinator::new(Arc::new(store.clone()), Arc::new(clock.clone()), ImportOptions::default());
    (c, store, clock)
}

fn sample_backup() -> Value {
    json!({
        "version": "2.0",
        "exportedAt": "2024-05-01T12:00:00.000Z",
        "data": {
            "songs": [
                {"id": "s1", "title": "Opening Night", "plays": 12},
                {"id": "s2", "title": "Encore", "plays": 40}
            ],
            "playlists": [
                {"id": "p1", "name": "Tour 2024", "songs": [{"id": "s1", "order": 1}, {"id": "s2", "order": 2}]}
            ],
            "users": [{"id": "fan@encore.fm", "role": "fan", "totalPlays": 52}],
            "favorites": [{"id": "f1", "userId": "fan@encore.fm", "songId": "s2"}],
            "rewards": [],
            "activities": [{"id": "a1", "type": "play"}],
            "userPlaylists": [{"id": "up1", "name": "Mine"}],
            "userPlaylistSongs": [{"id": "ups1", "playlistId": "up1", "songId": "s1"}]
        }
    })
}

/// Every application collection plus playlist song subcollections.
fn app_snapshot(store: &MemoryStore) -> BTreeMap<String, BTreeMap<String, Document>> {
    store
        .collections()
        .into_iter()
        .filter(|c| c != AUDIT_COLLECTION && c != LOCK_COLLECTION)
        .map(|c| { let s = store.snapshot(&c); (c, s) })
        .collect()
}

fn audit_events(c: &ImportCoordinator, import_id: &str) -> Vec<AuditEvent> {
    let mut ev: Vec<AuditEvent> = c.audit_log().records_for(import_id).unwrap().into_iter().map(|r| r.event).collect();
    ev.sort_by_key(|e| e.as_str());
    ev
}

#[test]
fn concurrent_acquire_grants_exactly_one_holder() {
    let (c, _store, _clock) = setup();
    let lock = c.lock().clone();
    let granted: Vec<bool> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let lock = lock.clone();
                s.spawn(move || lock.acquire(&format!("admin-{}", i), &format!("imp-{}", i), Duration::from_secs(60)).unwrap().granted)
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(granted.iter().filter(|g| **g).count(), 1);
    assert!(lock.state().unwrap().locked);
}

#[test]
fn expired_lock_is_reclaimed_at_the_boundary() {
    let (c, _store, clock) = setup();
    let lock = c.lock();
    assert!(lock.acquire("a", "imp-a", Duration::from_secs(10)).unwrap().granted);

    clock.advance(9_999);
    let denied = lock.acquire("b", "imp-b", Duration::from_secs(10)).unwrap();
    assert!(!denied.granted);
    assert_eq!(denied.state.owner_id.as_deref(), Some("a"));

    clock.advance(1);
    let taken = lock.acquire("b", "imp-b", Duration::from_secs(10)).unwrap();
    assert!(taken.granted);
    assert_eq!(taken.state.expires_at, Some(T0 + 10_000 + 10_000));

    // The stale holder cannot release the reclaimed lock.
    assert_eq!(lock.release("a", "imp-a").unwrap(), ReleaseOutcome::NotOwner);
    assert!(lock.state().unwrap().locked);
}

#[test]
fn release_requires_owner_and_import_id() {
    let (c, _store, _clock) = setup();
    let lock = c.lock();
    lock.acquire("a", "imp-1", Duration::from_secs(60)).unwrap();
    assert_eq!(lock.release("a", "imp-2").unwrap(), ReleaseOutcome::NotOwner);
    assert_eq!(lock.release("b", "imp-1").unwrap(), ReleaseOutcome::NotOwner);
    assert_eq!(lock.release("a", "imp-1").unwrap(), ReleaseOutcome::Released);
    assert_eq!(lock.release("a", "imp-1").unwrap(), ReleaseOutcome::NotHeld);
}

#[test]
fn import_under_foreign_lock_is_denied_and_leaves_lock_alone() {
    let (c, store, _clock) = setup();
    store.set("songs", "old", doc(json!({"title": "Keep me"})), SetMode::Overwrite).unwrap();
    c.lock().acquire("other@encore.fm", "imp-other", Duration::from_secs(600)).unwrap();

    let out = c.import(&sample_backup(), &admin(), false).unwrap();
    let ImportOutcome::LockDenied { import_id, lock, summary } = out else { panic!("expected lock denial") };
    assert_eq!(lock.owner_id.as_deref(), Some("other@encore.fm"));
    assert_eq!(summary.songs, 2);
    assert_eq!(audit_events(&c, &import_id), vec![AuditEvent::LockDenied]);

    assert!(store.get("songs", "old").unwrap().is_some());
    let held = c.lock().state().unwrap();
    assert!(held.locked);
    assert_eq!(held.import_id.as_deref(), Some("imp-other"));
}

#[test]
fn dry_run_writes_nothing_but_the_audit_record() {
    let (c, store, _clock) = setup();
    store.set("songs", "old", doc(json!({"title": "Keep me"})), SetMode::Overwrite).unwrap();
    let before = app_snapshot(&store);

    let out = c.import(&sample_backup(), &admin(), true).unwrap();
    let ImportOutcome::DryRun { import_id, summary } = out else { panic!("expected dry run") };
    assert_eq!(summary.songs, 2);
    assert_eq!(summary.user_playlist_songs, 1);
    assert_eq!(summary.total(), 8);

    assert_eq!(app_snapshot(&store), before);
    assert!(store.get(LOCK_COLLECTION, LOCK_DOC_ID).unwrap().is_none());
    assert_eq!(audit_events(&c, &import_id), vec![AuditEvent::DryRun]);
}

#[test]
fn import_replaces_existing_data_and_audits_start_and_success() {
    let (c, store, _clock) = setup();
    store.set("songs", "stale", doc(json!({"title": "Gone"})), SetMode::Overwrite).unwrap();
    store.set("rewards", "r9", doc(json!({"points": 5})), SetMode::Overwrite).unwrap();
    store.set("playlists", "old", doc(json!({"name": "Old"})), SetMode::Overwrite).unwrap();
    store.set(&subcollection("playlists", "old", "songs"), "s9", doc(json!({"order": 1})), SetMode::Overwrite).unwrap();

    let out = c.import(&sample_backup(), &admin(), false).unwrap();
    let ImportOutcome::Imported { import_id, imported_at, report, .. } = out else { panic!("expected import") };
    assert_eq!(imported_at, T0);
    assert_eq!(report.wiped["songs"], 1);
    assert_eq!(report.restored["songs"], 2);
    assert_eq!(report.playlist_songs, 2);

    assert!(store.get("songs", "stale").unwrap().is_none());
    assert!(store.snapshot("rewards").is_empty());
    assert!(store.snapshot("playlists/old/songs").is_empty());

    let s1 = store.get("songs", "s1").unwrap().unwrap();
    assert_eq!(s1.get("title"), Some(&json!("Opening Night")));
    assert_eq!(s1.get("restoredAt"), Some(&json!(T0)));
    assert!(s1.get("id").is_none());

    let p1 = store.get("playlists", "p1").unwrap().unwrap();
    assert!(p1.get("songs").is_none());
    assert_eq!(store.snapshot("playlists/p1/songs").len(), 2);

    assert_eq!(audit_events(&c, &import_id), vec![AuditEvent::ImportStart, AuditEvent::ImportSuccess]);
    assert!(!c.lock().state().unwrap().locked);
}

#[test]
fn importing_the_same_backup_twice_converges() {
    let (c, store, _clock) = setup();
    c.import(&sample_backup(), &admin(), false).unwrap();
    let first = app_snapshot(&store);
    c.import(&sample_backup(), &admin(), false).unwrap();
    assert_eq!(app_snapshot(&store), first);
}

#[test]
fn records_without_id_are_skipped() {
    let (c, store, _clock) = setup();
    let payload = json!({
        "version": "2.0",
        "data": {
            "songs": [{"title": "no id"}, {"id": "", "title": "empty id"}, {"id": "ok", "title": "fine"}, {"id": 7, "title": "numeric"}],
            "playlists": [{"id": "p1", "songs": [{"order": 1}, {"id": "s1"}]}]
        }
    });
    let out = c.import(&payload, &admin(), false).unwrap();
    let ImportOutcome::Imported { report, summary, .. } = out else { panic!("expected import") };
    assert_eq!(summary.songs, 4);
    assert_eq!(report.restored["songs"], 2);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.playlist_songs, 1);
    assert!(store.get("songs", "ok").unwrap().is_some());
    assert!(store.get("songs", "7").unwrap().is_some());
    assert_eq!(store.snapshot("songs").len(), 2);
}

#[test]
fn version_gate_rejects_without_touching_data() {
    let (c, store, _clock) = setup();
    store.set("songs", "old", doc(json!({"title": "Keep me"})), SetMode::Overwrite).unwrap();
    let before = app_snapshot(&store);

    for payload in [
        json!({"version": "1.0", "data": {}}),
        json!({"version": 2.0, "data": {}}),
        json!({"data": {"songs": []}}),
    ] {
        let err = c.import(&payload, &admin(), false).unwrap_err();
        assert!(matches!(err, ImportError::Validation(ValidationError::UnsupportedVersion { .. })), "{:?}", err);
        assert_eq!(err.code(), "UNSUPPORTED_VERSION");
    }
    let err = c.import(&json!({"version": "2.0", "data": []}), &admin(), false).unwrap_err();
    assert_eq!(err.code(), "INVALID_STRUCTURE");
    let err = c.import(&json!(["not", "an", "object"]), &admin(), true).unwrap_err();
    assert_eq!(err.code(), "INVALID_PAYLOAD");

    assert_eq!(app_snapshot(&store), before);
    assert!(store.get(LOCK_COLLECTION, LOCK_DOC_ID).unwrap().is_none());
    let fails = store
        .snapshot(AUDIT_COLLECTION)
        .values()
        .filter(|d| d.get("event") == Some(&json!("IMPORT_FAIL")))
        .count();
    assert_eq!(fails, 5);
}

#[test]
fn restore_order_lists_songs_first_and_wipe_order_users_last() {
    assert_eq!(Collection::RESTORE_ORDER[0], Collection::Songs);
    assert_eq!(Collection::WIPE_ORDER[7], Collection::Users);
}
