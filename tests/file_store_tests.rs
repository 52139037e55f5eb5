//! End-to-end import and export against the on-disk store.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tempfile::tempdir;

use encore::backup::{export_backup, BackupExport, ImportCoordinator, ImportOptions, ImportOutcome, Requestor};
use encore::clock::ManualClock;
use encore::storage::{scan_all, DocumentStore, FileStore, SharedStore};

#[test]
fn import_survives_reopening_the_store() -> Result<()> {
    let tmp = tempdir()?;
    let payload = json!({
        "version": "2.0",
        "data": {
            "songs": [{"id": "s/1", "title": "Slash id"}, {"id": "s2", "title": "Plain"}],
            "playlists": [{"id": "p1", "name": "Encore set", "songs": [{"id": "s2", "order": 1}]}],
            "users": [{"id": "Fan@Encore.fm", "totalPlays": 9}]
        }
    });
    let requestor = Requestor { id: "admin@encore.fm".into(), email: Some("admin@encore.fm".into()) };

    {
        let store: SharedStore = Arc::new(FileStore::new(tmp.path())?);
        let c = ImportCoordinator::new(store, Arc::new(ManualClock::new(5_000)), ImportOptions::default());
        let out = c.import(&payload, &requestor, false).map_err(|e| anyhow::anyhow!(e))?;
        assert!(matches!(out, ImportOutcome::Imported { .. }));
    }

    let store = FileStore::new(tmp.path())?;
    let songs = scan_all(&store, "songs")?;
    assert_eq!(songs.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(), vec!["s/1", "s2"]);
    assert_eq!(store.get("users", "Fan@Encore.fm")?.map(|d| d["totalPlays"].clone()), Some(json!(9)));

    let backup = export_backup(&store, &BackupExport { environment: "staging".into(), exported_at_ms: 6_000 })?;
    assert_eq!(backup.data["playlists"][0]["songs"], json!([{"id": "s2", "order": 1, "restoredAt": 5_000}]));
    assert_eq!(backup.data["playlists"][0]["restoredAt"], json!(5_000));
    Ok(())
}

#[test]
fn lock_is_shared_by_clones_of_one_file_store() -> Result<()> {
    let tmp = tempdir()?;
    let store = FileStore::new(tmp.path())?;
    let clock = ManualClock::new(0);
    let a = ImportCoordinator::new(Arc::new(store.clone()), Arc::new(clock.clone()), ImportOptions::default());
    let b = ImportCoordinator::new(Arc::new(store), Arc::new(clock), ImportOptions::default());
    assert!(a.lock().acquire("a", "imp-a", std::time::Duration::from_secs(30))?.granted);
    let denied = b.lock().acquire("b", "imp-b", std::time::Duration::from_secs(30))?;
    assert!(!denied.granted);
    assert_eq!(denied.state.import_id.as_deref(), Some("imp-a"));
    Ok(())
}
