//! Export of the eight application collections as a version 2.0 backup.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::info;

use super::{BackupDocument, Collection, BACKUP_VERSION, PLAYLIST_SONGS};
use crate::storage::{scan_all, subcollection, Document, DocumentStore, StoreError};

pub const EXPORT_ENGINE: &str = "encore";
pub const EXPORT_FILENAME: &str = "encore-backup.json";

/// Export metadata stamped into the backup header.
#[derive(Debug, Clone)]
pub struct BackupExport {
    pub environment: String,
    pub exported_at_ms: i64,
}

fn with_id(id: String, doc: Document) -> Value {
    let mut m = serde_json::Map::with_capacity(doc.len() + 1);
    m.insert("id".into(), Value::String(id));
    for (k, v) in doc { m.insert(k, v); }
    Value::Object(m)
}

/// Read every collection and assemble a backup; playlists embed their songs.
pub fn export_backup(store: &dyn DocumentStore, meta: &BackupExport) -> Result<BackupDocument, StoreError> {
    let mut data: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for c in Collection::ALL {
        let docs = scan_all(store, c.name())?;
        let mut out = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            let mut v = with_id(id.clone(), doc);
            if c == Collection::Playlists {
                let songs = scan_all(store, &subcollection(c.name(), &id, PLAYLIST_SONGS))?
                    .into_iter()
                    .map(|(sid, sdoc)| with_id(sid, sdoc))
                    .collect::<Vec<_>>();
                if let Value::Object(m) = &mut v { m.insert(PLAYLIST_SONGS.into(), Value::Array(songs)); }
            }
            out.push(v);
        }
        data.insert(c.name().to_string(), out);
    }
    let total: usize = data.values().map(|v| v.len()).sum();
    info!(target: "export", total, environment = %meta.environment, "backup exported");
    Ok(BackupDocument {
        version: BACKUP_VERSION.to_string(),
        engine: Some(EXPORT_ENGINE.to_string()),
        exported_at: Some(crate::clock::rfc3339(meta.exported_at_ms)),
        environment: Some(meta.environment.clone()),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, SetMode};
    use serde_json::json;

    fn doc(v: Value) -> Document { v.as_object().cloned().unwrap() }

    #[test]
    fn export_lists_every_collection_and_nests_playlist_songs() {
        let store = MemoryStore::new();
        store.set("songs", "s1", doc(json!({"title": "Intro"})), SetMode::Overwrite).unwrap();
        store.set("playlists", "p1", doc(json!({"name": "Live"})), SetMode::Overwrite).unwrap();
        store.set("playlists/p1/songs", "s1", doc(json!({"order": 1})), SetMode::Overwrite).unwrap();
        let meta = BackupExport { environment: "test".into(), exported_at_ms: 0 };
        let b = export_backup(&store, &meta).unwrap();
        assert_eq!(b.version, "2.0");
        assert_eq!(b.data.len(), 8);
        assert_eq!(b.data["songs"], vec![json!({"id": "s1", "title": "Intro"})]);
        assert_eq!(b.data["playlists"], vec![json!({"id": "p1", "name": "Live", "songs": [{"id": "s1", "order": 1}]})]);
        assert!(b.data["userPlaylistSongs"].is_empty());
        let v = serde_json::to_value(&b).unwrap();
        assert_eq!(v["exportedAt"], json!("1970-01-01T00:00:00.000Z"));
        assert_eq!(v["engine"], json!("encore"));
    }
}
