//! Backup document model shared by export and import.
//!
//! A backup is `{ version, data: { <collection>: [records...] } }` over the
//! eight application collections. Records carry their document key in `id`;
//! playlist records additionally embed their subordinate `songs`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod export;
pub mod import;

pub use export::{export_backup, BackupExport};
pub use import::{ImportCoordinator, ImportError, ImportOptions, ImportOutcome, Requestor};

/// The only backup format version accepted by import and produced by export.
pub const BACKUP_VERSION: &str = "2.0";

/// Subordinate collection name under each playlist document.
pub const PLAYLIST_SONGS: &str = "songs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Songs,
    Playlists,
    Users,
    Favorites,
    Rewards,
    Activities,
    UserPlaylists,
    UserPlaylistSongs,
}

impl Collection {
    /// Canonical listing order, as it appears in a backup's `data`.
    pub const ALL: [Collection; 8] = [
        Collection::Songs,
        Collection::Playlists,
        Collection::Users,
        Collection::Favorites,
        Collection::Rewards,
        Collection::Activities,
        Collection::UserPlaylists,
        Collection::UserPlaylistSongs,
    ];

    /// Dependents first, base entities last.
    pub const WIPE_ORDER: [Collection; 8] = [
        Collection::Favorites,
        Collection::Rewards,
        Collection::Activities,
        Collection::UserPlaylistSongs,
        Collection::UserPlaylists,
        Collection::Playlists,
        Collection::Songs,
        Collection::Users,
    ];

    /// Songs before playlists; everything else follows the canonical order.
    pub const RESTORE_ORDER: [Collection; 8] = Collection::ALL;

    /// Store collection name; also the key under `data` in a backup.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Songs => "songs",
            Collection::Playlists => "playlists",
            Collection::Users => "users",
            Collection::Favorites => "favorites",
            Collection::Rewards => "rewards",
            Collection::Activities => "activities",
            Collection::UserPlaylists => "userPlaylists",
            Collection::UserPlaylistSongs => "userPlaylistSongs",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Collection::ALL.into_iter().find(|c| c.name() == s)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}

/// Per-collection entry counts of a backup payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub songs: usize,
    pub playlists: usize,
    pub users: usize,
    pub favorites: usize,
    pub rewards: usize,
    pub activities: usize,
    pub user_playlists: usize,
    pub user_playlist_songs: usize,
}

impl ImportSummary {
    /// Count entries per collection; a missing or non-array field counts as 0.
    pub fn from_data(data: &Map<String, Value>) -> Self {
        let count = |c: Collection| data.get(c.name()).and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);
        let mut s = Self::default();
        for c in Collection::ALL { *s.slot_mut(c) = count(c); }
        s
    }

    pub fn get(&self, c: Collection) -> usize {
        match c {
            Collection::Songs => self.songs,
            Collection::Playlists => self.playlists,
            Collection::Users => self.users,
            Collection::Favorites => self.favorites,
            Collection::Rewards => self.rewards,
            Collection::Activities => self.activities,
            Collection::UserPlaylists => self.user_playlists,
            Collection::UserPlaylistSongs => self.user_playlist_songs,
        }
    }

    fn slot_mut(&mut self, c: Collection) -> &mut usize {
        match c {
            Collection::Songs => &mut self.songs,
            Collection::Playlists => &mut self.playlists,
            Collection::Users => &mut self.users,
            Collection::Favorites => &mut self.favorites,
            Collection::Rewards => &mut self.rewards,
            Collection::Activities => &mut self.activities,
            Collection::UserPlaylists => &mut self.user_playlists,
            Collection::UserPlaylistSongs => &mut self.user_playlist_songs,
        }
    }

    pub fn total(&self) -> usize { Collection::ALL.iter().map(|c| self.get(*c)).sum() }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("backup payload must be a JSON object")]
    InvalidPayload,
    #[error("unsupported backup version {found:?}; expected \"2.0\"")]
    UnsupportedVersion { found: Option<String> },
    #[error("backup payload is missing a `data` object")]
    InvalidStructure,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidPayload => "INVALID_PAYLOAD",
            ValidationError::UnsupportedVersion { .. } => "UNSUPPORTED_VERSION",
            ValidationError::InvalidStructure => "INVALID_STRUCTURE",
        }
    }
}

/// A payload that passed validation, borrowed from the request body.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedBackup<'a> {
    pub data: &'a Map<String, Value>,
}

impl<'a> ValidatedBackup<'a> {
    /// Records of one collection; empty when absent or not an array.
    pub fn records(&self, c: Collection) -> &'a [Value] {
        self.data.get(c.name()).and_then(|v| v.as_array()).map(|a| a.as_slice()).unwrap_or(&[])
    }

    pub fn summary(&self) -> ImportSummary { ImportSummary::from_data(self.data) }
}

/// Structural checks, in order; the first failure wins.
pub fn validate(payload: &Value) -> Result<ValidatedBackup<'_>, ValidationError> {
    let Some(obj) = payload.as_object() else { return Err(ValidationError::InvalidPayload); };
    match obj.get("version") {
        Some(Value::String(v)) if v == BACKUP_VERSION => {}
        other => {
            let found = other.map(|v| match v { Value::String(s) => s.clone(), v => v.to_string() });
            return Err(ValidationError::UnsupportedVersion { found });
        }
    }
    let Some(data) = obj.get("data").and_then(|d| d.as_object()) else { return Err(ValidationError::InvalidStructure); };
    Ok(ValidatedBackup { data })
}

/// Split a backup record into its document key and stored fields.
///
/// Records without a usable `id` (missing, empty, or not a string/number)
/// yield `None`. Numeric ids are accepted as their decimal text.
pub fn split_record(record: &Value) -> Option<(String, Map<String, Value>)> {
    let obj = record.as_object()?;
    let id = match obj.get("id")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let mut fields = obj.clone();
    fields.remove("id");
    Some((id, fields))
}

/// Backup document as produced by export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub data: BTreeMap<String, Vec<Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validation_order_first_failure_wins() {
        assert_eq!(validate(&json!([1, 2])).unwrap_err(), ValidationError::InvalidPayload);
        assert_eq!(validate(&json!("2.0")).unwrap_err(), ValidationError::InvalidPayload);
        // version is checked before data
        assert_eq!(validate(&json!({"version": "1.0"})).unwrap_err().code(), "UNSUPPORTED_VERSION");
        assert_eq!(validate(&json!({"data": {}})).unwrap_err(), ValidationError::UnsupportedVersion { found: None });
        assert_eq!(validate(&json!({"version": 2.0, "data": {}})).unwrap_err().code(), "UNSUPPORTED_VERSION");
        assert_eq!(validate(&json!({"version": "2.0", "data": []})).unwrap_err(), ValidationError::InvalidStructure);
        assert!(validate(&json!({"version": "2.0", "data": {}})).is_ok());
    }

    #[test]
    fn version_is_not_coerced() {
        for v in [json!("2.0 "), json!("2"), json!("v2.0"), json!(null)] {
            assert!(validate(&json!({"version": v, "data": {}})).is_err());
        }
    }

    #[test]
    fn summary_counts_arrays_only() {
        let payload = json!({"version": "2.0", "data": {
            "songs": [{"id": "a"}, {"title": "no-id"}],
            "playlists": {"not": "an array"},
            "userPlaylistSongs": [{}, {}, {}],
        }});
        let s = validate(&payload).unwrap().summary();
        assert_eq!(s.songs, 2);
        assert_eq!(s.playlists, 0);
        assert_eq!(s.user_playlist_songs, 3);
        assert_eq!(s.total(), 5);
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["userPlaylistSongs"], json!(3));
    }

    #[test]
    fn split_record_rejects_missing_or_empty_id() {
        assert!(split_record(&json!({"title": "x"})).is_none());
        assert!(split_record(&json!({"id": "", "title": "x"})).is_none());
        assert!(split_record(&json!({"id": null})).is_none());
        assert!(split_record(&json!("a")).is_none());
        let (id, fields) = split_record(&json!({"id": "a", "title": "X"})).unwrap();
        assert_eq!(id, "a");
        assert_eq!(Value::Object(fields), json!({"title": "X"}));
        assert_eq!(split_record(&json!({"id": 7})).unwrap().0, "7");
    }

    #[test]
    fn wipe_order_covers_every_collection_once() {
        let mut w = Collection::WIPE_ORDER.to_vec();
        w.sort();
        let mut all = Collection::ALL.to_vec();
        all.sort();
        assert_eq!(w, all);
        let pos = |c| Collection::RESTORE_ORDER.iter().position(|x| *x == c).unwrap();
        assert!(pos(Collection::Songs) < pos(Collection::Playlists));
        assert_eq!(Collection::from_name("userPlaylists"), Some(Collection::UserPlaylists));
    }
}
