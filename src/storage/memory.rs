use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{merge_into, Document, DocumentStore, SetMode, StoreResult, Update};

type Collections = BTreeMap<String, BTreeMap<String, Document>>;

/// In-memory document store. Cloning shares the same underlying data.
///
/// `update` runs under the write lock, which makes it indivisible with respect
/// to every other call on the same store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Names of collections currently holding at least one document.
    pub fn collections(&self) -> Vec<String> {
        self.inner.read().iter().filter(|(_, m)| !m.is_empty()).map(|(k, _)| k.clone()).collect()
    }

    /// Deep copy of one collection, for snapshot comparisons.
    pub fn snapshot(&self, collection: &str) -> BTreeMap<String, Document> {
        self.inner.read().get(collection).cloned().unwrap_or_default()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.inner.read().get(collection).and_then(|m| m.get(id)).cloned())
    }

    fn set(&self, collection: &str, id: &str, doc: Document, mode: SetMode) -> StoreResult<()> {
        let mut w = self.inner.write();
        let coll = w.entry(collection.to_string()).or_default();
        match mode {
            SetMode::Overwrite => { coll.insert(id.to_string(), doc); }
            SetMode::Merge => merge_into(coll.entry(id.to_string()).or_default(), doc),
        }
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut w = self.inner.write();
        if let Some(m) = w.get_mut(collection) {
            m.remove(id);
            if m.is_empty() { w.remove(collection); }
        }
        Ok(())
    }

    fn list_page(&self, collection: &str, after: Option<&str>, limit: usize) -> StoreResult<Vec<(String, Document)>> {
        let r = self.inner.read();
        let Some(m) = r.get(collection) else { return Ok(Vec::new()); };
        let lower = match after {
            Some(a) => Bound::Excluded(a.to_string()),
            None => Bound::Unbounded,
        };
        Ok(m.range((lower, Bound::Unbounded)).take(limit).map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn update(&self, collection: &str, id: &str, f: &mut dyn FnMut(Option<&Document>) -> Update) -> StoreResult<Option<Document>> {
        let mut w = self.inner.write();
        let current = w.get(collection).and_then(|m| m.get(id)).cloned();
        match f(current.as_ref()) {
            Update::Keep => Ok(current),
            Update::Merge(patch) => {
                let mut next = current.unwrap_or_default();
                merge_into(&mut next, patch);
                w.entry(collection.to_string()).or_default().insert(id.to_string(), next.clone());
                Ok(Some(next))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document { v.as_object().cloned().unwrap() }

    #[test]
    fn list_page_respects_cursor_and_limit() {
        let s = MemoryStore::new();
        for id in ["c", "a", "b", "d"] {
            s.set("x", id, doc(json!({"id": id})), SetMode::Overwrite).unwrap();
        }
        let first: Vec<String> = s.list_page("x", None, 2).unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(first, vec!["a", "b"]);
        let next: Vec<String> = s.list_page("x", Some("b"), 10).unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(next, vec!["c", "d"]);
    }

    #[test]
    fn update_keep_does_not_create() {
        let s = MemoryStore::new();
        let out = s.update("sys", "lock", &mut |_| Update::Keep).unwrap();
        assert!(out.is_none());
        assert!(s.get("sys", "lock").unwrap().is_none());
    }

    #[test]
    fn subcollections_are_independent() {
        let s = MemoryStore::new();
        s.set("playlists", "p1", doc(json!({"name": "a"})), SetMode::Overwrite).unwrap();
        s.set("playlists/p1/songs", "s1", doc(json!({"title": "t"})), SetMode::Overwrite).unwrap();
        assert_eq!(s.list_page("playlists", None, 10).unwrap().len(), 1);
        s.delete("playlists", "p1").unwrap();
        assert_eq!(s.list_page("playlists/p1/songs", None, 10).unwrap().len(), 1);
    }
}
