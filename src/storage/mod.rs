//!
//! encore storage module
//! ---------------------
//! Document store abstraction used by the backup coordinator, the import lock,
//! the audit log and the admin identity layer.
//!
//! A store holds named collections of JSON documents keyed by id. Collection
//! paths are slash separated; a subordinate collection hanging off a document
//! is addressed as `<collection>/<docId>/<sub>` (e.g. `playlists/p1/songs`).
//!
//! Key responsibilities:
//! - Plain get/set/delete by id, with overwrite or merge semantics.
//! - Ordered, cursor-paginated listing so callers can scan whole collections.
//! - An indivisible read-modify-write (`update`) used for the import lock.
//!
//! Stores are constructed explicitly and handed around as `SharedStore`
//! (`Arc<dyn DocumentStore>`); there is no process-wide client.

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// A stored document: a JSON object without its id.
pub type Document = Map<String, Value>;

/// Thread-safe handle to whichever store backs the service.
pub type SharedStore = Arc<dyn DocumentStore>;

/// Default page size for full collection scans.
pub const SCAN_PAGE_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid document path: {0}")]
    InvalidPath(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Replace the whole document.
    Overwrite,
    /// Shallow-merge top-level fields into the existing document, if any.
    Merge,
}

/// Decision returned from an `update` closure.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Leave the document untouched.
    Keep,
    /// Merge these fields into the document, creating it when absent.
    Merge(Document),
}

pub trait DocumentStore: Send + Sync {
    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    fn set(&self, collection: &str, id: &str, doc: Document, mode: SetMode) -> StoreResult<()>;

    /// Delete a document. Deleting a missing document is not an error.
    fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// Up to `limit` documents ordered by id, strictly after `after` when given.
    fn list_page(&self, collection: &str, after: Option<&str>, limit: usize) -> StoreResult<Vec<(String, Document)>>;

    /// Read-modify-write a single document atomically with respect to every
    /// other `update` on the same store. The closure may run more than once
    /// on stores that retry contended transactions, so it must be pure.
    fn update(&self, collection: &str, id: &str, f: &mut dyn FnMut(Option<&Document>) -> Update) -> StoreResult<Option<Document>>;

    /// Append a document under a generated id and return that id.
    fn add(&self, collection: &str, doc: Document) -> StoreResult<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.set(collection, &id, doc, SetMode::Overwrite)?;
        Ok(id)
    }
}

/// Shallow merge of `patch` into `base`.
pub fn merge_into(base: &mut Document, patch: Document) {
    for (k, v) in patch { base.insert(k, v); }
}

/// Path of a subordinate collection below a document.
pub fn subcollection(collection: &str, id: &str, sub: &str) -> String {
    format!("{}/{}/{}", collection, id, sub)
}

/// Read every document in a collection, page by page.
pub fn scan_all(store: &dyn DocumentStore, collection: &str) -> StoreResult<Vec<(String, Document)>> {
    let mut out = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.list_page(collection, cursor.as_deref(), SCAN_PAGE_SIZE)?;
        let done = page.len() < SCAN_PAGE_SIZE;
        cursor = page.last().map(|(id, _)| id.clone());
        out.extend(page);
        if done || cursor.is_none() { break; }
    }
    Ok(out)
}

/// Count documents in a collection without keeping them around.
pub fn count_all(store: &dyn DocumentStore, collection: &str) -> StoreResult<usize> {
    let mut total = 0usize;
    let mut cursor: Option<String> = None;
    loop {
        let page = store.list_page(collection, cursor.as_deref(), SCAN_PAGE_SIZE)?;
        total += page.len();
        if page.len() < SCAN_PAGE_SIZE { break; }
        cursor = page.last().map(|(id, _)| id.clone());
    }
    Ok(total)
}

/// Delete every document in a collection. Returns how many were removed.
///
/// Pages are always read from the start: deleting as we go keeps the next
/// page at the head of the collection, so no cursor is needed.
pub fn wipe_collection(store: &dyn DocumentStore, collection: &str) -> StoreResult<usize> {
    let mut removed = 0usize;
    loop {
        let page = store.list_page(collection, None, SCAN_PAGE_SIZE)?;
        if page.is_empty() { break; }
        for (id, _) in page.iter() {
            store.delete(collection, id)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document { v.as_object().cloned().unwrap() }

    #[test]
    fn scan_and_wipe_cross_page_boundaries() {
        let store = MemoryStore::new();
        for i in 0..(SCAN_PAGE_SIZE + 7) {
            store.set("songs", &format!("s{:05}", i), doc(json!({"n": i})), SetMode::Overwrite).unwrap();
        }
        assert_eq!(scan_all(&store, "songs").unwrap().len(), SCAN_PAGE_SIZE + 7);
        assert_eq!(count_all(&store, "songs").unwrap(), SCAN_PAGE_SIZE + 7);
        assert_eq!(wipe_collection(&store, "songs").unwrap(), SCAN_PAGE_SIZE + 7);
        assert_eq!(count_all(&store, "songs").unwrap(), 0);
    }

    #[test]
    fn merge_keeps_unrelated_fields() {
        let mut base = doc(json!({"a": 1, "b": 2}));
        merge_into(&mut base, doc(json!({"b": 3, "c": 4})));
        assert_eq!(Value::Object(base), json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn subcollection_path() {
        assert_eq!(subcollection("playlists", "p1", "songs"), "playlists/p1/songs");
    }
}
