//! On-disk document store: one pretty-printed JSON file per document.
//!
//! Layout: `<root>/<seg>/<seg>/.../<id>.json` where every path segment and the
//! id are base64url encoded, so arbitrary ids (emails, slashes) round-trip and
//! cannot escape the root. Mutations go through a temp file + rename and are
//! serialized by a single mutex, which is what makes `update` indivisible for
//! every caller sharing this `FileStore`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use parking_lot::Mutex;
use tracing::debug;

use super::{merge_into, Document, DocumentStore, SetMode, StoreError, StoreResult, Update};

const EXT: &str = "json";

fn encode_segment(s: &str) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s.as_bytes())
}

fn decode_segment(s: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s).ok()?;
    String::from_utf8(bytes).ok()
}

#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, write_lock: Arc::new(Mutex::new(())) })
    }

    pub fn root_path(&self) -> &Path { &self.root }

    fn collection_dir(&self, collection: &str) -> StoreResult<PathBuf> {
        let mut dir = self.root.clone();
        let mut any = false;
        for seg in collection.split('/') {
            if seg.is_empty() { return Err(StoreError::InvalidPath(collection.to_string())); }
            dir.push(encode_segment(seg));
            any = true;
        }
        if !any { return Err(StoreError::InvalidPath(collection.to_string())); }
        Ok(dir)
    }

    fn doc_path(&self, collection: &str, id: &str) -> StoreResult<PathBuf> {
        if id.is_empty() { return Err(StoreError::InvalidPath(format!("{}/<empty id>", collection))); }
        Ok(self.collection_dir(collection)?.join(format!("{}.{}", encode_segment(id), EXT)))
    }

    fn read_doc(path: &Path) -> StoreResult<Option<Document>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_doc(path: &Path, doc: &Document) -> StoreResult<()> {
        if let Some(dir) = path.parent() { fs::create_dir_all(dir)?; }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl DocumentStore for FileStore {
    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Self::read_doc(&self.doc_path(collection, id)?)
    }

    fn set(&self, collection: &str, id: &str, doc: Document, mode: SetMode) -> StoreResult<()> {
        let path = self.doc_path(collection, id)?;
        let _g = self.write_lock.lock();
        let next = match mode {
            SetMode::Overwrite => doc,
            SetMode::Merge => {
                let mut cur = Self::read_doc(&path)?.unwrap_or_default();
                merge_into(&mut cur, doc);
                cur
            }
        };
        Self::write_doc(&path, &next)
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let path = self.doc_path(collection, id)?;
        let _g = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_page(&self, collection: &str, after: Option<&str>, limit: usize) -> StoreResult<Vec<(String, Document)>> {
        let dir = self.collection_dir(collection)?;
        let rd = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids: Vec<(String, PathBuf)> = Vec::new();
        for ent in rd.flatten() {
            let p = ent.path();
            if !p.is_file() || p.extension().and_then(|s| s.to_str()) != Some(EXT) { continue; }
            let Some(stem) = p.file_stem().and_then(|s| s.to_str()) else { continue; };
            match decode_segment(stem) {
                Some(id) => ids.push((id, p)),
                None => debug!(target: "store", path = %p.display(), "skipping undecodable document file"),
            }
        }
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        let mut out = Vec::new();
        for (id, p) in ids.into_iter().filter(|(id, _)| after.map(|a| id.as_str() > a).unwrap_or(true)) {
            if out.len() >= limit { break; }
            // A concurrent delete between read_dir and read is fine; skip it.
            if let Some(doc) = Self::read_doc(&p)? { out.push((id, doc)); }
        }
        Ok(out)
    }

    fn update(&self, collection: &str, id: &str, f: &mut dyn FnMut(Option<&Document>) -> Update) -> StoreResult<Option<Document>> {
        let path = self.doc_path(collection, id)?;
        let _g = self.write_lock.lock();
        let current = Self::read_doc(&path)?;
        match f(current.as_ref()) {
            Update::Keep => Ok(current),
            Update::Merge(patch) => {
                let mut next = current.unwrap_or_default();
                merge_into(&mut next, patch);
                Self::write_doc(&path, &next)?;
                Ok(Some(next))
            }
        }
    }
}
