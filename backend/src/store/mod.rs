//! File-backed stores.
//!
//! Every persisted collection (reference tables, utility tables, rebate
//! files, truth files, transformer definitions) goes through one
//! [`FileBackedStore`]: gather paths, load them concurrently, mutate in
//! memory, save what changed.
//!
//! ```text
//!   gather(dir) ──▶ load(paths) ──▶ get / get_mut / insert ──▶ save()
//!                    (join_all)        (dirty tracking)          (join_all)
//! ```

use futures::future::join_all;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};

pub mod counter;
pub mod rebate;
pub mod reference;

pub use counter::Counter;
pub use rebate::{rebates_to_csv, Rebate, RebateFile, REBATE_FIELDS};
pub use reference::ReferenceTable;

// =============================================================================
// Item contract
// =============================================================================

/// Something a [`FileBackedStore`] can hold.
pub trait StoreItem: Sized + Send + 'static {
    /// Identity within the store. Two items with the same hash cannot coexist.
    fn hash(&self) -> String;

    /// Decode an item from the bytes of `path`.
    fn deserialize(path: &Path, bytes: &[u8]) -> StoreResult<Self>;

    /// Encode an item for writing.
    fn serialize(&self) -> StoreResult<Vec<u8>>;
}

#[derive(Debug)]
struct Entry<I> {
    path: PathBuf,
    item: I,
    dirty: bool,
}

/// A file that could not be loaded.
#[derive(Debug)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: StoreError,
}

// =============================================================================
// Store
// =============================================================================

/// In-memory collection of items, each bound to a file.
#[derive(Debug)]
pub struct FileBackedStore<I> {
    items: BTreeMap<String, Entry<I>>,
}

impl<I> Default for FileBackedStore<I> {
    fn default() -> Self {
        Self { items: BTreeMap::new() }
    }
}

impl<I: StoreItem> FileBackedStore<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and decode `paths` concurrently.
    ///
    /// Successfully decoded items are inserted; every other file is returned
    /// as a failure and the caller decides whether that is fatal.
    pub async fn load(&mut self, paths: Vec<PathBuf>) -> Vec<LoadFailure> {
        let reads = paths.into_iter().map(|path| async move {
            let result = match tokio::fs::read(&path).await {
                Ok(bytes) => I::deserialize(&path, &bytes),
                Err(e) => Err(StoreError::Io(e)),
            };
            (path, result)
        });

        let mut failures = Vec::new();
        for (path, result) in join_all(reads).await {
            let outcome = result.and_then(|item| self.insert_clean(path.clone(), item));
            if let Err(error) = outcome {
                failures.push(LoadFailure { path, error });
            }
        }
        failures
    }

    fn insert_clean(&mut self, path: PathBuf, item: I) -> StoreResult<()> {
        let hash = item.hash();
        if self.items.contains_key(&hash) {
            return Err(StoreError::Duplicate { hash, path: path.display().to_string() });
        }
        self.items.insert(hash, Entry { path, item, dirty: false });
        Ok(())
    }

    /// Add a new item that will be written on the next save.
    pub fn insert(&mut self, path: PathBuf, item: I) -> StoreResult<()> {
        let hash = item.hash();
        self.insert_clean(path, item)?;
        if let Some(entry) = self.items.get_mut(&hash) {
            entry.dirty = true;
        }
        Ok(())
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.items.contains_key(hash)
    }

    pub fn get(&self, hash: &str) -> Option<&I> {
        self.items.get(hash).map(|e| &e.item)
    }

    /// Mutable access. The item is written on the next save.
    pub fn get_mut(&mut self, hash: &str) -> Option<&mut I> {
        self.items.get_mut(hash).map(|e| {
            e.dirty = true;
            &mut e.item
        })
    }

    /// Mutable access, creating the item first if needed.
    pub fn get_or_insert_with<F>(&mut self, hash: &str, path: PathBuf, create: F) -> &mut I
    where
        F: FnOnce() -> I,
    {
        let entry = self
            .items
            .entry(hash.to_string())
            .or_insert_with(|| Entry { path, item: create(), dirty: true });
        entry.dirty = true;
        &mut entry.item
    }

    pub fn path(&self, hash: &str) -> Option<&Path> {
        self.items.get(hash).map(|e| e.path.as_path())
    }

    /// Items in hash order.
    pub fn iter(&self) -> impl Iterator<Item = &I> {
        self.items.values().map(|e| &e.item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Write every changed item. Returns how many files were written.
    pub async fn save(&mut self) -> StoreResult<usize> {
        let mut writes = Vec::new();
        for entry in self.items.values().filter(|e| e.dirty) {
            writes.push((entry.path.clone(), entry.item.serialize()?));
        }

        let results = join_all(writes.into_iter().map(|(path, bytes)| async move {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, bytes).await
        }))
        .await;

        let written = results.len();
        for result in results {
            result?;
        }
        for entry in self.items.values_mut() {
            entry.dirty = false;
        }
        Ok(written)
    }
}

/// Every file under `root` whose extension is in `extensions`, sorted.
///
/// A missing root yields no files.
pub fn gather(root: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    walk(root, extensions, &mut found);
    found.sort();
    found
}

fn walk(dir: &Path, extensions: &[&str], found: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, extensions, found);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        {
            found.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq)]
    struct Note {
        name: String,
        body: String,
    }

    impl StoreItem for Note {
        fn hash(&self) -> String {
            self.name.clone()
        }

        fn deserialize(path: &Path, bytes: &[u8]) -> StoreResult<Self> {
            let body = String::from_utf8(bytes.to_vec()).map_err(|e| StoreError::Invalid {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            let name = body.lines().next().unwrap_or("").to_string();
            Ok(Note { name, body })
        }

        fn serialize(&self) -> StoreResult<Vec<u8>> {
            Ok(self.body.clone().into_bytes())
        }
    }

    #[test]
    fn test_gather_recurses_and_filters() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/one.csv"), "x").unwrap();
        fs::write(dir.path().join("a/two.CSV"), "x").unwrap();
        fs::write(dir.path().join("skip.txt"), "x").unwrap();

        let found = gather(dir.path(), &["csv"]);
        assert_eq!(found.len(), 2);
        assert!(gather(&dir.path().join("missing"), &["csv"]).is_empty());
    }

    #[tokio::test]
    async fn test_load_reports_duplicates() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("1.txt"), "alpha\nfirst").unwrap();
        fs::write(dir.path().join("2.txt"), "alpha\nsecond").unwrap();
        fs::write(dir.path().join("3.txt"), "beta").unwrap();

        let mut store: FileBackedStore<Note> = FileBackedStore::new();
        let failures = store.load(gather(dir.path(), &["txt"])).await;

        assert_eq!(store.len(), 2);
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].error, StoreError::Duplicate { ref hash, .. } if hash == "alpha"));
    }

    #[tokio::test]
    async fn test_save_writes_only_dirty_items() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();

        let mut store: FileBackedStore<Note> = FileBackedStore::new();
        assert!(store.load(vec![dir.path().join("a.txt")]).await.is_empty());
        assert_eq!(store.save().await.unwrap(), 0);

        store
            .insert(dir.path().join("nested/b.txt"), Note { name: "beta".into(), body: "beta\n!".into() })
            .unwrap();
        assert!(store
            .insert(dir.path().join("c.txt"), Note { name: "beta".into(), body: String::new() })
            .is_err());
        assert_eq!(store.save().await.unwrap(), 1);
        assert_eq!(fs::read_to_string(dir.path().join("nested/b.txt")).unwrap(), "beta\n!");

        store.get_mut("alpha").unwrap().body.push_str("\nchanged");
        assert_eq!(store.save().await.unwrap(), 1);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "alpha\nchanged");
    }
}
