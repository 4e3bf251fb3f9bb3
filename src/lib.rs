//! `dbdb` — a single-file, embedded, persistent key/value store built on
//! an immutable, copy-on-write binary search tree materialised onto an
//! append-only record file.
//!
//! See `SPEC_FULL.md` in the repository root for the full design. In
//! short: [`Database`] is the library surface, backed by a logical COW
//! tree layer, a lazy reference layer, and an append-only physical
//! storage layer.
//!
//! ```no_run
//! use dbdb::Database;
//!
//! # fn main() -> dbdb::Result<()> {
//! let mut db = Database::open("example.db")?;
//! db.set_str("name", "ferris")?;
//! db.commit()?;
//! assert_eq!(db.get_string("name")?, "ferris");
//! # Ok(())
//! # }
//! ```

mod error;
mod logical;
mod reference;
mod storage;
mod tree;

pub use error::{DbError, Result};

use std::path::Path;

use log::debug;

use logical::LogicalTree;
use storage::Storage;

/// Options controlling how [`Database::open_with`] opens a file.
///
/// The 8-byte magic number (SPEC_FULL.md §7.3) is always written on
/// creation and always verified on open of a pre-existing file — spec.md
/// §6.3 permits adding a magic number but says the implementer "must
/// then refuse to open files without it," so there is no toggle here to
/// bypass that check.
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Size in bytes of the superblock header region. The production
    /// default is the spec's fixed 4096 bytes; tests that want to
    /// exercise the padding/initialisation path cheaply can shrink it.
    pub superblock_size: u64,
}

impl Default for DbOptions {
    fn default() -> Self {
        DbOptions {
            superblock_size: storage::SUPERBLOCK_SIZE,
        }
    }
}

/// A handle onto a single database file.
///
/// `commit` is explicit: mutations made through `set`/`delete` only
/// change the in-memory root until `commit` publishes it. Dropping a
/// `Database` without committing discards any pending mutations but
/// still flushes and releases the advisory file lock.
pub struct Database {
    tree: Option<LogicalTree>,
}

impl Database {
    /// Open `path`, creating it if it does not exist, with default
    /// options (SPEC_FULL.md §7.3).
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        Database::open_with(path, DbOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: DbOptions) -> Result<Database> {
        let path = path.as_ref();
        debug!("opening database at {path:?}");
        let storage = Storage::open_with_superblock_size(path, options.superblock_size)?;
        let tree = LogicalTree::new(storage)?;
        Ok(Database { tree: Some(tree) })
    }

    fn tree_mut(&mut self) -> Result<&mut LogicalTree> {
        self.tree.as_mut().ok_or(DbError::DatabaseClosed)
    }

    /// Look up `key`. `Err(DbError::KeyNotFound)` if absent.
    pub fn get(&mut self, key: &str) -> Result<Vec<u8>> {
        self.tree_mut()?.get(key)
    }

    /// Convenience wrapper over [`Database::get`] for the common case of
    /// UTF-8 text values.
    pub fn get_string(&mut self, key: &str) -> Result<String> {
        let bytes = self.get(key)?;
        String::from_utf8(bytes).map_err(|e| DbError::CorruptRecord {
            offset: 0,
            reason: format!("value for key is not valid UTF-8: {e}"),
        })
    }

    /// Insert or update `key`. Later writes to the same key within a
    /// session win over earlier ones.
    pub fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.tree_mut()?.set(key, value.to_vec())
    }

    pub fn set_str(&mut self, key: &str, value: &str) -> Result<()> {
        self.set(key, value.as_bytes())
    }

    /// Remove `key`. `Err(DbError::KeyNotFound)` if absent; the tree is
    /// left unchanged in that case.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.tree_mut()?.pop(key)
    }

    /// `true` iff `key` is present, without distinguishing "absent" from
    /// any other error the way `get` does.
    pub fn contains(&mut self, key: &str) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(DbError::KeyNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Number of keys in the tree, or zero for an empty database.
    pub fn len(&mut self) -> Result<u64> {
        self.tree_mut()?.len()
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Store every unstored node reachable from the current root, then
    /// atomically publish it as the new root.
    pub fn commit(&mut self) -> Result<()> {
        self.tree_mut()?.commit()
    }

    /// Keys in sorted order. Not a range-iteration primitive (the store
    /// still has no cursor/seek API) — a full in-order walk, useful for
    /// inspection and for verifying the BST ordering invariant.
    pub fn keys(&mut self) -> Result<Vec<String>> {
        Ok(self
            .tree_mut()?
            .keys()?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// `(key, value)` pairs in sorted order.
    pub fn iter(&mut self) -> Result<Vec<(String, Vec<u8>)>> {
        self.tree_mut()?.keys()
    }

    /// Flush and release the file lock, and mark the handle closed. Any
    /// further operation returns `DbError::DatabaseClosed`. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if let Some(tree) = self.tree.as_mut() {
            tree.close()?;
        }
        self.tree = None;
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Some(tree) = self.tree.as_mut() {
            if !tree.closed() {
                let _ = tree.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempPath};

    fn temp_path() -> TempPath {
        NamedTempFile::new().unwrap().into_temp_path()
    }

    /// Verify that we can create an empty database, close it, and reopen
    /// it (scenario 1 of SPEC_FULL.md §9).
    #[test]
    fn open_empty_database() {
        let path = temp_path();
        {
            let mut db = Database::open(&path).expect("failed to create database");
            assert_eq!(db.len().unwrap(), 0);
            db.commit().unwrap();
        }
        {
            let mut db = Database::open(&path).expect("failed to reopen database");
            assert_eq!(db.len().unwrap(), 0);
        }
        assert!(std::fs::metadata(&path).unwrap().len() >= 4096);
    }

    #[test]
    fn single_commit_durability() {
        let path = temp_path();
        {
            let mut db = Database::open(&path).unwrap();
            db.set_str("foo", "bar").unwrap();
            db.commit().unwrap();
        }
        let mut db = Database::open(&path).unwrap();
        assert_eq!(db.get_string("foo").unwrap(), "bar");
    }

    #[test]
    fn uncommitted_mutation_is_lost() {
        let path = temp_path();
        {
            let mut db = Database::open(&path).unwrap();
            db.set_str("a", "1").unwrap();
            // no commit
        }
        let mut db = Database::open(&path).unwrap();
        assert!(matches!(db.get("a"), Err(DbError::KeyNotFound)));
    }

    #[test]
    fn trailing_garbage_after_commit_is_harmless() {
        let path = temp_path();
        {
            let mut db = Database::open(&path).unwrap();
            db.set_str("a", "1").unwrap();
            db.commit().unwrap();
        }
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            file.write_all(b"garbage bytes past eof").unwrap();
        }
        let mut db = Database::open(&path).unwrap();
        assert_eq!(db.get_string("a").unwrap(), "1");
    }

    #[test]
    fn bulk_insert_and_read() {
        let path = temp_path();
        let mut db = Database::open(&path).unwrap();
        for i in 0..999 {
            db.set_str(&format!("foo{i}"), &format!("bar{i}")).unwrap();
        }
        db.commit().unwrap();
        for i in 0..999 {
            assert_eq!(db.get_string(&format!("foo{i}")).unwrap(), format!("bar{i}"));
        }
        assert_eq!(db.len().unwrap(), 999);
    }

    #[test]
    fn delete_with_two_children_promotes_left_max() {
        let path = temp_path();
        let mut db = Database::open(&path).unwrap();
        db.set_str("m", "M").unwrap();
        db.set_str("d", "D").unwrap();
        db.set_str("t", "T").unwrap();
        db.set_str("a", "A").unwrap();
        db.set_str("g", "G").unwrap();
        db.commit().unwrap();

        db.delete("m").unwrap();
        db.commit().unwrap();

        assert!(matches!(db.get("m"), Err(DbError::KeyNotFound)));
        assert_eq!(db.get_string("d").unwrap(), "D");
        assert_eq!(db.get_string("g").unwrap(), "G");
        assert_eq!(db.get_string("a").unwrap(), "A");
        assert_eq!(db.get_string("t").unwrap(), "T");
        assert_eq!(db.len().unwrap(), 4);
        assert_eq!(db.keys().unwrap(), vec!["a", "d", "g", "t"]);
    }

    #[test]
    fn delete_nonexistent_key_is_an_error_and_tree_unchanged() {
        let path = temp_path();
        let mut db = Database::open(&path).unwrap();
        db.set_str("a", "1").unwrap();
        db.commit().unwrap();

        assert!(matches!(db.delete("missing"), Err(DbError::KeyNotFound)));
        assert_eq!(db.len().unwrap(), 1);
        assert_eq!(db.get_string("a").unwrap(), "1");
    }

    #[test]
    fn single_key_delete_resets_root_to_empty() {
        let path = temp_path();
        let mut db = Database::open(&path).unwrap();
        db.set_str("only", "one").unwrap();
        db.commit().unwrap();
        db.delete("only").unwrap();
        db.commit().unwrap();
        assert_eq!(db.len().unwrap(), 0);
    }

    #[test]
    fn later_write_wins_within_a_session() {
        let path = temp_path();
        let mut db = Database::open(&path).unwrap();
        db.set_str("k", "v1").unwrap();
        db.set_str("k", "v2").unwrap();
        assert_eq!(db.get_string("k").unwrap(), "v2");
    }

    #[test]
    fn lexicographic_ordering_via_in_order_traversal() {
        let path = temp_path();
        let mut db = Database::open(&path).unwrap();
        db.set_str("b", "B").unwrap();
        db.set_str("a", "A").unwrap();
        db.set_str("ba", "BA").unwrap();
        assert_eq!(db.keys().unwrap(), vec!["a", "b", "ba"]);
    }

    #[test]
    fn idempotent_commit_leaves_root_offset_unchanged() {
        let path = temp_path();
        let mut db = Database::open(&path).unwrap();
        db.set_str("k", "v").unwrap();
        db.commit().unwrap();
        let root_after_first = {
            let mut storage = Storage::open(&path).unwrap();
            storage.get_root_address().unwrap()
        };
        db.commit().unwrap();
        let root_after_second = {
            let mut storage = Storage::open(&path).unwrap();
            storage.get_root_address().unwrap()
        };
        assert_eq!(root_after_first, root_after_second);
    }

    #[test]
    fn contains_translates_not_found_to_false() {
        let path = temp_path();
        let mut db = Database::open(&path).unwrap();
        db.set_str("k", "v").unwrap();
        assert!(db.contains("k").unwrap());
        assert!(!db.contains("missing").unwrap());
    }

    #[test]
    fn operations_after_close_are_rejected() {
        let path = temp_path();
        let mut db = Database::open(&path).unwrap();
        db.close().unwrap();
        assert!(matches!(db.get("anything"), Err(DbError::DatabaseClosed)));
    }

    #[test]
    fn rejects_files_without_magic() {
        let path = temp_path();
        {
            // Write a superblock-sized file with no magic at all.
            std::fs::write(&path, vec![0u8; 4096]).unwrap();
        }
        let result = Database::open(&path);
        assert!(matches!(result, Err(DbError::CorruptRecord { .. })));
    }

    #[test]
    fn padding_preserves_existing_header_bytes() {
        // A file shorter than the superblock, as if a previous run
        // crashed partway through initialisation: root address zero,
        // magic already in place, and a sentinel byte just past the
        // magic region. Padding must extend the tail with zeros without
        // touching anything already on disk.
        let path = temp_path();
        let mut prefix = vec![0u8; 20];
        prefix[8..16].copy_from_slice(b"DBDBv1\0\0");
        prefix[16] = 0xAB;
        std::fs::write(&path, &prefix).unwrap();

        let mut storage = Storage::open(&path).unwrap();
        assert_eq!(storage.get_root_address().unwrap(), 0);
        storage.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), storage::SUPERBLOCK_SIZE as usize);
        assert_eq!(&bytes[8..16], b"DBDBv1\0\0");
        assert_eq!(bytes[16], 0xAB);
    }

    #[test]
    fn small_superblock_size_is_honored() {
        let path = temp_path();
        let options = DbOptions {
            superblock_size: 64,
            ..Default::default()
        };
        {
            let mut db = Database::open_with(&path, options).unwrap();
            db.set_str("k", "v").unwrap();
            db.commit().unwrap();
        }
        assert!(std::fs::metadata(&path).unwrap().len() >= 64);
        let options = DbOptions {
            superblock_size: 64,
            ..Default::default()
        };
        let mut db = Database::open_with(&path, options).unwrap();
        assert_eq!(db.get_string("k").unwrap(), "v");
    }
}
