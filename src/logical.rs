//! Generic copy-on-write key/value skeleton, instantiated with the binary
//! tree (SPEC_FULL.md §5.3). The refresh/lock discipline lives here: every
//! read re-reads the root from the superblock unless this session already
//! holds the write lock, and the first mutation in a session refreshes
//! once on the way to taking the lock.

use crate::error::Result;
use crate::storage::Storage;
use crate::tree::{node_length, tree_delete, tree_get, tree_in_order, tree_insert, NodeRef, ValueRef};

pub(crate) struct LogicalTree {
    storage: Storage,
    root_ref: NodeRef,
}

impl LogicalTree {
    pub(crate) fn new(mut storage: Storage) -> Result<Self> {
        let root_ref = Self::read_root(&mut storage)?;
        Ok(LogicalTree { storage, root_ref })
    }

    fn read_root(storage: &mut Storage) -> Result<NodeRef> {
        let address = storage.get_root_address()?;
        Ok(NodeRef::from_address(address))
    }

    /// "If I have not yet taken the write lock in this call chain,
    /// re-read the root from disk before doing anything" — this is what
    /// makes readers always see the last committed state.
    fn refresh_if_unlocked(&mut self) -> Result<()> {
        if !self.storage.locked() {
            self.root_ref = Self::read_root(&mut self.storage)?;
        }
        Ok(())
    }

    pub(crate) fn get(&mut self, key: &str) -> Result<Vec<u8>> {
        self.refresh_if_unlocked()?;
        tree_get(&mut self.storage, &self.root_ref, key)
    }

    pub(crate) fn set(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        if self.storage.lock()? {
            self.root_ref = Self::read_root(&mut self.storage)?;
        }
        let value_ref = ValueRef::from_payload(value);
        self.root_ref = tree_insert(&mut self.storage, &self.root_ref, key, value_ref)?;
        Ok(())
    }

    pub(crate) fn pop(&mut self, key: &str) -> Result<()> {
        if self.storage.lock()? {
            self.root_ref = Self::read_root(&mut self.storage)?;
        }
        self.root_ref = tree_delete(&mut self.storage, &self.root_ref, key)?;
        Ok(())
    }

    pub(crate) fn len(&mut self) -> Result<u64> {
        self.refresh_if_unlocked()?;
        node_length(&mut self.storage, &self.root_ref)
    }

    /// Cascade `store` through every unstored node reachable from the
    /// root, then atomically publish the resulting address as the new
    /// root.
    pub(crate) fn commit(&mut self) -> Result<()> {
        self.root_ref.store(&mut self.storage)?;
        self.storage.commit_root_address(self.root_ref.address())
    }

    pub(crate) fn keys(&mut self) -> Result<Vec<(String, Vec<u8>)>> {
        self.refresh_if_unlocked()?;
        let mut out = Vec::new();
        tree_in_order(&mut self.storage, &self.root_ref, &mut out)?;
        Ok(out)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.storage.close()
    }

    pub(crate) fn closed(&self) -> bool {
        self.storage.closed()
    }
}
