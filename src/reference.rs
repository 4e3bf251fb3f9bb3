//! The indirection layer between "a value that lives only in memory", "a
//! value that lives only on disk", and "a value cached from disk but backed
//! by a stable address" (see SPEC_FULL.md §5.2).
//!
//! `Reference<T, C>` plays the role the Python original split across
//! `ValueRef` and `BinaryNodeRef`: a cell holding at most one cached payload
//! and at most one address, with at-most-once transitions filling in
//! whichever side is missing. The `C: RefCodec<T>` parameter replaces the
//! subclassing the original used to pick value-shaped vs. node-shaped
//! (de)serialisation.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::Result;
use crate::storage::Storage;

/// Capability a `Reference<T, _>` needs to move `T` to and from the page
/// cache: how to turn a live payload into bytes (and first let it stash any
/// dependent references), and how to rebuild it from bytes read back at a
/// given offset (the offset is threaded through purely for corruption
/// diagnostics).
pub trait RefCodec<T> {
    /// Give the payload a chance to store anything it owns before we
    /// serialise it. A no-op for plain byte values; for tree nodes this is
    /// what cascades a single `store()` on the root through every unstored
    /// descendant.
    fn prepare_to_store(payload: &T, storage: &mut Storage) -> Result<()>;

    fn encode(payload: &T) -> Result<Vec<u8>>;

    fn decode(bytes: &[u8], offset: u64) -> Result<T>;
}

/// A handle that is either unstored (payload only), unloaded (address
/// only), or both. Never mutated except to fill in the missing half.
pub struct Reference<T, C> {
    cached: RefCell<Option<Rc<T>>>,
    address: Cell<u64>,
    _codec: PhantomData<C>,
}

impl<T, C> Clone for Reference<T, C> {
    fn clone(&self) -> Self {
        Reference {
            cached: RefCell::new(self.cached.borrow().clone()),
            address: Cell::new(self.address.get()),
            _codec: PhantomData,
        }
    }
}

impl<T, C: RefCodec<T>> Reference<T, C> {
    /// The empty reference: no payload, address zero. Used for a node's
    /// absent children and as the "no root yet" sentinel.
    pub fn empty() -> Self {
        Reference {
            cached: RefCell::new(None),
            address: Cell::new(0),
            _codec: PhantomData,
        }
    }

    /// A reference to something that may or may not already be loaded,
    /// known only by its on-disk address. Address zero is the empty
    /// reference.
    pub fn from_address(address: u64) -> Self {
        Reference {
            cached: RefCell::new(None),
            address: Cell::new(address),
            _codec: PhantomData,
        }
    }

    /// A brand-new, unstored reference wrapping an in-memory payload.
    pub fn from_payload(payload: T) -> Self {
        Reference {
            cached: RefCell::new(Some(Rc::new(payload))),
            address: Cell::new(0),
            _codec: PhantomData,
        }
    }

    pub fn address(&self) -> u64 {
        self.address.get()
    }

    /// Load and cache the payload if necessary, returning `None` for the
    /// empty reference.
    pub fn get(&self, storage: &mut Storage) -> Result<Option<Rc<T>>> {
        if self.cached.borrow().is_none() {
            let addr = self.address.get();
            if addr == 0 {
                return Ok(None);
            }
            let bytes = storage.read(addr)?;
            let payload = C::decode(&bytes, addr)?;
            *self.cached.borrow_mut() = Some(Rc::new(payload));
        }
        Ok(self.cached.borrow().clone())
    }

    /// Serialise the cached payload and record the offset it was written
    /// at. Idempotent: does nothing once an address is assigned, and does
    /// nothing for a reference with no cached payload (nothing new to
    /// write).
    pub fn store(&self, storage: &mut Storage) -> Result<()> {
        if self.address.get() != 0 {
            return Ok(());
        }
        let payload = match self.cached.borrow().clone() {
            Some(payload) => payload,
            None => return Ok(()),
        };
        C::prepare_to_store(&payload, storage)?;
        let bytes = C::encode(&payload)?;
        let offset = storage.write(&bytes)?;
        self.address.set(offset);
        Ok(())
    }
}
