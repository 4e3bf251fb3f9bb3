//! The concrete copy-on-write binary search tree (SPEC_FULL.md §5.4).
//!
//! `_get`/`_insert`/`_delete` from the original are plain recursive
//! functions here rather than methods on a subclassed "logical base" —
//! there is only one tree shape in this crate, so the inheritance the
//! Python original used to keep `LogicalBase` generic buys nothing.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};
use crate::reference::{RefCodec, Reference};
use crate::storage::Storage;

/// An immutable node in the tree. Never mutated once constructed; an
/// "update" always produces a new node plus a new reference, sharing
/// whichever children didn't change.
pub(crate) struct Node {
    pub(crate) key: String,
    pub(crate) value_ref: ValueRef,
    pub(crate) left_ref: NodeRef,
    pub(crate) right_ref: NodeRef,
    pub(crate) length: u64,
}

pub(crate) struct ByteCodec;

impl RefCodec<Vec<u8>> for ByteCodec {
    fn prepare_to_store(_payload: &Vec<u8>, _storage: &mut Storage) -> Result<()> {
        Ok(())
    }

    fn encode(payload: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(payload.clone())
    }

    fn decode(bytes: &[u8], _offset: u64) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// A reference to an opaque byte-string value. The default codec for
/// values is an identity byte codec; callers that want UTF-8 text just
/// pass `as_bytes()` / round-trip through `String::from_utf8`, which is
/// what `Database::set_str`/`get_string` do (SPEC_FULL.md §7.1).
pub(crate) type ValueRef = Reference<Vec<u8>, ByteCodec>;

/// The five-field on-disk shape of a node record (SPEC_FULL.md §7.2):
/// child offsets, key, value offset, and subtree length, all fixed-width
/// except the length-prefixed `key` string that `bincode` already encodes
/// that way.
#[derive(Serialize, Deserialize)]
struct NodeRecord {
    left: u64,
    key: String,
    value: u64,
    right: u64,
    length: u64,
}

pub(crate) struct NodeCodec;

impl RefCodec<Node> for NodeCodec {
    fn prepare_to_store(node: &Node, storage: &mut Storage) -> Result<()> {
        node.value_ref.store(storage)?;
        node.left_ref.store(storage)?;
        node.right_ref.store(storage)?;
        Ok(())
    }

    fn encode(node: &Node) -> Result<Vec<u8>> {
        let record = NodeRecord {
            left: node.left_ref.address(),
            key: node.key.clone(),
            value: node.value_ref.address(),
            right: node.right_ref.address(),
            length: node.length,
        };
        bincode::serialize(&record).map_err(|e| DbError::CorruptRecord {
            offset: 0,
            reason: format!("failed to encode node record: {e}"),
        })
    }

    fn decode(bytes: &[u8], offset: u64) -> Result<Node> {
        let record: NodeRecord = bincode::deserialize(bytes).map_err(|e| DbError::CorruptRecord {
            offset,
            reason: format!("failed to decode node record: {e}"),
        })?;
        Ok(Node {
            key: record.key,
            value_ref: ValueRef::from_address(record.value),
            left_ref: NodeRef::from_address(record.left),
            right_ref: NodeRef::from_address(record.right),
            length: record.length,
        })
    }
}

pub(crate) type NodeRef = Reference<Node, NodeCodec>;

/// The length of the subtree a node reference points at, force-loading it
/// if it is only known by address. This is the "if not, force-load before
/// computing" the design notes call for when an unchanged sibling's length
/// is needed to recompute a parent's length during a copy.
pub(crate) fn node_length(storage: &mut Storage, node_ref: &NodeRef) -> Result<u64> {
    match node_ref.get(storage)? {
        Some(node) => Ok(node.length),
        None => Ok(0),
    }
}

/// Build a copy of `node` with some fields replaced, recomputing `length`
/// structurally so the `length == left.length + right.length + 1`
/// invariant holds automatically (SPEC_FULL.md §5.4 / §9).
fn from_node(
    storage: &mut Storage,
    node: &Node,
    left: Option<NodeRef>,
    value: Option<ValueRef>,
    right: Option<NodeRef>,
) -> Result<Node> {
    let left_ref = left.unwrap_or_else(|| node.left_ref.clone());
    let right_ref = right.unwrap_or_else(|| node.right_ref.clone());
    let value_ref = value.unwrap_or_else(|| node.value_ref.clone());
    let length = node_length(storage, &left_ref)? + node_length(storage, &right_ref)? + 1;
    Ok(Node {
        key: node.key.clone(),
        value_ref,
        left_ref,
        right_ref,
        length,
    })
}

/// Classical BST descent by string comparison, following the value
/// reference on a match.
pub(crate) fn tree_get(storage: &mut Storage, node_ref: &NodeRef, key: &str) -> Result<Vec<u8>> {
    let mut current = node_ref.get(storage)?;
    loop {
        let node = current.ok_or(DbError::KeyNotFound)?;
        if key < node.key.as_str() {
            current = node.left_ref.get(storage)?;
        } else if key > node.key.as_str() {
            current = node.right_ref.get(storage)?;
        } else {
            let value = node.value_ref.get(storage)?.ok_or_else(|| DbError::CorruptRecord {
                offset: node.value_ref.address(),
                reason: "node has no value record".to_string(),
            })?;
            return Ok((*value).clone());
        }
    }
}

/// Insert or update `key`, returning a new root reference that shares
/// every subtree that didn't need to change.
pub(crate) fn tree_insert(
    storage: &mut Storage,
    node_ref: &NodeRef,
    key: &str,
    value_ref: ValueRef,
) -> Result<NodeRef> {
    let new_node = match node_ref.get(storage)? {
        None => Node {
            key: key.to_string(),
            value_ref,
            left_ref: NodeRef::empty(),
            right_ref: NodeRef::empty(),
            length: 1,
        },
        Some(node) => {
            if key < node.key.as_str() {
                let new_left = tree_insert(storage, &node.left_ref, key, value_ref)?;
                from_node(storage, &node, Some(new_left), None, None)?
            } else if key > node.key.as_str() {
                let new_right = tree_insert(storage, &node.right_ref, key, value_ref)?;
                from_node(storage, &node, None, None, Some(new_right))?
            } else {
                from_node(storage, &node, None, Some(value_ref), None)?
            }
        }
    };
    Ok(NodeRef::from_payload(new_node))
}

/// Delete `key`, returning a new root reference. `KeyNotFound` if absent
/// anywhere along the descent.
pub(crate) fn tree_delete(storage: &mut Storage, node_ref: &NodeRef, key: &str) -> Result<NodeRef> {
    let node = node_ref.get(storage)?.ok_or(DbError::KeyNotFound)?;
    if key < node.key.as_str() {
        let new_left = tree_delete(storage, &node.left_ref, key)?;
        let new_node = from_node(storage, &node, Some(new_left), None, None)?;
        Ok(NodeRef::from_payload(new_node))
    } else if key > node.key.as_str() {
        let new_right = tree_delete(storage, &node.right_ref, key)?;
        let new_node = from_node(storage, &node, None, None, Some(new_right))?;
        Ok(NodeRef::from_payload(new_node))
    } else {
        let left = node.left_ref.get(storage)?;
        let right = node.right_ref.get(storage)?;
        match (left, right) {
            (Some(_), Some(_)) => {
                // Two children: promote the left subtree's maximum key,
                // per the on-disk-history-preserving tie-break this store
                // has always used (never the right-minimum).
                let replacement = find_max(storage, &node.left_ref)?;
                let new_left = tree_delete(storage, &node.left_ref, &replacement.key)?;
                let new_left_length = node_length(storage, &new_left)?;
                let right_length = node_length(storage, &node.right_ref)?;
                let new_node = Node {
                    key: replacement.key.clone(),
                    value_ref: replacement.value_ref.clone(),
                    left_ref: new_left,
                    right_ref: node.right_ref.clone(),
                    length: new_left_length + 1 + right_length,
                };
                Ok(NodeRef::from_payload(new_node))
            }
            (Some(_), None) => Ok(node.left_ref.clone()),
            (None, Some(_)) => Ok(node.right_ref.clone()),
            (None, None) => Ok(NodeRef::empty()),
        }
    }
}

fn find_max(storage: &mut Storage, node_ref: &NodeRef) -> Result<Rc<Node>> {
    let mut current = node_ref.get(storage)?.ok_or(DbError::KeyNotFound)?;
    loop {
        match current.right_ref.get(storage)? {
            Some(next) => current = next,
            None => return Ok(current),
        }
    }
}

/// In-order traversal, collecting `(key, value)` pairs. Not a range
/// iteration primitive (the Non-goal spec.md excludes) — a full-tree
/// walk used by `Database::keys`/`iter` and by the ordering tests in
/// SPEC_FULL.md §9's testable properties.
pub(crate) fn tree_in_order(
    storage: &mut Storage,
    node_ref: &NodeRef,
    out: &mut Vec<(String, Vec<u8>)>,
) -> Result<()> {
    if let Some(node) = node_ref.get(storage)? {
        tree_in_order(storage, &node.left_ref, out)?;
        let value = node.value_ref.get(storage)?.ok_or_else(|| DbError::CorruptRecord {
            offset: node.value_ref.address(),
            reason: "node has no value record".to_string(),
        })?;
        out.push((node.key.clone(), (*value).clone()));
        tree_in_order(storage, &node.right_ref, out)?;
    }
    Ok(())
}
