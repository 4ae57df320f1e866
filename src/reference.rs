//! Indirect node addressing.
//!
//! A node is addressed by a persisted [`NodeId`]. A [`NodeRef`] pairs that
//! identifier with an arena handle which is filled in exactly once, during the
//! build pass of a [`crate::Tree`]. Handles are runtime only and never persisted.

use crate::Symbol;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Stable identifier of a node, unique within one tree definition.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Symbol);

impl NodeId {
    pub fn new(id: impl Into<Symbol>) -> Self {
        Self(id.into())
    }

    pub fn empty() -> Self {
        Self(Symbol::empty())
    }

    /// A fresh identifier that no other node uses.
    pub fn generate() -> Self {
        Self(Symbol::fresh("node"))
    }

    pub fn is_empty(self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(self) -> &'static str {
        self.0.as_str()
    }

    pub fn symbol(self) -> Symbol {
        self.0
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Symbol> for NodeId {
    fn from(s: Symbol) -> Self {
        Self(s)
    }
}

/// Position of a node in the arena of one tree instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeIndex(pub(crate) usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Identifier to arena handle table owned by a tree.
#[derive(Default, Debug)]
pub struct NodeTable {
    map: HashMap<NodeId, NodeIndex>,
}

impl NodeTable {
    pub(crate) fn insert(&mut self, id: NodeId, index: NodeIndex) -> bool {
        if self.map.contains_key(&id) {
            return false;
        }
        self.map.insert(id, index);
        true
    }

    pub fn resolve(&self, id: NodeId) -> Option<NodeIndex> {
        if id.is_empty() {
            return None;
        }
        self.map.get(&id).copied()
    }

    /// Returns a resolved copy of `reference` if it can be resolved, or the
    /// reference unchanged otherwise.
    pub fn lookup_or_self<K: RefKind>(&self, reference: &NodeRef<K>) -> NodeRef<K> {
        let mut ret = reference.clone();
        ret.resolve(self);
        ret
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Distinguishes references that are structural edges of the tree from ones that
/// only point at a node.
pub trait RefKind: Clone + 'static {
    const STRUCTURAL: bool;
}

/// Marker for structural references. They make the target a child of the node
/// declaring them.
#[derive(Clone, Debug)]
pub struct Tree;

/// Marker for references that are excluded from structural traversal, such as
/// ignore lists.
#[derive(Clone, Debug)]
pub struct Raw;

impl RefKind for Tree {
    const STRUCTURAL: bool = true;
}

impl RefKind for Raw {
    const STRUCTURAL: bool = false;
}

pub struct NodeRef<K: RefKind> {
    id: NodeId,
    handle: Option<NodeIndex>,
    _kind: PhantomData<K>,
}

pub type TreeRef = NodeRef<Tree>;
pub type RawRef = NodeRef<Raw>;

impl<K: RefKind> NodeRef<K> {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            handle: None,
            _kind: PhantomData,
        }
    }

    pub fn empty() -> Self {
        Self::new(NodeId::empty())
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Whether the reference carries a persisted identifier.
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// Whether the reference has been resolved to a live node.
    pub fn is_resolved(&self) -> bool {
        self.has_id() && self.handle.is_some()
    }

    pub fn handle(&self) -> Option<NodeIndex> {
        if self.has_id() {
            self.handle
        } else {
            None
        }
    }

    /// Looks the identifier up in `table` and caches the handle. Resolving an
    /// already resolved reference returns the cached handle untouched.
    pub fn resolve(&mut self, table: &NodeTable) -> Option<NodeIndex> {
        if self.handle.is_none() {
            self.handle = table.resolve(self.id);
        }
        self.handle()
    }

    pub fn is_structural(&self) -> bool {
        K::STRUCTURAL
    }

    pub fn to_raw(&self) -> RawRef {
        NodeRef {
            id: self.id,
            handle: self.handle,
            _kind: PhantomData,
        }
    }

    pub fn to_tree(&self) -> TreeRef {
        NodeRef {
            id: self.id,
            handle: self.handle,
            _kind: PhantomData,
        }
    }
}

impl<K: RefKind> Clone for NodeRef<K> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handle: self.handle,
            _kind: PhantomData,
        }
    }
}

impl<K: RefKind> Default for NodeRef<K> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: RefKind> Debug for NodeRef<K> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let kind = if K::STRUCTURAL { "TreeRef" } else { "RawRef" };
        write!(f, "{}({:?}", kind, self.id)?;
        if let Some(handle) = self.handle {
            write!(f, " @{}", handle.0)?;
        }
        write!(f, ")")
    }
}

impl<K: RefKind> From<&str> for NodeRef<K> {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl<K: RefKind> From<NodeId> for NodeRef<K> {
    fn from(id: NodeId) -> Self {
        Self::new(id)
    }
}

impl<K: RefKind, L: RefKind> PartialEq<NodeRef<L>> for NodeRef<K> {
    fn eq(&self, other: &NodeRef<L>) -> bool {
        self.id == other.id
    }
}

impl<K: RefKind> Eq for NodeRef<K> {}

impl<K: RefKind> PartialEq<NodeId> for NodeRef<K> {
    fn eq(&self, other: &NodeId) -> bool {
        self.id == *other
    }
}

impl<K: RefKind> PartialEq<NodeRef<K>> for NodeId {
    fn eq(&self, other: &NodeRef<K>) -> bool {
        *self == other.id
    }
}

impl<K: RefKind> Hash for NodeRef<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<K: RefKind> Ord for NodeRef<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<K: RefKind> PartialOrd for NodeRef<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: RefKind> Serialize for NodeRef<K> {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(ser)
    }
}

impl<'de, K: RefKind> Deserialize<'de> for NodeRef<K> {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        NodeId::deserialize(de).map(Self::new)
    }
}

/// Walks every reference field a node or service declares.
pub trait RefVisitor {
    fn visit_tree(&mut self, reference: &mut TreeRef);
    fn visit_raw(&mut self, reference: &mut RawRef);
}

#[cfg(test)]
mod test;
