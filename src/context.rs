use crate::{
    wait::{Completion, WaitPredicate, Waits},
    NodeId, NodeIndex, NodeTable, Registry, Symbol, Value,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A shared, mutable variable cell. Parameters bound to a variable keep a weak
/// handle on the cell, so they see every write and notice when it is removed.
pub type VarCell = Rc<RefCell<Value>>;

/// Tree-scoped variable table.
#[derive(Default, Debug)]
pub struct Blackboard {
    cells: HashMap<Symbol, VarCell>,
}

impl Blackboard {
    pub fn get(&self, key: impl Into<Symbol>) -> Option<Value> {
        self.cells.get(&key.into()).map(|cell| cell.borrow().clone())
    }

    /// Writes a variable. An existing cell is updated in place so bindings to
    /// it stay live.
    pub fn set(&mut self, key: impl Into<Symbol>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.cells.get(&key) {
            Some(cell) => *cell.borrow_mut() = value,
            None => {
                self.cells.insert(key, Rc::new(RefCell::new(value)));
            }
        }
    }

    pub fn cell(&self, key: impl Into<Symbol>) -> Option<&VarCell> {
        self.cells.get(&key.into())
    }

    pub fn remove(&mut self, key: impl Into<Symbol>) -> Option<Value> {
        self.cells
            .remove(&key.into())
            .map(|cell| cell.borrow().clone())
    }

    pub fn contains(&self, key: impl Into<Symbol>) -> bool {
        self.cells.contains_key(&key.into())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Per-tree state handed to nodes while they execute.
pub struct Context {
    blackboard: Blackboard,
    registry: Rc<Registry>,
    pub(crate) waits: Waits,
    pub(crate) current: Option<NodeIndex>,
    pub(crate) delta: f64,
    pub(crate) frame: u64,
}

impl Context {
    pub fn new(registry: Rc<Registry>, blackboard: Blackboard) -> Self {
        Self {
            blackboard,
            registry,
            waits: Waits::default(),
            current: None,
            delta: 0.,
            frame: 0,
        }
    }

    pub fn get(&self, key: impl Into<Symbol>) -> Option<Value> {
        self.blackboard.get(key)
    }

    pub fn set(&mut self, key: impl Into<Symbol>, value: impl Into<Value>) {
        self.blackboard.set(key, value)
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Duration of the current tick, in seconds.
    pub fn delta_seconds(&self) -> f64 {
        self.delta
    }

    /// Number of ticks the tree has advanced.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// The node being executed, if any.
    pub fn current(&self) -> Option<NodeIndex> {
        self.current
    }

    /// Defers the conclusion of the executing node to whoever holds the returned
    /// handle. The node is not executed again while the wait is pending.
    ///
    /// Returns `None` outside of node execution.
    pub fn defer(&mut self) -> Option<Completion> {
        let node = self.current?;
        Some(self.waits.register(node, None))
    }

    /// Keeps the executing node waiting while `predicate` returns true. The
    /// predicate is polled by [`crate::Tree::poll_waits`], and the node succeeds
    /// once it returns false.
    pub fn wait_while(&mut self, predicate: impl FnMut() -> bool + 'static) -> Option<Completion> {
        let node = self.current?;
        let predicate: WaitPredicate = Box::new(predicate);
        Some(self.waits.register(node, Some(predicate)))
    }
}

/// What nodes and services see while the tree binds them, once, after every
/// reference has been resolved.
pub struct InitContext<'a> {
    pub registry: &'a Registry,
    pub blackboard: &'a Blackboard,
    pub table: &'a NodeTable,
    /// Identifier of the node being initialized, or of the service owner.
    pub node: NodeId,
}
