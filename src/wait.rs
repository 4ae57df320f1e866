//! Waits that conclude a node from outside the regular tick.
//!
//! A leaf can hand a [`Completion`] to some external system, or register a
//! predicate that is polled on a finer schedule than the driver tick (every
//! physics step, say). Either way the outcome only records the node's
//! conclusion. The driver propagates it to the parent on its next advance.

use crate::NodeIndex;
use std::cell::Cell;
use std::rc::Rc;
use tracing::trace;

#[derive(Default)]
struct CompletionState {
    result: Cell<Option<bool>>,
    cancelled: Cell<bool>,
}

/// Single-fire completion handle of a deferred node result.
#[derive(Clone, Default)]
pub struct Completion(Rc<CompletionState>);

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes the wait. Only the first call on a live handle has an effect;
    /// it returns false if the handle was already completed or cancelled.
    pub fn complete(&self, result: bool) -> bool {
        if self.0.cancelled.get() || self.0.result.get().is_some() {
            return false;
        }
        self.0.result.set(Some(result));
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.get()
    }

    pub fn result(&self) -> Option<bool> {
        self.0.result.get()
    }

    pub(crate) fn cancel(&self) {
        self.0.cancelled.set(true);
    }
}

pub type WaitPredicate = Box<dyn FnMut() -> bool>;

struct PendingWait {
    node: NodeIndex,
    completion: Completion,
    /// Keeps the wait open while it returns true.
    predicate: Option<WaitPredicate>,
}

#[derive(Default)]
pub(crate) struct Waits {
    pending: Vec<PendingWait>,
}

impl Waits {
    pub(crate) fn register(&mut self, node: NodeIndex, predicate: Option<WaitPredicate>) -> Completion {
        let completion = Completion::new();
        self.pending.push(PendingWait {
            node,
            completion: completion.clone(),
            predicate,
        });
        completion
    }

    pub(crate) fn is_waiting(&self, node: NodeIndex) -> bool {
        self.pending.iter().any(|w| w.node == node)
    }

    /// Polls predicates and returns the waits that completed since the last call,
    /// in registration order.
    pub(crate) fn poll(&mut self) -> Vec<(NodeIndex, bool)> {
        for wait in &mut self.pending {
            if wait.completion.result().is_some() || wait.completion.is_cancelled() {
                continue;
            }
            if let Some(predicate) = wait.predicate.as_mut() {
                if !predicate() {
                    wait.completion.complete(true);
                }
            }
        }
        let mut done = vec![];
        self.pending.retain(|wait| {
            if wait.completion.is_cancelled() {
                return false;
            }
            match wait.completion.result() {
                Some(result) => {
                    done.push((wait.node, result));
                    false
                }
                None => true,
            }
        });
        done
    }

    pub(crate) fn cancel_node(&mut self, node: NodeIndex) {
        self.pending.retain(|wait| {
            if wait.node == node {
                trace!(node = node.index(), "cancelled wait");
                wait.completion.cancel();
                false
            } else {
                true
            }
        });
    }

    pub(crate) fn cancel_all(&mut self) {
        for wait in self.pending.drain(..) {
            wait.completion.cancel();
        }
    }
}
