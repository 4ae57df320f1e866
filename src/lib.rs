//! # behavior-tree-engine
//!
//! A behavior tree engine for agents in a tick-based simulation.
//!
//!
//! ## Overview
//!
//! The engine executes a tree of nodes one tick (simulation frame) at a time.
//! On top of the usual control flow nodes it supports three things:
//!
//! * Indirect addressing. Nodes refer to each other through [`NodeRef`]s that
//!   carry a persisted [`NodeId`]. The references are resolved to arena handles
//!   once, when the tree is built.
//! * Services. A flow node can own [`Service`]s that tick while the node is on
//!   the active path. A service can run subtrees of its own, or *break*: unwind
//!   execution to an ancestor in the middle of a tick.
//! * Procedure calls. An [`InvokeNode`] calls a procedure registered in a
//!   [`Registry`], with parameters that are either constants or bound to
//!   blackboard variables.
//!
//!
//! ## How it looks like
//!
//! Nodes are added to a [`TreeBuilder`] under an identifier, and refer to their
//! children by identifier.
//!
//! ```rust
//! # use behavior_tree_engine::*;
//! # use std::rc::Rc;
//! struct Say(&'static str);
//!
//! impl BehaviorNode for Say {
//!     fn execute(&mut self, arg: BehaviorCallback, _ctx: &mut Context) -> Step {
//!         arg(&self.0);
//!         Step::Done(true)
//!     }
//! }
//!
//! let mut builder = TreeBuilder::new(Rc::new(Registry::default()));
//! builder.add_node("root", SequenceNode::new(["hello", "world"]))?;
//! builder.add_node("hello", Say("Hello"))?;
//! builder.add_node("world", Say("world!"))?;
//! builder.set_root("root");
//! let mut tree = builder.build()?;
//!
//! let mut said = vec![];
//! let result = tree.tick(&mut |v| {
//!     said.extend(v.downcast_ref::<&str>().copied());
//!     None
//! });
//! assert_eq!(result, BehaviorResult::Success);
//! assert_eq!(said, ["Hello", "world!"]);
//! # Ok::<(), error::BuildError>(())
//! ```
//!
//! The argument to `tick` is a callback for the nodes to communicate with the
//! environment. The closure, aliased as [`BehaviorCallback`], takes a
//! `&dyn std::any::Any` and returns an optional `Box<dyn std::any::Any>`, so
//! the environment can pass references with lifetimes shorter than `'static`,
//! which a blackboard cannot hold.
//!
//!
//! ## Node lifecycle
//!
//! A node entering the active path is `Ready`. It becomes `Running` on its
//! first execution, stays there while it yields, and concludes as `Succeeded`
//! or `Failed`. A conclusion is reported to the parent exactly once; concluding
//! twice is a no-op. Any node that has not concluded can be `Stopped`, for
//! example when a break unwinds past it, and a stopped node reports nothing.
//!
//! A flow node asks the driver to run a child by returning [`Step::Enter`]. The
//! driver calls [`BehaviorNode::child_returned`] with the child's result later,
//! possibly several ticks later.
//!
//!
//! ## Services
//!
//! Services are attached to flow nodes with [`TreeBuilder::add_service`]. They
//! are registered when their owner is activated and unregistered when it
//! leaves the active path, which resets them. Each tick the driver polls the
//! active services, innermost first.
//!
//! * [`TimerService`] counts a blackboard variable down by the tick duration.
//! * [`UpdateService`] re-runs a subtree every few ticks.
//! * [`BranchService`] and [`ParallelService`] run a subtree next to the
//!   owner's own children.
//! * [`BreakService`] and [`BreakOnChangeService`] watch a condition and unwind
//!   execution to the owner or the owner's parent.
//!
//!
//! ## Deferred results
//!
//! A leaf can conclude from outside of the tick with [`Context::defer`] or
//! [`Context::wait_while`]. [`Tree::poll_waits`] may be called between ticks
//! to poll the registered predicates more often than the tree ticks.

mod config;
mod container;
mod context;
pub mod error;
mod method;
mod nodes;
mod reference;
mod registry;
mod service;
mod symbol;
mod tree;
pub mod types;
mod value;
mod wait;

use std::any::Any;

pub use crate::config::DriverConfig;
pub use crate::context::{Blackboard, Context, InitContext, VarCell};
pub use crate::method::{BoundMethod, MethodSpec, ParamSource, Parameter};
pub use crate::nodes::{
    FallbackNode, ForceFailureNode, ForceSuccessNode, IfNode, InverterNode, InvokeNode,
    IsTrueNode, MissingValue, RepeatNode, RetryNode, SequenceNode, SetValueNode, WaitNode,
    WaitWhileNode,
};
pub use crate::reference::{
    NodeId, NodeIndex, NodeRef, NodeTable, Raw, RawRef, RefKind, RefVisitor, Tree as TreeKind,
    TreeRef,
};
pub use crate::registry::{Procedure, ProcedureId, Registry};
pub use crate::service::{
    BranchService, BreakOnChangeService, BreakService, BreakTarget, Interval, ParallelService,
    Service, ServiceAction, ServiceContext, SpawnMode, TimerService, UpdateService,
};
pub use crate::symbol::Symbol;
pub use crate::tree::{Tree, TreeBuilder};
pub use crate::types::{TypeHandle, TypeRef, TypeRegistry};
pub use crate::value::{NativeType, Object, SemanticType, Value};
pub use crate::wait::Completion;
pub use ::once_cell::sync::Lazy;

/// Outcome of ticking a whole tree.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum BehaviorResult {
    Success,
    Fail,
    /// The tree should keep running in the next tick
    Running,
}

/// Lifecycle state of a single node.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum NodeState {
    Ready,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl NodeState {
    pub fn is_concluded(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Ready or running. Only such nodes can conclude or be stopped.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

/// What a node wants the driver to do after executing it.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Step {
    /// Not concluded yet. Execute the node again next tick.
    Yield,
    /// Concluded with a result.
    Done(bool),
    /// Run a child; its result comes back through [`BehaviorNode::child_returned`].
    Enter(NodeIndex),
}

impl Step {
    /// Enters `child`, or fails if the reference did not resolve.
    pub fn enter(child: &TreeRef) -> Self {
        match child.handle() {
            Some(handle) => Self::Enter(handle),
            None => {
                tracing::warn!(child = %child.id(), "child reference is not resolved");
                Self::Done(false)
            }
        }
    }
}

impl From<bool> for Step {
    fn from(b: bool) -> Self {
        Self::Done(b)
    }
}

pub type BehaviorCallback<'a> = &'a mut dyn FnMut(&dyn Any) -> Option<Box<dyn Any>>;

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum NumChildren {
    Finite(usize),
    Infinite,
}

impl PartialOrd for NumChildren {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(match (self, other) {
            (NumChildren::Finite(_), NumChildren::Infinite) => std::cmp::Ordering::Less,
            (NumChildren::Infinite, NumChildren::Finite(_)) => std::cmp::Ordering::Greater,
            (NumChildren::Finite(lhs), NumChildren::Finite(rhs)) => lhs.cmp(rhs),
            (NumChildren::Infinite, NumChildren::Infinite) => return None,
        })
    }
}

pub trait BehaviorNode {
    fn execute(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> Step;

    /// Called when a child entered with [`Step::Enter`] concludes.
    fn child_returned(&mut self, _child: NodeIndex, result: bool, _ctx: &mut Context) -> Step {
        Step::Done(result)
    }

    /// Called when the node is stopped before concluding. Release anything
    /// scheduled outside of the tree here.
    fn stop(&mut self, _ctx: &mut Context) {}

    fn on_activated(&mut self) {}

    fn on_deactivated(&mut self) {}

    /// Exposes every reference field so the tree can resolve them.
    fn visit_refs(&mut self, _visitor: &mut dyn RefVisitor) {}

    /// Binds parameters once the tree is assembled.
    fn initialize(&mut self, _init: &InitContext) -> Result<(), error::BindError> {
        Ok(())
    }

    /// Maximum number of tree references. Nodes accepting children are flow
    /// nodes and may own services.
    fn num_children(&self) -> NumChildren {
        NumChildren::Finite(0)
    }
}
