//! Services: auxiliary behaviors attached to flow nodes.
//!
//! A service is registered when its owner is activated and unregistered when
//! the owner leaves the active path. While registered, the driver polls it once
//! per tick with [`Service::poll_ready`] and executes it when ready. Execution
//! returns a [`ServiceAction`] telling the driver to run a subtree or to break.

use crate::{
    container::NodeSlot, error::BindError, BehaviorCallback, Context, InitContext, NodeId,
    NodeIndex, NodeRef, NodeState, NodeTable, Parameter, RawRef, RefKind, RefVisitor,
    SemanticType, Step, Symbol, TreeRef,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How a spawned subtree runs relative to the branch of the service owner.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SpawnMode {
    /// The owner's branch is suspended until the subtree finishes.
    Stacked,
    /// Both branches advance every tick.
    Parallel,
}

/// Where a break unwinds to.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum BreakTarget {
    /// The flow node owning the service. It receives the signal as the result
    /// of its running child.
    Owner,
    /// The parent of the owner. The owner concludes with the signal.
    OwnerParent,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ServiceAction {
    None,
    Spawn { root: NodeIndex, mode: SpawnMode },
    /// Stops the subtree previously spawned by this service and spawns it again.
    Restart { root: NodeIndex, mode: SpawnMode },
    Break { target: BreakTarget, result: bool },
}

pub trait Service {
    /// Called once per tick while registered. The service executes only if this
    /// returns true.
    fn poll_ready(&mut self) -> bool {
        true
    }

    fn execute(&mut self, arg: BehaviorCallback, ctx: &mut ServiceContext) -> ServiceAction;

    fn on_registered(&mut self) {}

    fn on_unregistered(&mut self) {}

    /// A subtree spawned by this service concluded, or was stopped (`None`).
    fn subtree_finished(&mut self, _result: Option<bool>) {}

    fn visit_refs(&mut self, _visitor: &mut dyn RefVisitor) {}

    fn initialize(&mut self, _init: &InitContext) -> Result<(), BindError> {
        Ok(())
    }
}

/// The view of the tree a service gets while it executes.
pub struct ServiceContext<'a> {
    ctx: &'a mut Context,
    nodes: &'a mut [NodeSlot],
    table: &'a NodeTable,
    owner: NodeIndex,
    active_leaf: Option<NodeIndex>,
}

impl<'a> ServiceContext<'a> {
    pub(crate) fn new(
        ctx: &'a mut Context,
        nodes: &'a mut [NodeSlot],
        table: &'a NodeTable,
        owner: NodeIndex,
        active_leaf: Option<NodeIndex>,
    ) -> Self {
        Self {
            ctx,
            nodes,
            table,
            owner,
            active_leaf,
        }
    }

    pub fn context(&self) -> &Context {
        &*self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut *self.ctx
    }

    pub fn owner(&self) -> NodeId {
        self.nodes[self.owner.0].id
    }

    /// The deepest node on the active path through the owner.
    pub fn active_leaf(&self) -> Option<NodeId> {
        self.active_leaf.map(|idx| self.nodes[idx.0].id)
    }

    pub fn lookup_or_self<K: RefKind>(&self, reference: &NodeRef<K>) -> NodeRef<K> {
        self.table.lookup_or_self(reference)
    }

    /// Runs a condition subtree in place and returns its result, or `None` if
    /// it did not conclude this tick. A condition node that is on the active
    /// path is not executed again; its last result is returned instead.
    pub fn evaluate(&mut self, arg: BehaviorCallback, condition: &TreeRef) -> Option<bool> {
        let idx = self.lookup_or_self(condition).handle()?;
        self.run_condition(arg, idx, 0)
    }

    fn run_condition(&mut self, arg: BehaviorCallback, idx: NodeIndex, depth: usize) -> Option<bool> {
        if depth > self.nodes.len() {
            warn!(node = %self.nodes[idx.0].id, "condition recursion too deep");
            return None;
        }
        let slot = &mut self.nodes[idx.0];
        if slot.active {
            return slot.last_result;
        }
        let mut node = slot.node.take()?;
        if slot.state != NodeState::Running {
            slot.state = NodeState::Running;
            node.on_activated();
        }

        // Conditions cannot defer their result.
        let prev = self.ctx.current.take();
        let mut step = node.execute(arg, self.ctx);
        let ret = loop {
            match step {
                Step::Done(result) => break Some(result),
                Step::Yield => break None,
                Step::Enter(child) => match self.run_condition(arg, child, depth + 1) {
                    Some(result) => step = node.child_returned(child, result, self.ctx),
                    None => break None,
                },
            }
        };
        self.ctx.current = prev;

        let slot = &mut self.nodes[idx.0];
        if let Some(result) = ret {
            slot.conclude(result);
            node.on_deactivated();
        }
        slot.node = Some(node);
        ret
    }
}

/// Readiness predicate of services that repeat on a fixed number of ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    ticks: u32,
    idle: u32,
}

impl Interval {
    pub fn new(ticks: u32) -> Self {
        Self {
            ticks: ticks.max(1),
            idle: 0,
        }
    }

    /// Counts one more idle tick and tells whether the interval has elapsed.
    pub fn advance(&mut self) -> bool {
        self.idle = self.idle.saturating_add(1);
        self.idle >= self.ticks
    }

    pub fn reset(&mut self) {
        self.idle = 0;
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn idle(&self) -> u32 {
        self.idle
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Counts a numeric variable down by the tick duration, every tick.
pub struct TimerService {
    variable: Parameter,
}

impl TimerService {
    pub fn new(variable: impl Into<Symbol>) -> Self {
        Self {
            variable: Parameter::variable(SemanticType::Number, variable),
        }
    }
}

impl Service for TimerService {
    fn execute(&mut self, _arg: BehaviorCallback, ctx: &mut ServiceContext) -> ServiceAction {
        if !self.variable.is_bound() {
            self.variable.bind(ctx.context().blackboard());
        }
        let delta = ctx.context().delta_seconds();
        if let Some(value) = self.variable.value().and_then(|v| v.as_f64()) {
            self.variable.set(value - delta);
        }
        ServiceAction::None
    }

    fn initialize(&mut self, init: &InitContext) -> Result<(), BindError> {
        if !self.variable.bind(init.blackboard) {
            debug!(owner = %init.node, "timer variable does not exist yet");
        }
        Ok(())
    }
}

/// Runs a subtree in parallel every few ticks.
pub struct UpdateService {
    subtree: TreeRef,
    interval: Interval,
    force_restart: bool,
    in_flight: bool,
}

impl UpdateService {
    pub fn new(subtree: impl Into<TreeRef>, ticks: u32) -> Self {
        Self {
            subtree: subtree.into(),
            interval: Interval::new(ticks),
            force_restart: false,
            in_flight: false,
        }
    }

    /// Restart the subtree when it is still running at the next interval,
    /// instead of letting it finish.
    pub fn force_restart(mut self, force: bool) -> Self {
        self.force_restart = force;
        self
    }
}

impl Service for UpdateService {
    fn poll_ready(&mut self) -> bool {
        self.interval.advance()
    }

    fn execute(&mut self, _arg: BehaviorCallback, _ctx: &mut ServiceContext) -> ServiceAction {
        self.interval.reset();
        let Some(root) = self.subtree.handle() else {
            warn!(subtree = %self.subtree.id(), "update subtree is not resolved");
            return ServiceAction::None;
        };
        let mode = SpawnMode::Parallel;
        if !self.in_flight {
            self.in_flight = true;
            ServiceAction::Spawn { root, mode }
        } else if self.force_restart {
            ServiceAction::Restart { root, mode }
        } else {
            ServiceAction::None
        }
    }

    fn on_registered(&mut self) {
        self.interval.reset();
        self.in_flight = false;
    }

    fn on_unregistered(&mut self) {
        self.in_flight = false;
    }

    fn subtree_finished(&mut self, _result: Option<bool>) {
        self.in_flight = false;
    }

    fn visit_refs(&mut self, visitor: &mut dyn RefVisitor) {
        visitor.visit_tree(&mut self.subtree);
    }
}

fn is_ignored(ignore: &[RawRef], ctx: &ServiceContext) -> bool {
    ctx.active_leaf()
        .map_or(false, |leaf| ignore.iter().any(|r| *r == leaf))
}

/// Breaks when a condition holds.
pub struct BreakService {
    condition: TreeRef,
    ignore: Vec<RawRef>,
    target: BreakTarget,
    result: bool,
    interval: Interval,
}

impl BreakService {
    pub fn new(condition: impl Into<TreeRef>, target: BreakTarget) -> Self {
        Self {
            condition: condition.into(),
            ignore: vec![],
            target,
            result: false,
            interval: Interval::default(),
        }
    }

    /// The signal delivered to the break target.
    pub fn with_result(mut self, result: bool) -> Self {
        self.result = result;
        self
    }

    /// Does not break while one of these nodes is the active leaf.
    pub fn ignoring<I, R>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RawRef>,
    {
        self.ignore.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn every(mut self, ticks: u32) -> Self {
        self.interval = Interval::new(ticks);
        self
    }
}

impl Service for BreakService {
    fn poll_ready(&mut self) -> bool {
        self.interval.advance()
    }

    fn execute(&mut self, arg: BehaviorCallback, ctx: &mut ServiceContext) -> ServiceAction {
        self.interval.reset();
        if ctx.evaluate(arg, &self.condition) != Some(true) || is_ignored(&self.ignore, ctx) {
            return ServiceAction::None;
        }
        info!(owner = %ctx.owner(), condition = %self.condition.id(), "break condition met");
        ServiceAction::Break {
            target: self.target,
            result: self.result,
        }
    }

    fn on_registered(&mut self) {
        self.interval.reset();
    }

    fn visit_refs(&mut self, visitor: &mut dyn RefVisitor) {
        visitor.visit_tree(&mut self.condition);
        for r in &mut self.ignore {
            visitor.visit_raw(r);
        }
    }
}

/// Breaks when an observed condition changes its value. The first observation
/// after registration, or after a break, only records the baseline.
pub struct BreakOnChangeService {
    event: TreeRef,
    ignore: Vec<RawRef>,
    target: BreakTarget,
    result: bool,
    interval: Interval,
    baseline: Option<bool>,
}

impl BreakOnChangeService {
    pub fn new(event: impl Into<TreeRef>, target: BreakTarget) -> Self {
        Self {
            event: event.into(),
            ignore: vec![],
            target,
            result: false,
            interval: Interval::default(),
            baseline: None,
        }
    }

    pub fn with_result(mut self, result: bool) -> Self {
        self.result = result;
        self
    }

    pub fn ignoring<I, R>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RawRef>,
    {
        self.ignore.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn every(mut self, ticks: u32) -> Self {
        self.interval = Interval::new(ticks);
        self
    }
}

impl Service for BreakOnChangeService {
    fn poll_ready(&mut self) -> bool {
        self.interval.advance()
    }

    fn execute(&mut self, arg: BehaviorCallback, ctx: &mut ServiceContext) -> ServiceAction {
        self.interval.reset();
        let Some(value) = ctx.evaluate(arg, &self.event) else {
            return ServiceAction::None;
        };
        match self.baseline {
            None => {
                self.baseline = Some(value);
                ServiceAction::None
            }
            Some(baseline) if baseline == value => ServiceAction::None,
            Some(_) => {
                if is_ignored(&self.ignore, ctx) {
                    return ServiceAction::None;
                }
                info!(owner = %ctx.owner(), event = %self.event.id(), value, "observed value changed");
                self.baseline = None;
                ServiceAction::Break {
                    target: self.target,
                    result: self.result,
                }
            }
        }
    }

    fn on_registered(&mut self) {
        self.interval.reset();
        self.baseline = None;
    }

    fn visit_refs(&mut self, visitor: &mut dyn RefVisitor) {
        visitor.visit_tree(&mut self.event);
        for r in &mut self.ignore {
            visitor.visit_raw(r);
        }
    }
}

/// Shared state of the services that run one subtree at a time.
struct Spawner {
    subtree: TreeRef,
    in_flight: bool,
}

impl Spawner {
    fn new(subtree: TreeRef) -> Self {
        Self {
            subtree,
            in_flight: false,
        }
    }

    fn spawn(&mut self, mode: SpawnMode) -> ServiceAction {
        match self.subtree.handle() {
            Some(root) => {
                self.in_flight = true;
                ServiceAction::Spawn { root, mode }
            }
            None => {
                warn!(subtree = %self.subtree.id(), "subtree is not resolved");
                ServiceAction::None
            }
        }
    }
}

/// Runs a subtree while suspending the branch it is attached to.
pub struct BranchService(Spawner);

impl BranchService {
    pub fn new(subtree: impl Into<TreeRef>) -> Self {
        Self(Spawner::new(subtree.into()))
    }
}

impl Service for BranchService {
    fn poll_ready(&mut self) -> bool {
        !self.0.in_flight
    }

    fn execute(&mut self, _arg: BehaviorCallback, _ctx: &mut ServiceContext) -> ServiceAction {
        self.0.spawn(SpawnMode::Stacked)
    }

    fn on_registered(&mut self) {
        self.0.in_flight = false;
    }

    fn on_unregistered(&mut self) {
        self.0.in_flight = false;
    }

    fn subtree_finished(&mut self, _result: Option<bool>) {
        self.0.in_flight = false;
    }

    fn visit_refs(&mut self, visitor: &mut dyn RefVisitor) {
        visitor.visit_tree(&mut self.0.subtree);
    }
}

/// Runs a subtree concurrently with the branch it is attached to.
pub struct ParallelService(Spawner);

impl ParallelService {
    pub fn new(subtree: impl Into<TreeRef>) -> Self {
        Self(Spawner::new(subtree.into()))
    }
}

impl Service for ParallelService {
    fn poll_ready(&mut self) -> bool {
        !self.0.in_flight
    }

    fn execute(&mut self, _arg: BehaviorCallback, _ctx: &mut ServiceContext) -> ServiceAction {
        self.0.spawn(SpawnMode::Parallel)
    }

    fn on_registered(&mut self) {
        self.0.in_flight = false;
    }

    fn on_unregistered(&mut self) {
        self.0.in_flight = false;
    }

    fn subtree_finished(&mut self, _result: Option<bool>) {
        self.0.in_flight = false;
    }

    fn visit_refs(&mut self, visitor: &mut dyn RefVisitor) {
        visitor.visit_tree(&mut self.0.subtree);
    }
}

#[cfg(test)]
mod test;
