//! The tree driver.
//!
//! Execution state lives in *branches*: stacks of active nodes, the deepest on
//! top. The main branch starts at the root. Services spawn further branches,
//! either stacked (the branch hosting the service is suspended until the spawned
//! one finishes) or parallel (both advance every tick).
//!
//! A tick first records conclusions of finished waits, then ticks the active
//! services innermost first, then advances every branch that is not suspended.

use crate::{
    config::DriverConfig,
    container::{NodeSlot, ServiceSlot},
    context::{Blackboard, Context, InitContext},
    error::BuildError,
    service::{BreakTarget, Service, ServiceAction, ServiceContext, SpawnMode},
    BehaviorCallback, BehaviorNode, BehaviorResult, NodeId, NodeIndex, NodeRef, NodeState,
    NodeTable, NumChildren, RawRef, RefKind, RefVisitor, Registry, Step, Symbol, TreeRef, Value,
};
use std::rc::Rc;
use tracing::{debug, info, trace, warn};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct BranchId(u64);

const MAIN_BRANCH: BranchId = BranchId(0);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct ServiceKey {
    owner: NodeIndex,
    slot: usize,
}

struct Branch {
    id: BranchId,
    frames: Vec<NodeIndex>,
    /// The service that spawned this branch. `None` for the main branch.
    origin: Option<ServiceKey>,
    mode: SpawnMode,
}

enum Settled {
    Entered,
    Yielded,
    Finished,
}

struct Resolver<'a> {
    table: &'a NodeTable,
    children: Vec<NodeIndex>,
    unresolved: Vec<NodeId>,
}

impl RefVisitor for Resolver<'_> {
    fn visit_tree(&mut self, reference: &mut TreeRef) {
        match reference.resolve(self.table) {
            Some(idx) => self.children.push(idx),
            None if reference.has_id() => self.unresolved.push(reference.id()),
            None => (),
        }
    }

    fn visit_raw(&mut self, reference: &mut RawRef) {
        if reference.resolve(self.table).is_none() && reference.has_id() {
            self.unresolved.push(reference.id());
        }
    }
}

/// Assembles a [`Tree`] from nodes addressed by identifier.
pub struct TreeBuilder {
    nodes: Vec<NodeSlot>,
    table: NodeTable,
    root: Option<NodeId>,
    registry: Rc<Registry>,
    blackboard: Blackboard,
    config: DriverConfig,
}

impl TreeBuilder {
    pub fn new(registry: Rc<Registry>) -> Self {
        Self {
            nodes: vec![],
            table: NodeTable::default(),
            root: None,
            registry,
            blackboard: Blackboard::default(),
            config: DriverConfig::default(),
        }
    }

    pub fn set_config(&mut self, config: DriverConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Adds a node. An empty identifier is replaced by a generated one, which is
    /// returned.
    pub fn add_node<N: BehaviorNode + 'static>(
        &mut self,
        id: impl Into<NodeId>,
        node: N,
    ) -> Result<NodeId, BuildError> {
        self.add_boxed(id, std::any::type_name::<N>(), Box::new(node))
    }

    pub fn add_boxed(
        &mut self,
        id: impl Into<NodeId>,
        name: &'static str,
        node: Box<dyn BehaviorNode>,
    ) -> Result<NodeId, BuildError> {
        let mut id = id.into();
        if id.is_empty() {
            id = NodeId::generate();
        }
        if !self.table.insert(id, NodeIndex(self.nodes.len())) {
            return Err(BuildError::DuplicateNode(id));
        }
        self.nodes.push(NodeSlot::new(id, name, node));
        Ok(id)
    }

    /// Attaches a service to a flow node.
    pub fn add_service<S: Service + 'static>(
        &mut self,
        owner: impl Into<NodeId>,
        service: S,
    ) -> Result<(), BuildError> {
        let owner = owner.into();
        let idx = self
            .table
            .resolve(owner)
            .ok_or(BuildError::UnknownNode(owner))?;
        let slot = &mut self.nodes[idx.0];
        if !slot.is_flow() {
            return Err(BuildError::NotAFlowNode(owner));
        }
        slot.services
            .push(ServiceSlot::new(std::any::type_name::<S>(), Box::new(service)));
        Ok(())
    }

    pub fn set_root(&mut self, id: impl Into<NodeId>) -> &mut Self {
        self.root = Some(id.into());
        self
    }

    pub fn set_var(&mut self, key: impl Into<Symbol>, value: impl Into<Value>) -> &mut Self {
        self.blackboard.set(key, value);
        self
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    /// Resolves every reference, checks the structure and binds parameters.
    pub fn build(self) -> Result<Tree, BuildError> {
        let root_id = self.root.ok_or(BuildError::NoRoot)?;
        let root = self
            .table
            .resolve(root_id)
            .ok_or(BuildError::MissingRoot(root_id))?;
        let TreeBuilder {
            mut nodes,
            table,
            registry,
            blackboard,
            config,
            ..
        } = self;

        let mut edges = Vec::with_capacity(nodes.len());
        for slot in &mut nodes {
            let mut resolver = Resolver {
                table: &table,
                children: vec![],
                unresolved: vec![],
            };
            if let Some(node) = slot.node.as_mut() {
                node.visit_refs(&mut resolver);
                let count = resolver.children.len();
                if NumChildren::Finite(count) > node.num_children() {
                    return Err(BuildError::TooManyChildren {
                        node: slot.id,
                        count,
                    });
                }
            }
            for service in &mut slot.services {
                if let Some(service) = service.service.as_mut() {
                    service.visit_refs(&mut resolver);
                }
            }
            for id in &resolver.unresolved {
                warn!(node = %slot.id, reference = %id, "reference does not name a node");
            }
            edges.push(resolver.children);
        }

        for (parent, children) in edges.into_iter().enumerate() {
            for child in children {
                if child.0 == parent {
                    return Err(BuildError::Cycle(nodes[parent].id));
                }
                match nodes[child.0].parent {
                    Some(other) if other.0 != parent => {
                        return Err(BuildError::MultipleParents(nodes[child.0].id))
                    }
                    _ => nodes[child.0].parent = Some(NodeIndex(parent)),
                }
            }
        }
        for start in 0..nodes.len() {
            let mut cur = nodes[start].parent;
            let mut steps = 0;
            while let Some(p) = cur {
                if p.0 == start || steps > nodes.len() {
                    return Err(BuildError::Cycle(nodes[start].id));
                }
                steps += 1;
                cur = nodes[p.0].parent;
            }
        }

        for slot in &mut nodes {
            let id = slot.id;
            let init = InitContext {
                registry: &registry,
                blackboard: &blackboard,
                table: &table,
                node: id,
            };
            if let Some(node) = slot.node.as_mut() {
                node.initialize(&init)
                    .map_err(|source| BuildError::Bind { node: id, source })?;
            }
            for service in &mut slot.services {
                if let Some(service) = service.service.as_mut() {
                    service
                        .initialize(&init)
                        .map_err(|source| BuildError::Bind { node: id, source })?;
                }
            }
        }

        info!(nodes = nodes.len(), root = %root_id, "tree built");
        let paused = config.start_paused;
        Ok(Tree {
            nodes,
            table,
            root,
            ctx: Context::new(registry, blackboard),
            branches: vec![Branch {
                id: MAIN_BRANCH,
                frames: vec![],
                origin: None,
                mode: SpawnMode::Stacked,
            }],
            next_branch: 1,
            services: vec![],
            generation: 0,
            config,
            paused,
            result: None,
        })
    }
}

/// A behavior tree instance ready to tick.
pub struct Tree {
    nodes: Vec<NodeSlot>,
    table: NodeTable,
    root: NodeIndex,
    ctx: Context,
    branches: Vec<Branch>,
    next_branch: u64,
    /// Registered services, outermost first.
    services: Vec<ServiceKey>,
    generation: u64,
    config: DriverConfig,
    paused: bool,
    result: Option<bool>,
}

impl Tree {
    pub fn builder(registry: Rc<Registry>) -> TreeBuilder {
        TreeBuilder::new(registry)
    }

    /// Advances the tree by one tick. Starts over from the root if the tree
    /// concluded in an earlier tick, unless configured otherwise.
    pub fn tick(&mut self, arg: BehaviorCallback) -> BehaviorResult {
        if self.paused {
            return self.status();
        }
        self.ctx.frame += 1;
        self.ctx.delta = self.config.tick_seconds;

        if self.main().frames.is_empty() {
            if self.result.is_some() {
                if !self.config.restart_on_completion {
                    return self.status();
                }
                self.result = None;
            }
            debug!(frame = self.ctx.frame, "starting from the root");
            self.push_frame(MAIN_BRANCH, self.root);
        }

        self.poll_waits();
        self.tick_services(arg);
        self.advance(arg);
        self.status()
    }

    /// Polls the wait predicates and records the conclusions of finished waits.
    /// The results propagate on the next tick. Returns the number of nodes
    /// that concluded.
    pub fn poll_waits(&mut self) -> usize {
        let mut concluded = 0;
        for (node, result) in self.ctx.waits.poll() {
            let slot = &mut self.nodes[node.0];
            if slot.conclude(result) {
                debug!(node = %slot.id, result, "wait finished");
                concluded += 1;
            }
        }
        concluded
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Stops every running node. The next tick starts from the root.
    pub fn stop(&mut self) {
        let ids: Vec<BranchId> = self.branches.iter().rev().map(|b| b.id).collect();
        for id in ids {
            self.stop_branch(id);
        }
        self.ctx.waits.cancel_all();
        self.result = None;
    }

    /// Stops a node and everything running beneath it. Its parent is executed
    /// again on the next tick. Returns false if the node was not running.
    pub fn stop_node(&mut self, id: impl Into<NodeId>) -> bool {
        let Some(idx) = self.table.resolve(id.into()) else {
            return false;
        };
        let Some(bid) = self.branch_of(idx) else {
            let slot = &self.nodes[idx.0];
            if !slot.active && slot.state == NodeState::Ready {
                return false;
            }
            return self.stop_slot(idx);
        };
        let Some(pos) = self.branch_pos(bid) else {
            return false;
        };
        let Some(at) = self.branches[pos].frames.iter().position(|&f| f == idx) else {
            return false;
        };
        let origin = self.branches[pos].origin;
        self.truncate(bid, at);
        if at == 0 && bid != MAIN_BRANCH {
            self.remove_branch(bid);
            if let Some(key) = origin {
                self.notify_origin(key, None);
            }
        }
        true
    }

    /// Concludes an active node from outside of the tick. Only the first
    /// conclusion counts; it propagates on the next tick.
    pub fn conclude(&mut self, id: impl Into<NodeId>, result: bool) -> bool {
        let Some(idx) = self.table.resolve(id.into()) else {
            return false;
        };
        let slot = &mut self.nodes[idx.0];
        if !slot.active || !slot.conclude(result) {
            return false;
        }
        debug!(node = %slot.id, result, "concluded externally");
        self.ctx.waits.cancel_node(idx);
        true
    }

    pub fn status(&self) -> BehaviorResult {
        match self.result {
            Some(true) => BehaviorResult::Success,
            Some(false) => BehaviorResult::Fail,
            None => BehaviorResult::Running,
        }
    }

    pub fn state(&self, id: impl Into<NodeId>) -> Option<NodeState> {
        self.slot(id.into()).map(|slot| slot.state)
    }

    pub fn last_result(&self, id: impl Into<NodeId>) -> Option<bool> {
        self.slot(id.into()).and_then(|slot| slot.last_result)
    }

    pub fn parent(&self, id: impl Into<NodeId>) -> Option<NodeId> {
        let parent = self.slot(id.into())?.parent?;
        Some(self.nodes[parent.0].id)
    }

    pub fn node_id(&self, idx: NodeIndex) -> Option<NodeId> {
        self.nodes.get(idx.0).map(|slot| slot.id)
    }

    pub fn lookup_or_self<K: RefKind>(&self, reference: &NodeRef<K>) -> NodeRef<K> {
        self.table.lookup_or_self(reference)
    }

    /// Nodes of the main branch, root first.
    pub fn active_path(&self) -> Vec<NodeId> {
        self.main()
            .frames
            .iter()
            .map(|idx| self.nodes[idx.0].id)
            .collect()
    }

    /// Registered services as (owner, service type), outermost first.
    pub fn active_services(&self) -> Vec<(NodeId, &'static str)> {
        self.services
            .iter()
            .map(|key| {
                let owner = &self.nodes[key.owner.0];
                (owner.id, owner.services[key.slot].name)
            })
            .collect()
    }

    /// Number of branches spawned by services that are still running.
    pub fn spawned_branches(&self) -> usize {
        self.branches.len() - 1
    }

    pub fn frame(&self) -> u64 {
        self.ctx.frame
    }

    pub fn blackboard(&self) -> &Blackboard {
        self.ctx.blackboard()
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        self.ctx.blackboard_mut()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    fn slot(&self, id: NodeId) -> Option<&NodeSlot> {
        self.table.resolve(id).map(|idx| &self.nodes[idx.0])
    }

    fn main(&self) -> &Branch {
        &self.branches[0]
    }

    fn branch_pos(&self, id: BranchId) -> Option<usize> {
        self.branches.iter().position(|b| b.id == id)
    }

    fn branch_of(&self, node: NodeIndex) -> Option<BranchId> {
        self.branches
            .iter()
            .find(|b| b.frames.contains(&node))
            .map(|b| b.id)
    }

    fn remove_branch(&mut self, id: BranchId) {
        if let Some(pos) = self.branch_pos(id) {
            let branch = self.branches.remove(pos);
            trace!(branch = branch.id.0, "branch removed");
        }
    }

    fn push_frame(&mut self, bid: BranchId, idx: NodeIndex) {
        let Some(pos) = self.branch_pos(bid) else {
            return;
        };
        self.branches[pos].frames.push(idx);
        self.activate(idx);
    }

    fn activate(&mut self, idx: NodeIndex) {
        let slot = &mut self.nodes[idx.0];
        slot.active = true;
        slot.state = NodeState::Ready;
        trace!(node = %slot.id, kind = slot.name, "activated");
        if let Some(node) = slot.node.as_mut() {
            node.on_activated();
        }
        for (i, service) in slot.services.iter_mut().enumerate() {
            self.generation += 1;
            service.registered = true;
            service.generation = self.generation;
            if let Some(service) = service.service.as_mut() {
                service.on_registered();
            }
            self.services.push(ServiceKey { owner: idx, slot: i });
        }
    }

    /// Takes a node off the active path. Branches spawned by its services are
    /// stopped first, then its services are unregistered innermost first.
    fn deactivate(&mut self, idx: NodeIndex) {
        self.stop_hosted(idx);
        let slot = &mut self.nodes[idx.0];
        for (i, service) in slot.services.iter_mut().enumerate().rev() {
            if !service.registered {
                continue;
            }
            service.registered = false;
            if let Some(service) = service.service.as_mut() {
                service.on_unregistered();
            }
            let key = ServiceKey { owner: idx, slot: i };
            self.services.retain(|k| *k != key);
        }
        if let Some(node) = slot.node.as_mut() {
            node.on_deactivated();
        }
        slot.active = false;
        trace!(node = %slot.id, "deactivated");
    }

    fn stop_hosted(&mut self, idx: NodeIndex) {
        let hosted: Vec<BranchId> = self
            .branches
            .iter()
            .rev()
            .filter(|b| b.origin.map_or(false, |key| key.owner == idx))
            .map(|b| b.id)
            .collect();
        for id in hosted {
            self.stop_branch(id);
        }
    }

    fn stop_slot(&mut self, idx: NodeIndex) -> bool {
        let slot = &mut self.nodes[idx.0];
        if !slot.mark_stopped() {
            return false;
        }
        debug!(node = %slot.id, "stopped");
        if let Some(mut node) = slot.node.take() {
            node.stop(&mut self.ctx);
            self.nodes[idx.0].node = Some(node);
        }
        self.ctx.waits.cancel_node(idx);
        true
    }

    fn retire(&mut self, idx: NodeIndex) {
        self.stop_hosted(idx);
        self.stop_slot(idx);
        self.deactivate(idx);
    }

    /// Stops the frames of a branch above `len`, deepest first.
    fn truncate(&mut self, bid: BranchId, len: usize) {
        loop {
            let Some(pos) = self.branch_pos(bid) else {
                return;
            };
            let frames = &mut self.branches[pos].frames;
            if frames.len() <= len {
                return;
            }
            if let Some(top) = frames.pop() {
                self.retire(top);
            }
        }
    }

    fn stop_branch(&mut self, bid: BranchId) {
        self.truncate(bid, 0);
        if bid != MAIN_BRANCH {
            self.remove_branch(bid);
        }
    }

    fn notify_origin(&mut self, key: ServiceKey, result: Option<bool>) {
        let slot = &mut self.nodes[key.owner.0].services[key.slot];
        if !slot.registered {
            return;
        }
        if let Some(service) = slot.service.as_mut() {
            service.subtree_finished(result);
        }
    }

    fn execute(&mut self, idx: NodeIndex, arg: BehaviorCallback) -> Step {
        let slot = &mut self.nodes[idx.0];
        slot.state = NodeState::Running;
        let Some(mut node) = slot.node.take() else {
            return Step::Done(false);
        };
        self.ctx.current = Some(idx);
        let step = node.execute(arg, &mut self.ctx);
        self.ctx.current = None;
        self.nodes[idx.0].node = Some(node);
        step
    }

    fn child_returned(&mut self, parent: NodeIndex, child: NodeIndex, result: bool) -> Step {
        let Some(mut node) = self.nodes[parent.0].node.take() else {
            return Step::Done(false);
        };
        let prev = self.ctx.current.replace(parent);
        let step = node.child_returned(child, result, &mut self.ctx);
        self.ctx.current = prev;
        self.nodes[parent.0].node = Some(node);
        step
    }

    /// Applies what `node`, the top of branch `bid`, asked for. Conclusions are
    /// handed up the branch until a node yields or enters a child.
    fn settle(&mut self, bid: BranchId, mut node: NodeIndex, mut step: Step) -> Settled {
        loop {
            match step {
                Step::Yield => return Settled::Yielded,
                Step::Enter(child) => {
                    if child == node || self.nodes[child.0].active {
                        warn!(
                            node = %self.nodes[node.0].id,
                            child = %self.nodes[child.0].id,
                            "child is already running"
                        );
                        step = Step::Done(false);
                        continue;
                    }
                    self.push_frame(bid, child);
                    return Settled::Entered;
                }
                Step::Done(result) => {
                    let slot = &mut self.nodes[node.0];
                    let result = if slot.conclude(result) {
                        debug!(node = %slot.id, result, "concluded");
                        result
                    } else {
                        slot.last_result.unwrap_or(result)
                    };
                    let Some(pos) = self.branch_pos(bid) else {
                        return Settled::Finished;
                    };
                    let frames = &mut self.branches[pos].frames;
                    if frames.last() != Some(&node) {
                        warn!(node = %self.nodes[node.0].id, "concluded node is not on top");
                        return Settled::Finished;
                    }
                    frames.pop();
                    let parent = frames.last().copied();
                    self.deactivate(node);
                    match parent {
                        Some(p) if self.nodes[p.0].state.is_concluded() => {
                            step = Step::Done(self.nodes[p.0].last_result.unwrap_or(false));
                            node = p;
                        }
                        Some(p) => {
                            step = self.child_returned(p, node, result);
                            node = p;
                        }
                        None => {
                            self.branch_finished(bid, result);
                            return Settled::Finished;
                        }
                    }
                }
            }
        }
    }

    fn branch_finished(&mut self, bid: BranchId, result: bool) {
        if bid == MAIN_BRANCH {
            info!(result, frame = self.ctx.frame, "tree concluded");
            self.result = Some(result);
            return;
        }
        let Some(pos) = self.branch_pos(bid) else {
            return;
        };
        let branch = self.branches.remove(pos);
        debug!(branch = bid.0, result, "spawned subtree concluded");
        if let Some(key) = branch.origin {
            self.notify_origin(key, Some(result));
        }
    }

    fn advance(&mut self, arg: BehaviorCallback) {
        let ids: Vec<BranchId> = self.branches.iter().map(|b| b.id).collect();
        for id in ids {
            if self.is_suspended(id) {
                trace!(branch = id.0, "suspended");
                continue;
            }
            self.advance_branch(id, arg);
        }
    }

    /// A branch is suspended while a stacked branch spawned from one of its
    /// nodes is running.
    fn is_suspended(&self, id: BranchId) -> bool {
        let Some(pos) = self.branch_pos(id) else {
            return true;
        };
        let frames = &self.branches[pos].frames;
        self.branches.iter().any(|b| {
            b.mode == SpawnMode::Stacked
                && b.origin.map_or(false, |key| frames.contains(&key.owner))
        })
    }

    fn advance_branch(&mut self, bid: BranchId, arg: BehaviorCallback) {
        for _ in 0..self.config.max_steps_per_tick {
            let Some(pos) = self.branch_pos(bid) else {
                return;
            };
            let frames = &self.branches[pos].frames;
            let Some(&top) = frames.last() else {
                return;
            };

            // Nodes concluded from outside take the nodes above them down.
            let concluded = frames
                .iter()
                .position(|f| self.nodes[f.0].state.is_concluded());
            let (node, step) = if let Some(at) = concluded {
                let node = frames[at];
                self.truncate(bid, at + 1);
                (node, Step::Done(self.nodes[node.0].last_result.unwrap_or(false)))
            } else if self.ctx.waits.is_waiting(top) {
                return;
            } else {
                (top, self.execute(top, arg))
            };

            match self.settle(bid, node, step) {
                Settled::Entered => continue,
                Settled::Yielded | Settled::Finished => return,
            }
        }
        trace!(branch = bid.0, "step budget exhausted");
    }

    fn tick_services(&mut self, arg: BehaviorCallback) {
        let snapshot: Vec<(ServiceKey, u64)> = self
            .services
            .iter()
            .map(|key| (*key, self.nodes[key.owner.0].services[key.slot].generation))
            .collect();
        for (key, generation) in snapshot.into_iter().rev() {
            let slot = &self.nodes[key.owner.0].services[key.slot];
            // Unregistered, or registered again, by an earlier service this tick.
            if !slot.registered || slot.generation != generation {
                continue;
            }
            let action = self.run_service(key, arg);
            self.apply(key, action);
        }
    }

    fn active_leaf(&self, owner: NodeIndex) -> Option<NodeIndex> {
        self.branches
            .iter()
            .find(|b| b.frames.contains(&owner))
            .and_then(|b| b.frames.last().copied())
    }

    fn run_service(&mut self, key: ServiceKey, arg: BehaviorCallback) -> ServiceAction {
        let leaf = self.active_leaf(key.owner);
        let Some(mut service) = self.nodes[key.owner.0].services[key.slot].service.take() else {
            return ServiceAction::None;
        };
        let action = if service.poll_ready() {
            let mut ctx =
                ServiceContext::new(&mut self.ctx, &mut self.nodes, &self.table, key.owner, leaf);
            service.execute(arg, &mut ctx)
        } else {
            ServiceAction::None
        };
        self.nodes[key.owner.0].services[key.slot].service = Some(service);
        action
    }

    fn apply(&mut self, key: ServiceKey, action: ServiceAction) {
        match action {
            ServiceAction::None => (),
            ServiceAction::Spawn { root, mode } => self.spawn(key, root, mode),
            ServiceAction::Restart { root, mode } => {
                let previous: Vec<BranchId> = self
                    .branches
                    .iter()
                    .filter(|b| b.origin == Some(key))
                    .map(|b| b.id)
                    .collect();
                for id in previous {
                    self.stop_branch(id);
                }
                self.spawn(key, root, mode);
            }
            ServiceAction::Break { target, result } => {
                let owner = key.owner;
                let target = match target {
                    BreakTarget::Owner => Some(owner),
                    BreakTarget::OwnerParent => self.nodes[owner.0].parent,
                };
                self.unwind(owner, target, result);
            }
        }
    }

    fn spawn(&mut self, key: ServiceKey, root: NodeIndex, mode: SpawnMode) {
        let owner = self.nodes[key.owner.0].id;
        if self.nodes[root.0].active {
            warn!(owner = %owner, root = %self.nodes[root.0].id, "subtree is already running");
            self.notify_origin(key, None);
            return;
        }
        let id = BranchId(self.next_branch);
        self.next_branch += 1;
        debug!(owner = %owner, root = %self.nodes[root.0].id, ?mode, branch = id.0, "spawned subtree");
        self.branches.push(Branch {
            id,
            frames: vec![],
            origin: Some(key),
            mode,
        });
        self.push_frame(id, root);
    }

    /// Unwinds execution from the service owner to `target`. Everything between
    /// is stopped deepest first, and the node directly below the target concludes
    /// with `signal`. Without a target on the way, the tree concludes with
    /// `signal`.
    fn unwind(&mut self, owner: NodeIndex, target: Option<NodeIndex>, signal: bool) {
        info!(
            owner = %self.nodes[owner.0].id,
            target = ?target.map(|t| self.nodes[t.0].id),
            signal,
            "break"
        );
        let Some(mut bid) = self.branch_of(owner) else {
            return;
        };
        loop {
            let Some(pos) = self.branch_pos(bid) else {
                return;
            };
            let frames = &self.branches[pos].frames;
            if let Some(at) = target.and_then(|t| frames.iter().position(|&f| f == t)) {
                match frames.get(at + 1).copied() {
                    Some(child) => {
                        let target = frames[at];
                        self.truncate(bid, at + 1);
                        let step = if self.nodes[target.0].state.is_concluded() {
                            Step::Done(self.nodes[target.0].last_result.unwrap_or(signal))
                        } else {
                            self.child_returned(target, child, signal)
                        };
                        self.settle(bid, target, step);
                    }
                    None => {
                        let node = frames[at];
                        self.settle(bid, node, Step::Done(signal));
                    }
                }
                return;
            }

            let origin = self.branches[pos].origin;
            self.stop_branch(bid);
            match origin {
                Some(key) => {
                    self.notify_origin(key, None);
                    match self.branch_of(key.owner) {
                        Some(host) => bid = host,
                        None => return,
                    }
                }
                None => {
                    info!(signal, "break left the tree");
                    self.result = Some(signal);
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("nodes", &self.nodes.len())
            .field("root", &self.nodes[self.root.0].id)
            .field("active_path", &self.active_path())
            .field("spawned_branches", &self.spawned_branches())
            .field("result", &self.result)
            .finish()
    }
}
