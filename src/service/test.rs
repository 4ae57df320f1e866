use super::*;
use crate::{BehaviorNode, Blackboard, InverterNode, IsTrueNode, Registry, SequenceNode};
use std::rc::Rc;

struct Resolve<'a>(&'a NodeTable);

impl RefVisitor for Resolve<'_> {
    fn visit_tree(&mut self, reference: &mut TreeRef) {
        reference.resolve(self.0);
    }

    fn visit_raw(&mut self, reference: &mut RawRef) {
        reference.resolve(self.0);
    }
}

struct Fixture {
    ctx: Context,
    nodes: Vec<NodeSlot>,
    table: NodeTable,
}

impl Fixture {
    /// The first node is the service owner.
    fn new(nodes: Vec<(&str, Box<dyn BehaviorNode>)>) -> Self {
        let mut table = NodeTable::default();
        let mut slots = vec![];
        for (i, (id, node)) in nodes.into_iter().enumerate() {
            table.insert(id.into(), NodeIndex(i));
            slots.push(NodeSlot::new(id.into(), "test", node));
        }
        for slot in &mut slots {
            if let Some(node) = slot.node.as_mut() {
                node.visit_refs(&mut Resolve(&table));
            }
        }
        Self {
            ctx: Context::new(Rc::new(Registry::default()), Blackboard::default()),
            nodes: slots,
            table,
        }
    }

    fn attach(&self, service: &mut dyn Service) {
        service.visit_refs(&mut Resolve(&self.table));
        service.on_registered();
    }

    fn run(&mut self, service: &mut dyn Service, leaf: Option<&str>) -> ServiceAction {
        let leaf = leaf.and_then(|id| self.table.resolve(id.into()));
        let mut ctx = ServiceContext::new(
            &mut self.ctx,
            &mut self.nodes,
            &self.table,
            NodeIndex(0),
            leaf,
        );
        service.execute(&mut |_| None, &mut ctx)
    }

    fn set(&mut self, key: &str, value: bool) {
        self.ctx.set(key, value);
    }
}

fn node(id: &'static str, node: impl BehaviorNode + 'static) -> (&'static str, Box<dyn BehaviorNode>) {
    (id, Box::new(node))
}

fn owner() -> (&'static str, Box<dyn BehaviorNode>) {
    node("owner", SequenceNode::new(["leaf"]))
}

#[test]
fn test_interval() {
    let mut interval = Interval::new(3);
    assert!(!interval.advance());
    assert!(!interval.advance());
    assert!(interval.advance());
    assert!(interval.advance());
    interval.reset();
    assert!(!interval.advance());

    let mut every_tick = Interval::new(0);
    assert_eq!(every_tick.ticks(), 1);
    assert!(every_tick.advance());
}

#[test]
fn test_update_spawns_once_in_flight() {
    let mut fx = Fixture::new(vec![owner(), node("sub", SequenceNode::new(["leaf"]))]);
    let mut update = UpdateService::new("sub", 2);
    fx.attach(&mut update);
    let root = NodeIndex(1);

    assert!(!update.poll_ready());
    assert!(update.poll_ready());
    assert_eq!(
        fx.run(&mut update, None),
        ServiceAction::Spawn {
            root,
            mode: SpawnMode::Parallel
        }
    );

    // Executing restarts the interval
    assert!(!update.poll_ready());
    assert!(update.poll_ready());
    assert_eq!(fx.run(&mut update, None), ServiceAction::None);

    update.subtree_finished(Some(true));
    assert!(!update.poll_ready());
    assert!(update.poll_ready());
    assert!(matches!(
        fx.run(&mut update, None),
        ServiceAction::Spawn { .. }
    ));
}

#[test]
fn test_update_force_restart() {
    let mut fx = Fixture::new(vec![owner(), node("sub", SequenceNode::new(["leaf"]))]);
    let mut update = UpdateService::new("sub", 1).force_restart(true);
    fx.attach(&mut update);

    assert!(matches!(
        fx.run(&mut update, None),
        ServiceAction::Spawn { .. }
    ));
    assert_eq!(
        fx.run(&mut update, None),
        ServiceAction::Restart {
            root: NodeIndex(1),
            mode: SpawnMode::Parallel
        }
    );
}

#[test]
fn test_unresolved_subtree_does_nothing() {
    let mut fx = Fixture::new(vec![owner()]);
    let mut update = UpdateService::new("missing", 1);
    fx.attach(&mut update);
    assert_eq!(fx.run(&mut update, None), ServiceAction::None);
}

#[test]
fn test_branch_ready_only_when_idle() {
    let mut fx = Fixture::new(vec![owner(), node("sub", SequenceNode::new(["leaf"]))]);
    let mut branch = BranchService::new("sub");
    fx.attach(&mut branch);

    assert!(branch.poll_ready());
    assert_eq!(
        fx.run(&mut branch, None),
        ServiceAction::Spawn {
            root: NodeIndex(1),
            mode: SpawnMode::Stacked
        }
    );
    assert!(!branch.poll_ready());
    branch.subtree_finished(None);
    assert!(branch.poll_ready());

    let mut parallel = ParallelService::new("sub");
    fx.attach(&mut parallel);
    assert_eq!(
        fx.run(&mut parallel, None),
        ServiceAction::Spawn {
            root: NodeIndex(1),
            mode: SpawnMode::Parallel
        }
    );
    assert!(!parallel.poll_ready());
    // Registration resets the service
    parallel.on_registered();
    assert!(parallel.poll_ready());
}

#[test]
fn test_break_condition() {
    let mut fx = Fixture::new(vec![owner(), node("enemy", IsTrueNode::variable("enemy"))]);
    let mut service = BreakService::new("enemy", BreakTarget::OwnerParent).with_result(true);
    fx.attach(&mut service);

    assert_eq!(fx.run(&mut service, None), ServiceAction::None);
    fx.set("enemy", true);
    assert_eq!(
        fx.run(&mut service, None),
        ServiceAction::Break {
            target: BreakTarget::OwnerParent,
            result: true
        }
    );
}

#[test]
fn test_break_ignore_list() {
    let mut fx = Fixture::new(vec![
        owner(),
        node("enemy", IsTrueNode::variable("enemy")),
        node("leaf", IsTrueNode::variable("x")),
        node("other", IsTrueNode::variable("x")),
    ]);
    let mut service = BreakService::new("enemy", BreakTarget::Owner).ignoring(["leaf"]);
    fx.attach(&mut service);
    fx.set("enemy", true);

    assert_eq!(fx.run(&mut service, Some("leaf")), ServiceAction::None);
    assert_eq!(
        fx.run(&mut service, Some("other")),
        ServiceAction::Break {
            target: BreakTarget::Owner,
            result: false
        }
    );
}

#[test]
fn test_break_on_change_baseline() {
    let mut fx = Fixture::new(vec![owner(), node("door", IsTrueNode::variable("open"))]);
    let mut service = BreakOnChangeService::new("door", BreakTarget::Owner);
    fx.attach(&mut service);
    fx.set("open", false);

    // The first observation is the baseline, whatever its value
    assert_eq!(fx.run(&mut service, None), ServiceAction::None);
    assert_eq!(fx.run(&mut service, None), ServiceAction::None);

    fx.set("open", true);
    assert!(matches!(
        fx.run(&mut service, None),
        ServiceAction::Break { .. }
    ));
    // The baseline is observed again after a break
    assert_eq!(fx.run(&mut service, None), ServiceAction::None);
    fx.set("open", false);
    assert!(matches!(
        fx.run(&mut service, None),
        ServiceAction::Break { .. }
    ));

    // Registration starts over with a new baseline
    service.on_registered();
    fx.set("open", true);
    assert_eq!(fx.run(&mut service, None), ServiceAction::None);
}

#[test]
fn test_evaluate_flow_condition() {
    let mut fx = Fixture::new(vec![
        owner(),
        node("not", InverterNode::new("flag")),
        node("flag", IsTrueNode::variable("flag")),
    ]);
    fx.set("flag", true);
    let condition = TreeRef::new("not");
    let mut ctx = ServiceContext::new(&mut fx.ctx, &mut fx.nodes, &fx.table, NodeIndex(0), None);
    assert_eq!(ctx.evaluate(&mut |_| None, &condition), Some(false));
    ctx.context_mut().set("flag", false);
    assert_eq!(ctx.evaluate(&mut |_| None, &condition), Some(true));
    assert_eq!(fx.nodes[1].state, NodeState::Succeeded);
}

#[test]
fn test_timer_counts_down() {
    let mut fx = Fixture::new(vec![owner()]);
    fx.ctx.set("cooldown", 1.);
    fx.ctx.delta = 0.25;
    let mut timer = TimerService::new("cooldown");
    fx.attach(&mut timer);

    assert!(timer.poll_ready());
    assert_eq!(fx.run(&mut timer, None), ServiceAction::None);
    assert_eq!(fx.ctx.get("cooldown"), Some(crate::Value::Float(0.75)));
    fx.run(&mut timer, None);
    assert_eq!(fx.ctx.get("cooldown"), Some(crate::Value::Float(0.5)));
}
