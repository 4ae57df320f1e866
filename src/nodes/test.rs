use super::*;
use crate::{
    error::{BindError, BuildError},
    BehaviorResult, DriverConfig, NativeType, NodeId, Registry, Tree, TreeBuilder, Value,
};
use std::any::Any;

struct Append<const V: bool = true>;

impl<const V: bool> BehaviorNode for Append<V> {
    fn execute(&mut self, arg: BehaviorCallback, _ctx: &mut Context) -> Step {
        arg(&V);
        Step::Done(true)
    }
}

struct AppendAndFail<const V: bool = true>;

impl<const V: bool> BehaviorNode for AppendAndFail<V> {
    fn execute(&mut self, arg: BehaviorCallback, _ctx: &mut Context) -> Step {
        arg(&V);
        Step::Done(false)
    }
}

struct Suspend;

impl BehaviorNode for Suspend {
    fn execute(&mut self, _arg: BehaviorCallback, _ctx: &mut Context) -> Step {
        Step::Yield
    }
}

fn builder() -> TreeBuilder {
    TreeBuilder::new(Rc::new(Registry::default()))
}

fn tick_collect(tree: &mut Tree, res: &mut Vec<bool>) -> BehaviorResult {
    tree.tick(&mut |v: &dyn Any| {
        res.push(*v.downcast_ref::<bool>().unwrap());
        None
    })
}

#[test]
fn test_sequence() {
    let mut res = vec![];

    let mut b = builder();
    b.add_node("root", SequenceNode::new(["a", "b"])).unwrap();
    b.add_node("a", Append::<true>).unwrap();
    b.add_node("b", Append::<false>).unwrap();
    b.set_root("root");
    let mut tree = b.build().unwrap();

    assert_eq!(BehaviorResult::Success, tick_collect(&mut tree, &mut res));
    assert_eq!(res, vec![true, false]);

    let mut res = vec![];
    let mut b = builder();
    b.add_node("root", SequenceNode::new(["a", "b"])).unwrap();
    b.add_node("a", AppendAndFail::<true>).unwrap();
    b.add_node("b", AppendAndFail::<false>).unwrap();
    b.set_root("root");
    let mut tree = b.build().unwrap();

    assert_eq!(BehaviorResult::Fail, tick_collect(&mut tree, &mut res));
    assert_eq!(res, vec![true]);
}

#[test]
fn test_sequence_suspend() {
    let mut res = vec![];

    let mut b = builder();
    b.add_node("root", SequenceNode::new(["a", "wait", "b"]))
        .unwrap();
    b.add_node("a", Append::<true>).unwrap();
    b.add_node("wait", Suspend).unwrap();
    b.add_node("b", Append::<false>).unwrap();
    b.set_root("root");
    let mut tree = b.build().unwrap();

    assert_eq!(tick_collect(&mut tree, &mut res), BehaviorResult::Running);
    assert_eq!(res, vec![true]);

    // Ticking again resumes the suspended child, not the sequence
    tick_collect(&mut tree, &mut res);
    assert_eq!(res, vec![true]);
    assert_eq!(
        tree.active_path(),
        vec![NodeId::from("root"), NodeId::from("wait")]
    );
}

#[test]
fn test_fallback() {
    let mut res = vec![];

    let mut b = builder();
    b.add_node("root", FallbackNode::new(["a", "b", "c"]))
        .unwrap();
    b.add_node("a", AppendAndFail::<true>).unwrap();
    b.add_node("b", Append::<false>).unwrap();
    b.add_node("c", Append::<true>).unwrap();
    b.set_root("root");
    let mut tree = b.build().unwrap();

    assert_eq!(BehaviorResult::Success, tick_collect(&mut tree, &mut res));
    assert_eq!(res, vec![true, false]);

    let mut b = builder();
    b.add_node("root", FallbackNode::new(["a"])).unwrap();
    b.add_node("a", AppendAndFail::<true>).unwrap();
    b.set_root("root");
    let mut tree = b.build().unwrap();
    assert_eq!(BehaviorResult::Fail, tree.tick(&mut |_| None));
}

fn decorated(node: impl BehaviorNode + 'static, child_succeeds: bool) -> BehaviorResult {
    let mut b = builder();
    b.add_node("root", node).unwrap();
    if child_succeeds {
        b.add_node("child", Append::<true>).unwrap();
    } else {
        b.add_node("child", AppendAndFail::<true>).unwrap();
    }
    b.set_root("root");
    let mut tree = b.build().unwrap();
    tree.tick(&mut |_| None)
}

#[test]
fn test_force_success() {
    assert_eq!(
        decorated(ForceSuccessNode::new("child"), true),
        BehaviorResult::Success
    );
    assert_eq!(
        decorated(ForceSuccessNode::new("child"), false),
        BehaviorResult::Success
    );
}

#[test]
fn test_force_failure() {
    assert_eq!(
        decorated(ForceFailureNode::new("child"), true),
        BehaviorResult::Fail
    );
    assert_eq!(
        decorated(ForceFailureNode::new("child"), false),
        BehaviorResult::Fail
    );
}

#[test]
fn test_inverter() {
    assert_eq!(
        decorated(InverterNode::new("child"), true),
        BehaviorResult::Fail
    );
    assert_eq!(
        decorated(InverterNode::new("child"), false),
        BehaviorResult::Success
    );
}

#[test]
fn test_inverter_running() {
    let mut b = builder();
    b.add_node("root", InverterNode::new("child")).unwrap();
    b.add_node("child", Suspend).unwrap();
    b.set_root("root");
    let mut tree = b.build().unwrap();
    assert_eq!(tree.tick(&mut |_| None), BehaviorResult::Running);
}

#[test]
fn test_repeat() {
    let mut res = vec![];

    let mut b = builder();
    b.add_node("root", RepeatNode::times("child", 3)).unwrap();
    b.add_node("child", Append::<true>).unwrap();
    b.set_root("root");
    let mut tree = b.build().unwrap();

    assert_eq!(tick_collect(&mut tree, &mut res), BehaviorResult::Running);
    assert_eq!(tick_collect(&mut tree, &mut res), BehaviorResult::Running);
    assert_eq!(tick_collect(&mut tree, &mut res), BehaviorResult::Success);
    assert_eq!(res, vec![true; 3]);
}

#[test]
fn test_repeat_from_variable() {
    let mut res = vec![];

    let mut b = builder();
    b.add_node(
        "root",
        RepeatNode::new("child", Parameter::variable(SemanticType::Integer, "n")),
    )
    .unwrap();
    b.add_node("child", Append::<false>).unwrap();
    b.set_root("root");
    b.set_var("n", 2);
    let mut tree = b.build().unwrap();

    assert_eq!(tick_collect(&mut tree, &mut res), BehaviorResult::Running);
    assert_eq!(tick_collect(&mut tree, &mut res), BehaviorResult::Success);
    assert_eq!(res, vec![false; 2]);
}

#[test]
fn test_retry() {
    let mut res = vec![];

    let mut b = builder();
    b.add_node("root", RetryNode::times("child", 2)).unwrap();
    b.add_node("child", AppendAndFail::<true>).unwrap();
    b.set_root("root");
    let mut tree = b.build().unwrap();

    assert_eq!(tick_collect(&mut tree, &mut res), BehaviorResult::Running);
    assert_eq!(tick_collect(&mut tree, &mut res), BehaviorResult::Fail);
    assert_eq!(res, vec![true; 2]);

    assert_eq!(
        decorated(RetryNode::times("child", 2), true),
        BehaviorResult::Success
    );
}

fn if_tree(flag: bool, with_else: bool) -> (BehaviorResult, Vec<bool>) {
    let mut res = vec![];
    let mut b = builder();
    let node = IfNode::new("cond", "then");
    let node = if with_else { node.otherwise("else") } else { node };
    b.add_node("root", node).unwrap();
    b.add_node("cond", IsTrueNode::variable("flag")).unwrap();
    b.add_node("then", Append::<true>).unwrap();
    if with_else {
        b.add_node("else", Append::<false>).unwrap();
    }
    b.set_root("root");
    b.set_var("flag", flag);
    let mut tree = b.build().unwrap();
    let result = tick_collect(&mut tree, &mut res);
    (result, res)
}

#[test]
fn test_if() {
    assert_eq!(if_tree(true, true), (BehaviorResult::Success, vec![true]));
    assert_eq!(if_tree(false, true), (BehaviorResult::Success, vec![false]));
    assert_eq!(if_tree(true, false), (BehaviorResult::Success, vec![true]));
    // A failed condition without an else branch is a success
    assert_eq!(if_tree(false, false), (BehaviorResult::Success, vec![]));
}

#[test]
fn test_is_true_missing_variable() {
    let mut b = builder();
    b.add_node("root", IsTrueNode::variable("nothing")).unwrap();
    b.set_root("root");
    let mut tree = b.build().unwrap();
    assert_eq!(tree.tick(&mut |_| None), BehaviorResult::Fail);

    // Variables created after the build are picked up
    tree.blackboard_mut().set("nothing", true);
    assert_eq!(tree.tick(&mut |_| None), BehaviorResult::Success);
}

#[test]
fn test_set_value() {
    let mut b = builder();
    b.add_node("root", SequenceNode::new(["set", "check"]))
        .unwrap();
    b.add_node(
        "set",
        SetValueNode::new(Parameter::constant(SemanticType::Bool, true), "out"),
    )
    .unwrap();
    b.add_node("check", IsTrueNode::variable("out")).unwrap();
    b.set_root("root");
    let mut tree = b.build().unwrap();

    assert_eq!(tree.tick(&mut |_| None), BehaviorResult::Success);
    assert_eq!(tree.blackboard().get("out"), Some(Value::Bool(true)));
}

fn invoke_registry() -> Rc<Registry> {
    let mut registry = Registry::default();
    let agent = registry.define_type("game", "Agent", None);
    registry.register(agent, "is_far", vec![NativeType::F64], |args| {
        Ok(Value::Bool(args[0].as_f64().unwrap_or(0.) > 10.))
    });
    Rc::new(registry)
}

fn is_far() -> Rc<MethodSpec> {
    Rc::new(MethodSpec::new(
        crate::TypeRef::named("game", "Agent"),
        "is_far",
        vec![Parameter::variable(SemanticType::Number, "distance")],
    ))
}

#[test]
fn test_invoke() {
    let mut b = TreeBuilder::new(invoke_registry());
    b.add_node("root", InvokeNode::new(is_far()).output("far"))
        .unwrap();
    b.set_root("root");
    b.set_var("distance", 12.);
    let mut tree = b.build().unwrap();

    assert_eq!(tree.tick(&mut |_| None), BehaviorResult::Success);
    assert_eq!(tree.blackboard().get("far"), Some(Value::Bool(true)));

    tree.blackboard_mut().set("distance", 3.);
    assert_eq!(tree.tick(&mut |_| None), BehaviorResult::Fail);
}

#[test]
fn test_invoke_missing_value() {
    let run = |missing| {
        let mut b = TreeBuilder::new(invoke_registry());
        b.add_node("root", InvokeNode::new(is_far()).on_missing(missing))
            .unwrap();
        b.set_root("root");
        let mut tree = b.build().unwrap();
        tree.tick(&mut |_| None)
    };
    // The default of 0 is not far
    assert_eq!(run(MissingValue::UseDefault), BehaviorResult::Fail);
    assert_eq!(run(MissingValue::Fail), BehaviorResult::Fail);

    let mut b = TreeBuilder::new(invoke_registry());
    let spec = Rc::new(MethodSpec::new(
        crate::TypeRef::named("game", "Agent"),
        "is_far",
        vec![Parameter::constant(SemanticType::Bool, true)],
    ));
    b.add_node("root", InvokeNode::new(spec)).unwrap();
    b.set_root("root");
    assert!(matches!(
        b.build(),
        Err(BuildError::Bind {
            source: BindError::NoMatchingProcedure { .. },
            ..
        })
    ));
}

#[test]
fn test_wait() {
    let mut b = builder();
    b.add_node("root", WaitNode::new(2)).unwrap();
    b.set_root("root");
    b.set_config(DriverConfig {
        restart_on_completion: false,
        ..DriverConfig::default()
    });
    let mut tree = b.build().unwrap();

    assert_eq!(tree.tick(&mut |_| None), BehaviorResult::Running);
    assert_eq!(tree.tick(&mut |_| None), BehaviorResult::Running);
    assert_eq!(tree.tick(&mut |_| None), BehaviorResult::Success);
    assert_eq!(tree.tick(&mut |_| None), BehaviorResult::Success);
}

#[test]
fn test_unresolved_child_fails() {
    let mut b = builder();
    b.add_node("root", SequenceNode::new(["nowhere"])).unwrap();
    b.set_root("root");
    let mut tree = b.build().unwrap();
    assert_eq!(tree.tick(&mut |_| None), BehaviorResult::Fail);
}
