use crate::{
    error::BindError, method::BoundMethod, BehaviorCallback, BehaviorNode, Context, InitContext,
    MethodSpec, NodeIndex, NumChildren, Parameter, RefVisitor, SemanticType, Step, Symbol,
    TreeRef, Value,
};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::{debug, warn};

fn visit_all(children: &mut [TreeRef], visitor: &mut dyn RefVisitor) {
    for child in children {
        visitor.visit_tree(child);
    }
}

/// Reads a bool parameter, binding it on first use if its variable was created
/// after the tree was built.
fn read_bool(param: &mut Parameter, ctx: &Context) -> Option<bool> {
    if !param.is_bound() {
        param.bind(ctx.blackboard());
    }
    param.value().and_then(|v| v.as_bool())
}

fn read_count(param: &mut Parameter, ctx: &Context) -> Option<u32> {
    if !param.is_bound() {
        param.bind(ctx.blackboard());
    }
    param
        .value()
        .and_then(|v| v.as_i64())
        .and_then(|n| u32::try_from(n).ok())
}

pub struct SequenceNode {
    children: Vec<TreeRef>,
    current_child: usize,
}

impl SequenceNode {
    pub fn new<I, R>(children: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<TreeRef>,
    {
        Self {
            children: children.into_iter().map(Into::into).collect(),
            current_child: 0,
        }
    }

    fn next(&self) -> Step {
        match self.children.get(self.current_child) {
            Some(child) => Step::enter(child),
            None => Step::Done(true),
        }
    }
}

impl BehaviorNode for SequenceNode {
    fn execute(&mut self, _arg: BehaviorCallback, _ctx: &mut Context) -> Step {
        self.next()
    }

    fn child_returned(&mut self, _child: NodeIndex, result: bool, _ctx: &mut Context) -> Step {
        if !result {
            return Step::Done(false);
        }
        self.current_child += 1;
        self.next()
    }

    fn on_activated(&mut self) {
        self.current_child = 0;
    }

    fn visit_refs(&mut self, visitor: &mut dyn RefVisitor) {
        visit_all(&mut self.children, visitor);
    }

    fn num_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

pub struct FallbackNode {
    children: Vec<TreeRef>,
    current_child: usize,
}

impl FallbackNode {
    pub fn new<I, R>(children: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<TreeRef>,
    {
        Self {
            children: children.into_iter().map(Into::into).collect(),
            current_child: 0,
        }
    }

    fn next(&self) -> Step {
        match self.children.get(self.current_child) {
            Some(child) => Step::enter(child),
            None => Step::Done(false),
        }
    }
}

impl BehaviorNode for FallbackNode {
    fn execute(&mut self, _arg: BehaviorCallback, _ctx: &mut Context) -> Step {
        self.next()
    }

    fn child_returned(&mut self, _child: NodeIndex, result: bool, _ctx: &mut Context) -> Step {
        if result {
            return Step::Done(true);
        }
        self.current_child += 1;
        self.next()
    }

    fn on_activated(&mut self) {
        self.current_child = 0;
    }

    fn visit_refs(&mut self, visitor: &mut dyn RefVisitor) {
        visit_all(&mut self.children, visitor);
    }

    fn num_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

macro_rules! decorator {
    ($(#[$meta:meta])* $name:ident, |$result:ident| $map:expr) => {
        $(#[$meta])*
        pub struct $name(TreeRef);

        impl $name {
            pub fn new(child: impl Into<TreeRef>) -> Self {
                Self(child.into())
            }
        }

        impl BehaviorNode for $name {
            fn execute(&mut self, _arg: BehaviorCallback, _ctx: &mut Context) -> Step {
                Step::enter(&self.0)
            }

            fn child_returned(&mut self, _child: NodeIndex, $result: bool, _ctx: &mut Context) -> Step {
                Step::Done($map)
            }

            fn visit_refs(&mut self, visitor: &mut dyn RefVisitor) {
                visitor.visit_tree(&mut self.0);
            }

            fn num_children(&self) -> NumChildren {
                NumChildren::Finite(1)
            }
        }
    };
}

decorator!(ForceSuccessNode, |_result| true);
decorator!(ForceFailureNode, |_result| false);
decorator!(InverterNode, |result| !result);

/// Runs the child until it succeeded `n` times in a row. Yields between
/// iterations, so each iteration starts on a new tick.
pub struct RepeatNode {
    n: Parameter,
    remaining: Option<u32>,
    child: TreeRef,
}

impl RepeatNode {
    pub fn new(child: impl Into<TreeRef>, n: Parameter) -> Self {
        Self {
            n,
            remaining: None,
            child: child.into(),
        }
    }

    pub fn times(child: impl Into<TreeRef>, n: u32) -> Self {
        Self::new(child, Parameter::constant(SemanticType::Integer, i64::from(n)))
    }
}

impl BehaviorNode for RepeatNode {
    fn execute(&mut self, _arg: BehaviorCallback, ctx: &mut Context) -> Step {
        if self.remaining.is_none() {
            self.remaining = read_count(&mut self.n, ctx);
        }
        match self.remaining {
            None => Step::Done(false),
            Some(0) => Step::Done(true),
            Some(_) => Step::enter(&self.child),
        }
    }

    fn child_returned(&mut self, _child: NodeIndex, result: bool, _ctx: &mut Context) -> Step {
        if !result {
            return Step::Done(false);
        }
        match self.remaining {
            Some(n) if n > 1 => {
                self.remaining = Some(n - 1);
                Step::Yield
            }
            _ => Step::Done(true),
        }
    }

    fn on_activated(&mut self) {
        self.remaining = None;
    }

    fn visit_refs(&mut self, visitor: &mut dyn RefVisitor) {
        visitor.visit_tree(&mut self.child);
    }

    fn initialize(&mut self, init: &InitContext) -> Result<(), BindError> {
        self.n.bind(init.blackboard);
        Ok(())
    }

    fn num_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Runs the child until it succeeds, at most `n` times.
pub struct RetryNode {
    n: Parameter,
    remaining: Option<u32>,
    child: TreeRef,
}

impl RetryNode {
    pub fn new(child: impl Into<TreeRef>, n: Parameter) -> Self {
        Self {
            n,
            remaining: None,
            child: child.into(),
        }
    }

    pub fn times(child: impl Into<TreeRef>, n: u32) -> Self {
        Self::new(child, Parameter::constant(SemanticType::Integer, i64::from(n)))
    }
}

impl BehaviorNode for RetryNode {
    fn execute(&mut self, _arg: BehaviorCallback, ctx: &mut Context) -> Step {
        if self.remaining.is_none() {
            self.remaining = read_count(&mut self.n, ctx);
        }
        match self.remaining {
            None | Some(0) => Step::Done(false),
            Some(_) => Step::enter(&self.child),
        }
    }

    fn child_returned(&mut self, _child: NodeIndex, result: bool, _ctx: &mut Context) -> Step {
        if result {
            return Step::Done(true);
        }
        match self.remaining {
            Some(n) if n > 1 => {
                self.remaining = Some(n - 1);
                Step::Yield
            }
            _ => Step::Done(false),
        }
    }

    fn on_activated(&mut self) {
        self.remaining = None;
    }

    fn visit_refs(&mut self, visitor: &mut dyn RefVisitor) {
        visitor.visit_tree(&mut self.child);
    }

    fn initialize(&mut self, init: &InitContext) -> Result<(), BindError> {
        self.n.bind(init.blackboard);
        Ok(())
    }

    fn num_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum IfPhase {
    Condition,
    Then,
    Else,
}

/// Runs `then` if the condition succeeds, `otherwise` if it fails. Without an
/// `otherwise` branch a failed condition is a success.
pub struct IfNode {
    condition: TreeRef,
    then: TreeRef,
    otherwise: TreeRef,
    phase: IfPhase,
}

impl IfNode {
    pub fn new(condition: impl Into<TreeRef>, then: impl Into<TreeRef>) -> Self {
        Self {
            condition: condition.into(),
            then: then.into(),
            otherwise: TreeRef::empty(),
            phase: IfPhase::Condition,
        }
    }

    pub fn otherwise(mut self, otherwise: impl Into<TreeRef>) -> Self {
        self.otherwise = otherwise.into();
        self
    }
}

impl BehaviorNode for IfNode {
    fn execute(&mut self, _arg: BehaviorCallback, _ctx: &mut Context) -> Step {
        match self.phase {
            IfPhase::Condition => Step::enter(&self.condition),
            IfPhase::Then => Step::enter(&self.then),
            IfPhase::Else => Step::enter(&self.otherwise),
        }
    }

    fn child_returned(&mut self, _child: NodeIndex, result: bool, _ctx: &mut Context) -> Step {
        match self.phase {
            IfPhase::Condition if result => {
                self.phase = IfPhase::Then;
                Step::enter(&self.then)
            }
            IfPhase::Condition if self.otherwise.has_id() => {
                self.phase = IfPhase::Else;
                Step::enter(&self.otherwise)
            }
            IfPhase::Condition => Step::Done(true),
            IfPhase::Then | IfPhase::Else => Step::Done(result),
        }
    }

    fn on_activated(&mut self) {
        self.phase = IfPhase::Condition;
    }

    fn visit_refs(&mut self, visitor: &mut dyn RefVisitor) {
        visitor.visit_tree(&mut self.condition);
        visitor.visit_tree(&mut self.then);
        visitor.visit_tree(&mut self.otherwise);
    }

    fn num_children(&self) -> NumChildren {
        NumChildren::Finite(3)
    }
}

/// Succeeds if the input is true. A missing or non-bool input fails.
pub struct IsTrueNode {
    input: Parameter,
}

impl IsTrueNode {
    pub fn new(input: Parameter) -> Self {
        Self { input }
    }

    pub fn variable(name: impl Into<Symbol>) -> Self {
        Self::new(Parameter::variable(SemanticType::Bool, name))
    }
}

impl BehaviorNode for IsTrueNode {
    fn execute(&mut self, _arg: BehaviorCallback, ctx: &mut Context) -> Step {
        Step::Done(read_bool(&mut self.input, ctx).unwrap_or(false))
    }

    fn initialize(&mut self, init: &InitContext) -> Result<(), BindError> {
        self.input.bind(init.blackboard);
        Ok(())
    }
}

/// Writes a value into a blackboard variable.
pub struct SetValueNode {
    value: Parameter,
    output: Symbol,
}

impl SetValueNode {
    pub fn new(value: Parameter, output: impl Into<Symbol>) -> Self {
        Self {
            value,
            output: output.into(),
        }
    }
}

impl BehaviorNode for SetValueNode {
    fn execute(&mut self, _arg: BehaviorCallback, ctx: &mut Context) -> Step {
        if !self.value.is_bound() {
            self.value.bind(ctx.blackboard());
        }
        match self.value.value() {
            Some(value) => {
                ctx.set(self.output, value);
                Step::Done(true)
            }
            None => Step::Done(false),
        }
    }

    fn initialize(&mut self, init: &InitContext) -> Result<(), BindError> {
        self.value.bind(init.blackboard);
        Ok(())
    }
}

/// What an [`InvokeNode`] does when a variable parameter has no value.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum MissingValue {
    /// Pass the default of the procedure's slot type.
    #[default]
    UseDefault,
    /// Fail without calling the procedure.
    Fail,
}

/// Calls a registered procedure. A bool return value is the result of the node,
/// any other successful return is a success.
pub struct InvokeNode {
    spec: Rc<MethodSpec>,
    bound: Option<BoundMethod>,
    missing: MissingValue,
    output: Option<Symbol>,
}

impl InvokeNode {
    pub fn new(spec: Rc<MethodSpec>) -> Self {
        Self {
            spec,
            bound: None,
            missing: MissingValue::default(),
            output: None,
        }
    }

    pub fn on_missing(mut self, missing: MissingValue) -> Self {
        self.missing = missing;
        self
    }

    /// Stores the return value into a blackboard variable.
    pub fn output(mut self, output: impl Into<Symbol>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn spec(&self) -> &MethodSpec {
        &self.spec
    }

    pub fn bound(&self) -> Option<&BoundMethod> {
        self.bound.as_ref()
    }
}

impl BehaviorNode for InvokeNode {
    fn execute(&mut self, _arg: BehaviorCallback, ctx: &mut Context) -> Step {
        let Some(bound) = &self.bound else {
            warn!(method = %self.spec.name, "invoked before the tree was initialized");
            return Step::Done(false);
        };
        if self.missing == MissingValue::Fail && bound.has_missing() {
            debug!(method = %self.spec.name, "parameter has no value");
            return Step::Done(false);
        }
        match bound.invoke(ctx.registry()) {
            Ok(value) => {
                let result = match value {
                    Value::Bool(b) => b,
                    _ => true,
                };
                if let Some(output) = self.output {
                    ctx.set(output, value);
                }
                Step::Done(result)
            }
            Err(e) => {
                warn!(method = %self.spec.name, "procedure failed: {}", e);
                Step::Done(false)
            }
        }
    }

    fn initialize(&mut self, init: &InitContext) -> Result<(), BindError> {
        self.bound = Some(self.spec.bind(init.registry, init.blackboard)?);
        Ok(())
    }
}

/// Yields for `ticks` ticks, then succeeds.
pub struct WaitNode {
    ticks: u32,
    remaining: u32,
}

impl WaitNode {
    pub fn new(ticks: u32) -> Self {
        Self {
            ticks,
            remaining: ticks,
        }
    }
}

impl BehaviorNode for WaitNode {
    fn execute(&mut self, _arg: BehaviorCallback, _ctx: &mut Context) -> Step {
        if self.remaining == 0 {
            return Step::Done(true);
        }
        self.remaining -= 1;
        Step::Yield
    }

    fn on_activated(&mut self) {
        self.remaining = self.ticks;
    }
}

/// Waits while a predicate holds and then succeeds. The predicate is polled
/// with [`crate::Tree::poll_waits`], independently of the tree tick.
pub struct WaitWhileNode {
    predicate: Rc<dyn Fn() -> bool>,
}

impl WaitWhileNode {
    pub fn new(predicate: impl Fn() -> bool + 'static) -> Self {
        Self {
            predicate: Rc::new(predicate),
        }
    }
}

impl BehaviorNode for WaitWhileNode {
    fn execute(&mut self, _arg: BehaviorCallback, ctx: &mut Context) -> Step {
        let predicate = self.predicate.clone();
        match ctx.wait_while(move || predicate()) {
            Some(_) => Step::Yield,
            None => Step::Done(false),
        }
    }
}

#[cfg(test)]
mod test;
