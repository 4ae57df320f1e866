use crate::{service::Service, BehaviorNode, NodeId, NodeIndex, NodeState, NumChildren};

/// Short type name for log output.
pub(crate) fn short_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

pub(crate) struct ServiceSlot {
    pub(crate) name: &'static str,
    /// Taken out while the service executes.
    pub(crate) service: Option<Box<dyn Service>>,
    pub(crate) registered: bool,
    /// Bumped on every registration, so a tick can tell a re-registered service
    /// from the one it saw when the tick started.
    pub(crate) generation: u64,
}

impl ServiceSlot {
    pub(crate) fn new(name: &'static str, service: Box<dyn Service>) -> Self {
        Self {
            name: short_name(name),
            service: Some(service),
            registered: false,
            generation: 0,
        }
    }
}

pub(crate) struct NodeSlot {
    pub(crate) id: NodeId,
    /// Name of the type of the node
    pub(crate) name: &'static str,
    /// Taken out while the node executes.
    pub(crate) node: Option<Box<dyn BehaviorNode>>,
    pub(crate) services: Vec<ServiceSlot>,
    pub(crate) parent: Option<NodeIndex>,
    pub(crate) state: NodeState,
    pub(crate) last_result: Option<bool>,
    /// On the frame stack of some branch.
    pub(crate) active: bool,
    flow: bool,
}

impl NodeSlot {
    pub(crate) fn new(id: NodeId, name: &'static str, node: Box<dyn BehaviorNode>) -> Self {
        let flow = node.num_children() != NumChildren::Finite(0);
        Self {
            id,
            name: short_name(name),
            node: Some(node),
            services: vec![],
            parent: None,
            state: NodeState::Ready,
            last_result: None,
            active: false,
            flow,
        }
    }

    pub(crate) fn is_flow(&self) -> bool {
        self.flow
    }

    /// Records the result of the node. Only a live node can conclude, so the
    /// first conclusion wins and later ones are ignored.
    pub(crate) fn conclude(&mut self, result: bool) -> bool {
        if !self.state.is_live() {
            return false;
        }
        self.state = if result {
            NodeState::Succeeded
        } else {
            NodeState::Failed
        };
        self.last_result = Some(result);
        true
    }

    pub(crate) fn mark_stopped(&mut self) -> bool {
        if !self.state.is_live() {
            return false;
        }
        self.state = NodeState::Stopped;
        true
    }
}
