//! Calling registered procedures from tree nodes.
//!
//! A [`MethodSpec`] is the shared, persisted description of a call: the
//! declaring type, the procedure name and the parameter list. Validating it
//! against a [`Registry`] picks the procedure. Binding clones the parameter list
//! and attaches every variable parameter to a cell of one tree's blackboard, so
//! trees built from the same spec never share bindings.

use crate::{
    context::Blackboard,
    error::{BindError, InvokeError},
    registry::ProcedureId,
    types::TypeRef,
    NativeType, Registry, SemanticType, Symbol, Value,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParamSource {
    Constant(Value),
    /// Name of a blackboard variable.
    Variable(Symbol),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Parameter {
    ty: SemanticType,
    source: ParamSource,
    #[serde(skip)]
    binding: Option<Weak<RefCell<Value>>>,
}

impl Parameter {
    pub fn constant(ty: SemanticType, value: impl Into<Value>) -> Self {
        Self {
            ty,
            source: ParamSource::Constant(value.into()),
            binding: None,
        }
    }

    pub fn variable(ty: SemanticType, name: impl Into<Symbol>) -> Self {
        Self {
            ty,
            source: ParamSource::Variable(name.into()),
            binding: None,
        }
    }

    pub fn ty(&self) -> SemanticType {
        self.ty
    }

    pub fn source(&self) -> &ParamSource {
        &self.source
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.source, ParamSource::Constant(_))
    }

    /// Attaches a variable parameter to its blackboard cell. A variable that does
    /// not exist leaves the parameter unbound, which reads as no value.
    pub fn bind(&mut self, blackboard: &Blackboard) -> bool {
        match self.source {
            ParamSource::Constant(_) => true,
            ParamSource::Variable(name) => {
                self.binding = blackboard.cell(name).map(Rc::downgrade);
                if self.binding.is_none() {
                    debug!(variable = %name, "parameter bound to a missing variable");
                }
                self.binding.is_some()
            }
        }
    }

    pub fn is_bound(&self) -> bool {
        match self.source {
            ParamSource::Constant(_) => true,
            ParamSource::Variable(_) => self
                .binding
                .as_ref()
                .map_or(false, |cell| cell.strong_count() > 0),
        }
    }

    pub fn value(&self) -> Option<Value> {
        match &self.source {
            ParamSource::Constant(value) => Some(value.clone()),
            ParamSource::Variable(_) => {
                let cell = self.binding.as_ref()?.upgrade()?;
                let value = cell.borrow().clone();
                Some(value)
            }
        }
    }

    /// Writes through to the bound variable. Returns false for constants and
    /// unbound variables.
    pub fn set(&self, value: impl Into<Value>) -> bool {
        if let Some(cell) = self.binding.as_ref().and_then(Weak::upgrade) {
            *cell.borrow_mut() = value.into();
            true
        } else {
            false
        }
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.source == other.source
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodSpec {
    pub declaring: TypeRef,
    pub name: Symbol,
    pub params: Vec<Parameter>,
}

impl MethodSpec {
    pub fn new(declaring: TypeRef, name: impl Into<Symbol>, params: Vec<Parameter>) -> Self {
        Self {
            declaring,
            name: name.into(),
            params,
        }
    }

    /// Picks the procedure this spec calls.
    pub fn validate(&self, registry: &Registry) -> Result<ProcedureId, BindError> {
        let owner = self.declaring.resolve_or_fail(registry.types())?;
        let shape: Vec<SemanticType> = self.params.iter().map(Parameter::ty).collect();
        registry
            .find(owner, self.name, &shape)
            .ok_or_else(|| BindError::NoMatchingProcedure {
                ty: registry.types().display(owner),
                name: self.name.to_string(),
                params: shape
                    .iter()
                    .map(|ty| format!("{:?}", ty))
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Validates the spec and binds a private copy of its parameters.
    pub fn bind(&self, registry: &Registry, blackboard: &Blackboard) -> Result<BoundMethod, BindError> {
        let procedure = self.validate(registry)?;
        let mut params = self.params.clone();
        for param in &mut params {
            param.bind(blackboard);
        }
        Ok(BoundMethod {
            procedure,
            slots: registry.slots(procedure).to_vec(),
            params,
        })
    }
}

/// A validated call with parameters bound to one tree instance.
#[derive(Clone, Debug)]
pub struct BoundMethod {
    procedure: ProcedureId,
    slots: Vec<NativeType>,
    params: Vec<Parameter>,
}

impl BoundMethod {
    pub fn procedure(&self) -> ProcedureId {
        self.procedure
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// Current argument values, `None` where a variable has no value.
    pub fn args(&self) -> Vec<Option<Value>> {
        self.params.iter().map(Parameter::value).collect()
    }

    pub fn has_missing(&self) -> bool {
        self.params.iter().any(|p| p.value().is_none())
    }

    /// Calls the procedure. Missing values are passed as the slot default.
    pub fn invoke(&self, registry: &Registry) -> Result<Value, InvokeError> {
        let args: Vec<Value> = self
            .params
            .iter()
            .zip(&self.slots)
            .map(|(param, slot)| param.value().unwrap_or_default().coerce(*slot))
            .collect();
        registry.call(self.procedure, &args)
    }
}
