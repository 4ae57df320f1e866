use crate::{
    error::InvokeError,
    types::{TypeHandle, TypeRegistry},
    NativeType, SemanticType, Symbol, Value,
};
use std::collections::HashMap;
use std::rc::Rc;

pub type Procedure = Rc<dyn Fn(&[Value]) -> Result<Value, InvokeError>>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ProcedureId(usize);

struct ProcedureDef {
    owner: TypeHandle,
    name: Symbol,
    slots: Vec<NativeType>,
    call: Procedure,
}

/// Types and the procedures declared on them.
///
/// A registry is built once at configuration time and shared by every tree
/// instance created from it.
pub struct Registry {
    types: TypeRegistry,
    object: TypeHandle,
    procedures: Vec<ProcedureDef>,
    by_owner: HashMap<(TypeHandle, Symbol), Vec<ProcedureId>>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut types = TypeRegistry::default();
        let object = types.define("core", "Object", None);
        Self {
            types,
            object,
            procedures: vec![],
            by_owner: HashMap::new(),
        }
    }
}

impl Registry {
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    /// The root `core::Object` type every defined type derives from by default.
    pub fn object_type(&self) -> TypeHandle {
        self.object
    }

    pub fn define_type(&mut self, module: &str, name: &str, base: Option<TypeHandle>) -> TypeHandle {
        let base = base.unwrap_or(self.object);
        self.types.define(module, name, Some(base))
    }

    pub fn register(
        &mut self,
        owner: TypeHandle,
        name: impl Into<Symbol>,
        slots: Vec<NativeType>,
        call: impl Fn(&[Value]) -> Result<Value, InvokeError> + 'static,
    ) -> ProcedureId {
        let name = name.into();
        let id = ProcedureId(self.procedures.len());
        self.procedures.push(ProcedureDef {
            owner,
            name,
            slots,
            call: Rc::new(call),
        });
        self.by_owner.entry((owner, name)).or_default().push(id);
        id
    }

    /// Finds the first procedure named `name` on `owner` or one of its base types
    /// whose slots accept `params` one to one. Procedures declared on the more
    /// derived type win.
    pub fn find(&self, owner: TypeHandle, name: Symbol, params: &[SemanticType]) -> Option<ProcedureId> {
        let mut ty = Some(owner);
        while let Some(cur) = ty {
            if let Some(candidates) = self.by_owner.get(&(cur, name)) {
                let found = candidates.iter().copied().find(|id| {
                    let slots = &self.procedures[id.0].slots;
                    slots.len() == params.len()
                        && params
                            .iter()
                            .zip(slots)
                            .all(|(param, slot)| param.accepts(*slot))
                });
                if found.is_some() {
                    return found;
                }
            }
            ty = self.types.base_of(cur);
        }
        None
    }

    pub fn slots(&self, id: ProcedureId) -> &[NativeType] {
        &self.procedures[id.0].slots
    }

    pub fn name(&self, id: ProcedureId) -> Symbol {
        self.procedures[id.0].name
    }

    pub fn owner(&self, id: ProcedureId) -> TypeHandle {
        self.procedures[id.0].owner
    }

    pub fn call(&self, id: ProcedureId, args: &[Value]) -> Result<Value, InvokeError> {
        let def = &self.procedures[id.0];
        if def.slots.len() != args.len() {
            return Err(InvokeError::ArgumentCount {
                expected: def.slots.len(),
                found: args.len(),
            });
        }
        (def.call)(args)
    }
}
