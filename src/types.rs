//! Symbolic type references and the registry they resolve against.

use crate::error::TypeError;
use ::once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};

/// Handle of a concrete type inside a [`TypeRegistry`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TypeHandle(u32);

struct TypeInfo {
    name: String,
    module: String,
    base: Option<TypeHandle>,
}

struct Module {
    loaded: Cell<bool>,
    types: HashMap<String, TypeHandle>,
}

/// Every type an engine knows about, grouped in modules.
///
/// A module can be declared without being loaded. Its types stay invisible to
/// lookups until the module is loaded, which [`TypeRef::resolve`] does on demand.
#[derive(Default)]
pub struct TypeRegistry {
    types: Vec<TypeInfo>,
    modules: HashMap<String, Module>,
    qualified: HashMap<String, TypeHandle>,
}

impl TypeRegistry {
    pub fn declare_module(&mut self, module: &str, loaded: bool) {
        self.modules
            .entry(module.to_owned())
            .or_insert_with(|| Module {
                loaded: Cell::new(false),
                types: HashMap::new(),
            })
            .loaded
            .set(loaded);
    }

    /// Defines a type. The module is declared as loaded if it did not exist yet.
    pub fn define(&mut self, module: &str, name: &str, base: Option<TypeHandle>) -> TypeHandle {
        if !self.modules.contains_key(module) {
            self.declare_module(module, true);
        }
        let handle = TypeHandle(self.types.len() as u32);
        self.types.push(TypeInfo {
            name: name.to_owned(),
            module: module.to_owned(),
            base,
        });
        if let Some(m) = self.modules.get_mut(module) {
            m.types.insert(name.to_owned(), handle);
        }
        self.qualified.insert(qualified_name(module, name), handle);
        handle
    }

    /// Registers an extra qualified name for `handle`, e.g. after a type moved to
    /// another module.
    pub fn alias(&mut self, qualified: &str, handle: TypeHandle) {
        self.qualified.insert(qualified.to_owned(), handle);
    }

    pub fn is_loaded(&self, module: &str) -> bool {
        self.modules.get(module).map_or(false, |m| m.loaded.get())
    }

    /// Loads a declared module. Returns false if no such module was declared.
    pub fn load_module(&self, module: &str) -> bool {
        match self.modules.get(module) {
            Some(m) => {
                if !m.loaded.replace(true) {
                    debug!(module, "loaded module");
                }
                true
            }
            None => false,
        }
    }

    /// Looks a type up by exact name in a loaded module.
    pub fn find(&self, module: &str, name: &str) -> Option<TypeHandle> {
        let m = self.modules.get(module)?;
        if !m.loaded.get() {
            return None;
        }
        m.types.get(name).copied()
    }

    /// Looks a type up by its qualified `module::name`, aliases included. Types
    /// of modules that are not loaded are not found.
    pub fn find_qualified(&self, qualified: &str) -> Option<TypeHandle> {
        let handle = *self.qualified.get(qualified)?;
        if self.is_loaded(&self.info(handle).module) {
            Some(handle)
        } else {
            None
        }
    }

    /// Whether `ty` is `base` or derives from it.
    pub fn is_subtype(&self, ty: TypeHandle, base: TypeHandle) -> bool {
        let mut cur = Some(ty);
        while let Some(c) = cur {
            if c == base {
                return true;
            }
            cur = self.info(c).base;
        }
        false
    }

    pub fn base_of(&self, ty: TypeHandle) -> Option<TypeHandle> {
        self.info(ty).base
    }

    pub fn name(&self, ty: TypeHandle) -> &str {
        &self.info(ty).name
    }

    pub fn module(&self, ty: TypeHandle) -> &str {
        &self.info(ty).module
    }

    pub fn display(&self, ty: TypeHandle) -> String {
        let info = self.info(ty);
        qualified_name(&info.module, &info.name)
    }

    fn info(&self, ty: TypeHandle) -> &TypeInfo {
        &self.types[ty.0 as usize]
    }
}

fn qualified_name(module: &str, name: &str) -> String {
    format!("{}::{}", module, name)
}

/// A lazily resolved reference to a type, persisted as a `(name, module)` pair.
///
/// Equality and hashing only look at the symbolic pair, so two references read
/// back from persisted data compare equal whether or not they resolve.
#[derive(Serialize, Deserialize)]
pub struct TypeRef {
    name: String,
    module: String,
    #[serde(skip)]
    base: Option<TypeHandle>,
    #[serde(skip)]
    cache: OnceCell<Option<TypeHandle>>,
}

impl TypeRef {
    /// An unset reference that only accepts `base` or its subtypes.
    pub fn new(base: Option<TypeHandle>) -> Self {
        Self {
            name: String::new(),
            module: String::new(),
            base,
            cache: OnceCell::new(),
        }
    }

    pub fn named(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            base: None,
            cache: OnceCell::new(),
        }
    }

    pub fn with_base(mut self, base: TypeHandle) -> Self {
        self.base = Some(base);
        self.cache = OnceCell::new();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn base(&self) -> Option<TypeHandle> {
        self.base
    }

    pub fn is_set(&self) -> bool {
        !self.name.is_empty()
    }

    /// Points the reference at `ty`.
    ///
    /// Returns false and leaves the reference untouched when `ty` is outside the
    /// declared base bound. Passing `None` clears the reference and also returns
    /// false.
    pub fn set(&mut self, registry: &TypeRegistry, ty: Option<TypeHandle>) -> bool {
        let Some(ty) = ty else {
            self.name.clear();
            self.module.clear();
            self.cache = OnceCell::with_value(None);
            return false;
        };
        if let Some(base) = self.base {
            if !registry.is_subtype(ty, base) {
                return false;
            }
        }
        self.name = registry.name(ty).to_owned();
        self.module = registry.module(ty).to_owned();
        self.cache = OnceCell::with_value(Some(ty));
        true
    }

    /// Resolves the symbolic pair, caching the outcome. A failed resolution stays
    /// cached as "no type" until the next [`TypeRef::set`].
    pub fn resolve(&self, registry: &TypeRegistry) -> Option<TypeHandle> {
        *self.cache.get_or_init(|| self.lookup(registry))
    }

    pub fn resolve_or_fail(&self, registry: &TypeRegistry) -> Result<TypeHandle, TypeError> {
        if !self.is_set() {
            return Err(TypeError::Unset);
        }
        self.resolve(registry).ok_or_else(|| TypeError::Unresolved {
            name: self.name.clone(),
            module: self.module.clone(),
        })
    }

    fn lookup(&self, registry: &TypeRegistry) -> Option<TypeHandle> {
        if !self.is_set() {
            return None;
        }
        let found = registry
            .find(&self.module, &self.name)
            .or_else(|| registry.find_qualified(&qualified_name(&self.module, &self.name)))
            .or_else(|| {
                if registry.load_module(&self.module) {
                    registry.find(&self.module, &self.name)
                } else {
                    None
                }
            });
        match (found, self.base) {
            (Some(ty), Some(base)) if !registry.is_subtype(ty, base) => {
                warn!(
                    name = %self.name,
                    module = %self.module,
                    "resolved type is outside the declared base type"
                );
                None
            }
            (None, _) => {
                warn!(name = %self.name, module = %self.module, "type could not be resolved");
                None
            }
            (found, _) => found,
        }
    }
}

impl Clone for TypeRef {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            module: self.module.clone(),
            base: self.base,
            cache: self.cache.clone(),
        }
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.module == other.module
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.module.hash(state);
    }
}

impl Debug for TypeRef {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "TypeRef({}::{})", self.module, self.name)
    }
}

#[cfg(test)]
mod test;
