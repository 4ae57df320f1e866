use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

/// A runtime value held in a blackboard cell or passed to a procedure.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    #[serde(skip)]
    Object(Object),
}

/// An opaque host object. Two objects are equal only if they are the same allocation.
#[derive(Clone)]
pub struct Object(pub Rc<dyn Any>);

impl Object {
    pub fn new<T: 'static>(value: T) -> Self {
        Self(Rc::new(value))
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for Object {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Object({:p})", Rc::as_ptr(&self.0))
    }
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts the value to the representation a slot expects. Values that
    /// cannot be converted become the slot's default.
    pub fn coerce(&self, slot: NativeType) -> Value {
        match slot {
            NativeType::Bool => self.as_bool().map(Value::Bool),
            NativeType::I32 => self
                .as_i64()
                .map(|i| Value::Int(i.clamp(i32::MIN as i64, i32::MAX as i64))),
            NativeType::I64 => self.as_i64().map(Value::Int),
            NativeType::F32 | NativeType::F64 => self.as_f64().map(Value::Float),
            NativeType::String => match self {
                Self::Null | Self::Object(_) => None,
                Self::Text(s) => Some(Value::Text(s.clone())),
                Self::Bool(b) => Some(Value::Text(b.to_string())),
                Self::Int(i) => Some(Value::Text(i.to_string())),
                Self::Float(f) => Some(Value::Text(f.to_string())),
            },
            NativeType::Reference => match self {
                Self::Object(_) => Some(self.clone()),
                _ => None,
            },
        }
        .unwrap_or_else(|| slot.default_value())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// The declared type of a parameter, as seen by whoever configures a tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum SemanticType {
    Bool,
    Number,
    Integer,
    Text,
    Object,
}

/// The type of an argument slot of a registered procedure.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum NativeType {
    Bool,
    I32,
    I64,
    F32,
    F64,
    String,
    Reference,
}

const BOOL_SLOTS: &[NativeType] = &[NativeType::Bool];
const NUMBER_SLOTS: &[NativeType] = &[
    NativeType::I32,
    NativeType::I64,
    NativeType::F32,
    NativeType::F64,
];
const INTEGER_SLOTS: &[NativeType] = &[NativeType::I32, NativeType::I64];
const TEXT_SLOTS: &[NativeType] = &[NativeType::String];
const OBJECT_SLOTS: &[NativeType] = &[NativeType::Reference];

impl SemanticType {
    /// The slot types a parameter of this type can be passed to.
    pub fn compatible_slots(self) -> &'static [NativeType] {
        match self {
            Self::Bool => BOOL_SLOTS,
            Self::Number => NUMBER_SLOTS,
            Self::Integer => INTEGER_SLOTS,
            Self::Text => TEXT_SLOTS,
            Self::Object => OBJECT_SLOTS,
        }
    }

    pub fn accepts(self, slot: NativeType) -> bool {
        self.compatible_slots().contains(&slot)
    }
}

impl NativeType {
    pub fn default_value(self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::I32 | Self::I64 => Value::Int(0),
            Self::F32 | Self::F64 => Value::Float(0.),
            Self::String => Value::Text(String::new()),
            Self::Reference => Value::Null,
        }
    }
}
