//! Interned strings.
//!
//! Node identifiers, blackboard variable names and procedure names are compared
//! far more often than they are created, so they are interned once and compared
//! by address afterwards.

use ::once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

static INTERNED: Lazy<Mutex<HashSet<&'static str>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// An interned string with O(1) equality.
#[derive(Clone, Copy)]
pub struct Symbol {
    s: &'static str,
}

impl Symbol {
    pub fn new(s: &str) -> Self {
        let mut heap = INTERNED.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(interned) = heap.get(s) {
            return Symbol { s: interned };
        }
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        heap.insert(leaked);
        Symbol { s: leaked }
    }

    /// The empty symbol.
    pub fn empty() -> Self {
        Self::new("")
    }

    pub fn as_str(self) -> &'static str {
        self.s
    }

    pub fn is_empty(self) -> bool {
        self.s.is_empty()
    }

    /// Generates a symbol of the form `prefix#n` that has never been interned before.
    pub fn fresh(prefix: &str) -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let mut heap = INTERNED.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let candidate = format!("{}#{}", prefix, COUNTER.fetch_add(1, AtomicOrdering::Relaxed));
            if !heap.contains(candidate.as_str()) {
                let leaked: &'static str = Box::leak(candidate.into_boxed_str());
                heap.insert(leaked);
                return Symbol { s: leaked };
            }
        }
    }

    /// Number of distinct strings interned so far.
    pub fn count() -> usize {
        INTERNED.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for Symbol {
    fn default() -> Self {
        Self::empty()
    }
}

impl Debug for Symbol {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        Debug::fmt(self.s, fmt)
    }
}

impl Display for Symbol {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.write_str(self.s)
    }
}

impl Deref for Symbol {
    type Target = str;
    fn deref(&self) -> &str {
        self.s
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<&String> for Symbol {
    fn from(s: &String) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.s.as_ptr(), other.s.as_ptr()) && self.s.len() == other.s.len()
    }
}

impl Eq for Symbol {}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        self.s == other
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        self.s == *other
    }
}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.s.as_ptr() as usize).hash(state);
    }
}

// Ordered by content so that sorted collections are stable across runs.
impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> Ordering {
        self.s.cmp(other.s)
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(self.s)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Symbol, D::Error> {
        String::deserialize(de).map(Symbol::from)
    }
}
