//! Payload variants for dynamic objects.
//!
//! Each special object is a distinct variant carried next to the field map
//! rather than a runtime flag. In particular the region bridge is a
//! variant, so "is this the entry point of a region" is answered by the
//! type of the object.

use crate::object::ObjectPtr;
use crate::region::RegionId;
use crate::runtime::Runtime;

/// Handle to a compiled function body. The interpreter owns the code table;
/// the runtime only threads the handle through the lifetime of the function
/// object that carries it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Bytecode(pub u32);

/// A native function exposed to the mutator.
pub type BuiltinFn = fn(&mut Runtime, &[ObjectPtr]) -> Option<ObjectPtr>;

/// What an object is, beyond its fields and prototype.
#[derive(Debug)]
pub enum ObjectKind {
    /// A plain dictionary object.
    Plain,
    /// A well-known prototype; the name shows up in diagnostics.
    Prototype(&'static str),
    /// A string literal.
    Str(String),
    /// Iterator over the field names of a source object. The names are
    /// snapshotted at creation, so later mutation of the source does not
    /// invalidate the iterator.
    KeyIter { keys: Vec<String>, next: usize },
    /// A bytecode function.
    Func(Bytecode),
    /// A builtin function.
    Builtin(BuiltinFn),
    /// The entry point of a region: the one object in it that may be
    /// referenced from outside the region.
    Bridge(RegionId),
    /// An opaque handle owning a region. The wrapped bridge sits in the
    /// reserved `value` field; access goes through the acquire protocol,
    /// which lives above this crate.
    Cown,
}

impl ObjectKind {
    /// A short human-readable label used by logs and graph rendering.
    pub fn label(&self) -> String {
        match self {
            ObjectKind::Plain => "object".to_string(),
            ObjectKind::Prototype(name) => format!("[{}]", name),
            ObjectKind::Str(value) => format!("'{}'", value),
            ObjectKind::KeyIter { .. } => "iterator".to_string(),
            ObjectKind::Func(body) => format!("fn bc{}", body.0),
            ObjectKind::Builtin(_) => "builtin".to_string(),
            ObjectKind::Bridge(region) => format!("bridge of {}", region),
            ObjectKind::Cown => "cown".to_string(),
        }
    }
}
