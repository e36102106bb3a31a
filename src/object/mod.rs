//! Dynamic objects: a reference count, a tagged region pointer, an optional
//! prototype and an ordered field map.

pub mod kind;

pub use kind::{BuiltinFn, Bytecode, ObjectKind};

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::fatal;
use crate::region::RegionId;
use crate::runtime::Runtime;
use crate::util::{TaggedPointer, Word};

/// Field name that resolves to the prototype in [`Runtime::get`].
pub const PROTOTYPE_FIELD: &str = "__proto__";
/// Field linking a frame to the frame of its caller.
pub const PARENT_FIELD: &str = "__parent__";
/// Field of a cown holding the bridge of the region it owns.
pub const COWN_VALUE_FIELD: &str = "value";

/// Handle to an object. Handles are never reused, so a stale handle can be
/// diagnosed instead of silently aliasing a newer object; object identity
/// and the mutator's `==` are handle identity.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ObjectPtr(NonZeroUsize);

impl ObjectPtr {
    pub(crate) fn from_raw(raw: usize) -> Self {
        ObjectPtr(NonZeroUsize::new(raw).expect("object handles start at 1"))
    }

    pub fn as_usize(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for ObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Word for ObjectPtr {
    fn to_word(self) -> NonZeroUsize {
        self.0
    }
    fn from_word(word: NonZeroUsize) -> Self {
        ObjectPtr(word)
    }
}

/// Ownership state of an object, encoded in the tag of its region pointer.
#[derive(Copy, Clone, PartialEq, Eq, Debug, strum_macros::Display)]
pub enum Tag {
    /// Belongs to exactly one mutable region.
    #[strum(serialize = "mutable")]
    Mutable,
    /// Part of the shared frozen heap; fields are no longer writable.
    #[strum(serialize = "immutable")]
    Immutable,
    /// An unacquired cown handle.
    #[strum(serialize = "cown")]
    Cown,
}

pub(crate) const TAG_MUTABLE: usize = 0;
pub(crate) const TAG_IMMUTABLE: usize = 1;
pub(crate) const TAG_COWN: usize = 2;

/// The region of a specific object, with the low bits encoding the special
/// heaps. Freezing retags the pointer in place; the stale payload is
/// harmless because region ids are never reused and a non-mutable tag is
/// never dereferenced.
pub type RegionPointer = TaggedPointer<RegionId>;

/// A dynamically typed heap object.
pub struct DynObject {
    /// Count of incoming references, including one per live mutator root
    /// handle. Mutable objects update it plainly (single-threaded mutator);
    /// immutable objects use relaxed atomics so a frozen closure could be
    /// shared across threads.
    rc: AtomicUsize,
    pub(crate) region: RegionPointer,
    pub(crate) prototype: Option<ObjectPtr>,
    /// Ordered so that traversal, rendering and collection are
    /// deterministic. A key mapped to `None` is an explicitly cleared slot
    /// and shadows the prototype chain.
    pub(crate) fields: BTreeMap<String, Option<ObjectPtr>>,
    pub(crate) kind: ObjectKind,
}

impl DynObject {
    pub(crate) fn new(kind: ObjectKind, prototype: Option<ObjectPtr>, region: RegionPointer) -> Self {
        DynObject {
            rc: AtomicUsize::new(1),
            region,
            prototype,
            fields: BTreeMap::new(),
            kind,
        }
    }

    pub fn rc(&self) -> usize {
        self.rc.load(Ordering::Relaxed)
    }

    pub fn tag(&self) -> Tag {
        match self.region.tag() {
            TAG_MUTABLE => Tag::Mutable,
            TAG_IMMUTABLE => Tag::Immutable,
            TAG_COWN => Tag::Cown,
            tag => fatal!("object carries reserved region tag {}", tag),
        }
    }

    pub fn is_immutable(&self) -> bool {
        self.tag() == Tag::Immutable
    }

    /// Cown-ness is a matter of kind, not tag: a frozen cown is immutable
    /// but still opaque.
    pub fn is_cown(&self) -> bool {
        matches!(self.kind, ObjectKind::Cown)
    }

    pub fn is_bridge(&self) -> bool {
        matches!(self.kind, ObjectKind::Bridge(_))
    }

    /// The containing region, for objects that are in one.
    pub fn region_id(&self) -> Option<RegionId> {
        match self.tag() {
            Tag::Mutable => self.region.ptr(),
            Tag::Immutable | Tag::Cown => None,
        }
    }

    /// Apply `delta` to the reference count and return the new value.
    pub(crate) fn change_rc(&mut self, delta: isize) -> usize {
        if self.is_immutable() {
            // The frozen heap may be shared, so its counts move atomically.
            if delta >= 0 {
                self.rc.fetch_add(delta as usize, Ordering::Relaxed) + delta as usize
            } else {
                let dec = delta.unsigned_abs();
                let old = self.rc.fetch_sub(dec, Ordering::Relaxed);
                if old < dec {
                    fatal!("reference count underflow on immutable object");
                }
                old - dec
            }
        } else {
            let rc = self.rc.get_mut();
            debug_assert!(delta == 0 || *rc != 0, "dead object resurrected");
            if delta >= 0 {
                *rc += delta as usize;
            } else {
                let dec = delta.unsigned_abs();
                if *rc < dec {
                    fatal!("reference count underflow");
                }
                *rc -= dec;
            }
            *rc
        }
    }
}

impl Runtime {
    /// Field lookup with prototype fallback (the `__proto__` name resolves
    /// to the prototype itself). An explicitly cleared slot shadows the
    /// chain. Pure read.
    pub fn get(&self, obj: ObjectPtr, key: &str) -> Option<ObjectPtr> {
        let mut current = obj;
        loop {
            let o = self.object(current);
            if let Some(slot) = o.fields.get(key) {
                return *slot;
            }
            if key == PROTOTYPE_FIELD {
                return o.prototype;
            }
            match o.prototype {
                Some(proto) => current = proto,
                None => return None,
            }
        }
    }

    /// Write a field slot and hand back whatever it held, so the caller can
    /// drive the reference protocol for both values. Fatal on immutable
    /// objects and on unacquired cowns.
    pub fn set(&mut self, obj: ObjectPtr, key: &str, value: Option<ObjectPtr>) -> Option<ObjectPtr> {
        let o = self.object_mut(obj);
        if o.is_immutable() {
            fatal!("cannot mutate immutable object {}", obj);
        }
        if o.is_cown() {
            fatal!("cannot mutate unacquired cown {}", obj);
        }
        o.fields.insert(key.to_owned(), value).flatten()
    }

    /// Replace the prototype, returning the previous one. Same failure rule
    /// as [`Runtime::set`]; the caller drives the reference protocol.
    pub fn set_prototype(&mut self, obj: ObjectPtr, proto: Option<ObjectPtr>) -> Option<ObjectPtr> {
        let o = self.object_mut(obj);
        if o.is_immutable() {
            fatal!("cannot mutate immutable object {}", obj);
        }
        if o.is_cown() {
            fatal!("cannot mutate unacquired cown {}", obj);
        }
        std::mem::replace(&mut o.prototype, proto)
    }

    pub fn get_prototype(&self, obj: ObjectPtr) -> Option<ObjectPtr> {
        self.object(obj).prototype
    }

    /// The string payload of a string-typed object.
    pub fn string_value(&self, obj: ObjectPtr) -> Option<&str> {
        match &self.object(obj).kind {
            ObjectKind::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Advance a key iterator, producing a fresh string object for the next
    /// field name, or `None` when exhausted.
    pub fn iter_next(&mut self, it: ObjectPtr) -> Option<ObjectPtr> {
        let key = match &mut self.object_mut(it).kind {
            ObjectKind::KeyIter { keys, next } => {
                if *next >= keys.len() {
                    return None;
                }
                let key = keys[*next].clone();
                *next += 1;
                key
            }
            _ => fatal!("iter_next on non-iterator {}", it),
        };
        Some(self.make_str(&key))
    }

    /// The field names of an object, in field order (diagnostics and test
    /// harnesses; the mutator iterates through [`Runtime::make_iter`]).
    pub fn field_names(&self, obj: ObjectPtr) -> Vec<String> {
        self.object(obj).fields.keys().cloned().collect()
    }

    /// Diagnostic name of an object: its handle plus a kind label.
    pub fn object_name(&self, obj: ObjectPtr) -> String {
        format!("{} {}", obj, self.object(obj).kind.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_manager as mm;

    #[test]
    fn get_prefers_own_fields() {
        let mut rt = Runtime::new();
        let proto = mm::make_object(&mut rt);
        let obj = mm::make_object(&mut rt);
        let value = mm::make_str(&mut rt, "own");
        let shadowed = mm::make_str(&mut rt, "proto");

        assert!(mm::set(&mut rt, proto, "f", Some(shadowed)).is_none());
        mm::add_reference(&mut rt, Some(proto), Some(shadowed));
        assert!(mm::set_prototype(&mut rt, obj, Some(proto)).is_none());
        mm::add_reference(&mut rt, Some(obj), Some(proto));

        // Falls through to the prototype while the own slot is missing.
        assert_eq!(mm::get(&rt, obj, "f"), Some(shadowed));
        assert!(mm::set(&mut rt, obj, "f", Some(value)).is_none());
        mm::add_reference(&mut rt, Some(obj), Some(value));
        assert_eq!(mm::get(&rt, obj, "f"), Some(value));

        // An explicitly cleared slot shadows the chain.
        let old = mm::set(&mut rt, obj, "f", None);
        assert_eq!(old, Some(value));
        mm::remove_reference(&mut rt, Some(obj), old);
        assert_eq!(mm::get(&rt, obj, "f"), None);

        assert_eq!(mm::get(&rt, obj, PROTOTYPE_FIELD), Some(proto));
        assert_eq!(mm::get(&rt, obj, "missing"), None);
    }

    #[test]
    fn iterator_snapshots_keys() {
        let mut rt = Runtime::new();
        let src = mm::make_object(&mut rt);
        for key in ["a", "b"] {
            let v = mm::make_object(&mut rt);
            assert!(mm::set(&mut rt, src, key, Some(v)).is_none());
            mm::add_reference(&mut rt, Some(src), Some(v));
            mm::remove_reference(&mut rt, None, Some(v));
        }

        let it = mm::make_iter(&mut rt, src);
        // Mutating the source after creation does not affect the snapshot.
        let extra = mm::make_object(&mut rt);
        assert!(mm::set(&mut rt, src, "c", Some(extra)).is_none());
        mm::add_reference(&mut rt, Some(src), Some(extra));
        mm::remove_reference(&mut rt, None, Some(extra));

        let mut seen = Vec::new();
        while let Some(key) = mm::iter_next(&mut rt, it) {
            seen.push(rt.string_value(key).unwrap().to_owned());
            mm::remove_reference(&mut rt, None, Some(key));
        }
        assert_eq!(seen, ["a", "b"]);
        assert!(mm::iter_next(&mut rt, it).is_none());
    }

    #[test]
    #[should_panic(expected = "cannot mutate immutable object")]
    fn set_on_frozen_object_aborts() {
        let mut rt = Runtime::new();
        let obj = mm::make_object(&mut rt);
        mm::freeze(&mut rt, obj);
        let v = mm::make_object(&mut rt);
        let _ = mm::set(&mut rt, obj, "f", Some(v));
    }
}
