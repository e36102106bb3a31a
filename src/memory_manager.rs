//! Mutator-to-runtime interface: the narrow API the interpreter uses.
//!
//! This module is the public surface of the region core. Every function
//! takes the [`Runtime`] it operates on; there is no global state. The
//! protocol contract runs through all of them: object counts and region
//! counters only move inside `add_reference`/`remove_reference`/
//! `move_reference`, while `set`/`set_prototype` just swap slots and hand
//! the previous occupant back so the caller can drive those updates.
//!
//! Failure semantics: none of these return errors. Recoverable conditions
//! (missing field, exhausted iterator) are `None`; invariant violations
//! (mutating an immutable object, breaking the region forest, count
//! underflow) abort the process.

use crate::fatal;
use crate::object::{BuiltinFn, Bytecode, ObjectPtr};
use crate::runtime::Runtime;

/// Allocate a plain dictionary object in the local region.
///
/// The returned handle is a mutator root and accounts for the object's
/// initial reference count of one; release it with
/// `remove_reference(rt, None, Some(obj))`.
///
/// Arguments:
/// * `rt`: The runtime instance.
pub fn make_object(rt: &mut Runtime) -> ObjectPtr {
    rt.make_object()
}

/// Allocate a string-typed object in the local region.
///
/// Arguments:
/// * `rt`: The runtime instance.
/// * `value`: The string payload. Strings are not interned; each call makes
///   a fresh object.
pub fn make_str(rt: &mut Runtime, value: &str) -> ObjectPtr {
    rt.make_str(value)
}

/// Allocate an iterator over `src`'s field names.
///
/// The names are snapshotted at creation; see [`iter_next`].
///
/// Arguments:
/// * `rt`: The runtime instance.
/// * `src`: The object whose keys are iterated.
pub fn make_iter(rt: &mut Runtime, src: ObjectPtr) -> ObjectPtr {
    rt.make_iter(src)
}

/// Allocate a bytecode function object.
///
/// Arguments:
/// * `rt`: The runtime instance.
/// * `body`: Handle to the compiled body, owned by the interpreter.
pub fn make_func(rt: &mut Runtime, body: Bytecode) -> ObjectPtr {
    rt.make_func(body)
}

/// Allocate a builtin function object.
///
/// Arguments:
/// * `rt`: The runtime instance.
/// * `func`: The native implementation.
pub fn make_builtin(rt: &mut Runtime, func: BuiltinFn) -> ObjectPtr {
    rt.make_builtin(func)
}

/// Allocate a frame object, optionally linked under its caller's frame
/// through the reserved `__parent__` field.
///
/// Arguments:
/// * `rt`: The runtime instance.
/// * `parent`: The calling frame, if any.
pub fn make_frame(rt: &mut Runtime, parent: Option<ObjectPtr>) -> ObjectPtr {
    rt.make_frame(parent)
}

/// Wrap a region in a cown.
///
/// Ownership of `bridge` transfers to the cown: the caller must not release
/// its handle afterwards. The cown keeps the wrapped region alive until the
/// cown itself dies.
///
/// Arguments:
/// * `rt`: The runtime instance.
/// * `bridge`: The bridge of the region to wrap; anything else is fatal.
pub fn make_cown(rt: &mut Runtime, bridge: ObjectPtr) -> ObjectPtr {
    rt.make_cown(bridge)
}

/// Read a field, falling back along the prototype chain. `__proto__`
/// resolves to the prototype itself. Pure read: no counts move.
///
/// Arguments:
/// * `rt`: The runtime instance.
/// * `obj`: The object to read.
/// * `key`: The field name.
pub fn get(rt: &Runtime, obj: ObjectPtr, key: &str) -> Option<ObjectPtr> {
    rt.get(obj, key)
}

/// [`get`] with a string-typed object as the key (the interpreter's `a[k]`
/// path). A non-string key is a bug in the layer above and fatal.
pub fn get_with(rt: &Runtime, obj: ObjectPtr, key: ObjectPtr) -> Option<ObjectPtr> {
    let Some(key) = rt.string_value(key) else {
        fatal!("field key {} is not a string", key);
    };
    rt.get(obj, key)
}

/// Write a field slot, returning the previous occupant.
///
/// The caller owns both halves of the exchange: it must `add_reference` (or
/// `move_reference`) the new value and `remove_reference` the returned one.
/// Fatal on immutable objects and unacquired cowns.
///
/// Arguments:
/// * `rt`: The runtime instance.
/// * `obj`: The object to mutate.
/// * `key`: The field name.
/// * `value`: The new slot content; `None` clears the slot (and shadows the
///   prototype chain).
pub fn set(
    rt: &mut Runtime,
    obj: ObjectPtr,
    key: &str,
    value: Option<ObjectPtr>,
) -> Option<ObjectPtr> {
    rt.set(obj, key, value)
}

/// [`set`] with a string-typed object as the key.
pub fn set_with(
    rt: &mut Runtime,
    obj: ObjectPtr,
    key: ObjectPtr,
    value: Option<ObjectPtr>,
) -> Option<ObjectPtr> {
    let Some(key) = rt.string_value(key) else {
        fatal!("field key {} is not a string", key);
    };
    let key = key.to_owned();
    rt.set(obj, &key, value)
}

/// Replace the prototype, returning the previous one. Same contract and
/// failure rule as [`set`].
pub fn set_prototype(
    rt: &mut Runtime,
    obj: ObjectPtr,
    proto: Option<ObjectPtr>,
) -> Option<ObjectPtr> {
    rt.set_prototype(obj, proto)
}

/// The current prototype of `obj`.
pub fn get_prototype(rt: &Runtime, obj: ObjectPtr) -> Option<ObjectPtr> {
    rt.get_prototype(obj)
}

/// Account a new reference from `src` to `target`.
///
/// Arguments:
/// * `rt`: The runtime instance.
/// * `src`: The holder of the new reference; `None` for a mutator root.
/// * `target`: The referenced object; `None` is a no-op.
pub fn add_reference(rt: &mut Runtime, src: Option<ObjectPtr>, target: Option<ObjectPtr>) {
    rt.add_reference(src, target)
}

/// Drop the reference from `src` to `target`, destructing whatever dies
/// with it and collecting any regions that become unreachable before the
/// call returns.
///
/// Arguments:
/// * `rt`: The runtime instance.
/// * `src`: The previous holder; `None` for a mutator root.
/// * `target`: The referenced object; `None` is a no-op.
pub fn remove_reference(rt: &mut Runtime, src: Option<ObjectPtr>, target: Option<ObjectPtr>) {
    rt.remove_reference(src, target)
}

/// Transfer the reference to `target` from `src` to `dst` without touching
/// the target's count. Moving an object out of its own region into another
/// migrates its closure (membership and counters follow).
///
/// Arguments:
/// * `rt`: The runtime instance.
/// * `src`: The old holder; `None` for a mutator root.
/// * `dst`: The new holder; `None` for a mutator root.
/// * `target`: The moved reference; `None`, immutable and cown targets are
///   no-ops.
pub fn move_reference(
    rt: &mut Runtime,
    src: Option<ObjectPtr>,
    dst: Option<ObjectPtr>,
    target: Option<ObjectPtr>,
) {
    rt.move_reference(src, dst, target)
}

/// Create a fresh region and return its bridge object.
///
/// The bridge is the region's entry point: the only object in it that may
/// be referenced from outside. The returned handle is a root into the
/// region, so it starts with an LRC of one.
pub fn create_region(rt: &mut Runtime) -> ObjectPtr {
    rt.create_region()
}

/// Freeze everything reachable from `obj` into the shared immutable heap.
/// Transitive and idempotent; descent stops at cown boundaries. See the
/// module docs of [`crate::region::freeze`] for the counter rebalance.
pub fn freeze(rt: &mut Runtime, obj: ObjectPtr) {
    rt.freeze(obj)
}

/// Advance a key iterator. Returns a fresh string object (a new mutator
/// root) for the next field name, or `None` when exhausted.
pub fn iter_next(rt: &mut Runtime, it: ObjectPtr) -> Option<ObjectPtr> {
    rt.iter_next(it)
}

/// Resolve an interned global (`"True"` / `"False"`).
pub fn global(rt: &Runtime, name: &str) -> Option<ObjectPtr> {
    rt.global(name)
}

/// The number of live objects, interned globals excluded.
pub fn object_count(rt: &Runtime) -> usize {
    rt.object_count()
}
