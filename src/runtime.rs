//! The runtime instance.
//!
//! Everything that would otherwise be process-wide state (the thread-local
//! region, the diagnostic table of all objects, the interned singletons)
//! lives behind this handle, so independent heaps can coexist (one per
//! test) and every core operation names the state it touches.

use std::collections::BTreeMap;

use crate::fatal;
use crate::object::{
    BuiltinFn, Bytecode, DynObject, ObjectKind, ObjectPtr, RegionPointer, Tag, COWN_VALUE_FIELD,
    PARENT_FIELD, TAG_COWN, TAG_IMMUTABLE,
};
use crate::region::{Region, RegionId};
use crate::util::options::{LeakDump, Options};
use crate::util::TaggedPointer;

/// Where a fresh allocation lands. The interned globals are the only
/// immutable allocations and are built directly in [`Runtime::new`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum Placement {
    /// The thread's local region; the default for mutator allocations.
    Local,
    /// Directly inside a region (bridge objects).
    InRegion(RegionId),
    /// The cown heap.
    Cown,
}

/// The interned objects every heap starts with. All of them are immutable
/// and outside leak accounting.
pub struct WellKnown {
    pub region_proto: ObjectPtr,
    pub frame_proto: ObjectPtr,
    pub func_proto: ObjectPtr,
    pub bytecode_func_proto: ObjectPtr,
    pub builtin_func_proto: ObjectPtr,
    pub string_proto: ObjectPtr,
    pub key_iter_proto: ObjectPtr,
    pub cown_proto: ObjectPtr,
    pub true_obj: ObjectPtr,
    pub false_obj: ObjectPtr,
}

/// A single-threaded mutator heap: the object table, the region forest and
/// the collection queue.
pub struct Runtime {
    pub(crate) objects: BTreeMap<ObjectPtr, DynObject>,
    pub(crate) regions: BTreeMap<RegionId, Region>,
    next_object: usize,
    next_region: usize,
    local_region: RegionId,
    pub(crate) to_collect: Vec<RegionId>,
    pub(crate) collecting: bool,
    options: Options,
    well_known: WellKnown,
    /// Ids at or below this belong to the interned globals.
    first_tracked: usize,
    /// Live objects excluding the globals; zero after a clean teardown.
    object_count: usize,
}

impl Runtime {
    pub fn new() -> Self {
        crate::util::logger::try_init();
        let options = Options::new();

        let mut objects: BTreeMap<ObjectPtr, DynObject> = BTreeMap::new();
        let mut next_object = 0usize;
        let immutable = || RegionPointer::null_with_tag(TAG_IMMUTABLE);
        let mut intern = |kind: ObjectKind, proto: Option<ObjectPtr>| {
            next_object += 1;
            let ptr = ObjectPtr::from_raw(next_object);
            objects.insert(ptr, DynObject::new(kind, proto, immutable()));
            if let Some(proto) = proto {
                objects
                    .get_mut(&proto)
                    .expect("prototype interned first")
                    .change_rc(1);
            }
            ptr
        };

        let region_proto = intern(ObjectKind::Prototype("Region"), None);
        let frame_proto = intern(ObjectKind::Prototype("Frame"), None);
        let func_proto = intern(ObjectKind::Prototype("Function"), None);
        let bytecode_func_proto =
            intern(ObjectKind::Prototype("BytecodeFunction"), Some(func_proto));
        let builtin_func_proto =
            intern(ObjectKind::Prototype("BuiltinFunction"), Some(func_proto));
        let string_proto = intern(ObjectKind::Prototype("String"), None);
        let key_iter_proto = intern(ObjectKind::Prototype("KeyIterator"), None);
        let cown_proto = intern(ObjectKind::Prototype("Cown"), None);
        let true_obj = intern(ObjectKind::Str("True".to_owned()), Some(string_proto));
        let false_obj = intern(ObjectKind::Str("False".to_owned()), Some(string_proto));

        let mut regions = BTreeMap::new();
        let local_region = RegionId::from_raw(1);
        regions.insert(local_region, Region::new());

        debug!("runtime initialized ({} interned objects)", next_object);
        Runtime {
            objects,
            regions,
            first_tracked: next_object,
            next_object,
            next_region: 1,
            local_region,
            to_collect: Vec::new(),
            collecting: false,
            options,
            well_known: WellKnown {
                region_proto,
                frame_proto,
                func_proto,
                bytecode_func_proto,
                builtin_func_proto,
                string_proto,
                key_iter_proto,
                cown_proto,
                true_obj,
                false_obj,
            },
            object_count: 0,
        }
    }

    pub fn well_known(&self) -> &WellKnown {
        &self.well_known
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn local_region_id(&self) -> RegionId {
        self.local_region
    }

    /// Live objects excluding the interned globals.
    pub fn object_count(&self) -> usize {
        self.object_count
    }

    /// Handles of all live objects, interned globals excluded
    /// (diagnostics and test harnesses).
    pub fn live_objects(&self) -> Vec<ObjectPtr> {
        self.objects
            .keys()
            .copied()
            .filter(|p| self.is_tracked(*p))
            .collect()
    }

    /// Resolve an interned global by name.
    pub fn global(&self, name: &str) -> Option<ObjectPtr> {
        match name {
            "True" => Some(self.well_known.true_obj),
            "False" => Some(self.well_known.false_obj),
            _ => None,
        }
    }

    pub(crate) fn collecting(&self) -> bool {
        self.collecting
    }

    pub(crate) fn is_tracked(&self, obj: ObjectPtr) -> bool {
        obj.as_usize() > self.first_tracked
    }

    pub(crate) fn object(&self, obj: ObjectPtr) -> &DynObject {
        match self.objects.get(&obj) {
            Some(o) => o,
            None => fatal!("dangling object handle {}", obj),
        }
    }

    pub(crate) fn object_mut(&mut self, obj: ObjectPtr) -> &mut DynObject {
        match self.objects.get_mut(&obj) {
            Some(o) => o,
            None => fatal!("dangling object handle {}", obj),
        }
    }

    pub(crate) fn object_exists(&self, obj: ObjectPtr) -> bool {
        self.objects.contains_key(&obj)
    }

    pub fn region(&self, r: RegionId) -> &Region {
        match self.regions.get(&r) {
            Some(region) => region,
            None => fatal!("dangling region handle {}", r),
        }
    }

    pub(crate) fn region_mut(&mut self, r: RegionId) -> &mut Region {
        match self.regions.get_mut(&r) {
            Some(region) => region,
            None => fatal!("dangling region handle {}", r),
        }
    }

    pub fn region_exists(&self, r: RegionId) -> bool {
        self.regions.contains_key(&r)
    }

    /// The region holding `obj`, if it is in one (immutable objects and
    /// cowns are not).
    pub fn region_of(&self, obj: ObjectPtr) -> Option<RegionId> {
        self.target_region(obj)
    }

    pub fn is_immutable(&self, obj: ObjectPtr) -> bool {
        self.object(obj).is_immutable()
    }

    /// The reference count of an object (diagnostics and tests).
    pub fn rc_of(&self, obj: ObjectPtr) -> usize {
        self.object(obj).rc()
    }

    pub(crate) fn change_rc(&mut self, obj: ObjectPtr, delta: isize) -> usize {
        let rc = self.object_mut(obj).change_rc(delta);
        trace!("change rc: {} {:+} -> {}", obj, delta, rc);
        rc
    }

    pub(crate) fn alloc_region(&mut self) -> RegionId {
        self.next_region += 1;
        let r = RegionId::from_raw(self.next_region);
        self.regions.insert(r, Region::new());
        trace!("allocate region: {}", r);
        r
    }

    pub(crate) fn alloc_object(
        &mut self,
        kind: ObjectKind,
        prototype: Option<ObjectPtr>,
        placement: Placement,
    ) -> ObjectPtr {
        self.next_object += 1;
        let ptr = ObjectPtr::from_raw(self.next_object);
        let region = match placement {
            Placement::Local => TaggedPointer::new(self.local_region),
            Placement::InRegion(r) => TaggedPointer::new(r),
            Placement::Cown => RegionPointer::null_with_tag(TAG_COWN),
        };
        self.objects.insert(ptr, DynObject::new(kind, prototype, region));
        match placement {
            Placement::Local => {
                let local = self.local_region;
                self.region_mut(local).members.insert(ptr);
            }
            Placement::InRegion(r) => {
                self.region_mut(r).members.insert(ptr);
            }
            Placement::Cown => {}
        }
        // The prototype handed to a constructor is borrowed; the new object
        // takes its own count. Prototypes are immutable, so no region
        // counters move.
        if let Some(proto) = prototype {
            debug_assert!(self.object(proto).is_immutable());
            self.change_rc(proto, 1);
        }
        self.object_count += 1;
        trace!("allocate: {} ({})", ptr, self.object(ptr).kind.label());
        ptr
    }

    /// A plain dictionary object in the local region, count 1 for the
    /// returned root handle.
    pub fn make_object(&mut self) -> ObjectPtr {
        self.alloc_object(ObjectKind::Plain, None, Placement::Local)
    }

    /// A string-typed object. Strings are not interned (except the
    /// well-known `True`/`False`).
    pub fn make_str(&mut self, value: &str) -> ObjectPtr {
        let proto = self.well_known.string_proto;
        self.alloc_object(ObjectKind::Str(value.to_owned()), Some(proto), Placement::Local)
    }

    /// An iterator over `src`'s field names, snapshotted now.
    pub fn make_iter(&mut self, src: ObjectPtr) -> ObjectPtr {
        let keys: Vec<String> = self.object(src).fields.keys().cloned().collect();
        let proto = self.well_known.key_iter_proto;
        self.alloc_object(
            ObjectKind::KeyIter { keys, next: 0 },
            Some(proto),
            Placement::Local,
        )
    }

    /// A bytecode function object.
    pub fn make_func(&mut self, body: Bytecode) -> ObjectPtr {
        let proto = self.well_known.bytecode_func_proto;
        self.alloc_object(ObjectKind::Func(body), Some(proto), Placement::Local)
    }

    /// A builtin function object.
    pub fn make_builtin(&mut self, func: BuiltinFn) -> ObjectPtr {
        let proto = self.well_known.builtin_func_proto;
        self.alloc_object(ObjectKind::Builtin(func), Some(proto), Placement::Local)
    }

    /// A frame object, linked under its caller's frame when given one.
    pub fn make_frame(&mut self, parent: Option<ObjectPtr>) -> ObjectPtr {
        let proto = self.well_known.frame_proto;
        let frame = self.alloc_object(ObjectKind::Plain, Some(proto), Placement::Local);
        if let Some(parent) = parent {
            let old = self.set(frame, PARENT_FIELD, Some(parent));
            debug_assert!(old.is_none());
            self.add_reference(Some(frame), Some(parent));
        }
        frame
    }

    /// Wrap a region in a cown. Ownership of the caller's bridge handle
    /// transfers to the cown: the `value` slot keeps the count and the
    /// region's LRC unit, so the caller must not release the handle.
    pub fn make_cown(&mut self, bridge: ObjectPtr) -> ObjectPtr {
        if !self.object(bridge).is_bridge() {
            fatal!("cowns can only wrap region bridges, got {}", self.object_name(bridge));
        }
        let proto = self.well_known.cown_proto;
        let cown = self.alloc_object(ObjectKind::Cown, Some(proto), Placement::Cown);
        // Not routed through `set`: cowns are opaque to field writes.
        self.object_mut(cown)
            .fields
            .insert(COWN_VALUE_FIELD.to_owned(), Some(bridge));
        cown
    }

    /// Reclaim an object whose count reached zero through the reference
    /// protocol.
    pub(crate) fn destroy_object(&mut self, obj: ObjectPtr) {
        let o = self.object(obj);
        let rc = o.rc();
        if rc != 0 {
            fatal!("deleting {} which still has {} references", self.object_name(obj), rc);
        }
        if o.tag() == Tag::Mutable {
            let r = o.region_id().expect("mutable object outside any region");
            self.region_mut(r).members.remove(&obj);
        }
        trace!("deallocate: {}", obj);
        self.release_object_slot(obj);
    }

    /// Drop an object from the table and the leak count. Membership upkeep
    /// is the caller's business (the region sweep drops whole member sets).
    pub(crate) fn release_object_slot(&mut self, obj: ObjectPtr) {
        if self.objects.remove(&obj).is_none() {
            fatal!("double free of {}", obj);
        }
        if self.is_tracked(obj) {
            self.object_count -= 1;
        }
    }

    /// Tear the heap down: the local region is terminated like any other
    /// region, everything it strands is collected, and whatever survives is
    /// reported as a leak. Returns the number of leaked objects.
    pub fn shutdown(mut self) -> usize {
        debug!("shutting down: terminating the local region");
        let local = self.local_region;
        self.enqueue_collect(local);
        self.collect();
        let leaked = self.object_count;
        if leaked != 0 {
            error!("memory leak: {} objects survive teardown", leaked);
            if self.options.leak_dump == LeakDump::Mermaid {
                error!("{}", crate::ui::mermaid::render(&self, &[]));
            }
        } else {
            debug!("no leaks detected");
        }
        leaked
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
