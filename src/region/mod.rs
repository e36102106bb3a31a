//! Regions: disjoint sets of mutable objects sharing a single reclamation
//! fate, organized as a forest.
//!
//! A region is kept alive by two counters. The local reference count (LRC)
//! tracks references from the local region into this one, and the sub-region
//! reference count (SBRC) tracks direct children whose own combined count is
//! non-zero; their sum is the *combined LRC* that gates collectability. The
//! parent reference count (PRC) tracks references from the parent region.
//! All three are maintained edge-triggered: an individual reference update
//! only walks the ancestor chain when a counter crosses zero.

pub mod freeze;

use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroUsize;

use crate::fatal;
use crate::object::{ObjectKind, ObjectPtr};
use crate::runtime::{Placement, Runtime};
use crate::util::Word;

/// Handle to a region. Like object handles, region ids are never reused.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RegionId(NonZeroUsize);

impl RegionId {
    pub(crate) fn from_raw(raw: usize) -> Self {
        RegionId(NonZeroUsize::new(raw).expect("region handles start at 1"))
    }

    pub fn as_usize(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl Word for RegionId {
    fn to_word(self) -> NonZeroUsize {
        self.0
    }
    fn from_word(word: NonZeroUsize) -> Self {
        RegionId(word)
    }
}

/// Lifecycle of a region.
#[derive(Copy, Clone, PartialEq, Eq, Debug, strum_macros::Display)]
pub enum RegionState {
    /// Holding objects, counters live.
    Active,
    /// Queued for collection; counters are dead.
    PendingCollect,
    /// Swept. Terminal.
    Collected,
}

/// Per-region metadata.
pub struct Region {
    /// Number of references from the local region to objects in this region.
    pub(crate) local_reference_count: usize,
    /// Number of references from the parent region into this region.
    /// Classic Verona treats this as zero-or-one; tracking it dynamically
    /// allows multiple references through the bridge.
    pub(crate) parent_reference_count: usize,
    /// Number of direct subregions whose combined LRC is non-zero.
    pub(crate) sub_region_reference_count: usize,
    /// The owning region, if nested. Parent links always form a forest.
    pub(crate) parent: Option<RegionId>,
    /// The objects in this region.
    pub(crate) members: BTreeSet<ObjectPtr>,
    /// The entry-point object of the region.
    pub(crate) bridge: Option<ObjectPtr>,
    pub(crate) state: RegionState,
}

impl Region {
    pub(crate) fn new() -> Self {
        Region {
            local_reference_count: 0,
            parent_reference_count: 0,
            sub_region_reference_count: 0,
            parent: None,
            members: BTreeSet::new(),
            bridge: None,
            state: RegionState::Active,
        }
    }

    pub fn lrc(&self) -> usize {
        self.local_reference_count
    }

    pub fn prc(&self) -> usize {
        self.parent_reference_count
    }

    pub fn sbrc(&self) -> usize {
        self.sub_region_reference_count
    }

    /// The quantity that gates collectability.
    pub fn combined_lrc(&self) -> usize {
        self.local_reference_count + self.sub_region_reference_count
    }

    pub fn parent(&self) -> Option<RegionId> {
        self.parent
    }

    pub fn state(&self) -> RegionState {
        self.state
    }

    pub fn bridge(&self) -> Option<ObjectPtr> {
        self.bridge
    }

    pub fn contains(&self, obj: ObjectPtr) -> bool {
        self.members.contains(&obj)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

impl Runtime {
    /// Allocate a fresh region together with its bridge object and return
    /// the bridge. The handle handed back is a root into the region, so the
    /// region starts with an LRC of one.
    pub fn create_region(&mut self) -> ObjectPtr {
        let r = self.alloc_region();
        let proto = self.well_known().region_proto;
        let bridge = self.alloc_object(ObjectKind::Bridge(r), Some(proto), Placement::InRegion(r));
        self.region_mut(r).bridge = Some(bridge);
        self.inc_lrc(r);
        debug!("created region {} with bridge {}", r, bridge);
        bridge
    }

    pub(crate) fn inc_lrc(&mut self, r: RegionId) {
        let region = self.region_mut(r);
        region.local_reference_count += 1;
        trace!("inc lrc: {} -> {}", r, region.local_reference_count);
        // Edge triggered: the region just became reachable.
        if region.combined_lrc() == 1 {
            self.inc_sbrc(r);
        }
    }

    pub(crate) fn dec_lrc(&mut self, r: RegionId) {
        let region = self.region_mut(r);
        if region.local_reference_count == 0 {
            fatal!("LRC underflow on region {}", r);
        }
        region.local_reference_count -= 1;
        trace!("dec lrc: {} -> {}", r, region.local_reference_count);
        // Edge triggered: the region just became unreachable.
        if region.combined_lrc() == 0 {
            self.dec_sbrc(r);
        }
    }

    /// `from` now contributes to its ancestor chain; walk up until an
    /// ancestor that was already counted.
    pub(crate) fn inc_sbrc(&mut self, from: RegionId) {
        let mut current = from;
        while let Some(parent) = self.region(current).parent {
            let p = self.region_mut(parent);
            p.sub_region_reference_count += 1;
            trace!("inc sbrc: {} -> {}", parent, p.sub_region_reference_count);
            if p.combined_lrc() != 1 {
                return;
            }
            current = parent;
        }
    }

    /// `from`'s contribution to its ancestor chain has vanished; walk up,
    /// and schedule whichever root region this strips bare.
    pub(crate) fn dec_sbrc(&mut self, from: RegionId) {
        let mut current = from;
        while let Some(parent) = self.region(current).parent {
            let p = self.region_mut(parent);
            if p.sub_region_reference_count == 0 {
                fatal!("SBRC underflow on region {}", parent);
            }
            p.sub_region_reference_count -= 1;
            trace!("dec sbrc: {} -> {}", parent, p.sub_region_reference_count);
            if p.combined_lrc() != 0 {
                return;
            }
            current = parent;
        }
        if self.region(current).combined_lrc() == 0 {
            self.enqueue_collect(current);
        }
    }

    pub(crate) fn inc_prc(&mut self, r: RegionId) {
        let region = self.region_mut(r);
        region.parent_reference_count += 1;
        trace!("inc prc: {} -> {}", r, region.parent_reference_count);
    }

    pub(crate) fn dec_prc(&mut self, r: RegionId) {
        let region = self.region_mut(r);
        if region.parent_reference_count == 0 {
            fatal!("PRC underflow on region {}", r);
        }
        region.parent_reference_count -= 1;
        debug!("dropping parent reference: {}", r);
        if region.parent_reference_count != 0 {
            return;
        }
        // Last parent reference: the region leaves the tree, taking its
        // contribution to the old ancestor chain with it.
        if self.region(r).combined_lrc() != 0 {
            self.dec_sbrc(r);
        } else {
            self.enqueue_collect(r);
        }
        self.region_mut(r).parent = None;
    }

    /// Nest `child` under `parent`, accounting one parent reference. A
    /// second distinct parent or a cycle is fatal: the region graph must
    /// stay a forest.
    pub(crate) fn set_parent(&mut self, child: RegionId, parent: RegionId) {
        debug_assert!(self.region(child).combined_lrc() != 0);
        self.inc_prc(child);

        let current = self.region(child).parent;
        if current == Some(parent) {
            return;
        }
        if current.is_some() {
            fatal!(
                "region {} already has a parent: creating a region DAG is not supported",
                child
            );
        }
        let mut ancestor = Some(parent);
        while let Some(a) = ancestor {
            if a == child {
                fatal!("nesting {} under {} would create a region cycle", child, parent);
            }
            ancestor = self.region(a).parent;
        }

        let region = self.region_mut(child);
        region.parent = Some(parent);
        debug_assert_eq!(region.parent_reference_count, 1);

        // A reachable child makes the parent chain reachable too.
        if self.region(child).combined_lrc() == 0 {
            return;
        }
        self.inc_sbrc(child);
    }

    pub(crate) fn enqueue_collect(&mut self, r: RegionId) {
        let region = self.region_mut(r);
        match region.state {
            RegionState::Active => {
                region.state = RegionState::PendingCollect;
                debug!("scheduling region {} for collection", r);
                self.to_collect.push(r);
            }
            state => fatal!("region {} queued for collection in state {}", r, state),
        }
    }

    /// Drain the collection queue, most recently queued region first. Each
    /// region has every member destructed before any member is deallocated,
    /// so in-region cycles are broken wholesale. Reentrant calls (from the
    /// teardown of cross-region references) fold into the running drain.
    pub(crate) fn collect(&mut self) {
        if self.collecting {
            return;
        }
        self.collecting = true;
        debug!("starting collection");
        while let Some(r) = self.to_collect.pop() {
            debug!("collecting region: {}", r);
            {
                let region = self.region_mut(r);
                debug_assert_eq!(region.state, RegionState::PendingCollect);
                region.state = RegionState::Collected;
            }
            let members: Vec<ObjectPtr> = self.region(r).members.iter().copied().collect();
            for &obj in &members {
                if self.object_exists(obj) {
                    self.destruct(obj);
                }
            }
            // Destructors may already have reclaimed members through the
            // reference protocol; sweep whoever is left.
            let remaining: Vec<ObjectPtr> = self.region(r).members.iter().copied().collect();
            for obj in remaining {
                self.dealloc_member(obj);
            }
            self.regions.remove(&r);
        }
        debug!("finished collection");
        self.collecting = false;
        if self.options().sanity {
            crate::sanity::verify_heap(self);
        }
    }

    /// Tear down `obj`'s outgoing references ahead of region deallocation.
    /// Same-region edges only drop the count and never re-enter the
    /// protocol: the whole region is going away, cycles included.
    fn destruct(&mut self, obj: ObjectPtr) {
        let obj_region = self.object(obj).region_id();
        let keys: Vec<String> = self.object(obj).fields.keys().cloned().collect();
        for key in keys {
            let Some(field) = self.object(obj).fields.get(&key).copied().flatten() else {
                continue;
            };
            if obj_region.is_some() && self.object(field).region_id() == obj_region {
                self.change_rc(field, -1);
            } else {
                let old = self.object_mut(obj).fields.insert(key, None).flatten();
                self.remove_reference(Some(obj), old);
            }
        }
        if let Some(proto) = self.object(obj).prototype {
            if obj_region.is_some() && self.object(proto).region_id() == obj_region {
                self.change_rc(proto, -1);
            } else {
                self.object_mut(obj).prototype = None;
                self.remove_reference(Some(obj), Some(proto));
            }
        }
    }

    /// Reclaim a member during the sweep. The destruct pass must have
    /// zeroed its count; anything else means a reference survived into a
    /// collected region.
    fn dealloc_member(&mut self, obj: ObjectPtr) {
        let rc = self.object(obj).rc();
        if rc != 0 {
            fatal!(
                "collected region member {} still has {} references",
                self.object_name(obj),
                rc
            );
        }
        trace!("deallocate: {}", obj);
        self.release_object_slot(obj);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_manager as mm;

    #[test]
    fn fresh_region_counters() {
        let mut rt = Runtime::new();
        let bridge = mm::create_region(&mut rt);
        let r = rt.region_of(bridge).unwrap();
        let region = rt.region(r);
        assert_eq!(region.lrc(), 1);
        assert_eq!(region.prc(), 0);
        assert_eq!(region.sbrc(), 0);
        assert_eq!(region.parent(), None);
        assert_eq!(region.state(), RegionState::Active);
        assert_eq!(region.bridge(), Some(bridge));
        assert!(region.contains(bridge));
    }

    #[test]
    fn nesting_bubbles_sbrc_up_the_chain() {
        let mut rt = Runtime::new();
        let outer = mm::create_region(&mut rt);
        let middle = mm::create_region(&mut rt);
        let inner = mm::create_region(&mut rt);
        let r_outer = rt.region_of(outer).unwrap();
        let r_middle = rt.region_of(middle).unwrap();
        let r_inner = rt.region_of(inner).unwrap();

        assert!(mm::set(&mut rt, outer, "m", Some(middle)).is_none());
        mm::add_reference(&mut rt, Some(outer), Some(middle));
        assert_eq!(rt.region(r_middle).parent(), Some(r_outer));
        assert_eq!(rt.region(r_middle).prc(), 1);
        assert_eq!(rt.region(r_outer).sbrc(), 1);

        assert!(mm::set(&mut rt, middle, "i", Some(inner)).is_none());
        mm::add_reference(&mut rt, Some(middle), Some(inner));
        assert_eq!(rt.region(r_inner).parent(), Some(r_middle));
        assert_eq!(rt.region(r_middle).sbrc(), 1);
        // The middle region was already counted upward; no further bubble.
        assert_eq!(rt.region(r_outer).sbrc(), 1);

        // Dropping the inner handle zeroes its combined LRC and retracts
        // its contribution, but only one level: the middle still holds its
        // own local reference.
        mm::remove_reference(&mut rt, None, Some(inner));
        assert_eq!(rt.region(r_middle).sbrc(), 0);
        assert_eq!(rt.region(r_outer).sbrc(), 1);
        assert!(rt.region_exists(r_inner));

        mm::remove_reference(&mut rt, None, Some(middle));
        assert_eq!(rt.region(r_outer).sbrc(), 0);

        mm::remove_reference(&mut rt, None, Some(outer));
        assert!(!rt.region_exists(r_outer));
        assert!(!rt.region_exists(r_middle));
        assert!(!rt.region_exists(r_inner));
        assert_eq!(rt.object_count(), 0);
    }

    #[test]
    fn multiple_parent_references_share_one_parent() {
        let mut rt = Runtime::new();
        let outer = mm::create_region(&mut rt);
        let inner = mm::create_region(&mut rt);
        let r_inner = rt.region_of(inner).unwrap();

        assert!(mm::set(&mut rt, outer, "a", Some(inner)).is_none());
        mm::add_reference(&mut rt, Some(outer), Some(inner));
        assert!(mm::set(&mut rt, outer, "b", Some(inner)).is_none());
        mm::add_reference(&mut rt, Some(outer), Some(inner));
        assert_eq!(rt.region(r_inner).prc(), 2);

        let old = mm::set(&mut rt, outer, "a", None);
        mm::remove_reference(&mut rt, Some(outer), old);
        assert_eq!(rt.region(r_inner).prc(), 1);
        assert!(rt.region_exists(r_inner));

        mm::remove_reference(&mut rt, None, Some(inner));
        mm::remove_reference(&mut rt, None, Some(outer));
        assert_eq!(rt.object_count(), 0);
    }
}
