//! The reference protocol: every edge the mutator creates, drops or moves
//! routes through here, and these are the only places region counters move.

use std::collections::BTreeSet;

use crate::fatal;
use crate::object::{ObjectPtr, Tag};
use crate::region::RegionId;
use crate::runtime::Runtime;
use crate::util::TaggedPointer;
use crate::visit::{visit_edge, visit_from, Edge};

impl Runtime {
    /// The region a reference *source* is charged to. A `None` source is a
    /// mutator root. References held by a cown are charged to the local
    /// region as well: the cown owns its region's LRC unit and releases it
    /// when the cown dies. Immutable sources have no region.
    pub(crate) fn source_region(&self, src: Option<ObjectPtr>) -> Option<RegionId> {
        match src {
            None => Some(self.local_region_id()),
            Some(src) => {
                let o = self.object(src);
                if o.is_cown() {
                    return Some(self.local_region_id());
                }
                match o.tag() {
                    Tag::Mutable => o.region_id(),
                    Tag::Immutable | Tag::Cown => None,
                }
            }
        }
    }

    /// The region a reference *target* is charged against: none for
    /// immutable objects and cowns, which do not participate in region
    /// counters.
    pub(crate) fn target_region(&self, target: ObjectPtr) -> Option<RegionId> {
        let o = self.object(target);
        match o.tag() {
            Tag::Mutable => o.region_id(),
            Tag::Immutable | Tag::Cown => None,
        }
    }

    /// Account a new reference from `src` to `target`. The target's count
    /// always moves; region counters move when the edge crosses a region
    /// boundary (the cases live in `add_region_reference`).
    pub fn add_reference(&mut self, src: Option<ObjectPtr>, target: Option<ObjectPtr>) {
        let Some(target) = target else {
            return;
        };
        let rc = self.change_rc(target, 1);
        trace!(
            "add reference {} -> {} (rc now {})",
            src.map(|s| s.to_string()).unwrap_or_else(|| "root".into()),
            target,
            rc
        );
        let src_region = self.source_region(src);
        self.add_region_reference(src_region, target);
        // No heap verification here even with extreme assertions on: the
        // caller may still hold an overwritten slot value whose release
        // (the closing remove_reference) is what restores the invariants.
    }

    /// Drop the reference from `src` to `target`, reclaiming whatever dies
    /// with it: counts of reached objects drop in preorder, objects whose
    /// count hits zero have their subtree processed and are deallocated in
    /// post-order, and the regions this strands are collected before the
    /// call returns.
    pub fn remove_reference(&mut self, src: Option<ObjectPtr>, target: Option<ObjectPtr>) {
        visit_edge(
            self,
            Edge {
                src,
                key: String::new(),
                target,
            },
            &mut |rt, e| {
                let Some(target) = e.target else {
                    return false;
                };
                let rc = rt.change_rc(target, -1);
                trace!(
                    "remove reference {} -> {} (rc now {})",
                    e.src.map(|s| s.to_string()).unwrap_or_else(|| "root".into()),
                    target,
                    rc
                );
                let src_region = rt.source_region(e.src);
                let target_region = rt.target_region(target);
                rt.remove_region_reference(src_region, target_region);
                rc == 0
            },
            &mut |rt, obj| rt.destroy_object(obj),
        );
        self.collect();
        self.verify_extreme();
    }

    /// Transfer the reference to `target` from `src` to `dst` without
    /// re-touching the target's count (the slot keeps its unit). No-op for
    /// empty, immutable and cown targets, and when both ends share a
    /// region. Moving an object out of its own region into another drags
    /// its closure along (see `migrate`).
    pub fn move_reference(
        &mut self,
        src: Option<ObjectPtr>,
        dst: Option<ObjectPtr>,
        target: Option<ObjectPtr>,
    ) {
        let Some(target) = target else {
            return;
        };
        {
            let t = self.object(target);
            if t.is_immutable() || t.is_cown() {
                return;
            }
        }
        let src_region = self.source_region(src);
        let dst_region = self.source_region(dst);
        if src_region == dst_region {
            return;
        }
        let target_region = self.target_region(target);

        if target_region == src_region {
            if let (Some(from), Some(to)) = (src_region, dst_region) {
                if from != self.local_region_id() && to != self.local_region_id() {
                    self.migrate(from, to, target);
                    self.collect();
                    self.verify_extreme();
                    return;
                }
            }
        }

        self.add_region_reference(dst_region, target);
        // The capture of target_region above matters: absorption during the
        // add may have changed the object's region.
        self.remove_region_reference(src_region, target_region);
        self.collect();
        self.verify_extreme();
    }

    /// Region bookkeeping for a new edge into `target`.
    pub(crate) fn add_region_reference(&mut self, src_region: Option<RegionId>, target: ObjectPtr) {
        let Some(target_region) = self.target_region(target) else {
            return;
        };
        if src_region == Some(target_region) {
            return;
        }
        let Some(src_region) = src_region else {
            fatal!(
                "immutable object may not take a reference to mutable object {}",
                self.object_name(target)
            );
        };
        if src_region == self.local_region_id() {
            self.inc_lrc(target_region);
            return;
        }
        if target_region == self.local_region_id() {
            self.add_to_region(src_region, target);
            return;
        }
        // A region-crossing edge may only land on the target region's
        // bridge; anything else would break the tree of regions.
        if !self.object(target).is_bridge() {
            fatal!(
                "cross-region reference to {} which is not the bridge of {}",
                self.object_name(target),
                target_region
            );
        }
        self.set_parent(target_region, src_region);
    }

    /// Region bookkeeping for a dropped edge.
    pub(crate) fn remove_region_reference(
        &mut self,
        src_region: Option<RegionId>,
        target_region: Option<RegionId>,
    ) {
        if src_region == target_region {
            trace!("same region, nothing to adjust");
            return;
        }
        let Some(target_region) = target_region else {
            return;
        };
        let Some(src_region) = src_region else {
            fatal!("immutable object held a reference into region {}", target_region);
        };
        if src_region == self.local_region_id() {
            self.dec_lrc(target_region);
            return;
        }
        // A region-to-region edge is a parent reference by construction.
        let parent = self.region(target_region).parent();
        if parent != Some(src_region) {
            fatal!(
                "removing an edge from {} into {} which is not its child",
                src_region,
                target_region
            );
        }
        self.dec_prc(target_region);
    }

    /// Absorb the closure of `target` out of the local region into `r`,
    /// re-establishing the region's LRC for the new residents: the count of
    /// every absorbed object is summed, every edge discovered inside the
    /// closure cancels one unit of that sum, and the remainder is exactly
    /// the external (local) references that now point into `r`.
    pub(crate) fn add_to_region(&mut self, r: RegionId, target: ObjectPtr) {
        let mut internal_references = 0usize;
        let mut rc_of_added = 0usize;
        let local = self.local_region_id();

        visit_from(self, target, &mut |rt, e| {
            let Some(obj) = e.target else {
                return false;
            };
            let o = rt.object(obj);
            match o.tag() {
                // The frozen heap and cowns are region-neutral.
                Tag::Immutable | Tag::Cown => false,
                Tag::Mutable => {
                    let obj_region = o.region_id().expect("mutable object outside any region");
                    if obj_region == local {
                        trace!("adding {} to region {} (rc = {})", obj, r, o.rc());
                        rc_of_added += o.rc();
                        internal_references += 1;
                        rt.object_mut(obj).region = TaggedPointer::new(r);
                        rt.region_mut(local).members.remove(&obj);
                        rt.region_mut(r).members.insert(obj);
                        true
                    } else if obj_region == r {
                        trace!("internal reference to {}", obj);
                        internal_references += 1;
                        false
                    } else {
                        if !o.is_bridge() {
                            fatal!(
                                "cannot absorb {} which belongs to region {}",
                                rt.object_name(obj),
                                obj_region
                            );
                        }
                        // A captured region nests under the new home, and
                        // its local reference (the edge being absorbed)
                        // becomes a parent reference.
                        rt.set_parent(obj_region, r);
                        rt.dec_lrc(obj_region);
                        false
                    }
                }
            }
        });

        let delta = rc_of_added as isize - internal_references as isize;
        debug!(
            "absorbed closure into {}: rc sum {}, internal {}, lrc {:+}",
            r, rc_of_added, internal_references, delta
        );
        // Applied through the counter helpers one unit at a time so the
        // zero-crossing walks fire exactly as for ordinary edges.
        for _ in 0..delta.unsigned_abs() {
            if delta > 0 {
                self.inc_lrc(r);
            } else {
                self.dec_lrc(r);
            }
        }
    }

    /// Move the closure of `target` from region `from` into region `to`
    /// (the S6 move): membership migrates, external (root) references take
    /// their LRC units with them, and nested regions reachable from the
    /// closure are reparented.
    fn migrate(&mut self, from: RegionId, to: RegionId, target: ObjectPtr) {
        debug!("migrating {} from {} to {}", target, from, to);
        let mut internal_references = 0usize;
        let mut rc_of_moved = 0usize;
        let mut moved: BTreeSet<ObjectPtr> = BTreeSet::new();
        let local = self.local_region_id();

        visit_from(self, target, &mut |rt, e| {
            let Some(obj) = e.target else {
                return false;
            };
            let o = rt.object(obj);
            match o.tag() {
                Tag::Immutable | Tag::Cown => false,
                Tag::Mutable => {
                    let obj_region = o.region_id().expect("mutable object outside any region");
                    if obj_region == local {
                        // An edge from region residents into the local
                        // region would have absorbed its target when it was
                        // created.
                        fatal!(
                            "migrated closure reaches local object {}",
                            rt.object_name(obj)
                        );
                    }
                    if obj_region == from {
                        if o.is_bridge() {
                            fatal!("cannot migrate {} out of its own region", rt.object_name(obj));
                        }
                        rc_of_moved += o.rc();
                        internal_references += 1;
                        moved.insert(obj);
                        rt.object_mut(obj).region = TaggedPointer::new(to);
                        rt.region_mut(from).members.remove(&obj);
                        rt.region_mut(to).members.insert(obj);
                        true
                    } else if obj_region == to {
                        if moved.contains(&obj) {
                            // Another edge inside the moved closure.
                            internal_references += 1;
                        } else {
                            // This edge used to be a parent reference from
                            // `from`; it is internal to `to` now.
                            rt.dec_prc(to);
                        }
                        false
                    } else {
                        if !o.is_bridge() {
                            fatal!(
                                "cannot migrate {} which belongs to region {}",
                                rt.object_name(obj),
                                obj_region
                            );
                        }
                        // A nested region follows its handle into the new
                        // parent; the parent-reference count is unchanged
                        // because its parent edges move with the closure.
                        if rt.region(obj_region).parent() == Some(from) {
                            rt.reparent(obj_region, to);
                        } else if rt.region(obj_region).parent() != Some(to) {
                            fatal!(
                                "migrated closure reaches {} whose parent is neither source nor destination",
                                obj_region
                            );
                        }
                        false
                    }
                }
            }
        });

        // External references are mutator roots; their LRC units follow the
        // objects from the old region to the new one.
        let external = rc_of_moved - internal_references;
        debug!(
            "migrated {} objects, {} external references follow",
            moved.len(),
            external
        );
        for _ in 0..external {
            self.inc_lrc(to);
        }
        for _ in 0..external {
            self.dec_lrc(from);
        }

        // Whatever still points from the old region into the moved closure
        // now crosses regions without a bridge.
        if self.region_exists(from) {
            let members: Vec<ObjectPtr> = self.region(from).members.iter().copied().collect();
            for m in members {
                let o = self.object(m);
                let hit = o
                    .fields
                    .values()
                    .copied()
                    .flatten()
                    .chain(o.prototype)
                    .find(|t| moved.contains(t));
                if let Some(t) = hit {
                    fatal!(
                        "{} still references {} which moved out of {}",
                        self.object_name(m),
                        t,
                        from
                    );
                }
            }
        }
    }

    /// Rehang `child` under `new_parent`, keeping the SBRC chains exact on
    /// both sides. The parent-reference count is deliberately untouched.
    fn reparent(&mut self, child: RegionId, new_parent: RegionId) {
        let mut ancestor = Some(new_parent);
        while let Some(a) = ancestor {
            if a == child {
                fatal!(
                    "reparenting {} under {} would create a region cycle",
                    child,
                    new_parent
                );
            }
            ancestor = self.region(a).parent();
        }
        let reachable = self.region(child).combined_lrc() != 0;
        if reachable {
            self.dec_sbrc(child);
        }
        self.region_mut(child).parent = Some(new_parent);
        if reachable {
            self.inc_sbrc(child);
        }
    }

    #[cfg(feature = "extreme_assertions")]
    pub(crate) fn verify_extreme(&mut self) {
        if !self.collecting() {
            crate::sanity::verify_heap(self);
        }
    }

    #[cfg(not(feature = "extreme_assertions"))]
    pub(crate) fn verify_extreme(&mut self) {}
}
