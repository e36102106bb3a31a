//! Freezing: transitive relabeling of a subgraph into the shared immutable
//! heap, treated as an in-place move so the counters of the regions left
//! behind stay exact.

use std::collections::BTreeSet;

use crate::object::{ObjectPtr, Tag, TAG_IMMUTABLE};
use crate::region::{RegionId, RegionState};
use crate::runtime::Runtime;
use crate::visit::visit_from;

impl Runtime {
    /// Freeze everything reachable from `obj`. Idempotent; descent stops at
    /// cown boundaries (the cown handle itself freezes, the region behind
    /// it stays mutable and opaque). Afterwards the affected regions are
    /// rebalanced: fully frozen ones are released, the rest get their
    /// counters recomputed, and whatever that strands is collected.
    pub fn freeze(&mut self, obj: ObjectPtr) {
        debug!("freeze {}", obj);
        let mut affected: BTreeSet<RegionId> = BTreeSet::new();
        visit_from(self, obj, &mut |rt, e| {
            let Some(target) = e.target else {
                return false;
            };
            let o = rt.object(target);
            match o.tag() {
                Tag::Immutable => false,
                Tag::Cown => {
                    trace!("freeze stops at {} ({})", target, o.tag());
                    rt.object_mut(target).region.set_tag(TAG_IMMUTABLE);
                    false
                }
                Tag::Mutable => {
                    let r = o.region_id().expect("mutable object outside any region");
                    affected.insert(r);
                    rt.region_mut(r).members.remove(&target);
                    rt.object_mut(target).region.set_tag(TAG_IMMUTABLE);
                    true
                }
            }
        });
        self.rebalance_after_freeze(affected);
        self.verify_extreme();
    }

    /// Settle region counters after a freeze moved objects out from under
    /// them. Counter maintenance is edge-triggered and freeze cannot see
    /// the in-edges of what it froze, so the survivors are recounted from
    /// the heap instead.
    fn rebalance_after_freeze(&mut self, affected: BTreeSet<RegionId>) {
        let local = self.local_region_id();
        let affected: Vec<RegionId> = affected.into_iter().filter(|r| *r != local).collect();
        if affected.is_empty() {
            return;
        }

        // Fully frozen regions are released outright; every member left, so
        // there is nothing to destruct and nothing keeps their counters
        // meaningful.
        let mut released: BTreeSet<RegionId> = BTreeSet::new();
        for &r in &affected {
            if self.region(r).members.is_empty() {
                debug!("releasing fully-frozen region {}", r);
                debug_assert!(!self.to_collect.contains(&r));
                self.region_mut(r).state = RegionState::Collected;
                self.regions.remove(&r);
                released.insert(r);
            }
        }

        let survivors: Vec<RegionId> = self.regions.keys().copied().collect();
        for &r in &survivors {
            let region = self.region_mut(r);
            if let Some(p) = region.parent {
                if released.contains(&p) {
                    region.parent = None;
                }
            }
        }

        // Recount the survivors.
        let census = crate::sanity::census(self, None);
        for &r in &survivors {
            if r == local {
                continue;
            }
            let lrc = census.lrc.get(&r).copied().unwrap_or(0);
            self.region_mut(r).local_reference_count = lrc;
            let parent = self.region(r).parent;
            let prc = parent
                .map(|p| census.cross.get(&(p, r)).copied().unwrap_or(0))
                .unwrap_or(0);
            let region = self.region_mut(r);
            region.parent_reference_count = prc;
            if prc == 0 {
                region.parent = None;
            }
        }
        let sbrc = crate::sanity::expected_sbrc(self, &census.lrc);
        for &r in &survivors {
            if r == local {
                continue;
            }
            self.region_mut(r).sub_region_reference_count =
                sbrc.get(&r).copied().unwrap_or(0);
        }

        // Collect whatever the freeze stranded.
        for &r in &survivors {
            if r == local || !self.region_exists(r) {
                continue;
            }
            let region = self.region(r);
            if region.state == RegionState::Active
                && region.combined_lrc() == 0
                && region.parent.is_none()
            {
                self.enqueue_collect(r);
            }
        }
        self.collect();
    }
}
