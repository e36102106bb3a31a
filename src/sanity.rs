//! Heap verification: recount everything the protocol maintains
//! incrementally and abort on any disagreement.
//!
//! The census walks the whole heap, classifies every edge by the region of
//! its source, and derives per-object root-handle counts as the difference
//! between an object's reference count and its in-edges. The verifier
//! compares the stored counters against the census; the freeze rebalance
//! reuses the census to rebuild counters after objects leave their regions.
//! Randomized tests run [`verify`] after every mutation.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::fatal;
use crate::object::{ObjectPtr, Tag};
use crate::region::RegionId;
use crate::runtime::Runtime;

/// A from-scratch recount of the heap.
pub(crate) struct Census {
    /// Incoming edges (fields and prototype links) per object.
    pub in_edges: BTreeMap<ObjectPtr, usize>,
    /// Mutator root handles per object. Derived as `rc - in_edges` unless
    /// the caller declared its roots, in which case they are checked.
    pub roots: BTreeMap<ObjectPtr, usize>,
    /// Expected LRC per region: root handles of members plus edges from the
    /// local region and from cowns.
    pub lrc: BTreeMap<RegionId, usize>,
    /// Region-to-region edge counts; the `(parent(r), r)` entry is the
    /// expected PRC of `r`.
    pub cross: BTreeMap<(RegionId, RegionId), usize>,
}

/// How a reference source participates in region accounting.
#[derive(Copy, Clone)]
enum SourceClass {
    /// Local-region objects, cowns, and (for declared roots) the mutator.
    Local,
    Region(RegionId),
    Immutable,
}

/// Count every edge in the heap and derive or check root handles.
pub(crate) fn census(rt: &Runtime, declared_roots: Option<&[ObjectPtr]>) -> Census {
    let local = rt.local_region_id();

    let mut in_edges: BTreeMap<ObjectPtr, usize> = BTreeMap::new();
    let mut lrc: BTreeMap<RegionId, usize> = BTreeMap::new();
    let mut cross: BTreeMap<(RegionId, RegionId), usize> = BTreeMap::new();

    for (&src, o) in rt.objects.iter() {
        let class = if o.is_cown() {
            SourceClass::Local
        } else {
            match o.tag() {
                Tag::Mutable => {
                    let r = o.region_id().expect("mutable object outside any region");
                    if r == local {
                        SourceClass::Local
                    } else {
                        SourceClass::Region(r)
                    }
                }
                Tag::Immutable => SourceClass::Immutable,
                Tag::Cown => SourceClass::Local,
            }
        };
        let targets = o.fields.values().copied().flatten().chain(o.prototype);
        for target in targets {
            *in_edges.entry(target).or_insert(0) += 1;
            let t = rt.object(target);
            if t.is_cown() || t.tag() != Tag::Mutable {
                continue;
            }
            let tr = t.region_id().expect("mutable object outside any region");
            match class {
                SourceClass::Immutable => fatal!(
                    "immutable {} references mutable {}",
                    rt.object_name(src),
                    rt.object_name(target)
                ),
                SourceClass::Local => {
                    if tr != local {
                        *lrc.entry(tr).or_insert(0) += 1;
                    }
                }
                SourceClass::Region(sr) => {
                    if sr != tr {
                        if !t.is_bridge() {
                            fatal!(
                                "cross-region edge {} -> {} lands on a non-bridge",
                                rt.object_name(src),
                                rt.object_name(target)
                            );
                        }
                        *cross.entry((sr, tr)).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    let mut declared: BTreeMap<ObjectPtr, usize> = BTreeMap::new();
    if let Some(roots) = declared_roots {
        for &r in roots {
            *declared.entry(r).or_insert(0) += 1;
        }
    }

    let mut roots: BTreeMap<ObjectPtr, usize> = BTreeMap::new();
    for (&ptr, o) in rt.objects.iter() {
        let ins = in_edges.get(&ptr).copied().unwrap_or(0);
        let rc = o.rc();
        let derived = match declared_roots {
            None => {
                if rc < ins {
                    fatal!(
                        "{} has rc {} but {} incoming edges",
                        rt.object_name(ptr),
                        rc,
                        ins
                    );
                }
                rc - ins
            }
            Some(_) => {
                // The runtime itself holds one handle on each interned
                // global.
                let runtime_handle = usize::from(!rt.is_tracked(ptr));
                let expected = ins + declared.get(&ptr).copied().unwrap_or(0) + runtime_handle;
                if rc != expected {
                    fatal!(
                        "{} has rc {} but {} incoming edges and {} roots",
                        rt.object_name(ptr),
                        rc,
                        ins,
                        expected - ins
                    );
                }
                rc - ins
            }
        };
        if derived > 0 {
            roots.insert(ptr, derived);
        }
        // Root handles of region members are local references.
        if let Some(r) = o.region_id() {
            if r != local && derived > 0 {
                *lrc.entry(r).or_insert(0) += derived;
            }
        }
    }

    Census {
        in_edges,
        roots,
        lrc,
        cross,
    }
}

/// Bottom-up recount of every region's SBRC given recounted LRCs: the
/// number of direct children whose combined LRC is non-zero.
pub(crate) fn expected_sbrc(
    rt: &Runtime,
    lrc: &BTreeMap<RegionId, usize>,
) -> BTreeMap<RegionId, usize> {
    let ids: Vec<RegionId> = rt.regions.keys().copied().collect();
    let mut children: BTreeMap<RegionId, Vec<RegionId>> = BTreeMap::new();
    let mut depths: Vec<(usize, RegionId)> = Vec::new();
    for &r in &ids {
        if let Some(p) = rt.region(r).parent() {
            children.entry(p).or_default().push(r);
        }
        let mut depth = 0;
        let mut current = r;
        while let Some(p) = rt.region(current).parent() {
            depth += 1;
            current = p;
            if depth > ids.len() {
                fatal!("region parent links contain a cycle through {}", r);
            }
        }
        depths.push((depth, r));
    }
    depths.sort_by(|a, b| b.0.cmp(&a.0));

    let mut sbrc: BTreeMap<RegionId, usize> = BTreeMap::new();
    for (_, r) in depths {
        let count = children
            .get(&r)
            .map(|cs| {
                cs.iter()
                    .filter(|&&c| {
                        lrc.get(&c).copied().unwrap_or(0) + sbrc.get(&c).copied().unwrap_or(0) > 0
                    })
                    .count()
            })
            .unwrap_or(0);
        sbrc.insert(r, count);
    }
    sbrc
}

/// Structural verification: everything except absolute reference counts,
/// whose root contribution is derived rather than declared.
pub fn verify_heap(rt: &Runtime) {
    verify_census(rt, census(rt, None));
}

/// Full verification against the mutator's declared root handles: exact
/// reference counts, LRC, PRC, SBRC, the region forest and the immutable
/// closure.
pub fn verify(rt: &Runtime, roots: &[ObjectPtr]) {
    verify_census(rt, census(rt, Some(roots)));
}

fn verify_census(rt: &Runtime, census: Census) {
    let local = rt.local_region_id();

    // Membership is bidirectional.
    for (&ptr, o) in rt.objects.iter() {
        if let Some(r) = o.region_id() {
            if !rt.region_exists(r) {
                fatal!("{} belongs to vanished region {}", rt.object_name(ptr), r);
            }
            if !rt.region(r).contains(ptr) {
                fatal!("{} missing from member set of {}", rt.object_name(ptr), r);
            }
        }
    }
    for (&r, region) in rt.regions.iter() {
        for &m in region.members.iter() {
            if !rt.object_exists(m) {
                fatal!("member set of {} holds dangling {}", r, m);
            }
            if rt.object(m).region_id() != Some(r) {
                fatal!("{} is in the member set of {} but not its region", m, r);
            }
        }
    }

    let sbrc = expected_sbrc(rt, &census.lrc);
    for (&r, region) in rt.regions.iter() {
        if r == local {
            continue;
        }
        let expected_lrc = census.lrc.get(&r).copied().unwrap_or(0);
        if region.lrc() != expected_lrc {
            fatal!("{} has lrc {} but the heap says {}", r, region.lrc(), expected_lrc);
        }
        let expected = sbrc.get(&r).copied().unwrap_or(0);
        if region.sbrc() != expected {
            fatal!("{} has sbrc {} but the heap says {}", r, region.sbrc(), expected);
        }
        let expected_prc = region
            .parent()
            .map(|p| census.cross.get(&(p, r)).copied().unwrap_or(0))
            .unwrap_or(0);
        if region.prc() != expected_prc {
            fatal!("{} has prc {} but the heap says {}", r, region.prc(), expected_prc);
        }
        if (region.prc() > 0) != region.parent().is_some() {
            fatal!(
                "{} has prc {} with parent {:?}",
                r,
                region.prc(),
                region.parent()
            );
        }
    }

    // Every region-to-region edge must be a parent edge.
    let strays: Vec<String> = census
        .cross
        .keys()
        .filter(|&&(src, dst)| rt.region_exists(dst) && rt.region(dst).parent() != Some(src))
        .map(|&(src, dst)| format!("{} -> {}", src, dst))
        .collect();
    if !strays.is_empty() {
        fatal!(
            "region edges outside the parent relation: {}",
            strays.iter().join(", ")
        );
    }
}
