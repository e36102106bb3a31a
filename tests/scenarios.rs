//! End-to-end scenarios over the public surface: region formation,
//! nesting, cycles, freezing, move semantics and the fatal paths.

use regionrt::memory_manager as mm;
use regionrt::{sanity, Runtime};

#[test]
fn simple_region_formation() {
    let mut rt = Runtime::new();
    let a = mm::make_object(&mut rt);
    let b = mm::make_object(&mut rt);
    assert!(mm::set(&mut rt, a, "f", Some(b)).is_none());
    mm::add_reference(&mut rt, Some(a), Some(b));

    // Form a region and hand it the graph rooted at `a`.
    let bridge = mm::create_region(&mut rt);
    let r = rt.region_of(bridge).unwrap();
    assert_eq!(rt.region(r).lrc(), 1);
    assert!(mm::set(&mut rt, bridge, "a", Some(a)).is_none());
    mm::add_reference(&mut rt, Some(bridge), Some(a));

    // Both objects moved out of the local region.
    assert_eq!(rt.region_of(a), Some(r));
    assert_eq!(rt.region_of(b), Some(r));
    assert!(rt.region(r).contains(a));
    assert!(rt.region(r).contains(b));
    // Bridge handle plus the two local handles on a and b.
    assert_eq!(rt.region(r).lrc(), 3);
    sanity::verify(&rt, &[a, b, bridge]);

    mm::remove_reference(&mut rt, None, Some(a));
    mm::remove_reference(&mut rt, None, Some(b));
    sanity::verify(&rt, &[bridge]);
    assert_eq!(rt.region(r).lrc(), 1);

    // Dropping the bridge handle collects the region wholesale.
    mm::remove_reference(&mut rt, None, Some(bridge));
    assert!(!rt.region_exists(r));
    assert_eq!(mm::object_count(&rt), 0);
    assert_eq!(rt.shutdown(), 0);
}

#[test]
fn nested_regions_collect_in_post_order() {
    let mut rt = Runtime::new();
    let x = mm::create_region(&mut rt);
    let y = mm::create_region(&mut rt);
    let r1 = rt.region_of(x).unwrap();
    let r2 = rt.region_of(y).unwrap();

    // y becomes a child of r1.
    assert!(mm::set(&mut rt, x, "child", Some(y)).is_none());
    mm::add_reference(&mut rt, Some(x), Some(y));
    assert_eq!(rt.region(r2).parent(), Some(r1));
    assert_eq!(rt.region(r2).prc(), 1);
    assert_eq!(rt.region(r1).sbrc(), 1);
    sanity::verify(&rt, &[x, y]);

    // The mutator's handle on y goes away; the region lives on through x.
    mm::remove_reference(&mut rt, None, Some(y));
    assert!(rt.region_exists(r2));
    assert_eq!(rt.region(r2).lrc(), 0);
    assert_eq!(rt.region(r1).sbrc(), 0);
    sanity::verify(&rt, &[x]);

    // Dropping x takes both regions down, child before parent.
    mm::remove_reference(&mut rt, None, Some(x));
    assert!(!rt.region_exists(r1));
    assert!(!rt.region_exists(r2));
    assert_eq!(mm::object_count(&rt), 0);
    assert_eq!(rt.shutdown(), 0);
}

#[test]
fn cycles_inside_a_region_are_reclaimed_wholesale() {
    let mut rt = Runtime::new();
    let a = mm::make_object(&mut rt);
    let b = mm::make_object(&mut rt);
    assert!(mm::set(&mut rt, a, "b", Some(b)).is_none());
    mm::add_reference(&mut rt, Some(a), Some(b));
    assert!(mm::set(&mut rt, b, "a", Some(a)).is_none());
    mm::add_reference(&mut rt, Some(b), Some(a));

    let bridge = mm::create_region(&mut rt);
    assert!(mm::set(&mut rt, bridge, "x", Some(a)).is_none());
    mm::add_reference(&mut rt, Some(bridge), Some(a));
    let r = rt.region_of(bridge).unwrap();
    assert_eq!(rt.region_of(a), Some(r));
    assert_eq!(rt.region_of(b), Some(r));

    mm::remove_reference(&mut rt, None, Some(a));
    mm::remove_reference(&mut rt, None, Some(b));
    sanity::verify(&rt, &[bridge]);

    // Plain reference counting would leak the a <-> b cycle; region
    // teardown breaks it wholesale.
    mm::remove_reference(&mut rt, None, Some(bridge));
    assert!(!rt.region_exists(r));
    assert_eq!(mm::object_count(&rt), 0);
    assert_eq!(rt.shutdown(), 0);
}

#[test]
fn freeze_is_transitive_and_idempotent() {
    let mut rt = Runtime::new();
    let a = mm::make_object(&mut rt);
    let b = mm::make_object(&mut rt);
    assert!(mm::set(&mut rt, a, "b", Some(b)).is_none());
    mm::add_reference(&mut rt, Some(a), Some(b));

    mm::freeze(&mut rt, a);
    assert!(rt.is_immutable(a));
    assert!(rt.is_immutable(b));
    assert_eq!(rt.region_of(a), None);
    sanity::verify(&rt, &[a, b]);

    // Idempotent.
    mm::freeze(&mut rt, a);
    assert!(rt.is_immutable(b));

    // The count on a frozen object still moves.
    let rc = rt.rc_of(a);
    mm::add_reference(&mut rt, None, Some(a));
    assert_eq!(rt.rc_of(a), rc + 1);
    mm::remove_reference(&mut rt, None, Some(a));

    // The frozen closure dies by counts alone once the roots go.
    mm::remove_reference(&mut rt, None, Some(a));
    mm::remove_reference(&mut rt, None, Some(b));
    assert_eq!(mm::object_count(&rt), 0);
    assert_eq!(rt.shutdown(), 0);
}

#[test]
#[should_panic(expected = "cannot mutate immutable object")]
fn writing_a_frozen_field_aborts() {
    let mut rt = Runtime::new();
    let a = mm::make_object(&mut rt);
    mm::freeze(&mut rt, a);
    let v = mm::make_object(&mut rt);
    let _ = mm::set(&mut rt, a, "f", Some(v));
}

#[test]
#[should_panic(expected = "region DAG")]
fn second_parent_aborts() {
    let mut rt = Runtime::new();
    let r1 = mm::create_region(&mut rt);
    let r2 = mm::create_region(&mut rt);
    let r3 = mm::create_region(&mut rt);

    assert!(mm::set(&mut rt, r1, "x", Some(r3)).is_none());
    mm::add_reference(&mut rt, Some(r1), Some(r3));
    // A second distinct parent for r3's region must abort.
    assert!(mm::set(&mut rt, r2, "x", Some(r3)).is_none());
    mm::add_reference(&mut rt, Some(r2), Some(r3));
}

#[test]
#[should_panic(expected = "region cycle")]
fn parent_cycle_aborts() {
    let mut rt = Runtime::new();
    let outer = mm::create_region(&mut rt);
    let inner = mm::create_region(&mut rt);

    assert!(mm::set(&mut rt, outer, "c", Some(inner)).is_none());
    mm::add_reference(&mut rt, Some(outer), Some(inner));
    // Linking the outer region underneath its own child closes a cycle.
    assert!(mm::set(&mut rt, inner, "c", Some(outer)).is_none());
    mm::add_reference(&mut rt, Some(inner), Some(outer));
}

#[test]
#[should_panic(expected = "not the bridge")]
fn cross_region_interior_reference_aborts() {
    let mut rt = Runtime::new();
    let bridge_a = mm::create_region(&mut rt);
    let bridge_b = mm::create_region(&mut rt);

    let x = mm::make_object(&mut rt);
    assert!(mm::set(&mut rt, bridge_a, "x", Some(x)).is_none());
    mm::add_reference(&mut rt, Some(bridge_a), Some(x));
    // x is interior to region A now; region B may not reach it.
    assert!(mm::set(&mut rt, bridge_b, "x", Some(x)).is_none());
    mm::add_reference(&mut rt, Some(bridge_b), Some(x));
}

#[test]
fn move_between_regions_migrates_the_target() {
    let mut rt = Runtime::new();
    let bridge_a = mm::create_region(&mut rt);
    let bridge_b = mm::create_region(&mut rt);
    let ra = rt.region_of(bridge_a).unwrap();
    let rb = rt.region_of(bridge_b).unwrap();

    let x = mm::make_object(&mut rt);
    assert!(mm::set(&mut rt, bridge_a, "x", Some(x)).is_none());
    mm::add_reference(&mut rt, Some(bridge_a), Some(x));
    mm::remove_reference(&mut rt, None, Some(x));
    assert_eq!(rt.region_of(x), Some(ra));
    assert_eq!(rt.region(ra).lrc(), 1);

    // Move the x slot from bridge_a to bridge_b: clear the old slot (the
    // count travels with the reference), write the new one, then let the
    // protocol settle membership and counters.
    let moved = mm::set(&mut rt, bridge_a, "x", None);
    assert_eq!(moved, Some(x));
    assert!(mm::set(&mut rt, bridge_b, "x", moved).is_none());
    mm::move_reference(&mut rt, Some(bridge_a), Some(bridge_b), moved);

    assert_eq!(rt.region_of(x), Some(rb));
    assert!(!rt.region(ra).contains(x));
    assert!(rt.region(rb).contains(x));
    assert_eq!(rt.region(ra).lrc(), 1);
    assert_eq!(rt.region(rb).lrc(), 1);
    sanity::verify(&rt, &[bridge_a, bridge_b]);

    mm::remove_reference(&mut rt, None, Some(bridge_a));
    mm::remove_reference(&mut rt, None, Some(bridge_b));
    assert_eq!(mm::object_count(&rt), 0);
    assert_eq!(rt.shutdown(), 0);
}

#[test]
fn move_with_root_handle_carries_the_lrc_unit() {
    let mut rt = Runtime::new();
    let bridge_a = mm::create_region(&mut rt);
    let bridge_b = mm::create_region(&mut rt);
    let ra = rt.region_of(bridge_a).unwrap();
    let rb = rt.region_of(bridge_b).unwrap();

    let x = mm::make_object(&mut rt);
    assert!(mm::set(&mut rt, bridge_a, "x", Some(x)).is_none());
    mm::add_reference(&mut rt, Some(bridge_a), Some(x));
    // Keep the root handle on x this time.
    assert_eq!(rt.region(ra).lrc(), 2);

    let moved = mm::set(&mut rt, bridge_a, "x", None);
    assert!(mm::set(&mut rt, bridge_b, "x", moved).is_none());
    mm::move_reference(&mut rt, Some(bridge_a), Some(bridge_b), moved);

    assert_eq!(rt.region_of(x), Some(rb));
    assert_eq!(rt.region(ra).lrc(), 1);
    assert_eq!(rt.region(rb).lrc(), 2);
    sanity::verify(&rt, &[bridge_a, bridge_b, x]);

    mm::remove_reference(&mut rt, None, Some(x));
    mm::remove_reference(&mut rt, None, Some(bridge_a));
    mm::remove_reference(&mut rt, None, Some(bridge_b));
    assert_eq!(rt.shutdown(), 0);
}

#[test]
fn move_to_local_keeps_the_object_in_its_region() {
    let mut rt = Runtime::new();
    let bridge = mm::create_region(&mut rt);
    let r = rt.region_of(bridge).unwrap();
    let x = mm::make_object(&mut rt);
    assert!(mm::set(&mut rt, bridge, "x", Some(x)).is_none());
    mm::add_reference(&mut rt, Some(bridge), Some(x));
    mm::remove_reference(&mut rt, None, Some(x));

    // Pulling the reference back to a root does not migrate the object;
    // it just becomes a local reference into the region.
    let pulled = mm::set(&mut rt, bridge, "x", None);
    assert_eq!(pulled, Some(x));
    mm::move_reference(&mut rt, Some(bridge), None, pulled);
    assert_eq!(rt.region_of(x), Some(r));
    assert_eq!(rt.region(r).lrc(), 2);
    sanity::verify(&rt, &[bridge, x]);

    mm::remove_reference(&mut rt, None, Some(x));
    mm::remove_reference(&mut rt, None, Some(bridge));
    assert_eq!(rt.shutdown(), 0);
}

#[test]
fn freezing_a_whole_region_releases_it() {
    let mut rt = Runtime::new();
    let bridge = mm::create_region(&mut rt);
    let r = rt.region_of(bridge).unwrap();
    let a = mm::make_object(&mut rt);
    assert!(mm::set(&mut rt, bridge, "a", Some(a)).is_none());
    mm::add_reference(&mut rt, Some(bridge), Some(a));
    mm::remove_reference(&mut rt, None, Some(a));

    mm::freeze(&mut rt, bridge);
    assert!(rt.is_immutable(bridge));
    assert!(rt.is_immutable(a));
    // Every member went immutable, so the region holds no counters and is
    // gone entirely.
    assert!(!rt.region_exists(r));
    sanity::verify(&rt, &[bridge]);

    mm::remove_reference(&mut rt, None, Some(bridge));
    assert_eq!(mm::object_count(&rt), 0);
    assert_eq!(rt.shutdown(), 0);
}

#[test]
fn partially_frozen_region_keeps_exact_counters() {
    let mut rt = Runtime::new();
    let bridge = mm::create_region(&mut rt);
    let r = rt.region_of(bridge).unwrap();

    // m is a member that the bridge cannot reach, held by a root handle.
    let m = mm::make_object(&mut rt);
    assert!(mm::set(&mut rt, bridge, "m", Some(m)).is_none());
    mm::add_reference(&mut rt, Some(bridge), Some(m));
    let old = mm::set(&mut rt, bridge, "m", None);
    mm::remove_reference(&mut rt, Some(bridge), old);
    assert_eq!(rt.region(r).lrc(), 2);

    mm::freeze(&mut rt, bridge);
    assert!(rt.is_immutable(bridge));
    assert!(!rt.is_immutable(m));
    // The region survives with the unreached member, and its LRC dropped
    // to the one root handle still pointing in.
    assert!(rt.region_exists(r));
    assert_eq!(rt.region(r).lrc(), 1);
    sanity::verify(&rt, &[bridge, m]);

    mm::remove_reference(&mut rt, None, Some(bridge));
    mm::remove_reference(&mut rt, None, Some(m));
    assert!(!rt.region_exists(r));
    assert_eq!(rt.shutdown(), 0);
}

#[test]
fn freeze_stops_at_cown_boundaries() {
    let mut rt = Runtime::new();
    let bridge = mm::create_region(&mut rt);
    let r = rt.region_of(bridge).unwrap();
    let inner = mm::make_object(&mut rt);
    assert!(mm::set(&mut rt, bridge, "inner", Some(inner)).is_none());
    mm::add_reference(&mut rt, Some(bridge), Some(inner));
    mm::remove_reference(&mut rt, None, Some(inner));

    // The cown takes over the bridge handle.
    let cown = mm::make_cown(&mut rt, bridge);
    let holder = mm::make_object(&mut rt);
    assert!(mm::set(&mut rt, holder, "c", Some(cown)).is_none());
    mm::add_reference(&mut rt, Some(holder), Some(cown));
    sanity::verify(&rt, &[cown, holder]);

    mm::freeze(&mut rt, holder);
    assert!(rt.is_immutable(holder));
    assert!(rt.is_immutable(cown));
    // The region behind the cown stays mutable and alive.
    assert!(rt.region_exists(r));
    assert!(!rt.is_immutable(bridge));
    assert!(!rt.is_immutable(inner));
    assert_eq!(rt.region(r).lrc(), 1);
    sanity::verify(&rt, &[cown, holder]);

    // Dropping the frozen holder unwinds everything, region included.
    mm::remove_reference(&mut rt, None, Some(cown));
    mm::remove_reference(&mut rt, None, Some(holder));
    assert!(!rt.region_exists(r));
    assert_eq!(mm::object_count(&rt), 0);
    assert_eq!(rt.shutdown(), 0);
}

#[test]
fn cown_owns_its_region() {
    let mut rt = Runtime::new();
    let bridge = mm::create_region(&mut rt);
    let r = rt.region_of(bridge).unwrap();

    let cown = mm::make_cown(&mut rt, bridge);
    // Ownership transferred: the region's LRC unit is the cown's now.
    assert_eq!(rt.region(r).lrc(), 1);
    sanity::verify(&rt, &[cown]);

    mm::remove_reference(&mut rt, None, Some(cown));
    assert!(!rt.region_exists(r));
    assert_eq!(mm::object_count(&rt), 0);
    assert_eq!(rt.shutdown(), 0);
}
