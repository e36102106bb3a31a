use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;

use regionrt::memory_manager as mm;
use regionrt::Runtime;

fn bench_local_churn(c: &mut Criterion) {
    c.bench_function("local_churn", |b| {
        b.iter(|| {
            let mut rt = Runtime::new();
            let dict = mm::make_object(&mut rt);
            for round in 0..32 {
                let v = mm::make_object(&mut rt);
                let key = format!("k{}", round % 8);
                let old = mm::set(&mut rt, dict, &key, Some(v));
                mm::add_reference(&mut rt, Some(dict), Some(v));
                mm::remove_reference(&mut rt, Some(dict), old);
                mm::remove_reference(&mut rt, None, Some(v));
            }
            mm::remove_reference(&mut rt, None, Some(dict));
            assert_eq!(rt.shutdown(), 0);
        })
    });
}

fn bench_region_lifecycle(c: &mut Criterion) {
    c.bench_function("region_lifecycle", |b| {
        b.iter(|| {
            let mut rt = Runtime::new();
            let bridge = mm::create_region(&mut rt);
            let mut prev = bridge;
            for round in 0..32 {
                let o = mm::make_object(&mut rt);
                let key = format!("n{}", round);
                let old = mm::set(&mut rt, prev, &key, Some(o));
                mm::add_reference(&mut rt, Some(prev), Some(o));
                debug_assert!(old.is_none());
                mm::remove_reference(&mut rt, None, Some(o));
                prev = o;
            }
            // One release tears the whole chain down with the region.
            mm::remove_reference(&mut rt, None, Some(bridge));
            assert_eq!(rt.shutdown(), 0);
        })
    });
}

fn bench_freeze(c: &mut Criterion) {
    c.bench_function("freeze_closure", |b| {
        b.iter(|| {
            let mut rt = Runtime::new();
            let root = mm::make_object(&mut rt);
            for round in 0..32 {
                let o = mm::make_object(&mut rt);
                let key = format!("f{}", round);
                let _ = mm::set(&mut rt, root, &key, Some(o));
                mm::add_reference(&mut rt, Some(root), Some(o));
                mm::remove_reference(&mut rt, None, Some(o));
            }
            mm::freeze(&mut rt, root);
            mm::remove_reference(&mut rt, None, Some(root));
            assert_eq!(rt.shutdown(), 0);
        })
    });
}

criterion_group!(benches, bench_local_churn, bench_region_lifecycle, bench_freeze);
criterion_main!(benches);
