//! Performance benchmarks for rule synthesis and switch reconciliation.
//!
//! Run with: `cargo bench --bench reconcile`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Rule synthesis | <10µs for 16 hops | Pure, no store access |
//! | Switch diff | <5ms for 1k flows | In-memory store |
//! | Switch sync | <10ms for 1k flows | Diff plus repair commands |

use criterion::{
    black_box, criterion_group, criterion_main,
    BenchmarkId, Criterion, Throughput,
};
use std::sync::Arc;

use flow_topology_engine::{
    build_rules, Cookie, Flow, FlowPath, FlowStore, InMemoryGraphStore, PathNode,
    SwitchId, SwitchReconciler,
};

/// Linear path s0 → s1 → … → s{hops}.
fn make_flow(flowid: String, cookie: u64, hops: usize) -> Flow {
    let mut path = Vec::with_capacity(hops * 2);
    for hop in 0..hops {
        path.push(PathNode::new(format!("s{}", hop), 1, (hop * 2) as u32));
        path.push(PathNode::new(format!("s{}", hop + 1), 2, (hop * 2 + 1) as u32));
    }
    Flow {
        flowid,
        cookie: Cookie::new(cookie),
        meter_id: Some(1),
        bandwidth: 1,
        ignore_bandwidth: true,
        src_switch: "s0".into(),
        src_port: 10,
        src_vlan: 100,
        dst_switch: format!("s{}", hops).into(),
        dst_port: 20,
        dst_vlan: 200,
        transit_vlan: 3000,
        description: String::new(),
        last_updated: 0,
        flowpath: FlowPath::new(path),
        state: None,
    }
}

/// Store `count` three-hop flows, all crossing s1.
fn populated_store(runtime: &tokio::runtime::Runtime, count: usize) -> Arc<InMemoryGraphStore> {
    let store = Arc::new(InMemoryGraphStore::new());
    let flows = FlowStore::new(Arc::clone(&store));
    runtime.block_on(async {
        for i in 0..count {
            let flow = make_flow(format!("flow-{}", i), 0x4000_0000_0000_0000 | i as u64, 3);
            flows.store_flow(&flow, None).await.expect("store flow");
        }
    });
    store
}

fn reported_cookies(count: usize) -> Vec<Cookie> {
    // every other rule missing, plus one unknown rule
    (0..count)
        .step_by(2)
        .map(|i| Cookie::new(0x4000_0000_0000_0000 | i as u64))
        .chain(std::iter::once(Cookie::new(0x4000_0000_00ff_ffff)))
        .collect()
}

/// Benchmark rule synthesis by path length.
fn bench_build_rules(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_rules");

    for hops in [1usize, 4, 16] {
        let flow = make_flow("bench".to_string(), 0x4000_0000_0000_0001, hops);
        group.throughput(Throughput::Elements(hops as u64 + 1));
        group.bench_with_input(BenchmarkId::from_parameter(hops), &flow, |b, flow| {
            b.iter(|| build_rules(black_box(flow)))
        });
    }

    group.finish();
}

/// Benchmark switch diff by flow count.
fn bench_diff(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("switch_diff");

    for count in [10usize, 100, 1000] {
        let reconciler = SwitchReconciler::new(populated_store(&runtime, count));
        let reported = reported_cookies(count);
        let switch_id: SwitchId = "s1".into();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &reported, |b, reported| {
            b.iter(|| runtime.block_on(reconciler.diff(&switch_id, black_box(reported), None)))
        });
    }

    group.finish();
}

/// Benchmark switch sync by flow count.
fn bench_sync(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("switch_sync");

    for count in [10usize, 100, 1000] {
        let reconciler = SwitchReconciler::new(populated_store(&runtime, count));
        let reported = reported_cookies(count);
        let switch_id: SwitchId = "s1".into();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &reported, |b, reported| {
            b.iter(|| runtime.block_on(reconciler.sync(&switch_id, black_box(reported), None)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_build_rules,
    bench_diff,
    bench_sync,
);
criterion_main!(benches);
