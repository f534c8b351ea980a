//! Dependency Graph Benchmarks
//!
//! Measures:
//! - Edge insertion, including the cycle check, for chains of growing length
//! - Per-frame submit cost for wide fan-in graphs on the headless backend

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use frameflow::backend::headless::{
    CompletionMode, HeadlessBackend, HeadlessChain, HeadlessCommands, HeadlessDevice,
};
use frameflow::{DependencyGraph, EvalContext, Extent2d, FrameCursor, SchedulerSettings, WorkNode};

type Graph = DependencyGraph<HeadlessBackend>;
type Node = WorkNode<HeadlessBackend>;

fn compute(name: String) -> Node {
    Node::compute_fn(name, |_, _| Ok(HeadlessCommands::new().dispatch(1, 1, 1)))
}

/// acquire + `width` compute nodes -> draw -> present, draw frame-blocking.
fn fan_in_graph(device: &Arc<HeadlessDevice>, width: usize) -> Graph {
    let mut graph = Graph::new(Arc::clone(device), SchedulerSettings::default()).unwrap();
    let acquire = graph.add_node(Node::acquire("acquire"));
    let draw = graph.add_node(Node::draw_fn("draw", |_, _, target| {
        Ok(HeadlessCommands::new().draw(target, 3))
    }));
    let present = graph.add_node(Node::present("present"));
    graph.add_edge(acquire, draw).unwrap();
    graph.add_edge(draw, present).unwrap();
    for i in 0..width {
        let node = graph.add_node(compute(format!("compute{i}")));
        graph.add_edge(node, draw).unwrap();
    }
    graph.flag_node_as_frame_blocking(draw).unwrap();
    graph
}

fn bench_add_edge_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_edge_chain");

    for length in [16usize, 64, 256] {
        group.throughput(Throughput::Elements(length as u64));
        group.bench_with_input(BenchmarkId::from_parameter(length), &length, |b, &length| {
            b.iter(|| {
                let device = Arc::new(HeadlessDevice::new(CompletionMode::Immediate));
                let mut graph = Graph::new(device, SchedulerSettings::default()).unwrap();
                let handles: Vec<_> = (0..length).map(|i| graph.add_node(compute(format!("n{i}")))).collect();
                for pair in handles.windows(2) {
                    graph.add_edge(pair[0], pair[1]).unwrap();
                }
                black_box(graph.node_count())
            });
        });
    }
    group.finish();
}

fn bench_submit_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_fan_in");
    let extent = Extent2d::new(1280, 720);

    for width in [4usize, 32, 128] {
        let device = Arc::new(HeadlessDevice::new(CompletionMode::Immediate));
        let mut graph = fan_in_graph(&device, width);
        let mut chain = HeadlessChain::new(3, extent);
        let targets = chain.create_targets();
        let mut cursor = FrameCursor::new(graph.frames_in_flight());

        group.throughput(Throughput::Elements(graph.node_count() as u64));
        group.bench_function(BenchmarkId::from_parameter(width), |b| {
            b.iter(|| {
                let frame = cursor.current();
                graph.wait_until_complete(frame).unwrap();
                let mut ctx = EvalContext::new(frame, extent, &targets, &mut chain);
                let report = graph.submit(&mut ctx).unwrap();
                cursor.advance();
                device.clear_submission_log();
                black_box(report)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add_edge_chain, bench_submit_fan_in);
criterion_main!(benches);
