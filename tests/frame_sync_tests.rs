//! Frame Synchronization Tests
//!
//! Tests for:
//! - Frame throttle: pre-signaled first wait, blocking on in-flight work, idempotent waits
//! - Stale chains: suboptimal reinit, out-of-date halt and fence re-arm
//! - Nested subgraphs waiting on GPU producers
//! - Error propagation from the device and from missing targets

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use frameflow::backend::headless::{
    CompletionMode, HeadlessBackend, HeadlessChain, HeadlessCommands, HeadlessDevice,
};
use frameflow::graph::{ComputeWork, FrameInfo};
use frameflow::{
    ChainStatus, DependencyGraph, DeviceError, EvalContext, Extent2d, FrameflowError, NodeHandle,
    SchedulerSettings, WorkNode,
};

type Graph = DependencyGraph<HeadlessBackend>;
type Node = WorkNode<HeadlessBackend>;

const EXTENT: Extent2d = Extent2d::new(320, 240);
const SHORT: Duration = Duration::from_millis(10);

fn compute(name: &str) -> Node {
    Node::compute_fn(name, |_, _| Ok(HeadlessCommands::new().dispatch(4, 4, 1)))
}

fn draw(name: &str) -> Node {
    Node::draw_fn(name, |_, _, target| Ok(HeadlessCommands::new().draw(target, 6)))
}

struct Scenario {
    graph: Graph,
    acquire: NodeHandle,
    draw: NodeHandle,
}

/// acquire -> draw <- simulate, draw -> present, draw frame-blocking.
fn scenario(device: &Arc<HeadlessDevice>, settings: SchedulerSettings) -> Scenario {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut graph = Graph::new(Arc::clone(device), settings).unwrap();
    let sim = graph.add_node(compute("simulate"));
    let acquire = graph.add_node(Node::acquire("acquire"));
    let draw_node = graph.add_node(draw("draw"));
    let present = graph.add_node(Node::present("present"));
    graph.add_edge(acquire, draw_node).unwrap();
    graph.add_edge(sim, draw_node).unwrap();
    graph.add_edge(draw_node, present).unwrap();
    graph.flag_node_as_frame_blocking(draw_node).unwrap();
    Scenario {
        graph,
        acquire,
        draw: draw_node,
    }
}

fn run_frame(graph: &mut Graph, chain: &mut HeadlessChain, frame: usize) -> (frameflow::SubmitReport, u32, bool) {
    let targets = chain.create_targets();
    graph.wait_until_complete(frame).unwrap();
    let mut ctx = EvalContext::new(frame, EXTENT, &targets, chain);
    let report = graph.submit(&mut ctx).unwrap();
    (report, ctx.output_index, ctx.needs_reinit)
}

// ============================================================================
// Frame Throttle
// ============================================================================

#[test]
fn first_wait_on_every_slot_returns_immediately() {
    let device = Arc::new(HeadlessDevice::new(CompletionMode::Manual));
    let s = scenario(&device, SchedulerSettings::default().with_frames_in_flight(3));

    for frame in 0..3 {
        assert!(s.graph.wait_until_complete_timeout(frame, Duration::ZERO).unwrap());
    }
}

#[test]
fn wait_blocks_until_frame_blocking_work_retires() {
    let device = Arc::new(HeadlessDevice::new(CompletionMode::Manual));
    let mut s = scenario(&device, SchedulerSettings::default());
    let mut chain = HeadlessChain::new(3, EXTENT);

    run_frame(&mut s.graph, &mut chain, 0);

    assert!(!s.graph.wait_until_complete_timeout(0, SHORT).unwrap());
    // The other slot is free while frame 0 is in flight.
    assert!(s.graph.wait_until_complete_timeout(1, Duration::ZERO).unwrap());

    device.retire_all();
    assert!(s.graph.wait_until_complete_timeout(0, SHORT).unwrap());
}

#[test]
fn unbounded_wait_returns_once_another_thread_retires_work() {
    let device = Arc::new(HeadlessDevice::new(CompletionMode::Manual));
    let mut s = scenario(&device, SchedulerSettings::default());
    let mut chain = HeadlessChain::new(3, EXTENT);
    run_frame(&mut s.graph, &mut chain, 0);

    let gpu = Arc::clone(&device);
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        gpu.retire_all()
    });

    s.graph.wait_until_complete(0).unwrap();
    assert!(worker.join().unwrap() > 0);
    assert_eq!(device.pending_work(), 0);
}

#[test]
fn wait_until_complete_is_idempotent() {
    let device = Arc::new(HeadlessDevice::default());
    let mut s = scenario(&device, SchedulerSettings::default());
    let mut chain = HeadlessChain::new(3, EXTENT);
    run_frame(&mut s.graph, &mut chain, 0);

    s.graph.wait_until_complete(0).unwrap();
    let retired = device.stats().retired;
    s.graph.wait_until_complete(0).unwrap();

    assert_eq!(device.stats().retired, retired);
    assert!(s.graph.wait_until_complete_timeout(0, Duration::ZERO).unwrap());
}

#[test]
fn many_frames_cycle_without_validation_errors() {
    let device = Arc::new(HeadlessDevice::default());
    let mut s = scenario(&device, SchedulerSettings::default().with_frames_in_flight(3));
    let mut chain = HeadlessChain::new(2, EXTENT);

    for frame_number in 0..12 {
        let (report, _, needs_reinit) = run_frame(&mut s.graph, &mut chain, frame_number % 3);
        assert_eq!(report.executed, 4);
        assert!(!needs_reinit);
    }
    assert_eq!(chain.presented().len(), 12);
    assert_eq!(&chain.presented()[..4], &[0, 1, 0, 1]);
}

// ============================================================================
// Stale Presentable Chain
// ============================================================================

#[test]
fn suboptimal_acquire_requests_reinit_but_completes_frame() {
    let device = Arc::new(HeadlessDevice::default());
    let mut s = scenario(&device, SchedulerSettings::default());
    let mut chain = HeadlessChain::new(3, EXTENT);
    chain.script_acquire(ChainStatus::Suboptimal);

    let (report, output_index, needs_reinit) = run_frame(&mut s.graph, &mut chain, 0);

    assert!(needs_reinit);
    assert!(!report.halted);
    assert_eq!(report.executed, 4);
    assert_eq!(output_index, 0);
    assert_eq!(chain.presented(), &[0]);
}

#[test]
fn out_of_date_acquire_halts_frame_and_reports_index() {
    let device = Arc::new(HeadlessDevice::default());
    let mut s = scenario(&device, SchedulerSettings::default());
    let mut chain = HeadlessChain::new(3, EXTENT);
    run_frame(&mut s.graph, &mut chain, 0);
    device.clear_submission_log();

    chain.script_acquire(ChainStatus::OutOfDate);
    let (report, output_index, needs_reinit) = run_frame(&mut s.graph, &mut chain, 1);

    assert!(needs_reinit);
    assert!(report.halted);
    assert_eq!(report.executed, 1);
    assert_eq!(output_index, 1);
    // Only the throttle fence of the skipped draw node was handed to the device.
    assert_eq!(device.submission_labels(), vec!["draw re-arm"]);
    assert_eq!(chain.presented(), &[0]);
}

#[test]
fn halted_slot_can_be_retried_after_reinit() {
    let device = Arc::new(HeadlessDevice::default());
    let mut s = scenario(&device, SchedulerSettings::default());
    let mut chain = HeadlessChain::new(3, EXTENT);
    chain.script_acquire(ChainStatus::OutOfDate);

    let (report, _, needs_reinit) = run_frame(&mut s.graph, &mut chain, 0);
    assert!(report.halted && needs_reinit);

    chain.recreate(Extent2d::new(800, 600));
    assert!(s.graph.wait_until_complete_timeout(0, SHORT).unwrap());
    let (report, output_index, needs_reinit) = run_frame(&mut s.graph, &mut chain, 0);

    assert!(!report.halted);
    assert!(!needs_reinit);
    assert_eq!(report.executed, 4);
    assert_eq!(output_index, 0);
}

#[test]
fn acquire_is_seeded_ahead_of_other_start_nodes() {
    let device = Arc::new(HeadlessDevice::default());
    let s = scenario(&device, SchedulerSettings::default());

    let order = s.graph.execution_order().unwrap();
    assert_eq!(order[0], s.acquire);
    assert_eq!(s.graph.frame_blocking_nodes(), &[s.draw]);
}

#[test]
fn unseeded_halt_consumes_earlier_signal_and_retry_presents() {
    let device = Arc::new(HeadlessDevice::default());
    let settings = SchedulerSettings::default().with_seed_acquire_first(false);
    let mut s = scenario(&device, settings);
    let mut chain = HeadlessChain::new(3, EXTENT);
    chain.script_acquire(ChainStatus::OutOfDate);

    let (report, _, needs_reinit) = run_frame(&mut s.graph, &mut chain, 0);
    assert!(report.halted && needs_reinit);
    assert_eq!(report.executed, 2);
    assert_eq!(
        device.submission_labels(),
        vec!["simulate", "simulate drain", "draw re-arm"]
    );

    chain.recreate(Extent2d::new(800, 600));
    for frame in [0, 1, 0] {
        let (report, _, needs_reinit) = run_frame(&mut s.graph, &mut chain, frame);
        assert!(!report.halted);
        assert!(!needs_reinit);
        assert_eq!(report.executed, 4);
    }
    assert_eq!(chain.presented(), &[0, 1, 2]);
}

#[test]
fn acquire_only_graph_reports_stale_chain_with_index() {
    let device = Arc::new(HeadlessDevice::default());
    let mut graph = Graph::new(Arc::clone(&device), SchedulerSettings::default()).unwrap();
    graph.add_node(Node::acquire("acquire"));
    let mut chain = HeadlessChain::new(3, EXTENT);

    let (report, output_index, needs_reinit) = run_frame(&mut graph, &mut chain, 0);
    assert!(!report.halted);
    assert!(!needs_reinit);
    assert_eq!(output_index, 0);

    chain.script_acquire(ChainStatus::OutOfDate);
    let (report, output_index, needs_reinit) = run_frame(&mut graph, &mut chain, 1);
    assert!(needs_reinit);
    assert!(report.halted);
    assert_eq!(report.executed, 1);
    assert_eq!(output_index, 1);

    chain.script_acquire(ChainStatus::Suboptimal);
    let (report, output_index, needs_reinit) = run_frame(&mut graph, &mut chain, 1);
    assert!(needs_reinit);
    assert!(!report.halted);
    assert_eq!(output_index, 1);
}

// ============================================================================
// Subgraphs
// ============================================================================

#[test]
fn subgraph_waits_on_gpu_producer_then_runs_nested_nodes() {
    let device = Arc::new(HeadlessDevice::default());
    let mut inner = Graph::new(Arc::clone(&device), SchedulerSettings::default().with_label("inner")).unwrap();
    let a = inner.add_node(compute("inner_a"));
    let b = inner.add_node(compute("inner_b"));
    inner.add_edge(a, b).unwrap();
    inner.flag_node_as_frame_blocking(b).unwrap();

    let mut outer = Graph::new(Arc::clone(&device), SchedulerSettings::default()).unwrap();
    let producer = outer.add_node(compute("producer"));
    let nested = outer.add_node(Node::subgraph("nested", inner));
    outer.add_edge(producer, nested).unwrap();

    let mut chain = HeadlessChain::new(2, EXTENT);
    for frame_number in 0..4 {
        let (report, _, _) = run_frame(&mut outer, &mut chain, frame_number % 2);
        assert_eq!(report.executed, 2);
    }

    let labels = device.submission_labels();
    assert_eq!(&labels[..3], &["producer", "inner_a", "inner_b"]);
    assert_eq!(labels.len(), 12);
    assert_eq!(outer.node(nested).unwrap().as_subgraph().unwrap().node_count(), 2);
}

#[test]
fn halt_inside_subgraph_consumes_outer_signals() {
    let device = Arc::new(HeadlessDevice::default());
    let mut inner = Graph::new(Arc::clone(&device), SchedulerSettings::default().with_label("inner")).unwrap();
    let acquire = inner.add_node(Node::acquire("acquire"));
    let draw_node = inner.add_node(draw("draw"));
    let present = inner.add_node(Node::present("present"));
    inner.add_edge(acquire, draw_node).unwrap();
    inner.add_edge(draw_node, present).unwrap();
    inner.flag_node_as_frame_blocking(draw_node).unwrap();

    let mut outer = Graph::new(Arc::clone(&device), SchedulerSettings::default()).unwrap();
    let sim = outer.add_node(compute("sim"));
    outer.add_node(Node::subgraph("nested", inner));
    let after = outer.add_node(compute("after"));
    outer.add_edge(sim, after).unwrap();

    let mut chain = HeadlessChain::new(2, EXTENT);
    chain.script_acquire(ChainStatus::OutOfDate);
    let (report, _, needs_reinit) = run_frame(&mut outer, &mut chain, 0);
    assert!(report.halted && needs_reinit);
    assert_eq!(report.executed, 2);
    assert_eq!(device.submission_labels(), vec!["sim", "draw re-arm", "sim drain"]);

    chain.recreate(EXTENT);
    let (report, output_index, needs_reinit) = run_frame(&mut outer, &mut chain, 0);
    assert!(!report.halted && !needs_reinit);
    assert_eq!(report.executed, 3);
    assert_eq!(output_index, 0);
    assert_eq!(chain.presented(), &[0]);
}

#[test]
fn subgraph_with_other_frame_count_fails_before_any_work() {
    let device = Arc::new(HeadlessDevice::default());
    let settings = SchedulerSettings::default().with_frames_in_flight(3);
    let mut inner = Graph::new(Arc::clone(&device), settings).unwrap();
    inner.add_node(compute("inner"));

    let mut outer = Graph::new(Arc::clone(&device), SchedulerSettings::default()).unwrap();
    outer.add_node(compute("producer"));
    let nested = outer.add_node(Node::subgraph("nested", inner));

    let mut chain = HeadlessChain::new(2, EXTENT);
    let targets = chain.create_targets();
    let mut ctx = EvalContext::new(0, EXTENT, &targets, &mut chain);
    let err = outer.submit(&mut ctx).unwrap_err();

    assert!(matches!(
        err,
        FrameflowError::SubgraphFramesMismatch { node, inner: 3, outer: 2 } if node == nested
    ));
    assert!(device.submission_labels().is_empty());
}

// ============================================================================
// Work Callbacks
// ============================================================================

struct CountingWork {
    updates: Rc<Cell<u32>>,
    frames: Rc<Cell<Vec<usize>>>,
}

impl ComputeWork<HeadlessBackend> for CountingWork {
    fn update(&mut self, _frame: &FrameInfo) -> frameflow::Result<()> {
        self.updates.set(self.updates.get() + 1);
        Ok(())
    }

    fn record(&mut self, _device: &HeadlessDevice, frame: &FrameInfo) -> frameflow::Result<HeadlessCommands> {
        let mut frames = self.frames.take();
        frames.push(frame.frame_index);
        self.frames.set(frames);
        Ok(HeadlessCommands::new().marker(format!("frame {}", frame.frame_index)))
    }
}

#[test]
fn compute_work_updates_then_records_each_frame() {
    let device = Arc::new(HeadlessDevice::default());
    let updates = Rc::new(Cell::new(0));
    let frames = Rc::new(Cell::new(Vec::new()));
    let mut g = Graph::new(Arc::clone(&device), SchedulerSettings::default()).unwrap();
    let node = g.add_node(Node::compute(
        "counting",
        CountingWork {
            updates: Rc::clone(&updates),
            frames: Rc::clone(&frames),
        },
    ));
    g.flag_node_as_frame_blocking(node).unwrap();

    let mut chain = HeadlessChain::new(2, EXTENT);
    for frame_number in 0..3 {
        run_frame(&mut g, &mut chain, frame_number % 2);
    }

    assert_eq!(updates.get(), 3);
    assert_eq!(frames.take(), vec![0, 1, 0]);
    let records = device.submissions();
    assert_eq!(records[0].wait_stage, frameflow::WaitStage::COMPUTE_SHADER);
    assert_eq!(records[0].queue, frameflow::backend::QueueKind::Compute);
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn draw_without_acquired_image_reports_missing_target() {
    let device = Arc::new(HeadlessDevice::default());
    let mut g = Graph::new(Arc::clone(&device), SchedulerSettings::default()).unwrap();
    g.add_node(draw("orphan draw"));

    let mut chain = HeadlessChain::new(2, EXTENT);
    let targets = chain.create_targets();
    let mut ctx = EvalContext::new(0, EXTENT, &targets, &mut chain);

    assert!(matches!(
        g.submit(&mut ctx),
        Err(FrameflowError::MissingTarget { available: 2, .. })
    ));
}

#[test]
fn device_loss_surfaces_from_submit() {
    let device = Arc::new(HeadlessDevice::default());
    let mut s = scenario(&device, SchedulerSettings::default());
    device.lose_device();

    let mut chain = HeadlessChain::new(2, EXTENT);
    let targets = chain.create_targets();
    let mut ctx = EvalContext::new(0, EXTENT, &targets, &mut chain);

    assert!(matches!(
        s.graph.submit(&mut ctx),
        Err(FrameflowError::Device(DeviceError::DeviceLost))
    ));
}

#[test]
fn frame_index_is_checked_on_submit() {
    let device = Arc::new(HeadlessDevice::default());
    let mut s = scenario(&device, SchedulerSettings::default());
    let mut chain = HeadlessChain::new(2, EXTENT);
    let targets = chain.create_targets();
    let mut ctx = EvalContext::new(2, EXTENT, &targets, &mut chain);

    assert!(matches!(
        s.graph.submit(&mut ctx),
        Err(FrameflowError::FrameIndexOutOfRange { index: 2, .. })
    ));
}
