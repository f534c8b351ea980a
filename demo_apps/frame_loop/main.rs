//! Runs the acquire/compute/draw/present graph on the headless backend.
//!
//! ```text
//! frame_loop [settings.json] [frame count]
//! ```
//!
//! Halfway through, the window is "resized": the chain reports out of date,
//! the frame halts and the loop rebuilds its targets before continuing.

use std::sync::Arc;

use frameflow::backend::headless::{HeadlessBackend, HeadlessChain, HeadlessCommands, HeadlessDevice};
use frameflow::{ChainStatus, DependencyGraph, Extent2d, FrameDriver, SchedulerSettings, WorkNode};

type Node = WorkNode<HeadlessBackend>;

const DEFAULT_FRAMES: u64 = 8;
const CHAIN_IMAGES: u32 = 3;

fn load_settings(path: Option<&str>) -> anyhow::Result<SchedulerSettings> {
    let settings = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        }
        None => SchedulerSettings::default().with_label("frame loop"),
    };
    settings.validate()?;
    Ok(settings)
}

fn build_graph(device: &Arc<HeadlessDevice>, settings: SchedulerSettings) -> anyhow::Result<DependencyGraph<HeadlessBackend>> {
    let mut graph = DependencyGraph::new(Arc::clone(device), settings)?;

    let acquire = graph.add_node(Node::acquire("acquire"));
    let simulate = graph.add_node(Node::compute_fn("simulate", |_, frame| {
        let groups = frame.extent.width.div_ceil(8);
        Ok(HeadlessCommands::new().dispatch(groups, frame.extent.height.div_ceil(8), 1))
    }));
    let draw = graph.add_node(Node::draw_fn("draw", |_, frame, target| {
        Ok(HeadlessCommands::new()
            .marker(format!("slot {}", frame.frame_index))
            .draw(target, 3))
    }));
    let present = graph.add_node(Node::present("present"));

    graph.add_edge(acquire, draw)?;
    graph.add_edge(simulate, draw)?;
    graph.add_edge(draw, present)?;
    graph.flag_node_as_frame_blocking(draw)?;
    Ok(graph)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let settings = load_settings(args.first().map(String::as_str))?;
    let frames = match args.get(1) {
        Some(count) => count.parse::<u64>()?,
        None => DEFAULT_FRAMES,
    };

    let device = Arc::new(HeadlessDevice::default());
    let mut driver = FrameDriver::new(build_graph(&device, settings)?);

    let mut extent = Extent2d::new(1280, 720);
    let mut chain = HeadlessChain::new(CHAIN_IMAGES, extent);
    let mut targets = chain.create_targets();
    let resize_at = frames / 2;

    let mut presented = 0;
    while presented < frames {
        if presented == resize_at && extent.width == 1280 {
            log::info!("simulating a window resize before frame {presented}");
            chain.script_acquire(ChainStatus::OutOfDate);
            extent = Extent2d::new(1920, 1080);
        }

        let outcome = driver.run_frame(extent, &targets, &mut chain)?;
        if outcome.needs_reinit {
            driver.wait_idle()?;
            chain.recreate(extent);
            targets = chain.create_targets();
            log::info!("rebuilt {} targets at {}x{}", targets.len(), extent.width, extent.height);
        }
        if outcome.presented() {
            log::info!(
                "frame {presented}: slot {} presented image {}",
                outcome.frame_index,
                outcome.output_index
            );
            presented += 1;
        }
    }

    driver.wait_idle()?;
    let stats = device.stats();
    log::info!(
        "done: {} submissions, {} semaphores, {} fences, images presented {:?}",
        stats.submissions,
        stats.semaphores_created,
        stats.fences_created,
        chain.presented()
    );
    Ok(())
}
