//! filterchain-demo - Live filter chain demonstration
//!
//! Builds one in-memory graph per simulated peer, mirrors the configured chain
//! onto every peer through a coordinator, then edits the chain while a
//! data-flow thread keeps driving barriers.

use anyhow::Context as _;
use clap::Parser;
use filterchain_rs::{
    bus::MessageBus,
    config::{EngineConfig, LoggingConfig},
    graph::{BarrierMode, ElementSpec, Graph, MemoryGraph, TapId},
    stage::{ElementStage, TeeStage},
    ControlMessage, Coordinator, FilterChain, StageRegistry,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "filterchain-demo", version, about = "Edit a filter chain on live graphs")]
struct Args {
    /// Engine configuration (TOML or JSON).
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the number of simulated peers.
    #[arg(long)]
    instances: Option<usize>,

    /// Queue barriers until the data-flow thread reaches them.
    #[arg(long, default_value_t = false)]
    deferred: bool,

    /// Write the effective configuration to this path and exit.
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

/// One simulated peer: a source linked to a sink.
struct Peer {
    graph: Arc<MemoryGraph>,
    source: TapId,
    sink: TapId,
}

impl Peer {
    fn new(index: usize, mode: BarrierMode) -> anyhow::Result<Self> {
        let graph = Arc::new(MemoryGraph::with_barrier_mode(format!("peer-{}", index), mode));
        let src = graph.add_element(ElementSpec::source(format!("peer-{}-src", index)))?;
        let sink = graph.add_element(ElementSpec::sink(format!("peer-{}-sink", index)))?;
        let (source, sink) = (TapId::output(src, 0), TapId::input(sink, 0));
        graph.link(source, sink)?;
        Ok(Self { graph, source, sink })
    }

    fn path(&self) -> String {
        let mut names = vec![self.graph.name().to_string()];
        names.extend(self.graph.path_from(self.source));
        names.join(" -> ")
    }
}

fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "filterchain-demo.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => EngineConfig::default(),
    };
    if let Some(instances) = args.instances {
        config.demo.instances = instances;
    }
    if args.deferred {
        config.graph.barrier_mode = BarrierMode::Deferred;
    }
    if let Some(path) = &args.dump_config {
        config.save(path)?;
        println!("Wrote configuration to {:?}", path);
        return Ok(());
    }

    let _log_guard = init_logging(&config.logging);
    tracing::info!(
        "Starting filterchain demo: {} peer(s), chain '{}', {:?} barriers",
        config.demo.instances,
        config.chain.name,
        config.graph.barrier_mode
    );

    let registry = StageRegistry::with_builtins();
    let coordinator = Arc::new(Coordinator::from_definition(&registry, &config.chain)?);

    let peers = (0..config.demo.instances)
        .map(|i| Peer::new(i, config.graph.barrier_mode))
        .collect::<anyhow::Result<Vec<_>>>()?;

    // Attach: break the source->sink link, splice the chain in, close the gap.
    for peer in &peers {
        peer.graph.unlink(peer.source);
        let out = coordinator
            .attach_new_instance(peer.graph.clone(), peer.source)
            .with_context(|| format!("Failed to attach to {}", peer.graph.name()))?;
        peer.graph.link(out, peer.sink)?;
        tracing::info!("{}", peer.path());
    }

    // Data-flow thread: each tick lets queued barriers fire.
    let running = Arc::new(AtomicBool::new(true));
    let flow = {
        let running = running.clone();
        let graphs: Vec<Arc<MemoryGraph>> = peers.iter().map(|p| p.graph.clone()).collect();
        let interval = Duration::from_millis(config.demo.flow_interval_ms);
        std::thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                for graph in &graphs {
                    let fired = graph.run_pending_barriers();
                    if fired > 0 {
                        tracing::debug!("{}: {} barrier(s) fired", graph.name(), fired);
                    }
                }
                std::thread::sleep(interval);
            }
        })
    };

    // Control messages go to whichever stage claims them.
    let (bus, dispatcher) = MessageBus::new();
    let dispatch = {
        let coordinator = coordinator.clone();
        std::thread::spawn(move || dispatcher.run(coordinator.as_ref()))
    };

    let settle = Duration::from_millis(config.demo.flow_interval_ms * 3);
    for round in 0..config.demo.iterations {
        tracing::info!("Edit round {}", round + 1);

        let meter = coordinator.append(Arc::new(TeeStage::new(format!("meter-{}", round), "fakesink")));
        let first = coordinator.list().first().copied();
        if let Some(first) = first {
            coordinator.insert_after(
                Arc::new(ElementStage::new(format!("gain-{}", round), "volume").with_property("volume", 0.8)),
                first,
            );
        }
        std::thread::sleep(settle);
        for peer in &peers {
            tracing::info!("{}", peer.path());
        }

        bus.post(ControlMessage::new("level").from_source("volume").with_field("rms", -20.0));
        bus.post(ControlMessage::new("frame").from_source(format!("meter-{}:branch", round)));

        coordinator.replace(
            Arc::new(ElementStage::new(format!("meter-{}-lite", round), "identity")),
            meter,
        );
        std::thread::sleep(settle);
        for peer in &peers {
            tracing::info!("{}", peer.path());
        }
    }

    bus.post(ControlMessage::new("eos"));
    bus.shutdown();
    let stats = dispatch
        .join()
        .map_err(|_| anyhow::anyhow!("Message dispatcher panicked"))?;
    for unhandled in bus.drain_unhandled() {
        tracing::info!("Unclaimed message '{}'", unhandled.kind);
    }
    tracing::info!(
        "Messages: {} claimed, {} forwarded",
        stats.claimed,
        stats.forwarded
    );

    // Detach while the flow thread still runs so pending barriers can drain.
    for peer in &peers {
        let Some(out) = coordinator
            .instances()
            .into_iter()
            .find(|i| i.graph == peer.graph.id())
            .and_then(|i| i.out_tap)
        else {
            continue;
        };
        let original = coordinator.detach_instance(peer.graph.as_ref(), out)?;
        peer.graph.link(original, peer.sink)?;
        tracing::info!("{}", peer.path());
    }

    running.store(false, Ordering::Relaxed);
    flow.join()
        .map_err(|_| anyhow::anyhow!("Data-flow thread panicked"))?;

    tracing::info!("Shutting down...");
    Ok(())
}
