//! Process entrypoint: wires the OSC server, the control bridge, and a
//! default hardware-in -> filter -> hardware-out graph together, then
//! runs until SIGINT/SIGTERM via a cooperative shutdown flag rather than a
//! hard `process::exit` from a signal handler. Exit codes: 0 success, 1
//! initialization failure, 2 runtime failure.

mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use patchbay_bridge::{ControlBridge, ControlTarget, Registry};
use patchbay_graph::device::CpalHardware;
use patchbay_graph::nodes::GainFilterChain;
use patchbay_graph::Graph;
use patchbay_osc::transport::{Address, Transport, UdpTransport};
use patchbay_osc::{BackgroundServer, Dispatcher, Scheduler, ServerLoop};
use patchbay_types::{AudioFormat, ErrorEvent};

use config::RuntimeConfig;

const SOURCE_NODE: &str = "input";
const FILTER_NODE: &str = "gain";
const SINK_NODE: &str = "output";

struct Engine {
    graph: Graph,
    server: BackgroundServer,
}

fn init(cfg: &RuntimeConfig) -> Result<Engine, patchbay_types::PatchbayError> {
    let format = AudioFormat::new(cfg.sample_rate, cfg.sample_format, cfg.channel_layout, cfg.buffer_size);

    let mut graph = Graph::new(format);
    graph.set_error_handler(Box::new(|event: ErrorEvent| {
        log::error!("[{}] {}: {}", event.origin, event.kind, event.message);
    }));

    let src = graph.add_hardware_source(SOURCE_NODE, Box::new(CpalHardware::new()))?;
    let filter = graph.add_filter(
        FILTER_NODE,
        format!("{FILTER_NODE}=g={}", cfg.default_gain_db),
        Box::new(GainFilterChain::new()),
    )?;
    let sink = graph.add_hardware_sink(SINK_NODE, Box::new(CpalHardware::new()))?;
    graph.connect(src, filter)?;
    graph.connect(filter, sink)?;
    for id in [src, filter, sink] {
        graph.configure_node(id)?;
    }

    let registry = Arc::new(Registry::new());
    registry.register(
        Registry::conventional_address(FILTER_NODE, "gain"),
        ControlTarget::new(FILTER_NODE, FILTER_NODE, "gain"),
    );

    let bridge = Arc::new(ControlBridge::new(registry));
    bridge.register_node(FILTER_NODE, graph.param_writer(FILTER_NODE).unwrap());

    if let Some(url) = &cfg.console_url {
        let console_addr = Address::from_url(url)?;
        let transport = UdpTransport::bind(0, console_addr)?;
        bridge.set_console_transport(Box::new(transport));
    }

    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.set_error_handler(Box::new(|event: ErrorEvent| {
        log::warn!("[{}] {}: {}", event.origin, event.kind, event.message);
    }));
    bridge.install(&dispatcher)?;

    let listen = UdpTransport::bind(cfg.osc_listen_port, Address::udp("0.0.0.0", 0))?;
    log::info!("listening for OSC control messages on {}", listen.local_url());
    let scheduler = Arc::new(Scheduler::new());
    let server_loop = ServerLoop::new(Box::new(listen), Arc::clone(&dispatcher), Arc::clone(&scheduler));
    let server = BackgroundServer::start(server_loop, scheduler, dispatcher, None, None);

    graph.start()?;

    Ok(Engine { graph, server })
}

fn run(engine: &mut Engine, running: &AtomicBool, tick_interval: Duration) -> Result<(), patchbay_types::PatchbayError> {
    while running.load(Ordering::Relaxed) {
        engine.graph.tick()?;
        std::thread::sleep(tick_interval);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    log::info!("patchbay starting");

    let cfg = RuntimeConfig::from_env();
    let mut engine = match init(&cfg) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("initialization failed: {e}");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        handler_flag.store(false, Ordering::Relaxed);
    }) {
        eprintln!("failed to install signal handler: {e}");
        std::process::exit(1);
    }

    let tick_interval = Duration::from_secs_f64(cfg.buffer_size as f64 / cfg.sample_rate as f64);
    let result = run(&mut engine, &running, tick_interval);

    if let Err(e) = engine.graph.stop() {
        log::error!("error stopping graph: {e}");
    }
    engine.server.stop();

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("runtime failure: {e}");
            std::process::exit(2);
        }
    }
}
