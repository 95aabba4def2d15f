use std::sync::Arc;

use patchbay_bridge::{ControlBridge, ControlTarget, Registry};
use patchbay_graph::{device::NullHardware, nodes::GainFilterChain, Graph};
use patchbay_osc::{Dispatcher, OscMessage, OscValue};
use patchbay_types::{AudioFormat, ChannelLayout, SampleFormat};

fn fmt() -> AudioFormat {
    AudioFormat::new(48_000, SampleFormat::F32, ChannelLayout::Stereo, 64)
}

#[test]
fn osc_message_updates_a_running_graph_filter() {
    let mut graph = Graph::new(fmt());
    let src = graph
        .add_hardware_source("in", Box::new(NullHardware::new(48_000, 64, 2, 0)))
        .unwrap();
    let filt = graph
        .add_filter("eq", "eq=g=0", Box::new(GainFilterChain::new()))
        .unwrap();
    let sink = graph
        .add_hardware_sink("out", Box::new(NullHardware::new(48_000, 64, 0, 2)))
        .unwrap();
    graph.connect(src, filt).unwrap();
    graph.connect(filt, sink).unwrap();
    for id in [src, filt, sink] {
        graph.configure_node(id).unwrap();
    }

    let registry = Arc::new(Registry::new());
    registry.register(
        Registry::conventional_address("eq", "gain"),
        ControlTarget::new("eq", "eq", "gain"),
    );

    let bridge = Arc::new(ControlBridge::new(registry));
    bridge.register_node("eq", graph.param_writer("eq").unwrap());

    let dispatcher = Dispatcher::new();
    bridge.install(&dispatcher).unwrap();

    dispatcher.dispatch_message(&OscMessage::new(
        "/filter/eq/gain",
        vec![OscValue::Float32(-9.0)],
    ));

    graph.start().unwrap();
    graph.tick().unwrap();
    graph.stop().unwrap();

    assert!(!graph.is_faulted(filt));
}

#[test]
fn messages_to_unregistered_nodes_do_not_panic_the_dispatcher() {
    let registry = Arc::new(Registry::new());
    registry.register(
        "/filter/missing/gain",
        ControlTarget::new("missing", "missing", "gain"),
    );
    let bridge = Arc::new(ControlBridge::new(registry));
    let dispatcher = Dispatcher::new();
    bridge.install(&dispatcher).unwrap();

    // No node was ever registered with the bridge, so this message can't be
    // enqueued anywhere. Dispatch must report the failure, not unwind.
    dispatcher.dispatch_message(&OscMessage::new(
        "/filter/missing/gain",
        vec![OscValue::Float32(1.0)],
    ));
}
