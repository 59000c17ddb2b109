//! End-to-end scenarios exercising the scheduler, the node runtime, and
//! the typed port layer together, the way a real workspace would be
//! assembled and driven.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use obn_core::error::{ConfigError, SimulationError};
use obn_core::gc::{Gc, NodeSpec, TickOutcome, UpdateBlockSpec};
use obn_core::mask;
use obn_core::node::{Context, NodeBuilder, NodeRuntime, StepOutcome};
use obn_core::port::{Direction, NonStrictInput, Output, PortData, PortMeta, PortShape, StrictInput};
use obn_core::protocol::{MsgType, WireMessage};
use obn_core::time::TimeUnit;
use obn_core::transport::mock::{ChannelBroker, ChannelTransport};
use obn_core::transport::{node_to_smn_topic, smn_to_node_topic, PortAddress, Transport};
use obn_core::workspace::{CommKind, Settings, Workspace};

fn fast_settings(final_time_us: f64) -> Settings {
    Settings {
        time_unit: TimeUnit::MICROSECOND,
        final_time_us,
        ack_timeout: Duration::from_secs(1),
        wallclock: 0,
        default_comm: CommKind::Mqtt,
        mqtt_server: None,
        run_simulation: true,
    }
}

fn out_port(name: &str) -> PortMeta {
    PortMeta {
        name: name.to_string(),
        direction: Direction::Out,
        mask: mask::bit(0),
        strict: false,
        shape: PortShape::Scalar,
        transport: None,
    }
}

fn in_port(name: &str) -> PortMeta {
    PortMeta {
        name: name.to_string(),
        direction: Direction::In,
        mask: mask::bit(0),
        strict: false,
        shape: PortShape::Scalar,
        transport: None,
    }
}

/// Drives a node's event loop to completion on its own thread, stopping
/// once `TERM` is observed (or the node errors out).
fn drive<M: 'static>(mut node: NodeRuntime<M>) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        match node.run_step(Duration::from_secs(5)) {
            Ok(StepOutcome::Term(_)) => break,
            Err(_) => break,
            Ok(_) => {}
        }
    })
}

// --- S1: two-node periodic pipeline with direct feedthrough ---------------

struct SourceModel {
    output: Output<i64>,
    count: i64,
    target: String,
}

impl SourceModel {
    fn tick(&mut self, ctx: &mut Context<'_>) {
        self.count += 1;
        self.output.set(self.count);
        self.output.send_sync(ctx.transport(), &self.target).unwrap();
    }
}

struct SinkModel {
    input: NonStrictInput<i64>,
    last: Arc<Mutex<Option<i64>>>,
}

impl SinkModel {
    fn tick(&mut self, _ctx: &mut Context<'_>) {
        *self.last.lock().unwrap() = Some(self.input.get());
    }
}

#[test]
fn s1_two_node_periodic_pipeline_with_direct_feedthrough() {
    let mut ws = Workspace::new("ws", fast_settings(3.0));
    ws.add_node("A");
    ws.add_node("B");
    ws.add_port("A", out_port("y")).unwrap();
    ws.add_port("B", in_port("u")).unwrap();
    ws.add_update("A", 0, Some(1)).unwrap();
    ws.add_update("B", 0, Some(1)).unwrap();
    ws.connect("A", "y", "B", "u").unwrap();

    let broker = ChannelBroker::new();
    let smn_transport = Arc::new(ChannelTransport::new("smn", broker.clone()));
    let mut gc = ws.build(smn_transport).unwrap();

    let edge_topic = PortAddress::new("ws", "B", "u").topic();

    let a_transport = Arc::new(ChannelTransport::new("node-A", broker.clone()));
    let a = NodeBuilder::new(
        "ws",
        "A",
        0,
        a_transport,
        SourceModel {
            output: Output::new(0),
            count: 0,
            target: edge_topic.clone(),
        },
    )
    .add_update_y(0, |m: &mut SourceModel, ctx: &mut Context<'_>| m.tick(ctx))
    .build();

    let last = Arc::new(Mutex::new(None));
    let input: NonStrictInput<i64> = NonStrictInput::new(0);
    let b_transport = Arc::new(ChannelTransport::new("node-B", broker));
    let b = NodeBuilder::new(
        "ws",
        "B",
        1,
        b_transport,
        SinkModel {
            input: input.clone(),
            last: last.clone(),
        },
    )
    .add_update_y(0, |m: &mut SinkModel, ctx: &mut Context<'_>| m.tick(ctx))
    .build();
    b.wire_non_strict_input("u", &edge_topic, &input).unwrap();

    let a_handle = drive(a);
    let b_handle = drive(b);

    let reason = gc.run().unwrap();
    assert_eq!(reason, 0);
    a_handle.join().unwrap();
    b_handle.join().unwrap();

    assert_eq!(*last.lock().unwrap(), Some(3));
}

// --- S2 / S3: irregular future-update requests -----------------------------

struct EventModel {
    log: Arc<Mutex<Vec<(u64, u32)>>>,
    requested: bool,
}

impl EventModel {
    fn on_block0(&mut self, ctx: &mut Context<'_>) {
        self.log.lock().unwrap().push((ctx.time(), 0));
        if !self.requested {
            self.requested = true;
            ctx.request_future_update(5, mask::bit(1)).unwrap();
        }
    }

    fn on_block1(&mut self, ctx: &mut Context<'_>) {
        self.log.lock().unwrap().push((ctx.time(), 1));
    }
}

#[test]
fn s2_irregular_future_update_fires_only_the_requested_block() {
    let mut ws = Workspace::new("ws", fast_settings(6.0));
    ws.add_node("A");
    ws.add_update("A", 0, Some(2)).unwrap();
    ws.add_update("A", 1, None).unwrap();

    let broker = ChannelBroker::new();
    let smn_transport = Arc::new(ChannelTransport::new("smn", broker.clone()));
    let mut gc = ws.build(smn_transport).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let a_transport = Arc::new(ChannelTransport::new("node-A", broker));
    let a = NodeBuilder::new(
        "ws",
        "A",
        0,
        a_transport,
        EventModel {
            log: log.clone(),
            requested: false,
        },
    )
    .add_update_y(0, |m: &mut EventModel, ctx: &mut Context<'_>| m.on_block0(ctx))
    .add_update_y(1, |m: &mut EventModel, ctx: &mut Context<'_>| m.on_block1(ctx))
    .build();

    let handle = drive(a);
    let reason = gc.run().unwrap();
    assert_eq!(reason, 0);
    handle.join().unwrap();

    let log = log.lock().unwrap();
    assert_eq!(*log, vec![(2, 0), (4, 0), (5, 1), (6, 0)]);
}

struct RejectModel {
    attempted: Arc<AtomicBool>,
    rejection: Arc<Mutex<Option<String>>>,
    block1_fired: Arc<AtomicBool>,
}

impl RejectModel {
    fn on_block0(&mut self, ctx: &mut Context<'_>) {
        if !self.attempted.swap(true, Ordering::SeqCst) {
            let err = ctx.request_future_update(0, mask::bit(1)).unwrap_err();
            *self.rejection.lock().unwrap() = Some(err.to_string());
        }
    }

    fn on_block1(&mut self, _ctx: &mut Context<'_>) {
        self.block1_fired.store(true, Ordering::SeqCst);
    }
}

#[test]
fn s3_past_time_request_is_rejected_with_no_scheduling_effect() {
    let mut ws = Workspace::new("ws", fast_settings(3.0));
    ws.add_node("A");
    ws.add_update("A", 0, Some(1)).unwrap();
    ws.add_update("A", 1, None).unwrap();

    let broker = ChannelBroker::new();
    let smn_transport = Arc::new(ChannelTransport::new("smn", broker.clone()));
    let mut gc = ws.build(smn_transport).unwrap();

    let rejection = Arc::new(Mutex::new(None));
    let block1_fired = Arc::new(AtomicBool::new(false));
    let a_transport = Arc::new(ChannelTransport::new("node-A", broker));
    let a = NodeBuilder::new(
        "ws",
        "A",
        0,
        a_transport,
        RejectModel {
            attempted: Arc::new(AtomicBool::new(false)),
            rejection: rejection.clone(),
            block1_fired: block1_fired.clone(),
        },
    )
    .add_update_y(0, |m: &mut RejectModel, ctx: &mut Context<'_>| m.on_block0(ctx))
    .add_update_y(1, |m: &mut RejectModel, ctx: &mut Context<'_>| m.on_block1(ctx))
    .build();

    let handle = drive(a);
    let reason = gc.run().unwrap();
    assert_eq!(reason, 0);
    handle.join().unwrap();

    let rejection = rejection.lock().unwrap().clone().expect("request was attempted");
    assert!(rejection.contains("request-invalid"));
    assert!(!block1_fired.load(Ordering::SeqCst));
}

// --- S4: a node that never acknowledges trips the ack-timeout deadline -----

#[test]
fn s4_ack_timeout_terminates_the_run_with_reason_two() {
    let broker = ChannelBroker::new();
    let smn_transport = Arc::new(ChannelTransport::new("smn", broker.clone()));
    let mut gc = Gc::new(
        "ws",
        vec![NodeSpec {
            id: 0,
            name: "A".to_string(),
            blocks: vec![UpdateBlockSpec { id: 0, period: Some(1) }],
            x_needed: false,
        }],
        vec![],
        smn_transport,
        Duration::from_millis(150),
        10,
    )
    .unwrap();

    let terms = Arc::new(Mutex::new(Vec::new()));
    let terms2 = terms.clone();
    let node_transport = Arc::new(ChannelTransport::new("node-A", broker));
    let listen = smn_to_node_topic("ws", "A");
    node_transport.open(&listen).unwrap();
    let sender = node_transport.clone();
    node_transport
        .subscribe(
            &listen,
            Box::new(move |bytes| {
                let Ok(msg) = WireMessage::decode(bytes) else {
                    return;
                };
                match msg.msgtype {
                    MsgType::Init => {
                        let ack = WireMessage::init_ack(msg.id, 0).encode().unwrap();
                        let _ = sender.send(&node_to_smn_topic("ws", "A"), &ack);
                    }
                    MsgType::Term => terms2.lock().unwrap().push(msg),
                    // UPDATE_Y is deliberately never acknowledged.
                    _ => {}
                }
            }),
        )
        .unwrap();

    let start = Instant::now();
    let result = gc.run_tick();
    assert!(start.elapsed() >= Duration::from_millis(150));
    assert!(matches!(result, Err(SimulationError::AckTimeout(_))));

    for _ in 0..50 {
        if !terms.lock().unwrap().is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let terms = terms.lock().unwrap();
    assert_eq!(terms.len(), 1);
    assert_eq!(terms[0].i, 2);
}

// --- S5: strict vs. non-strict input semantics -----------------------------

#[test]
fn s5_non_strict_input_overwrites_strict_input_queues() {
    let broker = ChannelBroker::new();
    let sender = ChannelTransport::new("sender", broker.clone());
    let receiver = Arc::new(ChannelTransport::new("receiver", broker));

    let ns_endpoint = "ws/B/u_ns";
    let non_strict: NonStrictInput<i64> = NonStrictInput::new(0);
    receiver.open(ns_endpoint).unwrap();
    let port = non_strict.clone();
    receiver
        .subscribe(ns_endpoint, Box::new(move |bytes| {
            let _ = port.write_raw(bytes);
        }))
        .unwrap();

    sender.send(ns_endpoint, &1i64.encode().unwrap()).unwrap();
    sender.send(ns_endpoint, &2i64.encode().unwrap()).unwrap();
    for _ in 0..50 {
        if non_strict.pending() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(non_strict.get(), 2);
    assert!(!non_strict.pending());

    let strict_endpoint = "ws/B/u_strict";
    let strict: StrictInput<i64> = StrictInput::new();
    receiver.open(strict_endpoint).unwrap();
    let port = strict.clone();
    receiver
        .subscribe(strict_endpoint, Box::new(move |bytes| {
            let _ = port.write_raw(bytes);
        }))
        .unwrap();

    sender.send(strict_endpoint, &1i64.encode().unwrap()).unwrap();
    sender.send(strict_endpoint, &2i64.encode().unwrap()).unwrap();
    for _ in 0..50 {
        if strict.len() == 2 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(strict.pop(), Some(1));
    assert_eq!(strict.pop(), Some(2));
    assert_eq!(strict.pop(), None);
}

// --- S6: three-node fan-in ordering, and cycle rejection at assembly -------

fn respond_to_init_and_update_y(broker: Arc<ChannelBroker>, workspace: &'static str, name: &'static str) {
    thread::spawn(move || {
        let node_transport = ChannelTransport::new(format!("node-{name}"), broker);
        let listen = smn_to_node_topic(workspace, name);
        let (tx, rx) = crossbeam_channel::unbounded();
        node_transport.open(&listen).unwrap();
        node_transport
            .subscribe(&listen, Box::new(move |bytes| {
                if let Ok(msg) = WireMessage::decode(bytes) {
                    let _ = tx.send(msg);
                }
            }))
            .unwrap();
        for _ in 0..2 {
            let Ok(msg) = rx.recv_timeout(Duration::from_secs(1)) else {
                return;
            };
            let ack = match msg.msgtype {
                MsgType::Init => WireMessage::init_ack(msg.id, 0),
                MsgType::UpdateY => WireMessage::sim_y_ack(msg.id, msg.t, 0),
                _ => continue,
            };
            node_transport
                .send(&node_to_smn_topic(workspace, name), &ack.encode().unwrap())
                .unwrap();
        }
    });
}

#[test]
fn s6_three_node_fan_in_orders_a_before_b_before_c() {
    let broker = ChannelBroker::new();
    let smn_transport = Arc::new(ChannelTransport::new("smn", broker.clone()));

    let mut ws = Workspace::new("ws", fast_settings(1.0));
    for n in ["A", "B", "C"] {
        ws.add_node(n);
        ws.add_port(n, out_port("y")).unwrap();
        ws.add_port(n, in_port("u")).unwrap();
        ws.add_update(n, 0, Some(1)).unwrap();
    }
    ws.connect("A", "y", "B", "u").unwrap();
    ws.connect("A", "y", "C", "u").unwrap();
    ws.connect("B", "y", "C", "u").unwrap();
    let mut gc = ws.build(smn_transport).unwrap();

    for name in ["A", "B", "C"] {
        respond_to_init_and_update_y(broker.clone(), "ws", name);
    }

    let outcome = gc.run_tick().unwrap();
    match outcome {
        TickOutcome::Ticked { t, order } => {
            assert_eq!(t, 1);
            assert_eq!(order, vec![0, 1, 2]);
        }
        TickOutcome::Terminated { .. } => panic!("expected a tick, got termination"),
    }
}

#[test]
fn s6_adding_a_back_edge_is_rejected_at_build_time() {
    let broker = ChannelBroker::new();
    let transport = Arc::new(ChannelTransport::new("smn", broker));

    let mut ws = Workspace::new("ws", fast_settings(1.0));
    for n in ["A", "B", "C"] {
        ws.add_node(n);
        ws.add_port(n, out_port("y")).unwrap();
        ws.add_port(n, in_port("u")).unwrap();
        ws.add_update(n, 0, Some(1)).unwrap();
    }
    ws.connect("A", "y", "B", "u").unwrap();
    ws.connect("B", "y", "C", "u").unwrap();
    ws.connect("C", "y", "A", "u").unwrap();

    let err = ws.build(transport).unwrap_err();
    assert_eq!(err, ConfigError::Cycle);
}
