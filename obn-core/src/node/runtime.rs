//! The node-side event loop: `STOPPED` → `STARTED` → `RUNNING` →
//! (`ERROR` | `STOPPED`), driven one `run_step` at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::{ProtocolError, SimulationError, TransportError};
use crate::mask::{self, UpdateMask};
use crate::node::context::{build_context, Context};
use crate::node::update_fn::{self, UpdateFn};
use crate::node::waitfor::WaitForRegistry;
use crate::port::{NonStrictInput, PortData, StrictInput};
use crate::protocol::{MsgType, NodeId, WireMessage};
use crate::time::Ticks;
use crate::transport::{smn_to_node_topic, node_to_smn_topic, Transport};

/// The node lifecycle state (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Initial state, and the state a node returns to after `TERM` or a
    /// local `stop_simulation`.
    Stopped,
    /// The SMN-facing port is open, awaiting `SMN2N_INIT`.
    Started,
    /// `INIT` has been acknowledged; update requests are being served.
    Running,
    /// A fatal protocol error or permanent transport loss occurred.
    Error,
}

/// A message arriving on the node-event queue (from the SMN, or a
/// transport-thread exception).
enum NodeEvent {
    Init,
    UpdateY { t: Ticks, mask: UpdateMask },
    UpdateX { t: Ticks, mask: UpdateMask },
    Term { reason: i64 },
    Exception(SimulationError),
}

impl NodeEvent {
    /// Converts a decoded SMN message into a node event. Never called with
    /// a `SIM_EVENT_ACK`: those are intercepted and routed straight to the
    /// wait-for registry by the delivery callback, since the thread that
    /// would otherwise drain them off this queue (`run_step`) may itself be
    /// the one blocked waiting for one (inside
    /// [`Context::request_future_update`](crate::node::context::Context::request_future_update)).
    fn from_wire(msg: WireMessage) -> Self {
        match msg.msgtype {
            MsgType::Init => NodeEvent::Init,
            MsgType::UpdateY => NodeEvent::UpdateY { t: msg.t, mask: msg.mask },
            MsgType::UpdateX => NodeEvent::UpdateX { t: msg.t, mask: msg.mask },
            MsgType::Term => NodeEvent::Term { reason: msg.i },
            other => NodeEvent::Exception(SimulationError::Protocol(ProtocolError {
                node: None,
                detail: format!("unexpected message type on node-event queue: {other:?}"),
            })),
        }
    }
}

/// A message arriving on the port-event queue: a successful write to one
/// of the node's input ports, identified by port name.
struct PortEvent(String);

/// Handle used by a port's `on_message` callback to enqueue a
/// [`PortEvent`] without the port itself knowing about `NodeRuntime`.
#[derive(Clone)]
pub struct PortEventSender {
    port_name: String,
    sender: Sender<PortEvent>,
}

impl PortEventSender {
    /// Enqueues the arrival as a port event.
    pub fn notify(&self) {
        let _ = self.sender.send(PortEvent(self.port_name.clone()));
    }
}

/// The user-visible outcome of one [`NodeRuntime::run_step`] call.
#[derive(Debug)]
pub enum StepOutcome {
    /// First call: the SMN-facing endpoint is now open and subscribed.
    Started,
    /// `SMN2N_INIT` was received and acknowledged.
    Init,
    /// `SMN2N_UPDATE_Y` for `mask` was received, the registered `Y`
    /// callbacks ran, and `N2SMN_SIM_Y_ACK` was sent.
    UpdateY(UpdateMask),
    /// `SMN2N_UPDATE_X` for `mask` was received, the registered `X`
    /// callbacks ran, and `N2SMN_SIM_X_ACK` was sent.
    UpdateX(UpdateMask),
    /// An input port identified by name received a new value.
    Received(String),
    /// `SMN2N_TERM` was received; the node is back in `STOPPED`.
    Term(i64),
    /// No event surfaced before `timeout` elapsed; no state change.
    Timeout,
}

struct UpdateBlockEntry<M> {
    y: Option<update_fn::UpdateCallback<M>>,
    x: Option<update_fn::UpdateCallback<M>>,
}

impl<M> UpdateBlockEntry<M> {
    fn empty() -> Self {
        Self { y: None, x: None }
    }
}

/// The running instance of one node's model: owns the model value, the
/// registered per-block callbacks, and the event queues multiplexed by
/// [`run_step`](NodeRuntime::run_step).
pub struct NodeRuntime<M> {
    model: M,
    state: RuntimeState,
    node_id: NodeId,
    name: String,
    listen_topic: String,
    smn_send_topic: String,
    transport: Arc<dyn Transport>,
    blocks: HashMap<u32, UpdateBlockEntry<M>>,
    waitfor: Arc<WaitForRegistry>,
    node_events: (Sender<NodeEvent>, Receiver<NodeEvent>),
    port_events: (Sender<PortEvent>, Receiver<PortEvent>),
    time: Ticks,
    default_wait_timeout: Duration,
}

impl<M: 'static> NodeRuntime<M> {
    /// The node's current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// The simulated time of the most recently processed update.
    pub fn time(&self) -> Ticks {
        self.time
    }

    /// A handle that port callbacks can use to enqueue `{RCV, port_name}`
    /// port events without borrowing the runtime.
    pub fn port_event_sender(&self, port_name: impl Into<String>) -> PortEventSender {
        PortEventSender {
            port_name: port_name.into(),
            sender: self.port_events.0.clone(),
        }
    }

    /// Drives the event loop for up to `timeout`, returning as soon as a
    /// user-visible event surfaces, per §4.3: port events take priority
    /// over node events, and `SIM_EVENT_ACK`s are consumed internally
    /// (they only wake a blocked [`Context::request_future_update`]) and
    /// never themselves surface as a [`StepOutcome`].
    pub fn run_step(&mut self, timeout: Duration) -> Result<StepOutcome, SimulationError> {
        if self.state == RuntimeState::Stopped {
            self.open_and_subscribe()?;
            self.state = RuntimeState::Started;
            return Ok(StepOutcome::Started);
        }

        if let Ok(PortEvent(port_name)) = self.port_events.1.try_recv() {
            return Ok(StepOutcome::Received(port_name));
        }

        let deadline = Instant::now() + timeout;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(StepOutcome::Timeout);
        }
        let event = match self.node_events.1.recv_timeout(remaining) {
            Ok(event) => event,
            Err(_) => return Ok(StepOutcome::Timeout),
        };
        self.dispatch_node_event(event)
    }

    fn open_and_subscribe(&mut self) -> Result<(), SimulationError> {
        self.transport.open(&self.listen_topic)?;

        let events = self.node_events.0.clone();
        let node_name = self.name.clone();
        let waitfor = self.waitfor.clone();
        self.transport.subscribe(
            &self.listen_topic,
            Box::new(move |bytes| {
                match WireMessage::decode(bytes) {
                    Ok(msg) if msg.msgtype == MsgType::SimEventAck => {
                        waitfor.notify(&msg);
                    }
                    Ok(msg) => {
                        let _ = events.send(NodeEvent::from_wire(msg));
                    }
                    Err(e) => {
                        let _ = events.send(NodeEvent::Exception(SimulationError::Protocol(
                            ProtocolError {
                                node: Some(node_name.clone()),
                                detail: e.to_string(),
                            },
                        )));
                    }
                }
            }),
        )?;

        let events = self.node_events.0.clone();
        self.transport.on_loss(Box::new(move || {
            let _ = events.send(NodeEvent::Exception(SimulationError::Transport(
                crate::error::TransportError {
                    transport_id: String::new(),
                    detail: "permanent transport loss".to_string(),
                    permanent: true,
                },
            )));
        }));

        Ok(())
    }

    fn dispatch_node_event(&mut self, event: NodeEvent) -> Result<StepOutcome, SimulationError> {
        match event {
            NodeEvent::Init => {
                self.state = RuntimeState::Running;
                self.send_to_smn(&WireMessage::init_ack(self.node_id, 0))?;
                Ok(StepOutcome::Init)
            }
            NodeEvent::UpdateY { t, mask } => {
                self.time = t;
                self.run_blocks(mask, true);
                self.send_to_smn(&WireMessage::sim_y_ack(self.node_id, t, 0))?;
                Ok(StepOutcome::UpdateY(mask))
            }
            NodeEvent::UpdateX { t, mask } => {
                self.time = t;
                self.run_blocks(mask, false);
                self.send_to_smn(&WireMessage::sim_x_ack(self.node_id, t, 0))?;
                Ok(StepOutcome::UpdateX(mask))
            }
            NodeEvent::Term { reason } => {
                self.waitfor.cancel_all();
                self.state = RuntimeState::Stopped;
                Ok(StepOutcome::Term(reason))
            }
            NodeEvent::Exception(e) => {
                self.state = RuntimeState::Error;
                Err(e)
            }
        }
    }

    /// Runs every registered `Y` (if `is_y`) or `X` callback whose block
    /// id is set in `mask`, in ascending block-id order.
    fn run_blocks(&mut self, mask: UpdateMask, is_y: bool) {
        for id in mask::ids(mask) {
            let Some(entry) = self.blocks.get_mut(&id) else {
                continue;
            };
            let cb = if is_y { entry.y.as_mut() } else { entry.x.as_mut() };
            let Some(cb) = cb else { continue };

            let mut context: Context<'_> = build_context(
                self.time,
                self.node_id,
                &self.name,
                &*self.transport,
                &self.smn_send_topic,
                &self.waitfor,
                self.default_wait_timeout,
            );
            cb(&mut self.model, &mut context);
        }
    }

    /// Subscribes `endpoint` and routes every message delivered there into
    /// `input`'s [`NonStrictInput::write_raw`], surfacing a
    /// `{RCV, port_name}` [`StepOutcome::Received`] on the next
    /// [`run_step`](Self::run_step) for each successful write.
    pub fn wire_non_strict_input<T: PortData>(
        &self,
        port_name: impl Into<String>,
        endpoint: &str,
        input: &NonStrictInput<T>,
    ) -> Result<(), TransportError> {
        let sender = self.port_event_sender(port_name);
        input.set_on_message(move || sender.notify());
        let input = input.clone();
        self.transport.open(endpoint)?;
        self.transport.subscribe(
            endpoint,
            Box::new(move |bytes| {
                let _ = input.write_raw(bytes);
            }),
        )
    }

    /// As [`wire_non_strict_input`](Self::wire_non_strict_input), for a
    /// [`StrictInput`] port: every delivered message is pushed onto the
    /// port's FIFO queue rather than overwriting a single pending value.
    pub fn wire_strict_input<T: PortData>(
        &self,
        port_name: impl Into<String>,
        endpoint: &str,
        input: &StrictInput<T>,
    ) -> Result<(), TransportError> {
        let sender = self.port_event_sender(port_name);
        input.set_on_message(move || sender.notify());
        let input = input.clone();
        self.transport.open(endpoint)?;
        self.transport.subscribe(
            endpoint,
            Box::new(move |bytes| {
                let _ = input.write_raw(bytes);
            }),
        )
    }

    fn send_to_smn(&self, msg: &WireMessage) -> Result<(), SimulationError> {
        let bytes = msg.encode().map_err(|e| {
            SimulationError::Protocol(ProtocolError {
                node: Some(self.name.clone()),
                detail: e.to_string(),
            })
        })?;
        self.transport.send(&self.smn_send_topic, &bytes)?;
        Ok(())
    }
}

/// Assembles a [`NodeRuntime`] by registering one `Y`/`X` callback per
/// update block before handing ownership of the model to the runtime.
pub struct NodeBuilder<M> {
    model: M,
    node_id: NodeId,
    name: String,
    listen_topic: String,
    smn_send_topic: String,
    transport: Arc<dyn Transport>,
    blocks: HashMap<u32, UpdateBlockEntry<M>>,
    default_wait_timeout: Duration,
}

impl<M: 'static> NodeBuilder<M> {
    /// Starts building a node named `name` in `workspace`, with numeric
    /// id `node_id` as assigned by the workspace, communicating over
    /// `transport`.
    pub fn new(
        workspace: &str,
        name: impl Into<String>,
        node_id: NodeId,
        transport: Arc<dyn Transport>,
        model: M,
    ) -> Self {
        let name = name.into();
        Self {
            model,
            node_id,
            listen_topic: smn_to_node_topic(workspace, &name),
            smn_send_topic: node_to_smn_topic(workspace, &name),
            name,
            transport,
            blocks: HashMap::new(),
            default_wait_timeout: Duration::from_secs(5),
        }
    }

    /// Overrides the default timeout used by
    /// [`Context::request_future_update`].
    pub fn default_wait_timeout(mut self, timeout: Duration) -> Self {
        self.default_wait_timeout = timeout;
        self
    }

    /// Registers `f` as update block `id`'s `Y` (output) computation.
    pub fn add_update_y<S, F>(mut self, id: u32, f: F) -> Self
    where
        F: UpdateFn<M, S> + 'static,
        S: 'static,
    {
        self.blocks
            .entry(id)
            .or_insert_with(UpdateBlockEntry::empty)
            .y = Some(update_fn::erase(f));
        self
    }

    /// Registers `f` as update block `id`'s `X` (state) computation.
    pub fn add_update_x<S, F>(mut self, id: u32, f: F) -> Self
    where
        F: UpdateFn<M, S> + 'static,
        S: 'static,
    {
        self.blocks
            .entry(id)
            .or_insert_with(UpdateBlockEntry::empty)
            .x = Some(update_fn::erase(f));
        self
    }

    /// Finishes assembly, producing a [`NodeRuntime`] in state `STOPPED`.
    pub fn build(self) -> NodeRuntime<M> {
        NodeRuntime {
            model: self.model,
            state: RuntimeState::Stopped,
            node_id: self.node_id,
            name: self.name,
            listen_topic: self.listen_topic,
            smn_send_topic: self.smn_send_topic,
            transport: self.transport,
            blocks: self.blocks,
            waitfor: Arc::new(WaitForRegistry::new()),
            node_events: unbounded(),
            port_events: unbounded(),
            time: 0,
            default_wait_timeout: self.default_wait_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{ChannelBroker, ChannelTransport};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingModel {
        ticks_seen: u32,
    }

    #[test]
    fn first_run_step_opens_transport_and_transitions_to_started() {
        let broker = ChannelBroker::new();
        let transport = Arc::new(ChannelTransport::new("a", broker));
        let mut node = NodeBuilder::new("ws", "A", 0, transport, CountingModel { ticks_seen: 0 })
            .add_update_y(0, |m: &mut CountingModel| m.ticks_seen += 1)
            .build();

        let outcome = node.run_step(Duration::from_millis(10)).unwrap();
        assert!(matches!(outcome, StepOutcome::Started));
        assert_eq!(node.state(), RuntimeState::Started);
    }

    #[test]
    fn init_then_update_y_invokes_registered_callback_and_acks() {
        let broker = ChannelBroker::new();
        let node_transport = Arc::new(ChannelTransport::new("node-A", broker.clone()));
        let smn_transport = Arc::new(ChannelTransport::new("smn", broker));

        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();
        let mut node = NodeBuilder::new("ws", "A", 0, node_transport, CountingModel { ticks_seen: 0 })
            .add_update_y(0, move |m: &mut CountingModel| {
                m.ticks_seen += 1;
                seen2.store(m.ticks_seen, Ordering::SeqCst);
            })
            .build();

        node.run_step(Duration::from_millis(10)).unwrap();

        let acks: Arc<std::sync::Mutex<Vec<WireMessage>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let acks2 = acks.clone();
        smn_transport
            .subscribe(
                &node_to_smn_topic("ws", "A"),
                Box::new(move |bytes| {
                    acks2.lock().unwrap().push(WireMessage::decode(bytes).unwrap());
                }),
            )
            .unwrap();

        let init = WireMessage::init(0).encode().unwrap();
        smn_transport.send(&smn_to_node_topic("ws", "A"), &init).unwrap();
        let outcome = node.run_step(Duration::from_secs(1)).unwrap();
        assert!(matches!(outcome, StepOutcome::Init));
        assert_eq!(node.state(), RuntimeState::Running);

        let update_y = WireMessage::update_y(0, 1, mask::bit(0)).encode().unwrap();
        smn_transport.send(&smn_to_node_topic("ws", "A"), &update_y).unwrap();
        let outcome = node.run_step(Duration::from_secs(1)).unwrap();
        assert!(matches!(outcome, StepOutcome::UpdateY(m) if m == mask::bit(0)));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        for _ in 0..50 {
            if acks.lock().unwrap().len() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let acks = acks.lock().unwrap();
        assert_eq!(acks[0].msgtype, MsgType::InitAck);
        assert_eq!(acks[1].msgtype, MsgType::SimYAck);
    }

    #[test]
    fn term_cancels_active_waitfor_conditions() {
        let broker = ChannelBroker::new();
        let transport = Arc::new(ChannelTransport::new("a", broker));
        let mut node = NodeBuilder::new("ws", "A", 0, transport, CountingModel { ticks_seen: 0 }).build();
        node.run_step(Duration::from_millis(10)).unwrap();

        let handle = node.waitfor.register(|_| true);
        node.dispatch_node_event(NodeEvent::Term { reason: 0 }).unwrap();
        assert_eq!(node.state(), RuntimeState::Stopped);
        assert_eq!(
            node.waitfor.wait(handle, Duration::from_millis(10)),
            Some(crate::node::waitfor::WaitOutcome::Cancelled)
        );
    }
}
