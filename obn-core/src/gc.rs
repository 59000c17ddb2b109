//! The Simulation Manager Node / Global Clock scheduler (§4.4): the
//! discrete-event tick loop that drives every node through `UPDATE_Y`
//! and `UPDATE_X` in dependency order, collects ACKs under a per-message
//! deadline, and services irregular future-update requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::{AckTimeoutError, ConfigError, ProtocolError, SimulationError};
use crate::graph::{DependencyGraph, Edge};
use crate::mask::{self, UpdateMask};
use crate::protocol::{MsgType, NodeId, WireMessage};
use crate::time::Ticks;
use crate::transport::{node_to_smn_topic, smn_to_node_topic, Transport};

/// One of a node's update blocks, as known to the scheduler: its
/// sampling period, or `None` for a purely event-driven block whose
/// next-fire time starts at `+infinity` until an irregular request
/// schedules it.
#[derive(Debug, Clone, Copy)]
pub struct UpdateBlockSpec {
    pub id: u32,
    pub period: Option<Ticks>,
}

/// A node as registered with the scheduler.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub name: String,
    pub blocks: Vec<UpdateBlockSpec>,
    /// Whether the SMN should follow every active `UPDATE_Y` for this
    /// node with an `UPDATE_X`.
    pub x_needed: bool,
}

/// The outcome of one [`Gc::run_tick`] call.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// A tick at simulated time `t` completed; `order` is the
    /// topological order the active nodes were driven in.
    Ticked { t: Ticks, order: Vec<NodeId> },
    /// `T_next` exceeded `final_time`; `TERM` was broadcast to every
    /// node and the run is over.
    Terminated { reason: i64 },
}

/// The SMN scheduler state machine.
pub struct Gc {
    workspace: String,
    nodes: Vec<NodeSpec>,
    node_names: HashMap<NodeId, String>,
    graph: DependencyGraph,
    transport: Arc<dyn Transport>,
    ack_timeout: Duration,
    final_time: Ticks,
    time: Ticks,
    next: HashMap<(NodeId, u32), Ticks>,
    irregular: HashMap<Ticks, HashMap<NodeId, UpdateMask>>,
    incoming: Receiver<WireMessage>,
    initialized: bool,
}

impl Gc {
    /// Assembles the scheduler over `nodes` and the inter-node `edges`
    /// derived from connections (§4.5), opening and subscribing the
    /// node→SMN topic for each node on `transport`.
    pub fn new(
        workspace: impl Into<String>,
        nodes: Vec<NodeSpec>,
        edges: Vec<Edge>,
        transport: Arc<dyn Transport>,
        ack_timeout: Duration,
        final_time: Ticks,
    ) -> Result<Self, ConfigError> {
        let workspace = workspace.into();
        let node_ids: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
        let graph = DependencyGraph::new(node_ids, edges)?;

        let mut next = HashMap::new();
        for node in &nodes {
            for block in &node.blocks {
                if let Some(period) = block.period {
                    next.insert((node.id, block.id), period);
                }
            }
        }

        let (tx, rx) = unbounded();
        for node in &nodes {
            let topic = node_to_smn_topic(&workspace, &node.name);
            subscribe_node_topic(&*transport, &topic, tx.clone())
                .map_err(|e| ConfigError::InvalidSetting {
                    setting: "transport",
                    reason: e.to_string(),
                })?;
        }

        let node_names = nodes.iter().map(|n| (n.id, n.name.clone())).collect();

        Ok(Self {
            workspace,
            nodes,
            node_names,
            graph,
            transport,
            ack_timeout,
            final_time,
            time: 0,
            next,
            irregular: HashMap::new(),
            incoming: rx,
            initialized: false,
        })
    }

    /// The current simulated time (`T_cur`).
    pub fn time(&self) -> Ticks {
        self.time
    }

    /// Runs ticks until `TERM` is broadcast, returning the reason code.
    pub fn run(&mut self) -> Result<i64, SimulationError> {
        loop {
            match self.run_tick()? {
                TickOutcome::Terminated { reason } => return Ok(reason),
                TickOutcome::Ticked { .. } => continue,
            }
        }
    }

    /// Runs one iteration of the tick loop (§4.4 steps 1–7). On the first
    /// call, first sends `SMN2N_INIT` to every node and waits for each
    /// `N2SMN_INIT_ACK` before computing the first tick.
    pub fn run_tick(&mut self) -> Result<TickOutcome, SimulationError> {
        if let Err(e) = self.ensure_initialized() {
            self.broadcast_term(2)?;
            return Err(e);
        }

        let Some(t_next) = self.next_fire_time() else {
            self.broadcast_term(0)?;
            return Ok(TickOutcome::Terminated { reason: 0 });
        };

        if t_next > self.final_time {
            self.broadcast_term(0)?;
            return Ok(TickOutcome::Terminated { reason: 0 });
        }

        let active = self.active_masks(t_next);
        let order = match self.graph.active_order(&active) {
            Ok(order) => order,
            Err(_) => {
                // Unreachable by the construction invariant in `DependencyGraph::new`;
                // still handled, rather than panicking, if it ever is.
                self.broadcast_term(-1)?;
                return Err(SimulationError::Protocol(ProtocolError {
                    node: None,
                    detail: "active subgraph was cyclic".to_string(),
                }));
            }
        };

        if let Err(e) = self.run_update_y_phase(t_next, &order, &active) {
            self.broadcast_term(2)?;
            return Err(e);
        }

        if let Err(e) = self.run_update_x_phase(t_next, &active) {
            self.broadcast_term(2)?;
            return Err(e);
        }

        self.advance(t_next, &active);
        Ok(TickOutcome::Ticked { t: t_next, order })
    }

    /// Sends `SMN2N_INIT` to every node and waits for each `N2SMN_INIT_ACK`
    /// (§4.4 step 0), idempotently: a no-op once already initialized.
    fn ensure_initialized(&mut self) -> Result<(), SimulationError> {
        if self.initialized {
            return Ok(());
        }
        let ids: Vec<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        for &id in &ids {
            self.send_to_node(id, &WireMessage::init(id))?;
        }
        for &id in &ids {
            self.wait_for_ack(id, 0, MsgType::InitAck)?;
        }
        self.initialized = true;
        Ok(())
    }

    fn next_fire_time(&self) -> Option<Ticks> {
        let periodic_min = self.next.values().copied().min();
        let irregular_min = self.irregular.keys().copied().min();
        match (periodic_min, irregular_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    fn active_masks(&self, t_next: Ticks) -> HashMap<NodeId, UpdateMask> {
        let mut active = HashMap::new();
        for node in &self.nodes {
            let mut node_mask: UpdateMask = 0;
            for block in &node.blocks {
                if self.next.get(&(node.id, block.id)) == Some(&t_next) {
                    node_mask |= mask::bit(block.id);
                }
            }
            if let Some(irregular_mask) = self.irregular.get(&t_next).and_then(|m| m.get(&node.id)) {
                node_mask |= irregular_mask;
            }
            if node_mask != 0 {
                active.insert(node.id, node_mask);
            }
        }
        active
    }

    fn run_update_y_phase(
        &mut self,
        t: Ticks,
        order: &[NodeId],
        active: &HashMap<NodeId, UpdateMask>,
    ) -> Result<(), SimulationError> {
        for &node_id in order {
            let node_mask = active[&node_id];
            self.send_to_node(node_id, &WireMessage::update_y(node_id, t, node_mask))?;
            self.wait_for_ack(node_id, t, MsgType::SimYAck)?;
        }
        Ok(())
    }

    fn run_update_x_phase(
        &mut self,
        t: Ticks,
        active: &HashMap<NodeId, UpdateMask>,
    ) -> Result<(), SimulationError> {
        let targets: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.x_needed && active.contains_key(&n.id))
            .map(|n| n.id)
            .collect();

        for node_id in targets {
            let node_mask = active[&node_id];
            self.send_to_node(node_id, &WireMessage::update_x(node_id, t, node_mask))?;
            self.wait_for_ack(node_id, t, MsgType::SimXAck)?;
        }
        Ok(())
    }

    fn advance(&mut self, t_next: Ticks, active: &HashMap<NodeId, UpdateMask>) {
        self.time = t_next;
        for node in &self.nodes {
            let Some(&node_mask) = active.get(&node.id) else {
                continue;
            };
            for block in &node.blocks {
                if let Some(period) = block.period {
                    if node_mask & mask::bit(block.id) != 0 {
                        *self.next.get_mut(&(node.id, block.id)).unwrap() += period;
                    }
                }
            }
        }
        self.irregular.remove(&t_next);
    }

    /// Blocks, up to `ack_timeout`, for `expect` from `node_id` echoing
    /// `t` with a zero status. While waiting, concurrently services any
    /// `SIM_EVENT` requests that arrive from other nodes, since the SMN
    /// must not stall irregular-update acknowledgement behind an
    /// unrelated node's `UPDATE_Y`/`UPDATE_X` ACK.
    fn wait_for_ack(&mut self, node_id: NodeId, t: Ticks, expect: MsgType) -> Result<(), SimulationError> {
        let deadline = Instant::now() + self.ack_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SimulationError::AckTimeout(AckTimeoutError {
                    node: self.node_names.get(&node_id).cloned().unwrap_or_default(),
                    time: t,
                }));
            }
            let msg = self.incoming.recv_timeout(remaining).map_err(|_| {
                SimulationError::AckTimeout(AckTimeoutError {
                    node: self.node_names.get(&node_id).cloned().unwrap_or_default(),
                    time: t,
                })
            })?;

            if msg.msgtype == MsgType::SimEvent {
                self.handle_sim_event(&msg)?;
                continue;
            }

            if msg.id == node_id && msg.t == t && msg.msgtype == expect {
                if msg.i == 0 {
                    return Ok(());
                }
                return Err(SimulationError::Protocol(ProtocolError {
                    node: self.node_names.get(&node_id).cloned(),
                    detail: format!("{expect:?} rejected with status {}", msg.i),
                }));
            }
            // A message for a different node/time/type while we wait: harmless
            // reordering noise on the shared incoming queue (e.g. a very late
            // retransmit); ignore and keep waiting for the one we need.
        }
    }

    fn handle_sim_event(&mut self, msg: &WireMessage) -> Result<(), SimulationError> {
        let status = if msg.t > self.time { 0 } else { -2 };
        if status == 0 {
            self.irregular
                .entry(msg.t)
                .or_default()
                .entry(msg.id)
                .and_modify(|m| *m |= msg.mask)
                .or_insert(msg.mask);
        }
        self.send_to_node(msg.id, &WireMessage::sim_event_ack(msg.id, msg.t, status))
    }

    fn send_to_node(&self, node_id: NodeId, msg: &WireMessage) -> Result<(), SimulationError> {
        let name = self.node_names.get(&node_id).ok_or_else(|| {
            SimulationError::Protocol(ProtocolError {
                node: None,
                detail: format!("unknown node id {node_id}"),
            })
        })?;
        let topic = smn_to_node_topic(&self.workspace, name);
        let bytes = msg.encode().map_err(|e| {
            SimulationError::Protocol(ProtocolError {
                node: Some(name.clone()),
                detail: e.to_string(),
            })
        })?;
        self.transport.send(&topic, &bytes)?;
        Ok(())
    }

    fn broadcast_term(&self, reason: i64) -> Result<(), SimulationError> {
        for node in &self.nodes {
            self.send_to_node(node.id, &WireMessage::term(node.id, reason))?;
        }
        Ok(())
    }
}

fn subscribe_node_topic(
    transport: &dyn Transport,
    topic: &str,
    sender: Sender<WireMessage>,
) -> Result<(), crate::error::TransportError> {
    transport.open(topic)?;
    transport.subscribe(
        topic,
        Box::new(move |bytes| {
            if let Ok(msg) = WireMessage::decode(bytes) {
                let _ = sender.send(msg);
            }
        }),
    )
}
