//! Workspace assembly (§4 Workspace assembly, §6 settings): the
//! script-bound builder that resolves logical node/port names to
//! transport addresses, wires connections, validates the invariants of
//! §3, and installs the resulting graph into a [`Gc`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::gc::{Gc, NodeSpec, UpdateBlockSpec};
use crate::graph::Edge;
use crate::mask::{self, UpdateMask, MAX_UPDATE_INDEX};
use crate::port::{Direction, PortMeta, PortShape};
use crate::protocol::NodeId;
use crate::time::{Ticks, TimeUnit};
use crate::transport::Transport;

/// The default transport name used when neither endpoint of a
/// connection declares one explicitly.
const DEFAULT_TRANSPORT: &str = "__default__";

/// Which broker-style transport a node falls back to when its ports
/// don't declare one (§6 `default_comm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommKind {
    Yarp,
    Mqtt,
}

/// The workspace's configuration surface (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Positive microseconds per elementary tick.
    pub time_unit: TimeUnit,
    /// Microseconds; the run stops at the first tick strictly greater
    /// than this value.
    pub final_time_us: f64,
    /// Per-ACK fatal deadline.
    pub ack_timeout: Duration,
    /// POSIX seconds at `T=0`; informational to nodes.
    pub wallclock: u64,
    /// Fallback transport for ports that don't declare one.
    pub default_comm: CommKind,
    /// Broker URI, when `default_comm` is [`CommKind::Mqtt`].
    pub mqtt_server: Option<String>,
    /// If `false`, [`Workspace::build`] still validates but the caller
    /// is expected not to run the resulting [`Gc`].
    pub run_simulation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            time_unit: TimeUnit::from_micros(1_000).expect("1000 is nonzero"),
            final_time_us: 0.0,
            ack_timeout: Duration::from_secs(1),
            wallclock: 0,
            default_comm: CommKind::Mqtt,
            mqtt_server: None,
            run_simulation: true,
        }
    }
}

struct NodeEntry {
    id: NodeId,
    name: String,
    ports: HashMap<String, PortMeta>,
    blocks: Vec<UpdateBlockSpec>,
    x_needed: bool,
}

#[derive(PartialEq, Eq)]
struct Connection {
    src_node: String,
    src_port: String,
    tgt_node: String,
    tgt_port: String,
}

/// The assembly-time builder. Add nodes, their ports and update blocks,
/// and the connections between them; [`Workspace::build`] validates
/// everything and produces a ready-to-run [`Gc`].
pub struct Workspace {
    name: String,
    settings: Settings,
    nodes: Vec<NodeEntry>,
    node_ids: HashMap<String, NodeId>,
    connections: Vec<Connection>,
}

impl Workspace {
    /// Starts an empty workspace named `name`.
    pub fn new(name: impl Into<String>, settings: Settings) -> Self {
        Self {
            name: name.into(),
            settings,
            nodes: Vec::new(),
            node_ids: HashMap::new(),
            connections: Vec::new(),
        }
    }

    /// The workspace's settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Adds a node, assigning it the next sequential id (workspace
    /// insertion order), or returns the id it was already assigned if
    /// `name` was added before — node addition is otherwise idempotent.
    pub fn add_node(&mut self, name: impl Into<String>) -> NodeId {
        let name = name.into();
        if let Some(&id) = self.node_ids.get(&name) {
            return id;
        }
        let id = self.nodes.len() as NodeId;
        self.node_ids.insert(name.clone(), id);
        self.nodes.push(NodeEntry {
            id,
            name,
            ports: HashMap::new(),
            blocks: Vec::new(),
            x_needed: false,
        });
        id
    }

    /// Looks up a previously added node's numeric id.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.node_ids.get(name).copied()
    }

    /// Declares a port on `node`. `port.name` must be unique among all
    /// of that node's ports (input, output, and data alike).
    pub fn add_port(&mut self, node: &str, port: PortMeta) -> Result<(), ConfigError> {
        let entry = self.node_entry_mut(node)?;
        if entry.ports.contains_key(&port.name) {
            return Err(ConfigError::DuplicatePortName {
                node: node.to_string(),
                port: port.name,
            });
        }
        entry.ports.insert(port.name.clone(), port);
        Ok(())
    }

    /// Declares update block `id` on `node`, with `period` ticks between
    /// fires (`None` for a purely event-driven block).
    pub fn add_update(&mut self, node: &str, id: u32, period: Option<Ticks>) -> Result<(), ConfigError> {
        if id > MAX_UPDATE_INDEX {
            return Err(ConfigError::InvalidUpdateId { node: node.to_string(), id });
        }
        let entry = self.node_entry_mut(node)?;
        if entry.blocks.iter().any(|b| b.id == id) {
            return Err(ConfigError::InvalidUpdateId { node: node.to_string(), id });
        }
        entry.blocks.push(UpdateBlockSpec { id, period });
        Ok(())
    }

    /// Marks whether `node` should receive `UPDATE_X` after every active
    /// `UPDATE_Y` (§4.4 step 6).
    pub fn set_x_needed(&mut self, node: &str, needed: bool) -> Result<(), ConfigError> {
        self.node_entry_mut(node)?.x_needed = needed;
        Ok(())
    }

    /// Connects an OUT/DATA port to an IN/DATA port (§4.5). Rejects
    /// unknown endpoints, wrong-direction ports, and incompatible
    /// explicit transports. Repeating an identical connection is a no-op:
    /// duplicate connections are coalesced rather than producing a second
    /// graph edge.
    pub fn connect(
        &mut self,
        src_node: &str,
        src_port: &str,
        tgt_node: &str,
        tgt_port: &str,
    ) -> Result<(), ConfigError> {
        let src_meta = self.port_meta(src_node, src_port)?;
        if src_meta.direction == Direction::In {
            return Err(ConfigError::InvalidPortDirection {
                node: src_node.to_string(),
                port: src_port.to_string(),
            });
        }
        let tgt_meta = self.port_meta(tgt_node, tgt_port)?;
        if tgt_meta.direction == Direction::Out {
            return Err(ConfigError::InvalidPortDirection {
                node: tgt_node.to_string(),
                port: tgt_port.to_string(),
            });
        }

        let src_transport = src_meta.transport.as_deref().unwrap_or(DEFAULT_TRANSPORT);
        let tgt_transport = tgt_meta.transport.as_deref().unwrap_or(DEFAULT_TRANSPORT);
        if src_transport != DEFAULT_TRANSPORT
            && tgt_transport != DEFAULT_TRANSPORT
            && src_transport != tgt_transport
        {
            return Err(ConfigError::TransportMismatch {
                from: format!("{src_node}/{src_port} ({src_transport})"),
                to: format!("{tgt_node}/{tgt_port} ({tgt_transport})"),
            });
        }

        let conn = Connection {
            src_node: src_node.to_string(),
            src_port: src_port.to_string(),
            tgt_node: tgt_node.to_string(),
            tgt_port: tgt_port.to_string(),
        };
        if !self.connections.contains(&conn) {
            self.connections.push(conn);
        }
        Ok(())
    }

    /// Validates the full workspace and installs the dependency graph
    /// and scheduler state into a [`Gc`] bound to `transport`.
    ///
    /// The cycle check (§3's invariant on `src.mask & tgt.mask`) happens
    /// inside [`crate::graph::DependencyGraph::new`], called from
    /// [`Gc::new`].
    pub fn build(self, transport: Arc<dyn Transport>) -> Result<Gc, ConfigError> {
        let mut edges = Vec::with_capacity(self.connections.len());
        for conn in &self.connections {
            let src_id = *self.node_ids.get(&conn.src_node).ok_or_else(|| ConfigError::UnknownEndpoint {
                node: conn.src_node.clone(),
                port: conn.src_port.clone(),
            })?;
            let tgt_id = *self.node_ids.get(&conn.tgt_node).ok_or_else(|| ConfigError::UnknownEndpoint {
                node: conn.tgt_node.clone(),
                port: conn.tgt_port.clone(),
            })?;
            let src_mask = self.port_meta(&conn.src_node, &conn.src_port)?.mask;
            let tgt_mask = self.port_meta(&conn.tgt_node, &conn.tgt_port)?.mask;
            edges.push(Edge { from: src_id, to: tgt_id, src_mask, tgt_mask });
        }

        let node_specs: Vec<NodeSpec> = self
            .nodes
            .into_iter()
            .map(|n| NodeSpec {
                id: n.id,
                name: n.name,
                blocks: n.blocks,
                x_needed: n.x_needed,
            })
            .collect();

        let final_time = crate::time::micros_to_ticks(self.settings.final_time_us, self.settings.time_unit);
        Gc::new(self.name, node_specs, edges, transport, self.settings.ack_timeout, final_time)
    }

    fn node_entry_mut(&mut self, node: &str) -> Result<&mut NodeEntry, ConfigError> {
        let id = self.node_ids.get(node).copied().ok_or_else(|| ConfigError::UnknownEndpoint {
            node: node.to_string(),
            port: String::new(),
        })?;
        Ok(self.nodes.iter_mut().find(|n| n.id == id).expect("node_ids is kept in sync"))
    }

    fn port_meta(&self, node: &str, port: &str) -> Result<&PortMeta, ConfigError> {
        let id = self.node_ids.get(node).copied().ok_or_else(|| ConfigError::UnknownEndpoint {
            node: node.to_string(),
            port: port.to_string(),
        })?;
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .expect("node_ids is kept in sync")
            .ports
            .get(port)
            .ok_or_else(|| ConfigError::UnknownEndpoint {
                node: node.to_string(),
                port: port.to_string(),
            })
    }
}

/// Convenience constructor for a direct-feedthrough IN/OUT port pair's
/// mask, mirroring how update-block ids are turned into masks elsewhere.
/// Returns [`ConfigError::InvalidUpdateId`] instead of panicking when a
/// caller-supplied id exceeds [`MAX_UPDATE_INDEX`].
pub fn feedthrough_mask(block_ids: impl IntoIterator<Item = u32>) -> Result<UpdateMask, ConfigError> {
    block_ids.into_iter().try_fold(0, |acc, id| {
        if id > MAX_UPDATE_INDEX {
            return Err(ConfigError::InvalidUpdateId { node: String::new(), id });
        }
        Ok(acc | mask::bit(id))
    })
}
