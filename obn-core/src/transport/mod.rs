//! Transport abstraction: a publish/subscribe-style bidirectional message
//! channel between the SMN and each node.
//!
//! A transport offers (i) opening a named endpoint, (ii) sending a
//! byte-string to a named peer endpoint, (iii) subscribing a delivery
//! callback that is invoked on a transport-owned thread with the received
//! bytes. Delivery is assumed best-effort but ordered per
//! (source, destination) pair; an unrecoverable connection loss is
//! surfaced through the callback registered with [`Transport::on_loss`]
//! rather than by a return value, since it is detected asynchronously.
//!
//! Two concrete transports ship with this crate: [`mock::ChannelTransport`]
//! (always available, used for in-process testing and dry assembly) and,
//! behind cargo features, a broker-based MQTT transport and a direct
//! point-to-point TCP transport — the two variants named by §4.1.

pub mod mock;
#[cfg(feature = "mqtt")]
pub mod mqtt;
#[cfg(feature = "tcp-direct")]
pub mod tcp;

use crate::error::TransportError;

/// Callback invoked on a transport-owned thread with the raw bytes of a
/// delivered message.
pub type DeliveryCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Callback invoked when a transport endpoint suffers a permanent,
/// unrecoverable loss of connectivity.
pub type LossCallback = Box<dyn Fn() + Send + Sync>;

/// A named addressing scheme for ports: `workspace/node/port`.
///
/// On broker transports this is used directly as a topic name; on direct
/// transports it doubles as an endpoint identifier with a leading `/`
/// separator (see [`PortAddress::endpoint_id`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortAddress {
    workspace: String,
    node: String,
    port: String,
}

impl PortAddress {
    /// Builds a port address from its three components.
    pub fn new(workspace: impl Into<String>, node: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            node: node.into(),
            port: port.into(),
        }
    }

    /// Returns the broker topic name `workspace/node/port`.
    pub fn topic(&self) -> String {
        format!("{}/{}/{}", self.workspace, self.node, self.port)
    }

    /// Returns the direct-transport endpoint identifier `/workspace/node/port`.
    pub fn endpoint_id(&self) -> String {
        format!("/{}/{}/{}", self.workspace, self.node, self.port)
    }
}

/// Returns the topic on which a node receives control messages from the
/// SMN: `workspace/_smn_/<node>`.
pub fn smn_to_node_topic(workspace: &str, node: &str) -> String {
    format!("{workspace}/_smn_/{node}")
}

/// Returns the topic on which the SMN receives control messages from a
/// node: `workspace/<node>/_gc_`.
pub fn node_to_smn_topic(workspace: &str, node: &str) -> String {
    format!("{workspace}/{node}/_gc_")
}

/// A bidirectional, best-effort message transport.
///
/// Implementors must guarantee in-order delivery for messages sent
/// between the same ordered pair of endpoints, and must invoke delivery
/// callbacks on a transport-owned thread distinct from the caller of
/// [`Transport::send`], so the core's single-threaded node/GC event loops
/// are never re-entered from within `send`.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// A human-readable identifier for this transport endpoint, used in
    /// `permanent-loss` diagnostics.
    fn id(&self) -> &str;

    /// Opens a named local endpoint. Must be called before [`subscribe`](Transport::subscribe)
    /// or [`send`](Transport::send) target it.
    fn open(&self, endpoint: &str) -> Result<(), TransportError>;

    /// Sends `bytes` to the named peer endpoint.
    fn send(&self, endpoint: &str, bytes: &[u8]) -> Result<(), TransportError>;

    /// Subscribes `callback` to receive every message delivered to
    /// `endpoint`, invoked on a transport-owned thread.
    fn subscribe(&self, endpoint: &str, callback: DeliveryCallback) -> Result<(), TransportError>;

    /// Registers the callback invoked on permanent loss of connectivity.
    fn on_loss(&self, callback: LossCallback);
}
