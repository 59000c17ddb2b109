//! The context handed to an update-block callback while it runs.

use std::time::Duration;

use crate::error::{ProtocolError, RequestInvalidError, SimulationError};
use crate::mask::UpdateMask;
use crate::node::waitfor::{WaitForRegistry, WaitOutcome};
use crate::protocol::{MsgType, NodeId, WireMessage};
use crate::time::Ticks;
use crate::transport::Transport;

/// Per-call context for an update-block callback: the current simulated
/// time, the node's own id, and the ability to request an irregular
/// future update from the SMN.
pub struct Context<'a> {
    time: Ticks,
    node_id: NodeId,
    node_name: &'a str,
    transport: &'a dyn Transport,
    smn_send_topic: &'a str,
    waitfor: &'a WaitForRegistry,
    default_timeout: Duration,
}

/// Builds a [`Context`] from explicit, disjoint field references rather
/// than a `&self` method, so a caller already holding a mutable borrow of
/// one field of its own struct (e.g. an update-block entry) can still
/// construct a context over the rest.
pub fn build_context<'a>(
    time: Ticks,
    node_id: NodeId,
    node_name: &'a str,
    transport: &'a dyn Transport,
    smn_send_topic: &'a str,
    waitfor: &'a WaitForRegistry,
    default_timeout: Duration,
) -> Context<'a> {
    Context {
        time,
        node_id,
        node_name,
        transport,
        smn_send_topic,
        waitfor,
        default_timeout,
    }
}

impl<'a> Context<'a> {
    /// The simulated time of the update currently being processed.
    pub fn time(&self) -> Ticks {
        self.time
    }

    /// This node's numeric id, as assigned at workspace assembly.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The transport this node communicates over, for sending on output
    /// ports from inside an update-block callback.
    pub fn transport(&self) -> &dyn Transport {
        self.transport
    }

    /// Requests an irregular update at a future time `t` for the blocks
    /// in `mask`, blocking until the SMN's `SIM_EVENT_ACK` arrives or the
    /// node's default wait-for timeout elapses.
    ///
    /// Rejects `t <= self.time()` locally without contacting the SMN, per
    /// the `N2SMN_SIM_EVENT` rejection semantics (the original design's
    /// `-2` status code).
    pub fn request_future_update(&self, t: Ticks, mask: UpdateMask) -> Result<(), SimulationError> {
        if t <= self.time {
            return Err(SimulationError::Protocol(ProtocolError {
                node: Some(self.node_name.to_string()),
                detail: RequestInvalidError.to_string(),
            }));
        }

        let handle = self
            .waitfor
            .register(move |m| m.msgtype == MsgType::SimEventAck && m.t == t);

        let request = WireMessage::sim_event(self.node_id, t, mask);
        let bytes = request
            .encode()
            .map_err(|e| SimulationError::Protocol(ProtocolError {
                node: Some(self.node_name.to_string()),
                detail: e.to_string(),
            }))?;
        self.transport.send(self.smn_send_topic, &bytes)?;

        match self.waitfor.wait(handle, self.default_timeout) {
            Some(WaitOutcome::Cleared(ack)) if ack.i == 0 => Ok(()),
            Some(WaitOutcome::Cleared(ack)) => Err(SimulationError::Protocol(ProtocolError {
                node: Some(self.node_name.to_string()),
                detail: format!("SIM_EVENT rejected with status {}", ack.i),
            })),
            Some(WaitOutcome::Cancelled) => Err(SimulationError::Protocol(ProtocolError {
                node: Some(self.node_name.to_string()),
                detail: "SIM_EVENT cancelled by TERM before it was acknowledged".to_string(),
            })),
            None => Err(SimulationError::AckTimeout(crate::error::AckTimeoutError {
                node: self.node_name.to_string(),
                time: t,
            })),
        }
    }
}
