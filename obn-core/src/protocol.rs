//! The wire protocol exchanged between nodes and the SMN.
//!
//! Every message carries the originating node's numeric id (assigned at
//! workspace assembly) and a `msgtype` tag; see §4.6 and §6. Encoding uses
//! the same tag-value (CBOR) codec as port payloads — [`WireMessage`]
//! mirrors exactly the schema's fixed field set (`t`, `i`, `msgtype`,
//! `id`, `data`).

use serde::{Deserialize, Serialize};

use crate::mask::UpdateMask;
use crate::time::Ticks;

/// Numeric id assigned to a node at workspace-assembly time (insertion
/// order), used to populate every message's `id` field.
pub type NodeId = u32;

/// The logical content of a message, independent of its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgType {
    /// SMN → N: simulation initialization.
    Init,
    /// N → SMN: acknowledges [`MsgType::Init`], with an optional status code.
    InitAck,
    /// SMN → N: requests the `Y` (output) computation for the given
    /// update mask at the given time.
    UpdateY,
    /// N → SMN: acknowledges [`MsgType::UpdateY`], with a status code.
    SimYAck,
    /// SMN → N: requests the `X` (state) computation for the given
    /// update mask at the given time.
    UpdateX,
    /// N → SMN: acknowledges [`MsgType::UpdateX`], with a status code.
    SimXAck,
    /// N → SMN: requests an irregular future update.
    SimEvent,
    /// SMN → N: acknowledges [`MsgType::SimEvent`]; `i == 0` means accepted.
    SimEventAck,
    /// SMN → N: terminates the simulation, with a reason code.
    Term,
}

/// A message on the wire: the exact field set assumed fixed by the
/// external schema (`t: int64`, `i: int64`, `msgtype: enum`, `id: int32`,
/// `data: optional message`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message type tag.
    pub msgtype: MsgType,
    /// Originating node's numeric id.
    pub id: NodeId,
    /// Simulation time field, used by `UPDATE_Y`/`UPDATE_X` (the tick
    /// being requested) and by `SIM_EVENT`/`SIM_EVENT_ACK` (the
    /// requested/echoed time, used for ACK correlation).
    pub t: Ticks,
    /// Status/error code field: `I` in the original design. Semantics
    /// depend on `msgtype` (ack status, term reason, event-accept flag).
    pub i: i64,
    /// The update mask, for `UPDATE_Y`/`UPDATE_X`/`SIM_EVENT`.
    pub mask: UpdateMask,
}

impl WireMessage {
    /// Builds a `SMN2N_INIT` message.
    pub fn init(id: NodeId) -> Self {
        Self {
            msgtype: MsgType::Init,
            id,
            t: 0,
            i: 0,
            mask: 0,
        }
    }

    /// Builds an `N2SMN_INIT_ACK` message.
    pub fn init_ack(id: NodeId, status: i64) -> Self {
        Self {
            msgtype: MsgType::InitAck,
            id,
            t: 0,
            i: status,
            mask: 0,
        }
    }

    /// Builds a `SMN2N_UPDATE_Y` message.
    pub fn update_y(id: NodeId, t: Ticks, mask: UpdateMask) -> Self {
        Self {
            msgtype: MsgType::UpdateY,
            id,
            t,
            i: 0,
            mask,
        }
    }

    /// Builds an `N2SMN_SIM_Y_ACK` message.
    pub fn sim_y_ack(id: NodeId, t: Ticks, status: i64) -> Self {
        Self {
            msgtype: MsgType::SimYAck,
            id,
            t,
            i: status,
            mask: 0,
        }
    }

    /// Builds a `SMN2N_UPDATE_X` message.
    pub fn update_x(id: NodeId, t: Ticks, mask: UpdateMask) -> Self {
        Self {
            msgtype: MsgType::UpdateX,
            id,
            t,
            i: 0,
            mask,
        }
    }

    /// Builds an `N2SMN_SIM_X_ACK` message.
    pub fn sim_x_ack(id: NodeId, t: Ticks, status: i64) -> Self {
        Self {
            msgtype: MsgType::SimXAck,
            id,
            t,
            i: status,
            mask: 0,
        }
    }

    /// Builds an `N2SMN_SIM_EVENT` (irregular future update) request.
    pub fn sim_event(id: NodeId, t: Ticks, mask: UpdateMask) -> Self {
        Self {
            msgtype: MsgType::SimEvent,
            id,
            t,
            i: 0,
            mask,
        }
    }

    /// Builds a `SMN2N_SIM_EVENT_ACK`. Correlation with the original
    /// request is by the echoed `t` field; `status == 0` means accepted.
    pub fn sim_event_ack(id: NodeId, t: Ticks, status: i64) -> Self {
        Self {
            msgtype: MsgType::SimEventAck,
            id,
            t,
            i: status,
            mask: 0,
        }
    }

    /// Builds a `SMN2N_TERM` message with a reason code.
    pub fn term(id: NodeId, reason: i64) -> Self {
        Self {
            msgtype: MsgType::Term,
            id,
            t: 0,
            i: reason,
            mask: 0,
        }
    }

    /// Encodes this message with the tag-value (CBOR) wire codec.
    pub fn encode(&self) -> Result<Vec<u8>, ciborium::ser::Error<std::io::Error>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)?;
        Ok(buf)
    }

    /// Decodes a message previously produced by [`WireMessage::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ciborium::de::Error<std::io::Error>> {
        ciborium::from_reader(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_round_trips() {
        let msg = WireMessage::update_y(3, 1_000, 0b101);
        let bytes = msg.encode().unwrap();
        assert_eq!(WireMessage::decode(&bytes).unwrap(), msg);
    }
}
