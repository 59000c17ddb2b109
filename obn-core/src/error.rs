//! Error taxonomy for workspace assembly, port I/O, and simulation execution.
//!
//! Errors are split between those that abort assembly before a run starts
//! ([`ConfigError`]) and those raised while a simulation is executing
//! ([`SimulationError`]). The latter are also the payload of the exception
//! events that transport threads post onto a node's main event queue: a
//! transport thread must never unwind into model code, so every fallible
//! operation it performs is converted to one of these variants and handed
//! to the main thread instead of propagated directly.

use std::fmt;

/// Errors raised while assembling a [`Workspace`](crate::workspace::Workspace)
/// or building the dependency graph, before a simulation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A port name is not a valid identifier or collides with another port
    /// on the same node.
    DuplicatePortName { node: String, port: String },
    /// An update block id exceeds [`crate::mask::MAX_UPDATE_INDEX`] or is
    /// reused within a node.
    InvalidUpdateId { node: String, id: u32 },
    /// A connection references a node or port that does not exist.
    UnknownEndpoint { node: String, port: String },
    /// A connection's source is not an OUT or DATA port, or its target is
    /// not an IN or DATA port.
    InvalidPortDirection { node: String, port: String },
    /// The two endpoints of a connection specify transports that do not
    /// match, and neither resolves to the workspace default.
    TransportMismatch { from: String, to: String },
    /// The dependency DAG induced by the connections and update masks
    /// contains a cycle.
    Cycle,
    /// A workspace setting is out of its valid range (e.g. a non-positive
    /// `time_unit`).
    InvalidSetting { setting: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicatePortName { node, port } => {
                write!(f, "duplicate port name '{port}' on node '{node}'")
            }
            Self::InvalidUpdateId { node, id } => {
                write!(f, "invalid update id {id} on node '{node}'")
            }
            Self::UnknownEndpoint { node, port } => {
                write!(f, "unknown endpoint '{node}/{port}'")
            }
            Self::InvalidPortDirection { node, port } => {
                write!(f, "invalid direction for port '{node}/{port}' in connection")
            }
            Self::TransportMismatch { from, to } => {
                write!(f, "transport mismatch between '{from}' and '{to}'")
            }
            Self::Cycle => write!(f, "the dependency graph contains a cycle"),
            Self::InvalidSetting { setting, reason } => {
                write!(f, "invalid workspace setting '{setting}': {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors raised by an input port while decoding or validating an incoming
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPortError {
    /// The raw bytes could not be decoded with the port's wire codec.
    RawMsg(String),
    /// The decoded value does not match the port's declared shape (e.g. a
    /// matrix with a mismatched element count, or a vector where a scalar
    /// was expected).
    ReadValue(String),
}

impl fmt::Display for InputPortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RawMsg(msg) => write!(f, "ERR_RAWMSG: {msg}"),
            Self::ReadValue(msg) => write!(f, "ERR_READVALUE: {msg}"),
        }
    }
}

impl std::error::Error for InputPortError {}

/// Errors raised by an output port while encoding or sending a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPortError {
    /// The current value could not be encoded with the port's wire codec.
    EncodeValue(String),
    /// The transport failed to deliver the encoded message.
    SendMsg(String),
}

impl fmt::Display for OutputPortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeValue(msg) => write!(f, "ERR_ENCODEVALUE: {msg}"),
            Self::SendMsg(msg) => write!(f, "ERR_SENDMSG: {msg}"),
        }
    }
}

impl std::error::Error for OutputPortError {}

/// A transport-level failure, surfaced from a transport thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Identifier of the transport endpoint that failed.
    pub transport_id: String,
    /// Human-readable detail.
    pub detail: String,
    /// Whether the loss is permanent (the core reacts by initiating
    /// shutdown) or a transient send failure.
    pub permanent: bool,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transport '{}' {}: {}",
            self.transport_id,
            if self.permanent { "lost" } else { "send failed" },
            self.detail
        )
    }
}

impl std::error::Error for TransportError {}

/// An unexpected message type or protocol state was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    /// Node id that raised the error, if known.
    pub node: Option<String>,
    /// Human-readable detail.
    pub detail: String,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "protocol error on node '{node}': {}", self.detail),
            None => write!(f, "protocol error: {}", self.detail),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// A node failed to acknowledge an `UPDATE_Y`/`UPDATE_X` request within
/// `ack_timeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckTimeoutError {
    /// Name of the node that timed out.
    pub node: String,
    /// Simulation time of the tick being acknowledged.
    pub time: crate::time::Ticks,
}

impl fmt::Display for AckTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node '{}' failed to acknowledge update at t={}",
            self.node, self.time
        )
    }
}

impl std::error::Error for AckTimeoutError {}

/// Any error that can occur while a simulation is running, as opposed to
/// during assembly. This is the payload type for exception events posted
/// onto a node's main queue, and for the GC's own failure path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    /// See [`InputPortError`].
    InputPort(InputPortError),
    /// See [`OutputPortError`].
    OutputPort(OutputPortError),
    /// See [`TransportError`].
    Transport(TransportError),
    /// See [`ProtocolError`].
    Protocol(ProtocolError),
    /// See [`AckTimeoutError`].
    AckTimeout(AckTimeoutError),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputPort(e) => e.fmt(f),
            Self::OutputPort(e) => e.fmt(f),
            Self::Transport(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::AckTimeout(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for SimulationError {}

impl From<InputPortError> for SimulationError {
    fn from(e: InputPortError) -> Self {
        Self::InputPort(e)
    }
}

impl From<OutputPortError> for SimulationError {
    fn from(e: OutputPortError) -> Self {
        Self::OutputPort(e)
    }
}

impl From<TransportError> for SimulationError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for SimulationError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<AckTimeoutError> for SimulationError {
    fn from(e: AckTimeoutError) -> Self {
        Self::AckTimeout(e)
    }
}

/// Returned by a node's future-update request when the requested time is
/// not strictly in the future (`t <= T_cur`). Non-fatal: the caller
/// receives this as a negative numeric code, matching the original
/// `N2SMN_SIM_EVENT` rejection semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestInvalidError;

impl fmt::Display for RequestInvalidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request-invalid: requested time is not in the future")
    }
}

impl std::error::Error for RequestInvalidError {}
