//! The typed port layer: encode/decode of scalar, vector, matrix and
//! user-blob payloads, and per-port locking/pending-value semantics.
//!
//! See [`codec`] for the [`codec::PortData`] trait that every port value
//! type implements, [`output`] for the single-threaded [`Output`] port,
//! and [`input`] for the dual-thread [`NonStrictInput`]/[`StrictInput`]
//! ports.

pub mod codec;
pub mod input;
pub mod matrix;
pub mod output;

pub use codec::{Bytes, Elem, PortData, PortShape, UserMessage};
pub use input::{NonStrictGuard, NonStrictInput, StrictInput};
pub use matrix::Matrix;
pub use output::Output;

/// The three port directions of the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Written by the owning node, read by peers.
    In,
    /// Written by peers, read by the owning node.
    Out,
    /// Both written and read across the connection (bidirectional data port).
    Data,
}

/// Static metadata describing one of a node's ports, independent of its
/// concrete Rust type. Used by the dependency graph, the protocol layer,
/// and workspace validation, none of which need to know a port's element
/// type.
#[derive(Debug, Clone)]
pub struct PortMeta {
    /// Port name, unique within its node across all three port sets.
    pub name: String,
    /// Port direction.
    pub direction: Direction,
    /// Update mask: for OUT/DATA ports, the blocks that may write this
    /// port; for IN/DATA ports, the OR of direct-feedthrough bits.
    pub mask: crate::mask::UpdateMask,
    /// Whether an IN port is strict (queuing) rather than non-strict
    /// (overwriting). Always `false` for OUT ports.
    pub strict: bool,
    /// The container shape carried by this port's values.
    pub shape: PortShape,
    /// Name of the transport this port uses, or `None` to mean the
    /// workspace default.
    pub transport: Option<String>,
}
