//! The node-side simulation lifecycle: event queue, wait-for conditions,
//! and dispatch to user-registered update-block callbacks (§4.3).
//!
//! A node's behavior is an ordinary Rust value (the "model") plus a set
//! of closures registered against update-block ids through
//! [`NodeBuilder`]; [`NodeRuntime::run_step`] is the sole entry point
//! driving the state machine forward one event at a time.

pub mod context;
pub mod update_fn;
pub mod waitfor;

mod runtime;

pub use context::Context;
pub use runtime::{NodeBuilder, NodeRuntime, RuntimeState, StepOutcome};
pub use update_fn::UpdateFn;
pub use waitfor::{WaitForHandle, WaitForRegistry, WaitOutcome};

/// Marker trait for node model types.
///
/// Blanket-implemented for anything `Send + 'static`; exists so node
/// model bounds read the same way across this crate's public API instead
/// of spelling out `Send + 'static` at every use site.
pub trait NodeModel: Send + 'static {}

impl<T: Send + 'static> NodeModel for T {}
