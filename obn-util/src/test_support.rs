//! Test-only re-exports for assembling multi-node scenario tests.
//!
//! Mirrors the teacher's `dev-hooks`-gated test surface: this module is
//! not feature-gated (there is no async executor internals to hide
//! here), but it exists purely to give integration tests a single,
//! short import path for the in-process mock transport.

pub use obn_core::transport::mock::{ChannelBroker, ChannelTransport};
