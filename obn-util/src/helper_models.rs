//! Helper node models.
//!
//! This module contains small, ready-made node models useful for
//! assembling test or demo workspaces quickly.

use obn_core::node::{Context, NodeBuilder, NodeRuntime};
use obn_core::port::Output;
use obn_core::protocol::NodeId;
use obn_core::transport::Transport;
use std::sync::Arc;

/// A heartbeat node.
///
/// Counts the update-block-0 ticks it has been driven through and
/// writes the count to its single output port `count`. Useful as a
/// liveness node to keep a workspace non-empty while exercising the GC
/// tick loop in isolation, without modeling any real process.
pub struct Ticker {
    count: u64,
    output: Output<u64>,
}

impl Ticker {
    /// Creates a new, zeroed ticker.
    pub fn new() -> Self {
        Self {
            count: 0,
            output: Output::new(0),
        }
    }

    fn tick(&mut self, context: &mut Context<'_>) {
        self.count += 1;
        self.output.set(self.count);
        let _ = context; // the tick count alone does not need the context
    }

    /// Builds a runtime around a [`Ticker`], with update block `0`
    /// registered as its `Y` computation.
    pub fn build_node(
        workspace: &str,
        name: impl Into<String>,
        node_id: NodeId,
        transport: Arc<dyn Transport>,
    ) -> NodeRuntime<Self> {
        NodeBuilder::new(workspace, name, node_id, transport, Self::new())
            .add_update_y(0, |m: &mut Self, ctx: &mut Context<'_>| m.tick(ctx))
            .build()
    }

    /// The output port, for wiring into a [`obn_core::workspace::Workspace`]
    /// port declaration (its mask/shape/name are the caller's choice; this
    /// model only owns the runtime value).
    pub fn output(&self) -> &Output<u64> {
        &self.output
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obn_core::transport::mock::{ChannelBroker, ChannelTransport};

    #[test]
    fn ticker_starts_at_zero() {
        let broker = ChannelBroker::new();
        let transport = Arc::new(ChannelTransport::new("a", broker));
        let node = Ticker::build_node("ws", "ticker", 0, transport);
        assert_eq!(node.time(), 0);
    }
}
