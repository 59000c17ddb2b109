//! Output ports: single-threaded, owned by the node's main thread.

use crate::error::OutputPortError;
use crate::port::codec::PortData;
use crate::transport::Transport;

/// An output port.
///
/// Holds the port's current value and a `changed` flag that is set
/// whenever the value is mutated through [`Output::set`]. Per the open
/// question on masked-but-unwritten outputs, a block whose mask includes
/// this port but that does not call `set` during its `Y` computation
/// leaves the previous value in place: `changed` only reflects whether
/// *this* tick actually wrote a new value, and [`Output::send_sync`]
/// always transmits the current value regardless of `changed`, since a
/// connected strict input still needs every tick's worth of data even
/// when the value repeats.
#[derive(Debug)]
pub struct Output<T: PortData> {
    value: T,
    changed: bool,
}

impl<T: PortData + Default> Default for Output<T> {
    fn default() -> Self {
        Self {
            value: T::default(),
            changed: false,
        }
    }
}

impl<T: PortData> Output<T> {
    /// Creates an output port with an explicit initial value.
    pub fn new(initial: T) -> Self {
        Self {
            value: initial,
            changed: false,
        }
    }

    /// Returns the current value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Sets the current value and marks the port as changed.
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.changed = true;
    }

    /// Whether the value has been written since the last [`send_sync`](Output::send_sync).
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Serializes the current value and hands it synchronously to the
    /// transport, clearing the `changed` flag. Sending is synchronous:
    /// the caller observes the failure directly as a `Result`, rather
    /// than it being raised on a background thread, because this method
    /// only ever runs on the node's own main thread.
    pub fn send_sync(
        &mut self,
        transport: &dyn Transport,
        target_endpoint: &str,
    ) -> Result<(), OutputPortError> {
        let bytes = self.value.encode()?;
        transport
            .send(target_endpoint, &bytes)
            .map_err(|e| OutputPortError::SendMsg(e.detail))?;
        self.changed = false;
        Ok(())
    }
}
