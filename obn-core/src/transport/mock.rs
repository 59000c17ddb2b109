//! An in-process, broker-style transport used for testing and for dry
//! assembly (`run_simulation = false`).
//!
//! [`ChannelBroker`] plays the role of the pub/sub broker named in §4.1:
//! every [`ChannelTransport`] handle sharing the same broker can reach
//! every other endpoint registered on it. Each subscribed endpoint is
//! served by its own dedicated thread draining a `crossbeam_channel`, so
//! delivery callbacks genuinely run off the caller's thread, matching the
//! "transport-owned thread" contract of the [`Transport`] trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};

use crate::error::TransportError;
use crate::transport::{DeliveryCallback, LossCallback, Transport};

/// A shared in-memory broker. Construct one and hand `Arc` clones to each
/// [`ChannelTransport::new`] that should be able to reach the others.
#[derive(Default)]
pub struct ChannelBroker {
    topics: Mutex<HashMap<String, Sender<Vec<u8>>>>,
}

impl ChannelBroker {
    /// Creates an empty broker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl fmt::Debug for ChannelBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.topics.lock().unwrap().len();
        write!(f, "ChannelBroker({n} endpoints)")
    }
}

/// An in-process transport endpoint backed by a [`ChannelBroker`].
pub struct ChannelTransport {
    id: String,
    broker: Arc<ChannelBroker>,
    loss: Mutex<Option<LossCallback>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelTransport {
    /// Creates a new endpoint identified by `id`, attached to `broker`.
    pub fn new(id: impl Into<String>, broker: Arc<ChannelBroker>) -> Self {
        Self {
            id: id.into(),
            broker,
            loss: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Simulates a permanent loss of connectivity, invoking the
    /// registered loss callback if any.
    pub fn simulate_loss(&self) {
        if let Some(cb) = self.loss.lock().unwrap().as_ref() {
            cb();
        }
    }
}

impl fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelTransport").field("id", &self.id).finish()
    }
}

impl Transport for ChannelTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&self, _endpoint: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn send(&self, endpoint: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let topics = self.broker.topics.lock().unwrap();
        let sender = topics.get(endpoint).ok_or_else(|| TransportError {
            transport_id: self.id.clone(),
            detail: format!("no subscriber for endpoint '{endpoint}'"),
            permanent: false,
        })?;
        sender.send(bytes.to_vec()).map_err(|e| TransportError {
            transport_id: self.id.clone(),
            detail: e.to_string(),
            permanent: true,
        })
    }

    fn subscribe(&self, endpoint: &str, callback: DeliveryCallback) -> Result<(), TransportError> {
        let (tx, rx) = unbounded::<Vec<u8>>();
        self.broker
            .topics
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), tx);

        let handle = thread::Builder::new()
            .name(format!("obn-channel-transport-{endpoint}"))
            .spawn(move || {
                while let Ok(bytes) = rx.recv() {
                    callback(&bytes);
                }
            })
            .map_err(|e| TransportError {
                transport_id: endpoint.to_string(),
                detail: e.to_string(),
                permanent: true,
            })?;

        self.threads.lock().unwrap().push(handle);
        Ok(())
    }

    fn on_loss(&self, callback: LossCallback) {
        *self.loss.lock().unwrap() = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn delivers_between_two_endpoints() {
        let broker = ChannelBroker::new();
        let a = ChannelTransport::new("a", broker.clone());
        let b = ChannelTransport::new("b", broker.clone());

        let received = Arc::new(AtomicBool::new(false));
        let received2 = received.clone();
        b.subscribe(
            "topic",
            Box::new(move |bytes| {
                assert_eq!(bytes, b"hello");
                received2.store(true, Ordering::SeqCst);
            }),
        )
        .unwrap();

        a.send("topic", b"hello").unwrap();

        for _ in 0..100 {
            if received.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(received.load(Ordering::SeqCst));
    }

    #[test]
    fn send_without_subscriber_errors() {
        let broker = ChannelBroker::new();
        let a = ChannelTransport::new("a", broker);
        assert!(a.send("nowhere", b"x").is_err());
    }
}
