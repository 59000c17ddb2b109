//! An MQTT broker-backed transport (§4.1's pub/sub variant), built on
//! `rumqttc`'s blocking client: a dedicated thread drains the
//! connection's event loop and dispatches each incoming `PUBLISH` to the
//! callback registered for its topic, matching the "transport-owned
//! thread" delivery contract every [`Transport`] implementation must
//! honor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};

use crate::error::TransportError;
use crate::transport::{DeliveryCallback, LossCallback, Transport};

type Callbacks = Arc<Mutex<HashMap<String, DeliveryCallback>>>;

/// A transport backed by a shared MQTT broker. Ports map onto topics
/// one-to-one: [`Transport::subscribe`]'s `endpoint` is used directly as
/// the MQTT topic filter, and [`Transport::send`] publishes at-least-once
/// with no retained flag.
pub struct MqttTransport {
    id: String,
    client: Client,
    callbacks: Callbacks,
    loss: Arc<Mutex<Option<LossCallback>>>,
    _poll_thread: thread::JoinHandle<()>,
}

impl MqttTransport {
    /// Connects to the broker at `host:port`, identifying itself as `id`.
    pub fn new(id: impl Into<String>, host: &str, port: u16) -> Self {
        let id = id.into();
        let mut options = MqttOptions::new(id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(5));
        let (client, connection) = Client::new(options, 256);

        let callbacks: Callbacks = Arc::new(Mutex::new(HashMap::new()));
        let loss: Arc<Mutex<Option<LossCallback>>> = Arc::new(Mutex::new(None));

        let poll_callbacks = callbacks.clone();
        let poll_loss = loss.clone();
        let poll_thread = thread::Builder::new()
            .name(format!("obn-mqtt-transport-{id}"))
            .spawn(move || poll_loop(connection, poll_callbacks, poll_loss))
            .expect("failed to spawn MQTT transport poll thread");

        Self {
            id,
            client,
            callbacks,
            loss,
            _poll_thread: poll_thread,
        }
    }
}

fn poll_loop(mut connection: Connection, callbacks: Callbacks, loss: Arc<Mutex<Option<LossCallback>>>) {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if let Some(cb) = callbacks.lock().unwrap().get(&publish.topic) {
                    cb(&publish.payload);
                }
            }
            Ok(_) => {}
            Err(_) => {
                if let Some(cb) = loss.lock().unwrap().as_ref() {
                    cb();
                }
                return;
            }
        }
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport").field("id", &self.id).finish()
    }
}

impl Transport for MqttTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&self, _endpoint: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn send(&self, endpoint: &str, bytes: &[u8]) -> Result<(), TransportError> {
        self.client
            .publish(endpoint, QoS::AtLeastOnce, false, bytes)
            .map_err(|e| TransportError {
                transport_id: self.id.clone(),
                detail: e.to_string(),
                permanent: false,
            })
    }

    fn subscribe(&self, endpoint: &str, callback: DeliveryCallback) -> Result<(), TransportError> {
        self.callbacks.lock().unwrap().insert(endpoint.to_string(), callback);
        self.client.subscribe(endpoint, QoS::AtLeastOnce).map_err(|e| TransportError {
            transport_id: self.id.clone(),
            detail: e.to_string(),
            permanent: false,
        })
    }

    fn on_loss(&self, callback: LossCallback) {
        *self.loss.lock().unwrap() = Some(callback);
    }
}
