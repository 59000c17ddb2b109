//! A direct, point-to-point TCP transport (§4.1's direct-wire variant):
//! one persistent connection to a single peer, with logical endpoints
//! multiplexed over it as named, length-prefixed frames rather than
//! routed through a broker.
//!
//! A frame is `[u32 name_len][name bytes][u32 payload_len][payload
//! bytes]`, all big-endian, matching the tag-value framing style used
//! elsewhere in this crate for the SMN/node wire protocol.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{DeliveryCallback, LossCallback, Transport};

type Callbacks = Arc<Mutex<HashMap<String, DeliveryCallback>>>;

/// A transport backed by one `TcpStream` to a single remote peer — the
/// typical node↔SMN star link. Reads and writes run on a dedicated
/// Tokio runtime owned by this transport; [`send`](Transport::send)
/// only enqueues onto an unbounded channel drained by the writer task,
/// so the caller is never blocked on I/O.
pub struct TcpTransport {
    id: String,
    rt: Runtime,
    outbound: mpsc::UnboundedSender<(String, Vec<u8>)>,
    callbacks: Callbacks,
    loss: Arc<Mutex<Option<LossCallback>>>,
}

impl TcpTransport {
    /// Connects to a listening peer at `addr`.
    pub fn connect(id: impl Into<String>, addr: SocketAddr) -> io::Result<Self> {
        let rt = Runtime::new()?;
        let stream = rt.block_on(TcpStream::connect(addr))?;
        Ok(Self::from_stream(id, rt, stream))
    }

    /// Accepts a single incoming connection on `addr` and uses it as the
    /// transport's one peer link.
    pub fn accept(id: impl Into<String>, addr: SocketAddr) -> io::Result<Self> {
        let rt = Runtime::new()?;
        let stream = rt.block_on(async move {
            let listener = TcpListener::bind(addr).await?;
            let (stream, _peer) = listener.accept().await?;
            Ok::<_, io::Error>(stream)
        })?;
        Ok(Self::from_stream(id, rt, stream))
    }

    fn from_stream(id: impl Into<String>, rt: Runtime, stream: TcpStream) -> Self {
        let id = id.into();
        let (read_half, write_half) = stream.into_split();
        let callbacks: Callbacks = Arc::new(Mutex::new(HashMap::new()));
        let loss: Arc<Mutex<Option<LossCallback>>> = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();

        rt.spawn(read_loop(read_half, callbacks.clone(), loss.clone()));
        rt.spawn(write_loop(write_half, rx));

        Self {
            id,
            rt,
            outbound: tx,
            callbacks,
            loss,
        }
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
    while let Some((name, payload)) = rx.recv().await {
        if write_frame(&mut write_half, &name, &payload).await.is_err() {
            return;
        }
    }
}

async fn read_loop(mut read_half: OwnedReadHalf, callbacks: Callbacks, loss: Arc<Mutex<Option<LossCallback>>>) {
    loop {
        match read_frame(&mut read_half).await {
            Ok((name, payload)) => {
                if let Some(cb) = callbacks.lock().unwrap().get(&name) {
                    cb(&payload);
                }
            }
            Err(_) => {
                if let Some(cb) = loss.lock().unwrap().as_ref() {
                    cb();
                }
                return;
            }
        }
    }
}

async fn read_frame(stream: &mut OwnedReadHalf) -> io::Result<(String, Vec<u8>)> {
    let name_len = stream.read_u32().await?;
    let mut name_buf = vec![0u8; name_len as usize];
    stream.read_exact(&mut name_buf).await?;
    let name = String::from_utf8(name_buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let payload_len = stream.read_u32().await?;
    let mut payload = vec![0u8; payload_len as usize];
    stream.read_exact(&mut payload).await?;
    Ok((name, payload))
}

async fn write_frame(stream: &mut OwnedWriteHalf, name: &str, payload: &[u8]) -> io::Result<()> {
    stream.write_u32(name.len() as u32).await?;
    stream.write_all(name.as_bytes()).await?;
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport").field("id", &self.id).finish()
    }
}

impl Transport for TcpTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&self, _endpoint: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn send(&self, endpoint: &str, bytes: &[u8]) -> Result<(), TransportError> {
        self.outbound
            .send((endpoint.to_string(), bytes.to_vec()))
            .map_err(|_| TransportError {
                transport_id: self.id.clone(),
                detail: "TCP writer task has shut down".to_string(),
                permanent: true,
            })
    }

    fn subscribe(&self, endpoint: &str, callback: DeliveryCallback) -> Result<(), TransportError> {
        self.callbacks.lock().unwrap().insert(endpoint.to_string(), callback);
        Ok(())
    }

    fn on_loss(&self, callback: LossCallback) {
        *self.loss.lock().unwrap() = Some(callback);
    }
}
