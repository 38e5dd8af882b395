use anyhow::Context;
use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::{SinkExt, StreamExt};
use proxy_common::{ConnectRequest, DataPacket, Message, TunnelCodec, READ_CHUNK_SIZE};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Frames waiting for the relay socket
const OUTBOUND_QUEUE: usize = 256;
/// Relay -> upstream chunks buffered per connection
const UPSTREAM_QUEUE: usize = 64;

/// One upstream connection opened on the relay's behalf
#[derive(Debug)]
struct Upstream {
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl Upstream {
    fn close(&self) {
        self.cancel.cancel();
    }
}

/// Shared state of one relay session
#[derive(Debug, Clone)]
struct Session {
    outbound: mpsc::Sender<Message>,
    connections: Arc<DashMap<u32, Upstream>>,
}

impl Session {
    async fn send(&self, message: Message) {
        if self.outbound.send(message).await.is_err() {
            debug!("Relay writer gone, dropping frame");
        }
    }

    /// Pick a fresh non-zero ID and register `upstream` under it
    fn register(&self, upstream: Upstream) -> u32 {
        loop {
            let id = rand::random::<u32>();
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(slot) = self.connections.entry(id) {
                slot.insert(upstream);
                return id;
            }
        }
    }

    /// Drop and close the upstream for `id`; false if it was already gone
    fn unregister(&self, id: u32) -> bool {
        match self.connections.remove(&id) {
            Some((_, upstream)) => {
                upstream.close();
                true
            }
            None => false,
        }
    }

    async fn on_connect(self, request: ConnectRequest) {
        let addr = match request.socket_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Cannot get address from ConnectRequest: {}", e);
                self.send(Message::connect_response(false, 0)).await;
                return;
            }
        };
        info!("Receive ConnectRequest for {}", addr);

        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to connect to {}: {}", addr, e);
                self.send(Message::connect_response(false, 0)).await;
                return;
            }
        };

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(UPSTREAM_QUEUE);
        let cancel = CancellationToken::new();
        let id = self.register(Upstream {
            tx,
            cancel: cancel.clone(),
        });

        // Reply before pumping so the relay knows the ID before data for it.
        self.send(Message::connect_response(true, id)).await;
        info!("Connected to {}, ID {}", addr, id);

        tokio::spawn(write_upstream(write_half, rx, cancel.clone()));
        tokio::spawn(self.pump_upstream(id, read_half, cancel));
    }

    async fn pump_upstream(self, id: u32, mut read_half: OwnedReadHalf, cancel: CancellationToken) {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return,
                read = read_half.read(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    info!("Connection closed, ID {}", id);
                    break;
                }
                Ok(n) => self.send(Message::data(id, buf[..n].to_vec())).await,
                Err(e) => {
                    info!("Connection closed, ID {}: {}", id, e);
                    break;
                }
            }
        }
        if self.unregister(id) {
            self.send(Message::close(id)).await;
        }
    }

    async fn on_data(&self, packet: DataPacket) {
        let tx = self.connections.get(&packet.id).map(|entry| entry.tx.clone());
        let Some(tx) = tx else {
            error!("No connection for ID {}", packet.id);
            return;
        };
        if tx.send(Bytes::from(packet.data)).await.is_err() {
            warn!("Write to connection failed, ID {}", packet.id);
            self.unregister(packet.id);
        }
    }

    fn on_close(&self, id: u32) {
        if self.unregister(id) {
            info!("Closing connection by request, ID {}", id);
        } else {
            error!("No connection to close for ID {}", id);
        }
    }
}

async fn write_upstream(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = rx.recv() => chunk,
        };
        let Some(chunk) = chunk else { break };
        if let Err(e) = write_half.write_all(&chunk).await {
            warn!("Write to upstream failed: {}", e);
            cancel.cancel();
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn write_relay(write_half: OwnedWriteHalf, mut outbound: mpsc::Receiver<Message>) {
    let mut sink = FramedWrite::new(write_half, TunnelCodec::new());
    while let Some(message) = outbound.recv().await {
        if let Err(e) = sink.send(message).await {
            error!("Failed to write to relay: {}", e);
            break;
        }
    }
}

/// Client side of the tunnel
#[derive(Debug, Clone)]
pub struct TunnelAgent {
    server_addr: String,
    name: String,
}

impl TunnelAgent {
    pub fn new(server_addr: String, name: String) -> Self {
        Self { server_addr, name }
    }

    /// Dial the relay and serve it until the connection ends
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut stream = TcpStream::connect(&self.server_addr)
            .await
            .with_context(|| format!("Failed to connect to {}", self.server_addr))?;
        info!("Connected to {}", self.server_addr);

        stream
            .write_all(format!("{}\n", self.name).as_bytes())
            .await
            .context("Failed to send agent name")?;
        info!("Sent name: {}", self.name);

        self.serve(stream).await
    }

    /// Serve an already registered relay connection
    pub async fn serve(&self, stream: TcpStream) -> anyhow::Result<()> {
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let writer = tokio::spawn(write_relay(write_half, outbound_rx));

        let session = Session {
            outbound: outbound_tx,
            connections: Arc::new(DashMap::new()),
        };

        let mut frames = FramedRead::new(read_half, TunnelCodec::new());
        let result = loop {
            let message = match frames.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => break Err(anyhow::Error::new(e).context("Decode failed")),
                None => break Ok(()),
            };

            match message {
                Message::ConnectRequest(request) => {
                    tokio::spawn(session.clone().on_connect(request));
                }
                Message::Data(packet) => session.on_data(packet).await,
                Message::Close(request) => session.on_close(request.id),
                Message::Ping(_) => info!("Got ping"),
                other => error!("Unknown packet {}", other.kind()),
            }
        };

        for entry in session.connections.iter() {
            entry.value().close();
        }
        session.connections.clear();
        drop(session);
        writer.abort();
        result
    }
}
