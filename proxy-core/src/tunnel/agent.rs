//! Registered agents and the per-agent session loop

use crate::controller::{ConnectController, ConnectOutcome};
use crate::error::ProxyError;
use crate::Result;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use proxy_common::{ConnectRequest, ConnectResponse, DataPacket, Message, PingRequest, TunnelCodec};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Frames queued for the agent socket before senders start waiting
const OUTBOUND_QUEUE: usize = 256;
/// Chunks buffered per stream on the agent -> client side
const STREAM_QUEUE: usize = 64;

/// One live agent connection
#[derive(Debug)]
pub struct AgentHandle {
    name: String,
    generation: u64,
    outbound: mpsc::Sender<Message>,
    streams: DashMap<u32, mpsc::Sender<Bytes>>,
    connects: ConnectController,
    closed: CancellationToken,
}

impl AgentHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of client streams currently bridged through this agent
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Queue a frame for the agent socket
    pub async fn send(&self, message: Message) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| ProxyError::AgentUnavailable(self.name.clone()))
    }

    /// Ask the agent to dial `127.0.0.1:port` and wait for its answer.
    ///
    /// Returns the agent-assigned stream id and the receiver that carries the
    /// upstream bytes for it.
    ///
    /// At most one `ConnectRequest` is ever in flight per agent. When the
    /// caller times out, the handshake slot stays taken until the agent's
    /// answer to that request arrives; an accepted stream is then closed
    /// again, so a late answer can never reach the next caller.
    pub async fn open_stream(
        self: &Arc<Self>,
        port: u16,
        timeout: Duration,
    ) -> Result<(u32, mpsc::Receiver<Bytes>)> {
        let turn = self.connects.serialize().await;
        let mut response = self.connects.register();

        let request = ConnectRequest::loopback(port, rand::random::<u32>());
        debug!("Sending ConnectRequest {} for port {}", request.id, port);
        self.send(Message::ConnectRequest(request)).await?;

        match tokio::time::timeout(timeout, &mut response).await {
            Ok(Ok(ConnectOutcome::Accepted { id, rx })) => {
                info!("Got connection from agent, ID {}", id);
                Ok((id, rx))
            }
            Ok(Ok(ConnectOutcome::Refused)) => Err(ProxyError::ConnectRefused { port }),
            Ok(Err(_)) => Err(ProxyError::AgentUnavailable(self.name.clone())),
            Err(_) => {
                let agent = Arc::clone(self);
                tokio::spawn(async move {
                    let _turn = turn;
                    let outcome = tokio::select! {
                        _ = agent.closed.cancelled() => return,
                        outcome = response => outcome,
                    };
                    if let Ok(ConnectOutcome::Accepted { id, .. }) = outcome {
                        warn!("Late ConnectResponse for ID {}, closing it", id);
                        agent.remove_stream(id);
                        let _ = agent.send(Message::close(id)).await;
                    }
                });
                Err(ProxyError::ConnectTimeout { port })
            }
        }
    }

    /// Forget a stream; any pending agent -> client data for it is dropped
    pub fn remove_stream(&self, id: u32) {
        self.streams.remove(&id);
    }

    async fn on_connect_response(&self, response: ConnectResponse) {
        if !response.ok {
            warn!("Agent refused connection");
            let _ = self.connects.resolve(ConnectOutcome::Refused);
            return;
        }

        // Registered before the waiter wakes so data racing the handshake is kept.
        let (tx, rx) = mpsc::channel(STREAM_QUEUE);
        self.streams.insert(response.id, tx);
        let outcome = ConnectOutcome::Accepted {
            id: response.id,
            rx,
        };
        if self.connects.resolve(outcome).is_err() {
            warn!("Late ConnectResponse for ID {}, closing it", response.id);
            self.streams.remove(&response.id);
            let _ = self.send(Message::close(response.id)).await;
        }
    }

    async fn on_data(&self, packet: DataPacket) {
        let sender = self.streams.get(&packet.id).map(|entry| entry.value().clone());
        match sender {
            Some(tx) => {
                if tx.send(Bytes::from(packet.data)).await.is_err() {
                    self.streams.remove(&packet.id);
                }
            }
            None => warn!("No handler for DataPacket, ID {}", packet.id),
        }
    }

    fn on_close(&self, id: u32) {
        if self.streams.remove(&id).is_none() {
            warn!("No handler for CloseRequest, ID {}", id);
        } else {
            debug!("Got CloseRequest from agent for ID {}", id);
        }
    }

    fn shutdown(&self) {
        self.closed.cancel();
        self.connects.cancel();
        self.streams.clear();
    }
}

/// Agents by name. A new registration under a name replaces (and closes) the
/// previous one.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: DashMap<String, Arc<AgentHandle>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl AgentRegistry {
    /// Every session registered here ends when `shutdown` is cancelled
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            agents: DashMap::new(),
            generation: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn register(&self, name: &str, outbound: mpsc::Sender<Message>) -> Arc<AgentHandle> {
        let handle = Arc::new(AgentHandle {
            name: name.to_string(),
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
            outbound,
            streams: DashMap::new(),
            connects: ConnectController::new(),
            closed: self.shutdown.child_token(),
        });

        if let Some(previous) = self.agents.insert(name.to_string(), handle.clone()) {
            info!("Replacing existing connection for agent {}", name);
            previous.shutdown();
        }
        handle
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentHandle>> {
        self.agents.get(name).map(|entry| entry.value().clone())
    }

    /// Remove `handle` unless a newer registration already took its place
    pub fn remove(&self, handle: &AgentHandle) {
        self.agents
            .remove_if(&handle.name, |_, current| current.generation == handle.generation);
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Drive a registered agent connection until it drops or is replaced
pub async fn run_session(
    registry: Arc<AgentRegistry>,
    stream: TcpStream,
    name: String,
    ping_interval: Option<Duration>,
) {
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let handle = registry.register(&name, outbound_tx);
    info!("Connection is now alive with agent {}", name);

    let writer = tokio::spawn(write_loop(write_half, outbound_rx, handle.closed.clone()));
    if let Some(interval) = ping_interval {
        tokio::spawn(ping_loop(handle.clone(), interval));
    }

    read_loop(&handle, FramedRead::new(read_half, TunnelCodec::new())).await;

    handle.shutdown();
    registry.remove(&handle);
    let _ = writer.await;
    info!("Connection is closed and removed for agent {}", name);
}

async fn read_loop(handle: &AgentHandle, mut frames: FramedRead<OwnedReadHalf, TunnelCodec>) {
    loop {
        let frame = tokio::select! {
            _ = handle.closed.cancelled() => return,
            frame = frames.next() => frame,
        };

        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                error!("AgentConn decode failed: {}", e);
                return;
            }
            None => return,
        };

        match message {
            Message::ConnectResponse(response) => handle.on_connect_response(response).await,
            Message::Data(packet) => handle.on_data(packet).await,
            Message::Close(request) => handle.on_close(request.id),
            other => warn!("Unexpected packet type from agent: {}", other.kind()),
        }
    }
}

async fn write_loop(
    write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Message>,
    closed: CancellationToken,
) {
    let mut sink = FramedWrite::new(write_half, TunnelCodec::new());
    loop {
        let message = tokio::select! {
            _ = closed.cancelled() => break,
            message = outbound.recv() => message,
        };
        let Some(message) = message else { break };
        if let Err(e) = sink.send(message).await {
            error!("Failed to write to agent: {}", e);
            closed.cancel();
            break;
        }
    }
    let _ = sink.close().await;
}

async fn ping_loop(handle: Arc<AgentHandle>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = handle.closed.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = handle.send(Message::Ping(PingRequest {})).await {
                    error!("Failed to send PingRequest: {}", e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_replaces_previous() {
        let registry = AgentRegistry::default();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);

        let first = registry.register("agent", tx1);
        let second = registry.register("agent", tx2);
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.len(), 1);

        // The replaced session's cleanup must not evict its successor.
        registry.remove(&first);
        assert!(registry.get("agent").is_some());
        registry.remove(&second);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_shutdown_closes_agents() {
        let token = CancellationToken::new();
        let registry = AgentRegistry::new(token.clone());
        let (tx, _rx) = mpsc::channel(1);
        let handle = registry.register("agent", tx);
        token.cancel();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_open_stream_accepted() {
        let registry = AgentRegistry::default();
        let (tx, mut outbound) = mpsc::channel(4);
        let handle = registry.register("agent", tx);

        let opener = handle.clone();
        let pending = tokio::spawn(async move { opener.open_stream(1337, Duration::from_secs(5)).await });

        match outbound.recv().await.unwrap() {
            Message::ConnectRequest(req) => {
                assert_eq!(req.ip, vec![127, 0, 0, 1]);
                assert_eq!(req.port, 1337);
            }
            other => panic!("unexpected {:?}", other),
        }
        handle
            .on_connect_response(ConnectResponse { ok: true, id: 99 })
            .await;
        handle
            .on_data(DataPacket {
                id: 99,
                data: b"hello".to_vec(),
            })
            .await;

        let (id, mut rx) = pending.await.unwrap().unwrap();
        assert_eq!(id, 99);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));

        handle.on_close(99);
        assert!(rx.recv().await.is_none());
        assert_eq!(handle.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_open_stream_refused() {
        let registry = AgentRegistry::default();
        let (tx, mut outbound) = mpsc::channel(4);
        let handle = registry.register("agent", tx);

        let opener = handle.clone();
        let pending = tokio::spawn(async move { opener.open_stream(22, Duration::from_secs(5)).await });
        outbound.recv().await.unwrap();
        handle
            .on_connect_response(ConnectResponse { ok: false, id: 0 })
            .await;

        assert!(matches!(
            pending.await.unwrap(),
            Err(ProxyError::ConnectRefused { port: 22 })
        ));
    }

    #[tokio::test]
    async fn test_open_stream_timeout_then_late_response() {
        let registry = AgentRegistry::default();
        let (tx, mut outbound) = mpsc::channel(4);
        let handle = registry.register("agent", tx);

        let result = handle.open_stream(1337, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ProxyError::ConnectTimeout { port: 1337 })));
        outbound.recv().await.unwrap();

        handle
            .on_connect_response(ConnectResponse { ok: true, id: 5 })
            .await;
        assert_eq!(outbound.recv().await.unwrap(), Message::close(5));
        assert_eq!(handle.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_late_response_never_reaches_next_client() {
        let registry = AgentRegistry::default();
        let (tx, mut outbound) = mpsc::channel(4);
        let handle = registry.register("agent", tx);

        let first = handle.open_stream(1337, Duration::from_millis(20)).await;
        assert!(matches!(first, Err(ProxyError::ConnectTimeout { port: 1337 })));
        match outbound.recv().await.unwrap() {
            Message::ConnectRequest(req) => assert_eq!(req.port, 1337),
            other => panic!("unexpected {:?}", other),
        }

        let opener = handle.clone();
        let second =
            tokio::spawn(async move { opener.open_stream(3000, Duration::from_secs(5)).await });

        // The second request waits until the first one is answered.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(outbound.try_recv().is_err());

        handle
            .on_connect_response(ConnectResponse { ok: true, id: 111 })
            .await;
        assert_eq!(outbound.recv().await.unwrap(), Message::close(111));
        match outbound.recv().await.unwrap() {
            Message::ConnectRequest(req) => assert_eq!(req.port, 3000),
            other => panic!("unexpected {:?}", other),
        }

        handle
            .on_connect_response(ConnectResponse { ok: true, id: 222 })
            .await;
        let (id, _rx) = second.await.unwrap().unwrap();
        assert_eq!(id, 222);
        assert_eq!(handle.stream_count(), 1);
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_refusal_releases_handshake() {
        let registry = AgentRegistry::default();
        let (tx, mut outbound) = mpsc::channel(4);
        let handle = registry.register("agent", tx);

        assert!(handle.open_stream(80, Duration::from_millis(20)).await.is_err());
        outbound.recv().await.unwrap();
        handle
            .on_connect_response(ConnectResponse { ok: false, id: 0 })
            .await;

        let opener = handle.clone();
        let next = tokio::spawn(async move { opener.open_stream(81, Duration::from_secs(5)).await });
        match outbound.recv().await.unwrap() {
            Message::ConnectRequest(req) => assert_eq!(req.port, 81),
            other => panic!("unexpected {:?}", other),
        }
        handle
            .on_connect_response(ConnectResponse { ok: true, id: 9 })
            .await;
        assert_eq!(next.await.unwrap().unwrap().0, 9);
    }
}
