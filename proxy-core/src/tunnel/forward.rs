//! Client side of the tunnel: ingress listeners and the byte bridge

use super::agent::{AgentHandle, AgentRegistry};
use crate::filter::KeywordFilter;
use bytes::Bytes;
use proxy_common::{Message, READ_CHUNK_SIZE};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a client connection needs to reach the agent
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub registry: Arc<AgentRegistry>,
    pub agent_name: String,
    pub filter: Arc<KeywordFilter>,
    pub connect_timeout: Duration,
}

/// Accept clients on `listener` and tunnel each to `target_port` on the agent
pub async fn accept_clients(
    listener: TcpListener,
    target_port: u16,
    ctx: ForwardContext,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                info!("TCP forward request from {} to port {}", peer, target_port);
                tokio::spawn(handle_client(stream, target_port, ctx.clone()));
            }
            Err(e) => error!("Accept failed: {}", e),
        }
    }
}

async fn handle_client(client: TcpStream, target_port: u16, ctx: ForwardContext) {
    let Some(agent) = ctx.registry.get(&ctx.agent_name) else {
        error!("Client is down: {}", ctx.agent_name);
        return;
    };

    match agent.open_stream(target_port, ctx.connect_timeout).await {
        Ok((id, rx)) => bridge(client, agent, id, rx, &ctx.filter).await,
        Err(e) => warn!("Could not open stream to port {}: {}", target_port, e),
    }
}

/// Pump bytes both ways until either side finishes.
///
/// Client -> agent chunks go through the keyword filter. A client EOF or read
/// error is reported to the agent with a `CloseRequest`.
pub async fn bridge(
    client: TcpStream,
    agent: Arc<AgentHandle>,
    id: u32,
    mut from_agent: mpsc::Receiver<Bytes>,
    filter: &KeywordFilter,
) {
    let (mut reader, mut writer) = client.into_split();

    let agent_to_client = async {
        while let Some(chunk) = from_agent.recv().await {
            if let Err(e) = writer.write_all(&chunk).await {
                debug!("Agent -> Client closed: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    };

    let client_to_agent = async {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    info!("Client EOF -> CloseRequest for ID {}", id);
                    break;
                }
                Ok(n) => {
                    let mut chunk = buf[..n].to_vec();
                    let hits = filter.redact(&mut chunk);
                    if hits > 0 {
                        debug!("Redacted {} keyword(s) on stream {}", hits, id);
                    }
                    if agent.send(Message::data(id, chunk)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!("Client -> Agent closed: {}", e);
                    break;
                }
            }
        }
        let _ = agent.send(Message::close(id)).await;
    };

    tokio::select! {
        _ = agent_to_client => {}
        _ = client_to_agent => {}
    }
    agent.remove_stream(id);
}
