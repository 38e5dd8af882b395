use futures::{SinkExt, StreamExt};
use proxy_agent::TunnelAgent;
use proxy_common::{ConnectRequest, Message, TunnelCodec};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

/// Accept the agent on a fake relay and return the framed stream after the name line
async fn fake_relay() -> (Framed<TcpStream, TunnelCodec>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let agent = TunnelAgent::new(addr.to_string(), "agent".to_string());
    tokio::spawn(async move {
        let _ = agent.run().await;
    });

    let (stream, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(stream);
    let mut name = String::new();
    reader.read_line(&mut name).await.unwrap();
    // The agent sends nothing else until asked, so no buffered bytes are lost.
    (Framed::new(reader.into_inner(), TunnelCodec::new()), name)
}

async fn next_message(relay: &mut Framed<TcpStream, TunnelCodec>) -> Message {
    tokio::time::timeout(Duration::from_secs(2), relay.next())
        .await
        .expect("timed out waiting for frame")
        .expect("agent hung up")
        .expect("decode failed")
}

/// Upstream that echoes everything back, upper-cased, then closes after one read
async fn upper_echo_once() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        stream
            .write_all(&buf[..n].to_ascii_uppercase())
            .await
            .unwrap();
    });
    port
}

#[tokio::test]
async fn test_agent_announces_name() {
    let (_relay, name) = fake_relay().await;
    assert_eq!(name, "agent\n");
}

#[tokio::test]
async fn test_connect_data_and_upstream_close() {
    let (mut relay, _) = fake_relay().await;
    let port = upper_echo_once().await;

    relay
        .send(Message::ConnectRequest(ConnectRequest::loopback(port, 1234)))
        .await
        .unwrap();
    let id = match next_message(&mut relay).await {
        Message::ConnectResponse(resp) => {
            assert!(resp.ok);
            assert_ne!(resp.id, 0);
            resp.id
        }
        other => panic!("expected ConnectResponse, got {:?}", other),
    };

    relay.send(Message::data(id, b"hello".to_vec())).await.unwrap();
    assert_eq!(next_message(&mut relay).await, Message::data(id, b"HELLO".to_vec()));

    // Upstream hung up after answering.
    assert_eq!(next_message(&mut relay).await, Message::close(id));
}

#[tokio::test]
async fn test_connect_failure_is_refused() {
    let (mut relay, _) = fake_relay().await;
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);

    relay
        .send(Message::ConnectRequest(ConnectRequest::loopback(port, 1)))
        .await
        .unwrap();
    assert_eq!(
        next_message(&mut relay).await,
        Message::connect_response(false, 0)
    );
}

#[tokio::test]
async fn test_bad_address_is_refused() {
    let (mut relay, _) = fake_relay().await;
    relay
        .send(Message::ConnectRequest(ConnectRequest {
            ip: vec![1, 2, 3],
            port: 80,
            id: 1,
        }))
        .await
        .unwrap();
    assert_eq!(
        next_message(&mut relay).await,
        Message::connect_response(false, 0)
    );
}

#[tokio::test]
async fn test_relay_close_stops_upstream() {
    let (mut relay, _) = fake_relay().await;

    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = upstream.local_addr().unwrap().port();
    relay
        .send(Message::ConnectRequest(ConnectRequest::loopback(port, 9)))
        .await
        .unwrap();
    let (mut upstream_conn, _) = upstream.accept().await.unwrap();
    let id = match next_message(&mut relay).await {
        Message::ConnectResponse(resp) => resp.id,
        other => panic!("expected ConnectResponse, got {:?}", other),
    };

    relay.send(Message::close(id)).await.unwrap();
    let mut rest = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(2), upstream_conn.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    // Unknown IDs are ignored and the session stays up.
    relay.send(Message::data(id, b"late".to_vec())).await.unwrap();
    relay.send(Message::Ping(Default::default())).await.unwrap();
    let port = upper_echo_once().await;
    relay
        .send(Message::ConnectRequest(ConnectRequest::loopback(port, 10)))
        .await
        .unwrap();
    assert!(matches!(
        next_message(&mut relay).await,
        Message::ConnectResponse(resp) if resp.ok
    ));
}
