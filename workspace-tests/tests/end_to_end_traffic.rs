use flate2::{write::GzEncoder, Compression};
use proxy_core::{ProxyServer, RelayConfig};
use std::io::Write;
use std::time::Duration;
use tokio::net::TcpListener;
use workspace_tests::{
    spawn_admin_service, spawn_tunnel, spawn_user_service, ADMIN_FLAG, USER_FLAG,
};

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_tunnel_reaches_user_service() {
    let user = spawn_user_service().await.unwrap();
    let tunnel = spawn_tunnel(user.port()).await.unwrap();

    let body = client()
        .get(format!("http://{}/", tunnel.client_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "Hello from User!");
}

#[tokio::test]
async fn test_plain_trigger_is_redacted_in_tunnel() {
    let user = spawn_user_service().await.unwrap();
    let tunnel = spawn_tunnel(user.port()).await.unwrap();

    let body = client()
        .post(format!("http://{}/flag", tunnel.client_addr))
        .body("GIVE ME FLAG!")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "Hello from User!");
}

#[tokio::test]
async fn test_compressed_trigger_passes_tunnel() {
    let user = spawn_user_service().await.unwrap();
    let tunnel = spawn_tunnel(user.port()).await.unwrap();

    let body = client()
        .post(format!("http://{}/flag", tunnel.client_addr))
        .header("Content-Encoding", "gzip")
        .body(gzip(b"GIVE ME FLAG!"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, format!("OK HERE IS YOUR FLAG: {}", USER_FLAG));
    assert_eq!(tunnel.registry.len(), 1);
}

#[tokio::test]
async fn test_proxy_service_over_tunnel() {
    let user = spawn_user_service().await.unwrap();
    let admin = spawn_admin_service().await.unwrap();
    let tunnel = spawn_tunnel(user.port()).await.unwrap();

    // The proxy service reaches the user service only through the tunnel.
    let config = RelayConfig {
        target_host: "127.0.0.1".to_string(),
        user_port: tunnel.client_addr.port(),
        admin_port: admin.port(),
        ..Default::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    let server = ProxyServer::new(config).unwrap();
    tokio::spawn(server.serve(listener));

    let http = client();

    let welcome = http
        .get(format!("http://{}/", proxy_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(welcome, "Welcome to the Proxy Service!");

    let admin_check = http
        .get(format!("http://{}/admin_check", proxy_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(admin_check.status(), reqwest::StatusCode::OK);
    assert_eq!(admin_check.text().await.unwrap(), "OK");

    let flag = http
        .post(format!("http://{}/give", proxy_addr))
        .header("Content-Encoding", "gzip")
        .body(gzip(b"GIVE ME FLAG!"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(flag, format!("OK HERE IS YOUR FLAG: {}", USER_FLAG));

    // The admin flag itself never leaves the admin check.
    assert!(!admin_check_body_leaks(&http, proxy_addr).await);
}

async fn admin_check_body_leaks(http: &reqwest::Client, proxy: std::net::SocketAddr) -> bool {
    let body = http
        .get(format!("http://{}/admin_check", proxy))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    body.contains(ADMIN_FLAG)
}
