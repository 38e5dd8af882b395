use crate::{
    admin::{AdminProbe, AdminStatus},
    config::RelayConfig,
    error::ProxyError,
    Result,
};
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, on, MethodFilter},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const WELCOME_MESSAGE: &str = "Welcome to the Proxy Service!";
pub const FORWARD_FAILURE: &str = "Something went wrong";

/// Request headers never copied to the upstream request
const SKIPPED_REQUEST_HEADERS: [&str; 3] = ["host", "content-length", "transfer-encoding"];
/// Response headers never copied back to the client
const SKIPPED_RESPONSE_HEADERS: [&str; 4] = [
    "content-encoding",
    "content-length",
    "transfer-encoding",
    "connection",
];

#[derive(Clone)]
struct RelayState {
    upstream: Arc<str>,
    client: reqwest::Client,
    probe: AdminProbe,
}

/// HTTP reverse proxy in front of the user service
pub struct ProxyServer {
    config: RelayConfig,
    state: RelayState,
}

impl ProxyServer {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        let state = RelayState {
            upstream: Arc::from(config.user_base_url()),
            client,
            probe: AdminProbe::new(&config)?,
        };
        Ok(Self { config, state })
    }

    pub fn router(&self) -> Router {
        let relayed = MethodFilter::GET
            .or(MethodFilter::POST)
            .or(MethodFilter::PUT)
            .or(MethodFilter::DELETE)
            .or(MethodFilter::PATCH);
        let relayed_writes = MethodFilter::POST
            .or(MethodFilter::PUT)
            .or(MethodFilter::DELETE)
            .or(MethodFilter::PATCH);

        Router::new()
            .route("/", on(relayed, welcome))
            .route("/admin_check", get(admin_check).on(relayed_writes, forward))
            .route("/*path", on(relayed, forward))
            // Bodies are relayed whole, whatever their size
            .layer(DefaultBodyLimit::disable())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn run(self) -> Result<()> {
        let addr = self.config.listen_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Network(format!("Failed to bind {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(
            "Starting proxy server on {}, relaying to {}",
            listener.local_addr()?,
            self.state.upstream
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .map_err(|e| ProxyError::Network(format!("Proxy failed: {}", e)))
    }
}

async fn welcome() -> &'static str {
    WELCOME_MESSAGE
}

async fn admin_check(State(state): State<RelayState>) -> Response {
    match state.probe.check().await {
        AdminStatus::Granted => (StatusCode::OK, "OK").into_response(),
        AdminStatus::Forbidden => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
        AdminStatus::Unreachable => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error contacting admin service",
        )
            .into_response(),
    }
}

async fn forward(
    State(state): State<RelayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match relay(&state, method, uri.path(), &headers, body).await {
        Ok(response) => response,
        Err(e) => {
            error!("Forwarding {} failed: {}", uri.path(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, FORWARD_FAILURE).into_response()
        }
    }
}

async fn relay(
    state: &RelayState,
    method: Method,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| ProxyError::Http(e.to_string()))?;
    let url = format!("{}{}", state.upstream, path);

    let mut request = state.client.request(method, url);
    for (name, value) in headers {
        if SKIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        request = request.header(name.as_str(), value.as_bytes());
    }

    let upstream = request.body(body).send().await?;
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .map_err(|e| ProxyError::Http(e.to_string()))?;
    let kept: Vec<(String, Vec<u8>)> = upstream
        .headers()
        .iter()
        .filter(|(name, _)| !SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
        .collect();
    let content = upstream.bytes().await?;

    let mut response = Response::builder().status(status);
    for (name, value) in kept {
        response = response.header(name, value);
    }
    response
        .body(Body::from(content))
        .map_err(|e| ProxyError::Http(e.to_string()))
}
