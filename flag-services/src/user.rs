use crate::decompress::decompress_request;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, Method},
    middleware,
    routing::get,
    Router,
};
use bytes::Bytes;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Exact byte sequence that unlocks FLAG1
pub const TRIGGER_PHRASE: &[u8] = b"GIVE ME FLAG!";

pub const USER_GREETING: &str = "Hello from User!";
pub const FLAG_PREFIX: &str = "OK HERE IS YOUR FLAG: ";

/// Mimetypes whose bodies are consumed as form fields, leaving no raw message
const FORM_MIMETYPES: [&str; 2] = ["application/x-www-form-urlencoded", "multipart/form-data"];

/// Shared state for the user service
#[derive(Debug, Clone)]
pub struct UserState {
    flag: Arc<str>,
}

impl UserState {
    pub fn new(flag: impl Into<String>) -> Self {
        Self {
            flag: Arc::from(flag.into()),
        }
    }
}

/// `GET|POST /<path>`; the root path itself is not routed. Request bodies
/// are unbounded, compressed or not.
pub fn user_router(state: UserState) -> Router {
    Router::new()
        .route("/*path", get(user_handler).post(user_handler))
        .layer(middleware::from_fn(decompress_request))
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn user_handler(
    State(state): State<UserState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> String {
    if method == Method::POST {
        let message = raw_message(&headers, body);
        info!("Received message: {:?}", String::from_utf8_lossy(&message));
        if contains_trigger(&message) {
            return format!("{}{}", FLAG_PREFIX, state.flag);
        }
    }
    USER_GREETING.to_string()
}

/// The raw request data, empty when the body was submitted as a form
fn raw_message(headers: &HeaderMap, body: Bytes) -> Bytes {
    let mimetype = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if FORM_MIMETYPES.contains(&mimetype.as_str()) {
        Bytes::new()
    } else {
        body
    }
}

pub fn contains_trigger(message: &[u8]) -> bool {
    message
        .windows(TRIGGER_PHRASE.len())
        .any(|window| window == TRIGGER_PHRASE)
}
