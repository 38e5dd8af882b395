use axum::{extract::State, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const ADMIN_GREETING: &str = "I am admin, here is your flag: ";

/// Shared state for the admin service
#[derive(Debug, Clone)]
pub struct AdminState {
    flag: Arc<str>,
}

impl AdminState {
    pub fn new(flag: impl Into<String>) -> Self {
        Self {
            flag: Arc::from(flag.into()),
        }
    }
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin", get(admin_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn admin_handler(State(state): State<AdminState>) -> String {
    format!("{}{}", ADMIN_GREETING, state.flag)
}
