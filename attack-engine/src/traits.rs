//! Core traits for the attack engine

use crate::{AttackError, HttpRequestData, HttpResponseData};
use async_trait::async_trait;

/// Sends one HTTP request and returns whatever came back.
///
/// A non-2xx status is still a response; only transport failures are errors.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, request: HttpRequestData) -> Result<HttpResponseData, AttackError>;
}
