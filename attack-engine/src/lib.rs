//! Attack Engine - timed race requests
//!
//! A [`RacePlan`] is an ordered list of HTTP requests with fixed gaps between
//! launches. [`RaceRunner`] fires each one on its own task so a slow response
//! never pushes back the next launch, which is what racing two writes against
//! a shared storage key needs.

pub mod error;
pub mod execution;
pub mod plan;
pub mod traits;
pub mod types;

pub use error::{AttackError, AttackResult};
pub use execution::{RaceRunner, ReqwestExecutor};
pub use plan::{custom_url_encode, RacePlan, RaceStep, SessionConfusion};
pub use traits::HttpExecutor;
pub use types::{HttpHeaders, HttpRequestData, HttpResponseData, RaceReport, StepResult};
