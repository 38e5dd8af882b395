//! Race execution: launch steps on schedule, collect what comes back

use crate::{
    AttackError, AttackResult, HttpExecutor, HttpHeaders, HttpRequestData, HttpResponseData,
    RacePlan, RaceReport, StepResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs race plans against an [`HttpExecutor`]
pub struct RaceRunner {
    executor: Arc<dyn HttpExecutor>,
}

impl RaceRunner {
    pub fn new(executor: Arc<dyn HttpExecutor>) -> Self {
        Self { executor }
    }

    /// Launch every step in order without waiting for earlier ones to finish.
    ///
    /// Each step's `delay_after_ms` elapses between its launch and the next.
    /// After the last launch, outstanding steps get `settle_ms` in total;
    /// whatever is still running then is aborted and reported as timed out.
    pub async fn run(&self, plan: &RacePlan) -> AttackResult<RaceReport> {
        plan.validate()?;
        let started_at = chrono::Utc::now();
        info!(
            "Starting race with {} steps against {}",
            plan.steps.len(),
            plan.base_url
        );

        // Resolve everything up front so a bad step never leaves a half-run race.
        let requests = plan
            .steps
            .iter()
            .map(|step| plan.request_for(step))
            .collect::<AttackResult<Vec<_>>>()?;

        let mut launched: Vec<(StepResult, JoinHandle<StepResult>)> = Vec::new();
        for (index, (step, request)) in plan.steps.iter().zip(requests).enumerate() {
            let pending = StepResult::new(index, step.label().to_string(), request.clone());
            debug!("Launching step {} {} {}", index, request.method, request.url);
            let handle = tokio::spawn(execute_step(self.executor.clone(), pending.clone()));
            launched.push((pending, handle));

            if step.delay_after_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.delay_after_ms)).await;
            }
        }

        let deadline = tokio::time::Instant::now() + Duration::from_millis(plan.settle_ms);
        let mut results = Vec::with_capacity(launched.len());
        for (pending, mut handle) in launched {
            let result = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => pending.with_error(format!("step task failed: {}", e)),
                Err(_) => {
                    handle.abort();
                    warn!("Step {} still running after settle period", pending.label);
                    pending.with_error(AttackError::timeout("settle", plan.settle_ms).to_string())
                }
            };
            results.push(result);
        }

        let report = RaceReport {
            results,
            started_at,
            finished_at: chrono::Utc::now(),
        };
        info!(
            "Race finished: {} succeeded, {} failed",
            report.successful(),
            report.failed()
        );
        Ok(report)
    }
}

async fn execute_step(executor: Arc<dyn HttpExecutor>, pending: StepResult) -> StepResult {
    let start_time = Instant::now();
    match executor.execute(pending.request_data.clone()).await {
        Ok(response) => {
            let duration = start_time.elapsed().as_millis() as u64;
            info!("{} {}", pending.label, response.body_text());
            pending.with_response(response, duration)
        }
        Err(e) => {
            warn!("{} failed: {}", pending.label, e);
            pending.with_error(e.to_string())
        }
    }
}

/// [`HttpExecutor`] backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new(timeout: Option<Duration>) -> AttackResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| AttackError::ExecutionFailed {
            error: format!("Failed to build HTTP client: {}", e),
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: HttpRequestData) -> Result<HttpResponseData, AttackError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| AttackError::validation("method", &e.to_string()))?;

        let mut builder = self.client.request(method, &request.url);
        if let Some(headers) = &request.headers {
            for (name, value) in &headers.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;
        let status_code = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponseData {
            status_code,
            headers: Some(HttpHeaders { headers }),
            body,
        })
    }
}
