//! Core data types for the attack engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A fully resolved HTTP request, ready for an executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestData {
    pub method: String,
    pub url: String,
    pub headers: Option<HttpHeaders>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponseData {
    pub status_code: u16,
    pub headers: Option<HttpHeaders>,
    pub body: Vec<u8>,
}

/// HTTP headers structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpHeaders {
    pub headers: HashMap<String, String>,
}

impl HttpRequestData {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.headers.get(name))
            .map(String::as_str)
    }
}

impl HttpResponseData {
    /// Body as text, replacing invalid UTF-8
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Outcome of one launched race step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub id: Uuid,
    /// Position of the step in its plan
    pub index: usize,
    pub label: String,
    pub request_data: HttpRequestData,
    pub response_data: Option<HttpResponseData>,
    pub executed_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl StepResult {
    /// Create a new step result with no outcome yet
    pub fn new(index: usize, label: String, request_data: HttpRequestData) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            label,
            request_data,
            response_data: None,
            executed_at: chrono::Utc::now(),
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_response(mut self, response: HttpResponseData, duration_ms: u64) -> Self {
        self.response_data = Some(response);
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.response_data.is_some()
    }

    /// `<label> <body>` line, or `<label> error: <reason>`
    pub fn summary_line(&self) -> String {
        match (&self.response_data, &self.error) {
            (Some(response), _) => format!("{} {}", self.label, response.body_text()),
            (None, Some(error)) => format!("{} error: {}", self.label, error),
            (None, None) => format!("{} (no response)", self.label),
        }
    }
}

/// Everything a race run produced, in plan order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceReport {
    pub results: Vec<StepResult>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl RaceReport {
    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.successful()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HttpRequestData {
        HttpRequestData {
            method: "GET".into(),
            url: "http://localhost/sessions/s/report".into(),
            headers: None,
            body: Vec::new(),
        }
    }

    #[test]
    fn test_summary_lines() {
        let ok = StepResult::new(0, "s".into(), request()).with_response(
            HttpResponseData {
                status_code: 200,
                headers: None,
                body: b"{\"ok\":true}".to_vec(),
            },
            12,
        );
        assert_eq!(ok.summary_line(), "s {\"ok\":true}");
        assert!(ok.is_success());

        let failed = StepResult::new(1, "s:u".into(), request()).with_error("refused".into());
        assert_eq!(failed.summary_line(), "s:u error: refused");
        assert!(!failed.is_success());
    }
}
