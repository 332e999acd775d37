//! Jobs, their wire representation and their results

use crate::{validate_target, EngineCapabilities, RenderError, SlotId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Header name to value
pub type Headers = BTreeMap<String, String>;

/// Result of one job, delivered exactly once through its ticket
pub type Outcome = Result<RenderOutput, RenderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum JobKind {
    /// Return the loaded document's markup
    #[serde(rename = "html")]
    ContentExtraction,
    /// Return a PNG of the full document
    #[serde(rename = "png")]
    ImageCapture,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ContentExtraction => "html",
            JobKind::ImageCapture => "png",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Headers sent with every navigation unless the job overrides them
pub fn default_headers() -> Headers {
    let mut headers = Headers::new();
    headers.insert(
        "Cache-Control".to_string(),
        "no-cache, no-store, must-revalidate".to_string(),
    );
    headers.insert("Pragma".to_string(), "no-cache".to_string());
    headers
}

/// Overlay `overrides` on `defaults`. Header names compare
/// case-insensitively; the override's spelling wins.
pub fn merge_headers(defaults: Headers, overrides: &Headers) -> Headers {
    let mut merged = defaults;
    for (name, value) in overrides {
        merged.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        merged.insert(name.clone(), value.clone());
    }
    merged
}

/// Pick the proxy rule for a navigation.
///
/// A job rule wins over the process default; an explicitly empty job rule
/// disables the default.
pub fn resolve_proxy<'a>(job_rule: Option<&'a str>, default_rule: Option<&'a str>) -> Option<&'a str> {
    match job_rule {
        Some(rule) if rule.trim().is_empty() => None,
        Some(rule) => Some(rule),
        None => default_rule.filter(|rule| !rule.trim().is_empty()),
    }
}

/// One unit of rendering work. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct Job {
    /// Correlation id for logs
    pub id: String,
    pub kind: JobKind,
    pub target: String,
    pub headers: Headers,
    pub proxy: Option<String>,
    pub timeout: Option<Duration>,
    pub engine_config: Option<EngineCapabilities>,
}

impl Job {
    pub fn new(kind: JobKind, target: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            target: target.into(),
            headers: Headers::new(),
            proxy: None,
            timeout: None,
            engine_config: None,
        }
    }

    pub fn html(target: impl Into<String>) -> Self {
        Self::new(JobKind::ContentExtraction, target)
    }

    pub fn png(target: impl Into<String>) -> Self {
        Self::new(JobKind::ImageCapture, target)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_proxy(mut self, rule: impl Into<String>) -> Self {
        self.proxy = Some(rule.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_engine_config(mut self, capabilities: EngineCapabilities) -> Self {
        self.engine_config = Some(capabilities);
        self
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        validate_target(&self.target)
            .map(|_| ())
            .map_err(|e| RenderError::InvalidJob(format!("{}: {}", self.target, e)))
    }

    /// A zero timeout counts as unset.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout.filter(|t| !t.is_zero()).unwrap_or(default)
    }

    pub fn effective_headers(&self) -> Headers {
        merge_headers(default_headers(), &self.headers)
    }

    pub fn effective_proxy<'a>(&'a self, default_rule: Option<&'a str>) -> Option<&'a str> {
        resolve_proxy(self.proxy.as_deref(), default_rule)
    }
}

/// Job description as accepted by the request layer
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub url: String,

    #[serde(default)]
    pub headers: Headers,

    #[serde(default, alias = "proxy")]
    pub proxy_rules: Option<String>,

    /// Milliseconds
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default, alias = "engineConfig")]
    pub web_preferences: Option<EngineCapabilities>,
}

impl JobRequest {
    pub fn into_job(self, kind: JobKind) -> Job {
        Job {
            headers: self.headers,
            proxy: self.proxy_rules,
            timeout: self.timeout.map(Duration::from_millis),
            engine_config: self.web_preferences,
            ..Job::new(kind, self.url)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderContent {
    Html(String),
    Png(Vec<u8>),
}

impl RenderContent {
    pub fn content_type(&self) -> &'static str {
        match self {
            RenderContent::Html(_) => "text/html; charset=utf-8",
            RenderContent::Png(_) => "image/png",
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RenderContent::Html(html) => html.as_bytes(),
            RenderContent::Png(png) => png,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RenderContent::Html(html) => html.into_bytes(),
            RenderContent::Png(png) => png,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub job_id: String,
    pub kind: JobKind,
    pub target: String,
    pub content: RenderContent,
    pub duration: Duration,
    /// Pool slot that served the job
    pub slot: SlotId,
}
