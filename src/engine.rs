//! Engine abstraction over one instance of the rendering capability
//!
//! The pool and dispatcher only ever talk to [`RenderEngine`] and
//! [`EngineFactory`]; the Chromium implementation lives in
//! [`crate::chromium`].

use crate::{Headers, RenderError, SettlementReceiver, Viewport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration an engine instance is created with
///
/// Two engines are interchangeable for a job exactly when their
/// capabilities compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineCapabilities {
    /// Run page scripts (default: true)
    pub javascript: bool,

    /// Load images (default: true)
    pub images: bool,

    /// Enforce same-origin policy (default: false)
    pub web_security: bool,

    /// Run http scripts and styles on https pages (default: true)
    #[serde(alias = "allowRunningInsecureContent")]
    pub allow_insecure_content: bool,

    /// Additional engine command-line switches
    pub extra_args: Vec<String>,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            javascript: true,
            images: true,
            web_security: false,
            allow_insecure_content: true,
            extra_args: Vec::new(),
        }
    }
}

/// One instance of the rendering capability
///
/// An engine serves at most one job at a time; the worker pool guarantees
/// this, engines do not lock themselves.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Capabilities this engine was created with
    fn capabilities(&self) -> &EngineCapabilities;

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), RenderError>;

    /// Route subsequent navigations through `rule`, or directly when `None`.
    async fn configure_proxy(&self, rule: Option<&str>) -> Result<(), RenderError>;

    /// Start loading `url`. Every lifecycle notification of this navigation
    /// is forwarded on the returned channel.
    async fn navigate(&self, url: &str, headers: &Headers) -> Result<SettlementReceiver, RenderError>;

    /// Full scrollable height of the loaded document
    async fn measure_content_height(&self) -> Result<u32, RenderError>;

    async fn resize_viewport(&self, width: u32, height: u32) -> Result<(), RenderError>;

    /// PNG-encoded capture of the current viewport
    async fn capture_pixels(&self) -> Result<Vec<u8>, RenderError>;

    /// Serialized markup of the loaded document
    async fn read_serialized_document(&self) -> Result<String, RenderError>;

    /// Release the underlying instance. Calls after the first are no-ops.
    async fn destroy(&self);
}

/// Creates engines for the worker pool
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        viewport: Viewport,
        capabilities: EngineCapabilities,
    ) -> Result<Arc<dyn RenderEngine>, RenderError>;
}
