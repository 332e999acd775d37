//! Chromium-backed engines driven over the DevTools protocol
//!
//! Each engine is its own browser process with one page. Proxy rules are
//! applied by moving the page into a fresh browser context created with that
//! proxy, so a rule never outlives the job that asked for it.

use crate::{
    code_for_name, settlement_channel, Config, EngineCapabilities, EngineFactory, Headers, RenderEngine,
    RenderError, Settlement, SettlementReceiver, Viewport,
};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetScriptExecutionDisabledParams,
};
use chromiumoxide::cdp::browser_protocol::inspector::{self, EventTargetCrashed};
use chromiumoxide::cdp::browser_protocol::network::{
    self, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventLifecycleEvent, NavigateParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest of the document's scroll, offset and client heights
const CONTENT_HEIGHT_JS: &str = r#"
(() => {
    const body = document.body;
    const html = document.documentElement;
    return Math.max(
        body ? body.scrollHeight : 0,
        body ? body.offsetHeight : 0,
        html.clientHeight,
        html.scrollHeight,
        html.offsetHeight
    );
})()
"#;

const SERIALIZE_DOCUMENT_JS: &str = "document.documentElement.outerHTML";

/// Command-line switches for an engine created with `capabilities`
pub fn chrome_args(viewport: Viewport, capabilities: &EngineCapabilities) -> Vec<String> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--hide-scrollbars".to_string(),
        "--enable-features=OverlayScrollbar".to_string(),
        format!("--window-size={},{}", viewport.width, viewport.height),
    ];

    if !capabilities.web_security {
        args.push("--disable-web-security".to_string());
    }

    if capabilities.allow_insecure_content {
        args.push("--allow-running-insecure-content".to_string());
    }

    if !capabilities.images {
        args.push("--blink-settings=imagesEnabled=false".to_string());
    }

    args.extend(capabilities.extra_args.iter().cloned());
    args
}

pub struct ChromiumFactory {
    chrome_path: Option<String>,
    headless: bool,
    launched: AtomicUsize,
}

impl ChromiumFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            chrome_path: config.chrome_path.clone(),
            headless: config.headless,
            launched: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EngineFactory for ChromiumFactory {
    async fn create(
        &self,
        viewport: Viewport,
        capabilities: EngineCapabilities,
    ) -> Result<Arc<dyn RenderEngine>, RenderError> {
        let id = self.launched.fetch_add(1, Ordering::Relaxed);
        let engine = ChromiumEngine::launch(
            id,
            viewport,
            capabilities,
            self.chrome_path.as_deref(),
            self.headless,
        )
        .await?;
        Ok(Arc::new(engine))
    }
}

/// The page an engine currently renders into
struct Session {
    page: Page,
    /// `None` is the browser's default context
    context: Option<BrowserContextId>,
    proxy: Option<String>,
}

pub struct ChromiumEngine {
    id: usize,
    capabilities: EngineCapabilities,
    viewport: Viewport,
    browser: Mutex<Browser>,
    session: Mutex<Option<Session>>,
    user_agent: Mutex<Option<String>>,
    handler: std::sync::Mutex<Option<JoinHandle<()>>>,
    user_data_dir: PathBuf,
    destroyed: AtomicBool,
}

impl ChromiumEngine {
    async fn launch(
        id: usize,
        viewport: Viewport,
        capabilities: EngineCapabilities,
        chrome_path: Option<&str>,
        headless: bool,
    ) -> Result<Self, RenderError> {
        let user_data_dir =
            std::env::temp_dir().join(format!("render-pool-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&user_data_dir).map_err(|e| {
            RenderError::EngineLaunch(format!("Failed to create user data dir: {e}"))
        })?;

        let mut builder = BrowserConfig::builder()
            .window_size(viewport.width, viewport.height)
            .user_data_dir(&user_data_dir)
            .args(chrome_args(viewport, &capabilities));

        if !headless {
            builder = builder.with_head();
        }
        if let Some(path) = chrome_path {
            builder = builder.chrome_executable(path);
        }

        let browser_config = builder.build().map_err(RenderError::EngineLaunch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| RenderError::EngineLaunch(e.to_string()))?;

        // The handler stream must be polled for the browser to make progress
        let handler_task = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Engine {} handler error: {}", id, e);
                    }
                    None => {
                        debug!("Engine {} handler stream ended", id);
                        break;
                    }
                }
            }
        });

        let engine = Self {
            id,
            capabilities,
            viewport,
            browser: Mutex::new(browser),
            session: Mutex::new(None),
            user_agent: Mutex::new(None),
            handler: std::sync::Mutex::new(Some(handler_task)),
            user_data_dir,
            destroyed: AtomicBool::new(false),
        };

        match engine.open_page(None).await {
            Ok(page) => {
                *engine.session.lock().await = Some(Session {
                    page,
                    context: None,
                    proxy: None,
                });
            }
            Err(e) => {
                engine.destroy().await;
                return Err(RenderError::EngineLaunch(e.to_string()));
            }
        }

        info!("Engine {} launched", id);
        Ok(engine)
    }

    /// Open a page in `context` and apply this engine's settings to it.
    async fn open_page(&self, context: Option<BrowserContextId>) -> Result<Page, RenderError> {
        let mut params = CreateTargetParams::new("about:blank");
        params.browser_context_id = context;

        let page = self
            .browser
            .lock()
            .await
            .new_page(params)
            .await
            .map_err(engine_error)?;

        page.execute(inspector::EnableParams::default())
            .await
            .map_err(engine_error)?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(self.viewport.width))
            .height(i64::from(self.viewport.height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(RenderError::Engine)?;
        page.execute(metrics).await.map_err(engine_error)?;

        if !self.capabilities.javascript {
            page.execute(SetScriptExecutionDisabledParams::new(true))
                .await
                .map_err(engine_error)?;
        }

        if let Some(user_agent) = self.user_agent.lock().await.as_deref() {
            page.execute(SetUserAgentOverrideParams::new(user_agent))
                .await
                .map_err(engine_error)?;
        }

        Ok(page)
    }

    async fn page(&self) -> Result<Page, RenderError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.page.clone())
            .ok_or_else(|| RenderError::Engine(format!("engine {} has no page", self.id)))
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T, RenderError> {
        self.page()
            .await?
            .evaluate(script)
            .await
            .map_err(engine_error)?
            .into_value()
            .map_err(|e| RenderError::Engine(format!("unexpected script result: {e}")))
    }

    async fn dispose_context(&self, context: BrowserContextId) {
        let result = self
            .browser
            .lock()
            .await
            .execute(DisposeBrowserContextParams::new(context))
            .await;

        if let Err(e) = result {
            warn!("Engine {} failed to dispose browser context: {}", self.id, e);
        }
    }
}

fn engine_error(e: chromiumoxide::error::CdpError) -> RenderError {
    RenderError::Engine(e.to_string())
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    fn capabilities(&self) -> &EngineCapabilities {
        &self.capabilities
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), RenderError> {
        *self.user_agent.lock().await = Some(user_agent.to_string());
        self.page()
            .await?
            .execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(engine_error)?;
        Ok(())
    }

    async fn configure_proxy(&self, rule: Option<&str>) -> Result<(), RenderError> {
        let mut session = self.session.lock().await;
        let Some(current) = session.as_mut() else {
            return Err(RenderError::Engine(format!("engine {} has no page", self.id)));
        };

        if current.proxy.as_deref() == rule {
            return Ok(());
        }

        let context = match rule {
            Some(rule) => {
                debug!("Engine {} switching to proxy {}", self.id, rule);
                let params = CreateBrowserContextParams {
                    proxy_server: Some(rule.to_string()),
                    ..Default::default()
                };
                let created = self
                    .browser
                    .lock()
                    .await
                    .execute(params)
                    .await
                    .map_err(engine_error)?;
                Some(created.result.browser_context_id)
            }
            None => {
                debug!("Engine {} switching to direct connections", self.id);
                None
            }
        };

        let page = match self.open_page(context.clone()).await {
            Ok(page) => page,
            Err(e) => {
                if let Some(context) = context {
                    self.dispose_context(context).await;
                }
                return Err(e);
            }
        };

        let previous = std::mem::replace(
            current,
            Session {
                page,
                context,
                proxy: rule.map(str::to_string),
            },
        );
        drop(session);

        if let Err(e) = previous.page.close().await {
            debug!("Engine {} failed to close previous page: {}", self.id, e);
        }
        if let Some(context) = previous.context {
            self.dispose_context(context).await;
        }

        Ok(())
    }

    async fn navigate(&self, url: &str, headers: &Headers) -> Result<SettlementReceiver, RenderError> {
        let page = self.page().await?;

        // Subscribe before navigating so no notification is missed
        let mut lifecycle = page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(engine_error)?;
        let mut crashed = page
            .event_listener::<EventTargetCrashed>()
            .await
            .map_err(engine_error)?;
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .map_err(engine_error)?;

        let extra = serde_json::to_value(headers)?;
        page.execute(SetExtraHttpHeadersParams::new(network::Headers::new(extra)))
            .await
            .map_err(engine_error)?;

        let (tx, rx) = settlement_channel();

        let navigated = page
            .execute(NavigateParams::new(url))
            .await
            .map_err(engine_error)?;

        if let Some(error_text) = navigated.result.error_text.as_deref() {
            debug!("Engine {} failed to load {}: {}", self.id, url, error_text);
            let _ = tx.try_send(Settlement::LoadFailed {
                code: code_for_name(error_text),
                description: error_text.to_string(),
            });
            return Ok(rx);
        }

        // Same-document navigations reuse the loaded document
        let Some(loader_id) = navigated.result.loader_id.clone() else {
            let _ = tx.try_send(Settlement::LoadSucceeded);
            return Ok(rx);
        };
        let frame_id = navigated.result.frame_id.clone();

        // Lifecycle events from a document an earlier, timed-out job left
        // loading carry another loader id and are skipped.
        tokio::spawn(async move {
            let signal = loop {
                tokio::select! {
                    event = crashed.next() => match event {
                        Some(_) => break Settlement::Crashed,
                        None => break Settlement::Unrecognized("event-stream-closed".to_string()),
                    },
                    event = lifecycle.next() => match event {
                        Some(event) if event.loader_id == loader_id && event.frame_id == frame_id => {
                            match event.name.as_str() {
                                "load" => break Settlement::LoadSucceeded,
                                "DOMContentLoaded" => break Settlement::DomReady,
                                _ => continue,
                            }
                        }
                        Some(_) => continue,
                        None => break Settlement::Unrecognized("event-stream-closed".to_string()),
                    },
                    _ = tx.closed() => return,
                }
            };
            let _ = tx.send(signal).await;
        });

        Ok(rx)
    }

    async fn measure_content_height(&self) -> Result<u32, RenderError> {
        let height: f64 = self.evaluate(CONTENT_HEIGHT_JS).await?;
        Ok(height.max(0.0).ceil() as u32)
    }

    async fn resize_viewport(&self, width: u32, height: u32) -> Result<(), RenderError> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(width))
            .height(i64::from(height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(RenderError::Engine)?;

        self.page().await?.execute(metrics).await.map_err(engine_error)?;
        Ok(())
    }

    async fn capture_pixels(&self) -> Result<Vec<u8>, RenderError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();

        self.page()
            .await?
            .screenshot(params)
            .await
            .map_err(|e| RenderError::Capture(e.to_string()))
    }

    async fn read_serialized_document(&self) -> Result<String, RenderError> {
        self.evaluate(SERIALIZE_DOCUMENT_JS)
            .await
            .map_err(|e| RenderError::Extraction(e.to_string()))
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.session.lock().await.take();

        {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                debug!("Engine {} close failed: {}", self.id, e);
            }
            let _ = browser.wait().await;
        }

        let handler = self
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handler) = handler {
            handler.abort();
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            debug!("Engine {} left {:?} behind: {}", self.id, self.user_data_dir, e);
        }

        info!("Engine {} destroyed", self.id);
    }
}
