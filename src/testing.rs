//! In-memory engine for exercising the pool without a browser
//!
//! Navigation behaviour is chosen by the target's host:
//!
//! | host              | behaviour                                          |
//! |-------------------|----------------------------------------------------|
//! | `slow.test/<ms>`  | load succeeds after `<ms>` (default 50)            |
//! | `hang.test`       | never settles                                      |
//! | `crash.test`      | renderer crashes                                   |
//! | `nxdomain.test`   | load fails with `ERR_NAME_NOT_RESOLVED`            |
//! | `dom.test`        | only the DOM-ready notification arrives            |
//! | `weird.test`      | an unknown lifecycle event arrives                 |
//! | `double.test`     | load fails, then succeeds                          |
//! | `closed.test`     | the signal channel closes without a signal         |
//! | `broken-dom.test` | loads, but reading the document fails              |
//! | `tall.test`       | loads; document is 2000px tall                     |
//! | `hidpi.test`      | loads; captures come back at twice the width       |
//! | anything else     | load succeeds at once                              |
//!
//! `data:text/html,<markup>` targets load at once and serialize to `<markup>`.

use crate::{
    settlement_channel, EngineCapabilities, EngineFactory, Headers, RenderEngine, RenderError, Settlement,
    SettlementReceiver, Viewport,
};
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Navigation {
    pub engine: usize,
    pub url: String,
    pub headers: Headers,
    pub proxy: Option<String>,
}

/// Shared record of everything the scripted engines did
#[derive(Default)]
pub struct EngineLog {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    launch_budget: Mutex<Option<usize>>,
    fail_once: AtomicBool,
    launch_delay: Mutex<Option<Duration>>,
    navigations: Mutex<Vec<Navigation>>,
    proxy_changes: Mutex<Vec<(usize, Option<String>)>>,
    user_agents: Mutex<Vec<String>>,
}

impl EngineLog {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<Navigation> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn proxy_changes(&self) -> Vec<(usize, Option<String>)> {
        self.proxy_changes.lock().unwrap().clone()
    }

    pub fn user_agents(&self) -> Vec<String> {
        self.user_agents.lock().unwrap().clone()
    }

    /// Only the next engine launch fails
    pub fn fail_next_launch(&self) {
        self.fail_once.store(true, Ordering::SeqCst);
    }

    /// Allow `n` more launches, then fail every one after
    pub fn fail_launch_after(&self, n: usize) {
        *self.launch_budget.lock().unwrap() = Some(n);
    }

    /// Every later launch takes `delay` before the engine exists
    pub fn delay_launches(&self, delay: Duration) {
        *self.launch_delay.lock().unwrap() = Some(delay);
    }

    fn launch_delay(&self) -> Option<Duration> {
        *self.launch_delay.lock().unwrap()
    }

    fn take_launch(&self) -> bool {
        if self.fail_once.swap(false, Ordering::SeqCst) {
            return false;
        }
        let mut budget = self.launch_budget.lock().unwrap();
        match budget.as_mut() {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }
}

pub struct ScriptedEngine {
    serial: usize,
    capabilities: EngineCapabilities,
    log: Arc<EngineLog>,
    viewport: Mutex<Viewport>,
    proxy: Mutex<Option<String>>,
    document: Mutex<Option<(String, String)>>,
    destroyed: AtomicBool,
}

impl ScriptedEngine {
    pub fn new(log: Arc<EngineLog>, viewport: Viewport, capabilities: EngineCapabilities) -> Self {
        let serial = log.created.fetch_add(1, Ordering::SeqCst);
        Self {
            serial,
            capabilities,
            log,
            viewport: Mutex::new(viewport),
            proxy: Mutex::new(None),
            document: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    fn loaded_host(&self) -> Option<String> {
        self.document.lock().unwrap().as_ref().map(|(host, _)| host.clone())
    }
}

fn markup_for(url: &url::Url) -> String {
    if url.scheme() == "data" {
        let raw = url.as_str().split_once(',').map(|(_, body)| body).unwrap_or_default();
        return raw.replace("%20", " ");
    }
    format!(
        "<html><head></head><body>{}</body></html>",
        url.host_str().unwrap_or_default()
    )
}

#[async_trait]
impl RenderEngine for ScriptedEngine {
    fn capabilities(&self) -> &EngineCapabilities {
        &self.capabilities
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), RenderError> {
        self.log.user_agents.lock().unwrap().push(user_agent.to_string());
        Ok(())
    }

    async fn configure_proxy(&self, rule: Option<&str>) -> Result<(), RenderError> {
        let mut current = self.proxy.lock().unwrap();
        if current.as_deref() != rule {
            *current = rule.map(str::to_string);
            self.log
                .proxy_changes
                .lock()
                .unwrap()
                .push((self.serial, current.clone()));
        }
        Ok(())
    }

    async fn navigate(&self, url: &str, headers: &Headers) -> Result<SettlementReceiver, RenderError> {
        let parsed = url::Url::parse(url).map_err(|e| RenderError::Engine(e.to_string()))?;
        let host = parsed.host_str().unwrap_or_default().to_string();

        self.log.navigations.lock().unwrap().push(Navigation {
            engine: self.serial,
            url: url.to_string(),
            headers: headers.clone(),
            proxy: self.proxy.lock().unwrap().clone(),
        });
        *self.document.lock().unwrap() = Some((host.clone(), markup_for(&parsed)));

        let (tx, rx) = settlement_channel();
        match host.as_str() {
            "slow.test" => {
                let delay = parsed
                    .path()
                    .trim_start_matches('/')
                    .parse()
                    .unwrap_or(50);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    let _ = tx.send(Settlement::LoadSucceeded).await;
                });
            }
            "hang.test" => {
                tokio::spawn(async move { tx.closed().await });
            }
            "crash.test" => {
                let _ = tx.try_send(Settlement::Crashed);
            }
            "nxdomain.test" => {
                let _ = tx.try_send(Settlement::LoadFailed {
                    code: -105,
                    description: "net::ERR_NAME_NOT_RESOLVED".to_string(),
                });
            }
            "dom.test" => {
                let _ = tx.try_send(Settlement::DomReady);
            }
            "weird.test" => {
                let _ = tx.try_send(Settlement::Unrecognized("did-stop-loading".to_string()));
            }
            "double.test" => {
                let _ = tx.try_send(Settlement::LoadFailed {
                    code: -102,
                    description: String::new(),
                });
                let _ = tx.try_send(Settlement::LoadSucceeded);
            }
            "closed.test" => drop(tx),
            _ => {
                let _ = tx.try_send(Settlement::LoadSucceeded);
            }
        }

        Ok(rx)
    }

    async fn measure_content_height(&self) -> Result<u32, RenderError> {
        match self.loaded_host().as_deref() {
            Some("tall.test") => Ok(2000),
            _ => Ok(900),
        }
    }

    async fn resize_viewport(&self, width: u32, height: u32) -> Result<(), RenderError> {
        *self.viewport.lock().unwrap() = Viewport { width, height };
        Ok(())
    }

    async fn capture_pixels(&self) -> Result<Vec<u8>, RenderError> {
        let viewport = *self.viewport.lock().unwrap();
        let scale = match self.loaded_host().as_deref() {
            Some("hidpi.test") => 2,
            _ => 1,
        };

        let image = image::RgbaImage::from_pixel(
            viewport.width * scale,
            viewport.height * scale,
            image::Rgba([255, 255, 255, 255]),
        );
        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
        Ok(png)
    }

    async fn read_serialized_document(&self) -> Result<String, RenderError> {
        match self.document.lock().unwrap().as_ref() {
            Some((host, _)) if host == "broken-dom.test" => {
                Err(RenderError::Engine("Uncaught TypeError: document is null".to_string()))
            }
            Some((_, markup)) => Ok(markup.clone()),
            None => Err(RenderError::Engine("nothing loaded".to_string())),
        }
    }

    async fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.log.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Factory producing [`ScriptedEngine`]s that share one [`EngineLog`]
#[derive(Default)]
pub struct ScriptedFactory {
    log: Arc<EngineLog>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Arc<EngineLog> {
        self.log.clone()
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn create(
        &self,
        viewport: Viewport,
        capabilities: EngineCapabilities,
    ) -> Result<Arc<dyn RenderEngine>, RenderError> {
        if let Some(delay) = self.log.launch_delay() {
            tokio::time::sleep(delay).await;
        }
        if !self.log.take_launch() {
            return Err(RenderError::EngineLaunch("scripted launch failure".to_string()));
        }
        Ok(Arc::new(ScriptedEngine::new(self.log.clone(), viewport, capabilities)))
    }
}
