//! Render service wiring the pool, dispatcher and queue together
//!
//! `RenderService` is what the request layer and the CLI talk to: it owns a
//! started [`WorkerPool`], the [`TaskQueue`] in front of it and the metrics
//! both report to.

use crate::{
    assess, ChromiumFactory, Config, DispatchSettings, Dispatcher, EngineFactory, HealthStatus,
    HealthThresholds, Job, JobKind, JobRequest, JobTicket, Metrics, Outcome, RenderContent,
    RenderError, ServiceStats, TaskQueue, WorkerPool,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

/// High-level entry point for submitting render jobs
///
/// # Examples
///
/// ```rust,no_run
/// use render_pool::{Config, Job, RenderService};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = RenderService::new(Config::default()).await?;
///
///     let output = service.render(Job::html("https://example.com")).await?;
///     println!("Rendered {} bytes", output.content.len());
///
///     service.shutdown(Duration::from_secs(5)).await;
///     Ok(())
/// }
/// ```
pub struct RenderService {
    config: Config,
    pool: WorkerPool,
    queue: TaskQueue,
    metrics: Arc<Metrics>,
    thresholds: HealthThresholds,
    started_at: Instant,
}

impl RenderService {
    /// Start a service backed by headless Chromium.
    pub async fn new(config: Config) -> Result<Self, RenderError> {
        let factory = Arc::new(ChromiumFactory::new(&config));
        Self::with_factory(config, factory, Arc::new(Metrics::new())).await
    }

    pub async fn with_factory(
        config: Config,
        factory: Arc<dyn EngineFactory>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, RenderError> {
        config.validate()?;

        let pool = WorkerPool::new(&config, factory, metrics.clone()).await?;
        let dispatcher = Dispatcher::new(
            pool.clone(),
            DispatchSettings::from_config(&config),
            metrics.clone(),
        );
        let queue = TaskQueue::new(dispatcher, metrics.clone());

        info!(
            "Render service ready: {} engines, default timeout {:?}",
            config.pool_size, config.job_timeout
        );

        Ok(Self {
            config,
            pool,
            queue,
            metrics,
            thresholds: HealthThresholds::default(),
            started_at: Instant::now(),
        })
    }

    pub fn submit(&self, job: Job) -> JobTicket {
        self.queue.submit(job)
    }

    pub async fn render(&self, job: Job) -> Outcome {
        self.queue.render(job).await
    }

    /// Render a request to its serialized document markup.
    pub async fn render_html(&self, request: JobRequest) -> Result<String, RenderError> {
        match self.render(request.into_job(JobKind::ContentExtraction)).await?.content {
            RenderContent::Html(html) => Ok(html),
            RenderContent::Png(_) => Err(RenderError::Internal(
                "content extraction produced an image".to_string(),
            )),
        }
    }

    /// Render a request to a full-document PNG.
    pub async fn render_png(&self, request: JobRequest) -> Result<Vec<u8>, RenderError> {
        match self.render(request.into_job(JobKind::ImageCapture)).await?.content {
            RenderContent::Png(png) => Ok(png),
            RenderContent::Html(_) => Err(RenderError::Internal(
                "image capture produced markup".to_string(),
            )),
        }
    }

    /// Submit every job up front and collect outcomes in submission order.
    pub async fn render_batch(&self, jobs: Vec<Job>) -> Vec<Outcome> {
        let tickets: Vec<JobTicket> = jobs.into_iter().map(|job| self.submit(job)).collect();
        join_all(tickets).await
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            pool: self.pool.stats(),
            pending: self.queue.pending(),
            in_flight: self.queue.in_flight(),
            capacity: self.queue.capacity(),
        }
    }

    pub fn health(&self) -> HealthStatus {
        assess(&self.stats(), &self.thresholds, self.started_at.elapsed())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Stop accepting jobs, let queued and running ones finish within
    /// `grace`, then destroy every engine.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down render service...");
        self.queue.close();

        let deadline = Instant::now() + grace;
        while self.queue.pending() + self.queue.in_flight() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    "Shutdown grace period elapsed with {} queued and {} running jobs",
                    self.queue.pending(),
                    self.queue.in_flight()
                );
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }

        self.pool
            .shutdown(deadline.saturating_duration_since(Instant::now()))
            .await;
        info!("Render service shutdown complete");
    }
}
