//! Running one admitted job against one pooled engine

use crate::{
    classify, run_strategy, Config, ErrorSeverity, Job, Metrics, Outcome, RenderEngine, RenderError,
    RenderOutput, Settlement, WorkerPool,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

/// Process-wide values a dispatch falls back to when the job sets none
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub default_timeout: Duration,
    pub default_proxy: Option<String>,
    /// Width of every image capture
    pub capture_width: u32,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_timeout: config.job_timeout,
            default_proxy: config.proxy_rules.clone(),
            capture_width: config.viewport.width,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    pool: WorkerPool,
    settings: Arc<DispatchSettings>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool, settings: DispatchSettings, metrics: Arc<Metrics>) -> Self {
        Self {
            pool,
            settings: Arc::new(settings),
            metrics,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Run `job` to completion. Every failure comes back as data, and the
    /// engine is back in the pool by the time this returns.
    pub async fn dispatch(&self, job: Job) -> Outcome {
        let span = info_span!(
            "dispatch",
            job_id = %job.id,
            kind = %job.kind,
            slot = field::Empty
        );
        let start = Instant::now();

        let outcome = self.run(&job, start).instrument(span.clone()).await;
        let elapsed = start.elapsed();

        self.metrics
            .record_job(job.kind, elapsed, outcome.as_ref().map(|_| ()));

        span.in_scope(|| match &outcome {
            Ok(output) => info!(
                "Rendered {} ({} bytes) in {:?}",
                job.target,
                output.content.len(),
                elapsed
            ),
            Err(e) if e.severity() == ErrorSeverity::Critical => {
                error!("Job for {} failed: {}", job.target, e)
            }
            Err(e) => warn!("Job for {} failed after {:?}: {}", job.target, elapsed, e),
        });

        outcome
    }

    async fn run(&self, job: &Job, start: Instant) -> Outcome {
        let lease = self.pool.acquire(job).await?;
        let slot = lease.slot();
        Span::current().record("slot", field::display(slot));

        let timeout = job.effective_timeout(self.settings.default_timeout);
        let signal = self.settle(lease.engine(), job, timeout).await?;
        debug!(signal = signal.name(), "Navigation settled");

        classify(signal, timeout)?;

        let content = run_strategy(lease.engine(), job.kind, self.settings.capture_width).await?;
        drop(lease);

        Ok(RenderOutput {
            job_id: job.id.clone(),
            kind: job.kind,
            target: job.target.clone(),
            content,
            duration: start.elapsed(),
            slot,
        })
    }

    /// Configure, navigate and wait for the first settlement signal, unless
    /// `timeout` runs out first. Dropping the receiver on return discards any
    /// later signal from the same navigation.
    async fn settle(
        &self,
        engine: &dyn RenderEngine,
        job: &Job,
        timeout: Duration,
    ) -> Result<Settlement, RenderError> {
        let headers = job.effective_headers();
        let proxy = job.effective_proxy(self.settings.default_proxy.as_deref());

        let load = async {
            engine.configure_proxy(proxy).await?;
            let mut signals = engine.navigate(&job.target, &headers).await?;
            Ok::<_, RenderError>(
                signals
                    .recv()
                    .await
                    .unwrap_or_else(|| Settlement::Unrecognized("signal-channel-closed".to_string())),
            )
        };

        tokio::select! {
            biased;
            signal = load => signal,
            _ = sleep(timeout) => Ok(Settlement::TimedOut),
        }
    }
}
