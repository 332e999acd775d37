use crate::{JobKind, RenderError};
use metrics::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

pub struct Metrics {
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,
    pub job_duration: Histogram,
    pub timeouts: Counter,
    pub crashes: Counter,
    pub network_errors: Counter,
    pub engine_replacements: Counter,
    pub busy_engines: Gauge,
    pub queue_depth: Gauge,
}

impl Metrics {
    /// Handles registered with the global recorder. Until a recorder is
    /// installed they discard everything.
    pub fn new() -> Self {
        Self {
            jobs_completed: register_counter!("render_jobs_completed_total"),
            jobs_failed: register_counter!("render_jobs_failed_total"),
            job_duration: register_histogram!("render_job_duration_seconds"),
            timeouts: register_counter!("render_timeouts_total"),
            crashes: register_counter!("render_crashes_total"),
            network_errors: register_counter!("render_network_errors_total"),
            engine_replacements: register_counter!("render_engine_replacements_total"),
            busy_engines: register_gauge!("render_busy_engines"),
            queue_depth: register_gauge!("render_queue_depth"),
        }
    }

    pub fn noop() -> Self {
        Self {
            jobs_completed: Counter::noop(),
            jobs_failed: Counter::noop(),
            job_duration: Histogram::noop(),
            timeouts: Counter::noop(),
            crashes: Counter::noop(),
            network_errors: Counter::noop(),
            engine_replacements: Counter::noop(),
            busy_engines: Gauge::noop(),
            queue_depth: Gauge::noop(),
        }
    }

    pub fn record_job(&self, kind: JobKind, duration: Duration, result: Result<(), &RenderError>) {
        match result {
            Ok(()) => self.jobs_completed.increment(1),
            Err(err) => {
                self.jobs_failed.increment(1);
                match err {
                    RenderError::RendererTimeout(_) => self.timeouts.increment(1),
                    RenderError::RendererCrash => self.crashes.increment(1),
                    RenderError::Network(_) => self.network_errors.increment(1),
                    _ => {}
                }
            }
        }

        self.job_duration.record(duration.as_secs_f64());
        tracing::trace!(kind = %kind, ?duration, "job recorded");
    }

    pub fn record_replacement(&self) {
        self.engine_replacements.increment(1);
    }

    pub fn set_busy_engines(&self, busy: usize) {
        self.busy_engines.set(busy as f64);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the Prometheus recorder globally. Call before building
/// [`Metrics`] so its handles bind to the recorder.
pub fn install_prometheus() -> Result<PrometheusHandle, RenderError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| RenderError::Configuration(format!("metrics recorder: {e}")))?;

    info!("Prometheus recorder installed");
    Ok(handle)
}
