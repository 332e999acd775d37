use crate::PoolStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

impl HealthLevel {
    fn worst(levels: &[HealthLevel]) -> HealthLevel {
        if levels.contains(&HealthLevel::Critical) {
            HealthLevel::Critical
        } else if levels.contains(&HealthLevel::Warning) {
            HealthLevel::Warning
        } else {
            HealthLevel::Healthy
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Queued jobs before the queue is reported as a warning
    pub queue_warning: usize,
    pub queue_critical: usize,
    /// Share of slots without an engine before the pool degrades
    pub empty_warning: f64,
    pub empty_critical: f64,
    /// Share of busy slots reported as a warning
    pub utilization_warning: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            queue_warning: 100,
            queue_critical: 1000,
            empty_warning: 0.2,
            empty_critical: 0.5,
            utilization_warning: 0.9,
        }
    }
}

/// Pool and queue counters at one instant
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStats {
    pub pool: PoolStats,
    pub pending: usize,
    pub in_flight: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub overall: HealthLevel,
    pub pool: HealthLevel,
    pub queue: HealthLevel,
    pub stats: ServiceStats,
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}

pub fn assess(stats: &ServiceStats, thresholds: &HealthThresholds, uptime: Duration) -> HealthStatus {
    let pool = assess_pool(&stats.pool, thresholds);
    let queue = assess_queue(stats.pending, thresholds);

    HealthStatus {
        overall: HealthLevel::worst(&[pool, queue]),
        pool,
        queue,
        stats: stats.clone(),
        uptime_secs: uptime.as_secs(),
        timestamp: Utc::now(),
    }
}

fn assess_pool(stats: &PoolStats, thresholds: &HealthThresholds) -> HealthLevel {
    if stats.total == 0 {
        error!("Pool health critical: no slots");
        return HealthLevel::Critical;
    }

    let empty_ratio = stats.empty as f64 / stats.total as f64;
    if empty_ratio >= thresholds.empty_critical {
        error!(
            "Pool health critical: {:.0}% of slots have no engine",
            empty_ratio * 100.0
        );
        return HealthLevel::Critical;
    } else if empty_ratio >= thresholds.empty_warning {
        warn!(
            "Pool health warning: {:.0}% of slots have no engine",
            empty_ratio * 100.0
        );
        return HealthLevel::Warning;
    }

    let utilization = stats.busy as f64 / stats.total as f64;
    if utilization >= thresholds.utilization_warning {
        warn!("Pool high utilization: {:.0}%", utilization * 100.0);
        return HealthLevel::Warning;
    }

    HealthLevel::Healthy
}

fn assess_queue(pending: usize, thresholds: &HealthThresholds) -> HealthLevel {
    if pending >= thresholds.queue_critical {
        error!("Queue health critical: {} jobs waiting", pending);
        HealthLevel::Critical
    } else if pending >= thresholds.queue_warning {
        warn!("Queue health warning: {} jobs waiting", pending);
        HealthLevel::Warning
    } else {
        HealthLevel::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: usize, busy: usize, empty: usize, pending: usize) -> ServiceStats {
        ServiceStats {
            pool: PoolStats {
                total,
                busy,
                idle: total - busy - empty,
                empty,
                ..Default::default()
            },
            pending,
            in_flight: busy,
            capacity: total,
        }
    }

    #[test]
    fn test_idle_pool_is_healthy() {
        let status = assess(&stats(10, 2, 0, 0), &HealthThresholds::default(), Duration::from_secs(5));
        assert_eq!(status.overall, HealthLevel::Healthy);
        assert_eq!(status.uptime_secs, 5);
    }

    #[test]
    fn test_saturation_and_backlog() {
        let thresholds = HealthThresholds::default();

        let status = assess(&stats(10, 10, 0, 5), &thresholds, Duration::ZERO);
        assert_eq!(status.pool, HealthLevel::Warning);
        assert_eq!(status.overall, HealthLevel::Warning);

        let status = assess(&stats(10, 10, 0, 5000), &thresholds, Duration::ZERO);
        assert_eq!(status.queue, HealthLevel::Critical);
        assert_eq!(status.overall, HealthLevel::Critical);
    }

    #[test]
    fn test_empty_slots_degrade_pool() {
        let thresholds = HealthThresholds::default();
        assert_eq!(
            assess(&stats(10, 0, 3, 0), &thresholds, Duration::ZERO).pool,
            HealthLevel::Warning
        );
        assert_eq!(
            assess(&stats(4, 0, 2, 0), &thresholds, Duration::ZERO).pool,
            HealthLevel::Critical
        );
    }

    #[test]
    fn test_serializes_lowercase_levels() {
        let status = assess(&stats(2, 0, 0, 0), &HealthThresholds::default(), Duration::ZERO);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["overall"], "healthy");
        assert_eq!(json["stats"]["pool"]["total"], 2);
    }
}
