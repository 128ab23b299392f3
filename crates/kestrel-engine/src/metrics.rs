//! Per-tool invocation metrics.
//!
//! The executor records one entry per finished step; the collector derives
//! error rates and a coarse health status per tool. Counters live behind a
//! mutex on the context, so concurrent steps share one collector.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;

/// Counters for one tool, accumulated across runs of a context.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ToolMetrics {
    /// Wrapped invocations that reached a terminal outcome.
    pub invocations: u64,
    /// Invocations that ultimately succeeded.
    pub successes: u64,
    /// Invocations that ultimately failed.
    pub failures: u64,
    /// Adapter calls beyond the first attempt of each invocation.
    pub retries: u64,
    /// Total wall-clock invocation time in milliseconds.
    pub total_duration_ms: u64,
}

impl ToolMetrics {
    /// Fraction of invocations that failed, in `0.0..=1.0`.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.failures as f64 / self.invocations as f64
        }
    }

    /// Mean wall-clock time per invocation in milliseconds.
    #[must_use]
    pub fn avg_duration_ms(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.invocations as f64
        }
    }

    /// Coarse health classification from the error rate.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        HealthStatus::from_error_rate(self.error_rate())
    }
}

/// Coarse health classification of a tool or a whole context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Error rate below 10%.
    Healthy,
    /// Error rate below 50%.
    Degraded,
    /// Error rate at or above 50%.
    Critical,
}

impl HealthStatus {
    fn from_error_rate(rate: f64) -> Self {
        if rate < 0.1 {
            Self::Healthy
        } else if rate < 0.5 {
            Self::Degraded
        } else {
            Self::Critical
        }
    }
}

/// Shared collector of per-tool metrics.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    tools: Mutex<HashMap<String, ToolMetrics>>,
}

impl MetricsCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one finished invocation.
    ///
    /// `attempts` counts adapter calls made; everything past the first is a
    /// retry. A breaker refusal arrives as a failure with zero attempts.
    pub fn record(&self, tool: &str, success: bool, attempts: u32, duration_ms: u64) {
        if let Ok(mut tools) = self.tools.lock() {
            let entry = tools.entry(tool.to_owned()).or_default();
            entry.invocations += 1;
            if success {
                entry.successes += 1;
            } else {
                entry.failures += 1;
            }
            entry.retries += u64::from(attempts.saturating_sub(1));
            entry.total_duration_ms += duration_ms;
        }
    }

    /// Counters for one tool, when any invocation has been recorded.
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<ToolMetrics> {
        self.tools
            .lock()
            .ok()
            .and_then(|tools| tools.get(name).copied())
    }

    /// Every tool's counters, sorted by tool name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ToolMetrics> {
        self.tools.lock().map_or_else(
            |_| BTreeMap::new(),
            |tools| {
                tools
                    .iter()
                    .map(|(name, metrics)| (name.clone(), *metrics))
                    .collect()
            },
        )
    }

    /// Health of the whole context, from the aggregate error rate. An
    /// empty collector is healthy.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        let snapshot = self.snapshot();
        let invocations: u64 = snapshot.values().map(|metrics| metrics.invocations).sum();
        if invocations == 0 {
            return HealthStatus::Healthy;
        }
        let failures: u64 = snapshot.values().map(|metrics| metrics.failures).sum();
        HealthStatus::from_error_rate(failures as f64 / invocations as f64)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates_counters() {
        let collector = MetricsCollector::new();
        collector.record("get_weather", true, 1, 120);
        collector.record("get_weather", true, 3, 600);
        collector.record("get_weather", false, 4, 900);

        let metrics = collector.tool("get_weather").unwrap();
        assert_eq!(metrics.invocations, 3);
        assert_eq!(metrics.successes, 2);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.retries, 5);
        assert_eq!(metrics.total_duration_ms, 1620);
        assert!((metrics.avg_duration_ms() - 540.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_health_thresholds() {
        assert_eq!(HealthStatus::from_error_rate(0.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_error_rate(0.09), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_error_rate(0.1), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_error_rate(0.49), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_error_rate(0.5), HealthStatus::Critical);
    }

    #[test]
    fn test_empty_collector_is_healthy() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.health(), HealthStatus::Healthy);
        assert!(collector.tool("anything").is_none());
        assert!(collector.snapshot().is_empty());
    }

    #[test]
    fn test_aggregate_health_spans_tools() {
        let collector = MetricsCollector::new();
        collector.record("steady", true, 1, 10);
        collector.record("steady", true, 1, 10);
        collector.record("broken", false, 4, 50);
        collector.record("broken", false, 4, 50);

        assert_eq!(collector.tool("steady").unwrap().health(), HealthStatus::Healthy);
        assert_eq!(collector.tool("broken").unwrap().health(), HealthStatus::Critical);
        assert_eq!(collector.health(), HealthStatus::Critical);
    }
}
