//! Execution latency tracking.
//!
//! Every order placement, market fetch and full arbitrage execution is
//! timed here. Stats feed the `latency-report` command, the dashboard and
//! the validation report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const OP_ORDER_PLACEMENT: &str = "order_placement";
pub const OP_MARKET_FETCH: &str = "market_fetch";
pub const OP_WS_MESSAGE: &str = "ws_message";
pub const OP_FULL_EXECUTION: &str = "full_execution";
pub const OP_API_CALL: &str = "api_call";

const DEFAULT_CAPACITY: usize = 10_000;
const MIN_SUCCESS_RATE: f64 = 95.0;

/// Warning threshold in milliseconds for a known operation.
pub fn threshold_ms(operation: &str) -> Option<f64> {
    match operation {
        OP_ORDER_PLACEMENT => Some(500.0),
        OP_MARKET_FETCH => Some(1000.0),
        OP_WS_MESSAGE => Some(100.0),
        OP_FULL_EXECUTION => Some(2000.0),
        OP_API_CALL => Some(500.0),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyMeasurement {
    pub operation: String,
    pub latency_ms: f64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub operation: String,
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub std_dev_ms: f64,
    /// Percent of measurements that succeeded.
    pub success_rate: f64,
}

impl LatencyStats {
    /// Aggregate a batch of measurements for one operation.
    pub fn from_measurements(operation: &str, measurements: &[&LatencyMeasurement]) -> Self {
        let n = measurements.len();
        if n == 0 {
            return Self {
                operation: operation.to_string(),
                ..Default::default()
            };
        }
        let mut sorted: Vec<f64> = measurements.iter().map(|m| m.latency_ms).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        let std_dev = if n > 1 {
            let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };
        let successes = measurements.iter().filter(|m| m.success).count();

        Self {
            operation: operation.to_string(),
            count: n,
            min_ms: round2(sorted[0]),
            max_ms: round2(sorted[n - 1]),
            avg_ms: round2(mean),
            median_ms: round2(median),
            p95_ms: round2(percentile(&sorted, 0.95)),
            p99_ms: round2(percentile(&sorted, 0.99)),
            std_dev_ms: round2(std_dev),
            success_rate: round2(successes as f64 / n as f64 * 100.0),
        }
    }
}

/// Nearest-rank on an ascending slice: `sorted[floor(n * q)]`.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
    sorted[idx]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyAlert {
    pub operation: String,
    pub issue: String,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyReport {
    pub generated_at: DateTime<Utc>,
    pub total_measurements: usize,
    pub operations: Vec<LatencyStats>,
    pub alerts: Vec<LatencyAlert>,
}

impl LatencyReport {
    /// Build a report from stats alone, e.g. those persisted by the last run.
    pub fn from_stats(operations: Vec<LatencyStats>) -> Self {
        let mut alerts = Vec::new();
        for stats in &operations {
            if let Some(limit) = threshold_ms(&stats.operation) {
                if stats.p95_ms > limit {
                    alerts.push(LatencyAlert {
                        operation: stats.operation.clone(),
                        issue: "p95_latency_high".to_string(),
                        value: stats.p95_ms,
                        threshold: limit,
                    });
                }
            }
            if stats.count > 0 && stats.success_rate < MIN_SUCCESS_RATE {
                alerts.push(LatencyAlert {
                    operation: stats.operation.clone(),
                    issue: "low_success_rate".to_string(),
                    value: stats.success_rate,
                    threshold: MIN_SUCCESS_RATE,
                });
            }
        }
        Self {
            generated_at: Utc::now(),
            total_measurements: operations.iter().map(|s| s.count).sum(),
            operations,
            alerts,
        }
    }
}

/// Bounded, thread-safe store of latency measurements.
#[derive(Debug)]
pub struct LatencyLogger {
    capacity: usize,
    measurements: Mutex<VecDeque<LatencyMeasurement>>,
}

impl Default for LatencyLogger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LatencyLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            measurements: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LatencyMeasurement>> {
        // A panic mid-push leaves the deque consistent, so keep using it.
        self.measurements.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the time elapsed since `start`.
    pub fn record(&self, operation: &str, start: Instant, success: bool) -> f64 {
        let ms = duration_ms(start.elapsed());
        self.record_direct(operation, ms, success);
        ms
    }

    pub fn record_direct(&self, operation: &str, latency_ms: f64, success: bool) {
        match threshold_ms(operation) {
            Some(limit) if latency_ms > limit => {
                warn!(operation, latency_ms = round2(latency_ms), threshold_ms = limit, "High latency detected")
            }
            _ => debug!(operation, latency_ms = round2(latency_ms), "Latency recorded"),
        }

        let mut m = self.lock();
        m.push_back(LatencyMeasurement {
            operation: operation.to_string(),
            latency_ms,
            success,
            timestamp: Utc::now(),
        });
        while m.len() > self.capacity {
            m.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats_for(&self, operation: &str, since: Option<DateTime<Utc>>) -> LatencyStats {
        let m = self.lock();
        let matching: Vec<&LatencyMeasurement> = m
            .iter()
            .filter(|x| x.operation == operation && since.map_or(true, |s| x.timestamp >= s))
            .collect();
        LatencyStats::from_measurements(operation, &matching)
    }

    /// Stats for every operation seen, sorted by name.
    pub fn all_stats(&self) -> Vec<LatencyStats> {
        let operations: BTreeSet<String> = self.lock().iter().map(|m| m.operation.clone()).collect();
        operations.iter().map(|op| self.stats_for(op, None)).collect()
    }

    pub fn recent(&self, operation: Option<&str>, limit: usize) -> Vec<LatencyMeasurement> {
        let m = self.lock();
        let mut out: Vec<LatencyMeasurement> = m
            .iter()
            .rev()
            .filter(|x| operation.map_or(true, |op| x.operation == op))
            .take(limit)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    pub fn generate_report(&self) -> LatencyReport {
        LatencyReport::from_stats(self.all_stats())
    }

    /// Drop measurements older than `before`, or everything when `None`.
    pub fn clear(&self, before: Option<DateTime<Utc>>) -> usize {
        let mut m = self.lock();
        let original = m.len();
        match before {
            Some(cutoff) => m.retain(|x| x.timestamp >= cutoff),
            None => m.clear(),
        }
        original - m.len()
    }
}

pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_percentiles() {
        let logger = LatencyLogger::default();
        for i in 1..=100 {
            logger.record_direct(OP_ORDER_PLACEMENT, i as f64, i != 100);
        }
        let s = logger.stats_for(OP_ORDER_PLACEMENT, None);
        assert_eq!(s.count, 100);
        assert_eq!(s.min_ms, 1.0);
        assert_eq!(s.max_ms, 100.0);
        assert_eq!(s.avg_ms, 50.5);
        assert_eq!(s.median_ms, 50.5);
        // sorted[95] and sorted[99]
        assert_eq!(s.p95_ms, 96.0);
        assert_eq!(s.p99_ms, 100.0);
        assert_eq!(s.success_rate, 99.0);
        assert!(s.std_dev_ms > 28.0 && s.std_dev_ms < 30.0);
    }

    #[test]
    fn test_empty_and_single() {
        let logger = LatencyLogger::default();
        let s = logger.stats_for("nothing", None);
        assert_eq!(s.count, 0);
        assert_eq!(s.success_rate, 0.0);

        logger.record_direct(OP_API_CALL, 42.0, true);
        let s = logger.stats_for(OP_API_CALL, None);
        assert_eq!(s.std_dev_ms, 0.0);
        assert_eq!(s.p95_ms, 42.0);
    }

    #[test]
    fn test_capacity_cap() {
        let logger = LatencyLogger::new(5);
        for i in 0..12 {
            logger.record_direct(OP_API_CALL, i as f64, true);
        }
        assert_eq!(logger.len(), 5);
        assert_eq!(logger.stats_for(OP_API_CALL, None).min_ms, 7.0);
    }

    #[test]
    fn test_report_alerts() {
        let logger = LatencyLogger::default();
        for _ in 0..10 {
            logger.record_direct(OP_ORDER_PLACEMENT, 800.0, true);
            logger.record_direct(OP_MARKET_FETCH, 100.0, false);
        }
        let report = logger.generate_report();
        assert_eq!(report.total_measurements, 20);
        assert_eq!(report.operations.len(), 2);
        assert!(report
            .alerts
            .iter()
            .any(|a| a.operation == OP_ORDER_PLACEMENT && a.issue == "p95_latency_high"));
        assert!(report
            .alerts
            .iter()
            .any(|a| a.operation == OP_MARKET_FETCH && a.issue == "low_success_rate"));
    }

    #[test]
    fn test_record_timer_and_clear() {
        let logger = LatencyLogger::default();
        let ms = logger.record(OP_FULL_EXECUTION, Instant::now(), true);
        assert!(ms >= 0.0);
        assert_eq!(logger.recent(Some(OP_FULL_EXECUTION), 10).len(), 1);
        assert_eq!(logger.clear(None), 1);
        assert!(logger.is_empty());
    }
}
