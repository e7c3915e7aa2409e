//! Per-level operation statistics for isolation operations.
//!
//! Each hierarchy level owns one [`LevelStats`] accumulator behind its own
//! mutex, so concurrent requests at different levels never contend. Every
//! record is also forwarded to the `metrics` facade for whatever exporter the
//! host installs.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tenantscope_core::IsolationLevel;

/// Aggregate statistics for one hierarchy level.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LevelStats {
    pub operations: u64,
    pub successes: u64,
    pub failures: u64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub avg_latency_ms: f64,
    /// `failures / operations`, 0 when no operation was recorded.
    pub error_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// `cache_hits / (cache_hits + cache_misses)`, 0 when the cache was never consulted.
    pub hit_rate: f64,
}

impl LevelStats {
    #[allow(clippy::cast_precision_loss)]
    fn record(&mut self, latency_ms: f64, success: bool) {
        self.operations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if self.operations == 1 {
            self.min_latency_ms = latency_ms;
            self.max_latency_ms = latency_ms;
        } else {
            self.min_latency_ms = self.min_latency_ms.min(latency_ms);
            self.max_latency_ms = self.max_latency_ms.max(latency_ms);
        }
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / self.operations as f64;
        self.error_rate = self.failures as f64 / self.operations as f64;
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_cache(&mut self, hit: bool) {
        if hit {
            self.cache_hits += 1;
        } else {
            self.cache_misses += 1;
        }
        self.hit_rate = self.cache_hits as f64 / (self.cache_hits + self.cache_misses) as f64;
    }
}

/// Shared per-level statistics, one accumulator per [`IsolationLevel`].
#[derive(Debug, Default)]
pub struct IsolationMetrics {
    levels: [Mutex<LevelStats>; 4],
}

impl IsolationMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one operation at `level`.
    pub fn record_operation(&self, level: IsolationLevel, latency: Duration, success: bool) {
        let latency_ms = latency.as_secs_f64() * 1_000.0;
        self.levels[level.index()].lock().record(latency_ms, success);

        let outcome = if success { "success" } else { "failure" };
        metrics::counter!(
            "tenantscope_isolation_operations_total",
            "level" => level.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("tenantscope_isolation_latency_ms", "level" => level.as_str())
            .record(latency_ms);
    }

    /// Records one key-cache lookup at `level`.
    pub fn record_cache(&self, level: IsolationLevel, hit: bool) {
        self.levels[level.index()].lock().record_cache(hit);
        let result = if hit { "hit" } else { "miss" };
        metrics::counter!(
            "tenantscope_isolation_cache_total",
            "level" => level.as_str(),
            "result" => result
        )
        .increment(1);
    }

    /// Copy of the current statistics for `level`.
    #[must_use]
    pub fn snapshot(&self, level: IsolationLevel) -> LevelStats {
        *self.levels[level.index()].lock()
    }

    /// Copies of every level's statistics, shallowest first.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<(IsolationLevel, LevelStats)> {
        IsolationLevel::ALL
            .iter()
            .map(|level| (*level, self.snapshot(*level)))
            .collect()
    }

    /// Reinitializes every level.
    ///
    /// All level locks are held together so no reader sees a partially reset set.
    pub fn reset_stats(&self) {
        let mut guards: Vec<_> = self.levels.iter().map(Mutex::lock).collect();
        for stats in &mut guards {
            **stats = LevelStats::default();
        }
        tracing::debug!("isolation stats reset");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn streaming_average_and_bounds() {
        let metrics = IsolationMetrics::new();
        for ms in [10, 20, 30] {
            metrics.record_operation(IsolationLevel::Tenant, Duration::from_millis(ms), true);
        }
        let stats = metrics.snapshot(IsolationLevel::Tenant);
        assert_eq!(stats.operations, 3);
        assert_eq!(stats.successes, 3);
        assert!((stats.avg_latency_ms - 20.0).abs() < 1e-9);
        assert!((stats.min_latency_ms - 10.0).abs() < 1e-9);
        assert!((stats.max_latency_ms - 30.0).abs() < 1e-9);
        assert!(stats.error_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn error_rate_tracks_failures() {
        let metrics = IsolationMetrics::new();
        metrics.record_operation(IsolationLevel::User, Duration::ZERO, true);
        metrics.record_operation(IsolationLevel::User, Duration::ZERO, false);
        metrics.record_operation(IsolationLevel::User, Duration::ZERO, false);
        metrics.record_operation(IsolationLevel::User, Duration::ZERO, true);
        let stats = metrics.snapshot(IsolationLevel::User);
        assert_eq!(stats.failures, 2);
        assert!((stats.error_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn levels_are_independent() {
        let metrics = IsolationMetrics::new();
        metrics.record_operation(IsolationLevel::Organization, Duration::ZERO, true);
        assert_eq!(metrics.snapshot(IsolationLevel::Organization).operations, 1);
        assert_eq!(metrics.snapshot(IsolationLevel::Department).operations, 0);
    }

    #[test]
    fn cache_hit_rate() {
        let metrics = IsolationMetrics::new();
        metrics.record_cache(IsolationLevel::Tenant, false);
        metrics.record_cache(IsolationLevel::Tenant, true);
        metrics.record_cache(IsolationLevel::Tenant, true);
        metrics.record_cache(IsolationLevel::Tenant, true);
        let stats = metrics.snapshot(IsolationLevel::Tenant);
        assert_eq!(stats.cache_hits, 3);
        assert_eq!(stats.cache_misses, 1);
        assert!((stats.hit_rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_all_levels() {
        let metrics = IsolationMetrics::new();
        for level in IsolationLevel::ALL {
            metrics.record_operation(level, Duration::from_millis(1), false);
            metrics.record_cache(level, true);
        }
        metrics.reset_stats();
        for (_, stats) in metrics.snapshot_all() {
            assert_eq!(stats, LevelStats::default());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let metrics = Arc::new(IsolationMetrics::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let metrics = Arc::clone(&metrics);
            tasks.push(tokio::spawn(async move {
                for _ in 0..500 {
                    metrics.record_operation(IsolationLevel::Department, Duration::ZERO, true);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(metrics.snapshot(IsolationLevel::Department).operations, 4_000);
    }
}
