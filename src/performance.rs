//! Rolling metric history and trend detection per agent.

use crate::registry::AgentRegistry;
use crate::types::{AgentId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// A single metric observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// The agent the sample belongs to
    pub agent_id: AgentId,

    /// Metric name (e.g. "conversion_rate")
    pub metric: String,

    /// Observed value
    pub value: f64,

    /// When the sample was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Direction of a metric over its recent window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

#[derive(Debug, Default)]
struct TrackerInner {
    /// Samples in arrival order per (agent, metric)
    samples: HashMap<AgentId, BTreeMap<String, Vec<PerformanceSample>>>,
    /// Success / failure counters per agent
    outcomes: HashMap<AgentId, (u64, u64)>,
    /// Strategies each agent has already tried
    applied: HashMap<AgentId, HashSet<String>>,
}

/// Tracks metric history, outcome counters, and applied strategies.
#[derive(Debug)]
pub struct PerformanceTracker {
    registry: Arc<AgentRegistry>,
    trend_window: usize,
    inner: RwLock<TrackerInner>,
}

impl PerformanceTracker {
    /// Create a tracker using `trend_window` trailing samples for trends.
    pub fn new(registry: Arc<AgentRegistry>, trend_window: usize) -> Self {
        Self {
            registry,
            trend_window,
            inner: RwLock::new(TrackerInner::default()),
        }
    }

    /// Append a metric sample for an agent.
    pub fn record_metric(&self, agent_id: &str, metric: &str, value: f64) -> Result<()> {
        self.registry.get(agent_id)?;

        let sample = PerformanceSample {
            agent_id: agent_id.to_string(),
            metric: metric.to_string(),
            value,
            recorded_at: Utc::now(),
        };

        let mut inner = self.inner.write().expect("tracker lock poisoned");
        inner
            .samples
            .entry(agent_id.to_string())
            .or_default()
            .entry(metric.to_string())
            .or_default()
            .push(sample);
        Ok(())
    }

    /// Record a success/failure outcome and derive a `success_rate` sample.
    pub fn record_outcome(&self, agent_id: &str, success: bool) -> Result<()> {
        self.registry.get(agent_id)?;

        let rate = {
            let mut inner = self.inner.write().expect("tracker lock poisoned");
            let (successes, failures) = inner.outcomes.entry(agent_id.to_string()).or_insert((0, 0));
            if success {
                *successes += 1;
            } else {
                *failures += 1;
            }
            *successes as f64 / (*successes + *failures) as f64
        };

        self.record_metric(agent_id, "success_rate", rate)
    }

    /// Trend for a metric over the configured window.
    pub fn trend(&self, agent_id: &str, metric: &str) -> Trend {
        self.trend_with_window(agent_id, metric, self.trend_window)
    }

    /// Trend over the last `window` samples: the mean of the second half is
    /// compared against the mean of the first half, with a 5% band counting
    /// as stable. Fewer than two samples is `InsufficientData`.
    pub fn trend_with_window(&self, agent_id: &str, metric: &str, window: usize) -> Trend {
        let inner = self.inner.read().expect("tracker lock poisoned");
        let samples = match inner.samples.get(agent_id).and_then(|m| m.get(metric)) {
            Some(s) if s.len() >= 2 => s,
            _ => return Trend::InsufficientData,
        };

        let start = samples.len().saturating_sub(window);
        let recent = &samples[start..];
        let mid = recent.len() / 2;
        let first_mean = mean(&recent[..mid]);
        let second_mean = mean(&recent[mid..]);

        if first_mean == 0.0 {
            return if second_mean > 0.0 {
                Trend::Improving
            } else if second_mean < 0.0 {
                Trend::Declining
            } else {
                Trend::Stable
            };
        }

        let change = (second_mean - first_mean) / first_mean.abs();
        if change > 0.05 {
            Trend::Improving
        } else if change < -0.05 {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    /// Metric names an agent has samples for.
    pub fn metrics_for(&self, agent_id: &str) -> Vec<String> {
        let inner = self.inner.read().expect("tracker lock poisoned");
        inner
            .samples
            .get(agent_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of samples recorded for (agent, metric).
    pub fn sample_count(&self, agent_id: &str, metric: &str) -> usize {
        let inner = self.inner.read().expect("tracker lock poisoned");
        inner
            .samples
            .get(agent_id)
            .and_then(|m| m.get(metric))
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Record that an agent has tried a strategy.
    pub fn mark_applied(&self, agent_id: &str, strategy: &str) -> Result<()> {
        self.registry.get(agent_id)?;
        let mut inner = self.inner.write().expect("tracker lock poisoned");
        inner
            .applied
            .entry(agent_id.to_string())
            .or_default()
            .insert(strategy.to_string());
        Ok(())
    }

    /// Strategies an agent has already tried.
    pub fn applied(&self, agent_id: &str) -> HashSet<String> {
        let inner = self.inner.read().expect("tracker lock poisoned");
        inner.applied.get(agent_id).cloned().unwrap_or_default()
    }
}

fn mean(samples: &[PerformanceSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HiveConfig;

    fn tracker() -> PerformanceTracker {
        let config = Arc::new(HiveConfig::default());
        let registry = Arc::new(AgentRegistry::new(config.clone()));
        registry.register("queen", "overseer", 10).unwrap();
        registry.register("worker-1", "optimization", 3).unwrap();
        PerformanceTracker::new(registry, config.trend_window)
    }

    #[test]
    fn test_trend_monotonic_sequences() {
        let tracker = tracker();

        for i in 0..10 {
            tracker
                .record_metric("worker-1", "revenue", 100.0 + i as f64 * 10.0)
                .unwrap();
        }
        assert_eq!(tracker.trend("worker-1", "revenue"), Trend::Improving);

        for i in 0..10 {
            tracker
                .record_metric("worker-1", "conversion_rate", 0.5 - i as f64 * 0.02)
                .unwrap();
        }
        assert_eq!(tracker.trend("worker-1", "conversion_rate"), Trend::Declining);

        for _ in 0..10 {
            tracker.record_metric("worker-1", "churn", 0.1).unwrap();
        }
        assert_eq!(tracker.trend("worker-1", "churn"), Trend::Stable);
    }

    #[test]
    fn test_trend_insufficient_data() {
        let tracker = tracker();
        assert_eq!(
            tracker.trend("worker-1", "revenue"),
            Trend::InsufficientData
        );
        tracker.record_metric("worker-1", "revenue", 1.0).unwrap();
        assert_eq!(
            tracker.trend("worker-1", "revenue"),
            Trend::InsufficientData
        );
    }

    #[test]
    fn test_trend_uses_trailing_window_only() {
        let tracker = tracker();
        // Old improving run, then a decline inside the window.
        for i in 0..20 {
            tracker
                .record_metric("worker-1", "revenue", i as f64)
                .unwrap();
        }
        for i in 0..10 {
            tracker
                .record_metric("worker-1", "revenue", 100.0 - i as f64 * 10.0)
                .unwrap();
        }
        assert_eq!(
            tracker.trend_with_window("worker-1", "revenue", 10),
            Trend::Declining
        );
    }

    #[test]
    fn test_record_outcome_derives_success_rate() {
        let tracker = tracker();
        tracker.record_outcome("worker-1", true).unwrap();
        tracker.record_outcome("worker-1", true).unwrap();
        tracker.record_outcome("worker-1", false).unwrap();

        assert_eq!(tracker.sample_count("worker-1", "success_rate"), 3);
        // Counters: 2 successes out of 3.
        let metrics = tracker.metrics_for("worker-1");
        assert_eq!(metrics, vec!["success_rate"]);
    }

    #[test]
    fn test_unknown_agent_rejected() {
        let tracker = tracker();
        assert!(tracker.record_metric("ghost", "revenue", 1.0).is_err());
        assert!(tracker.record_outcome("ghost", true).is_err());
        assert!(tracker.mark_applied("ghost", "anything").is_err());
    }

    #[test]
    fn test_mark_applied() {
        let tracker = tracker();
        tracker.mark_applied("worker-1", "content_marketing").unwrap();
        tracker.mark_applied("worker-1", "content_marketing").unwrap();

        let applied = tracker.applied("worker-1");
        assert_eq!(applied.len(), 1);
        assert!(applied.contains("content_marketing"));
    }
}
