//! Per-instance request counters and per-service aggregation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::load_balancer::{millis, RequestResult};

/// Aggregated counters for one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadBalancingStats {
    pub service_name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    #[serde(rename = "average_response_time_ms", with = "millis")]
    pub average_response_time: Duration,
    pub instance_request_counts: BTreeMap<String, u64>,
}

impl LoadBalancingStats {
    pub fn empty(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_response_time: Duration::ZERO,
            instance_request_counts: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct InstanceStats {
    service_name: String,
    selections: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    response_micros: AtomicU64,
}

impl InstanceStats {
    fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            selections: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            response_micros: AtomicU64::new(0),
        }
    }
}

/// Counters keyed by `service_id`. All counters only ever grow.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    instances: DashMap<String, Arc<InstanceStats>>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_selection(&self, service_name: &str, service_id: &str) {
        let stats = match self.instances.get(service_id) {
            Some(existing) => existing.value().clone(),
            None => self
                .instances
                .entry(service_id.to_string())
                .or_insert_with(|| Arc::new(InstanceStats::new(service_name)))
                .value()
                .clone(),
        };
        stats.selections.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a completed request into its instance's counters.
    ///
    /// Returns false if the instance was never selected; such results are dropped.
    pub fn report(&self, result: &RequestResult) -> bool {
        let Some(stats) = self.instances.get(&result.service_id).map(|r| r.value().clone()) else {
            return false;
        };

        if result.success {
            stats.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.failures.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(result.response_time.as_micros()).unwrap_or(u64::MAX);
        // saturate rather than wrap
        let _ = stats
            .response_micros
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| {
                Some(total.saturating_add(micros))
            });
        true
    }

    /// Totals over every instance of `service_name` (case-insensitive). Zeroed if none.
    pub fn snapshot(&self, service_name: &str) -> LoadBalancingStats {
        let matching: Vec<(String, Arc<InstanceStats>)> = self
            .instances
            .iter()
            .filter(|r| r.value().service_name.eq_ignore_ascii_case(service_name))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let mut out = LoadBalancingStats::empty(service_name);
        let mut response_micros: u64 = 0;
        for (service_id, stats) in matching {
            let selections = stats.selections.load(Ordering::Relaxed);
            out.total_requests += selections;
            out.successful_requests += stats.successes.load(Ordering::Relaxed);
            out.failed_requests += stats.failures.load(Ordering::Relaxed);
            response_micros = response_micros.saturating_add(stats.response_micros.load(Ordering::Relaxed));
            out.instance_request_counts.insert(service_id, selections);
        }

        if out.total_requests > 0 {
            out.average_response_time = Duration::from_micros(response_micros / out.total_requests);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_service_is_zeroed() {
        let recorder = StatsRecorder::new();
        let stats = recorder.snapshot("unknown");
        assert_eq!(stats, LoadBalancingStats::empty("unknown"));
        assert_eq!(stats.service_name, "unknown");
        assert!(stats.instance_request_counts.is_empty());
    }

    #[test]
    fn test_aggregates_instances_of_service() {
        let recorder = StatsRecorder::new();
        recorder.record_selection("orders", "o1");
        recorder.record_selection("orders", "o1");
        recorder.record_selection("orders", "o2");
        recorder.record_selection("billing", "b1");

        assert!(recorder.report(&RequestResult::success("o1", Duration::from_millis(10))));
        assert!(recorder.report(&RequestResult::failure("o2", Duration::from_millis(30), "boom")));

        let stats = recorder.snapshot("Orders");
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.failed_requests, 1);
        // 40ms reported over 3 requests
        assert_eq!(stats.average_response_time, Duration::from_micros(13_333));
        assert_eq!(stats.instance_request_counts.get("o1"), Some(&2));
        assert_eq!(stats.instance_request_counts.get("o2"), Some(&1));
        assert!(!stats.instance_request_counts.contains_key("b1"));
    }

    #[test]
    fn test_result_for_unselected_instance_dropped() {
        let recorder = StatsRecorder::new();
        assert!(!recorder.report(&RequestResult::success("ghost", Duration::from_millis(5))));
        assert_eq!(recorder.snapshot("orders").successful_requests, 0);
    }

    #[test]
    fn test_serializes_average_as_millis() {
        let recorder = StatsRecorder::new();
        recorder.record_selection("orders", "o1");
        recorder.report(&RequestResult::success("o1", Duration::from_micros(1500)));

        let json = serde_json::to_value(recorder.snapshot("orders")).unwrap();
        assert_eq!(json["average_response_time_ms"], 1.5);
        assert_eq!(json["instance_request_counts"]["o1"], 1);
    }
}
