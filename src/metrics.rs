//! Driver Metrics
//!
//! Prometheus collectors for transitions and evictions, registered on a
//! registry owned by the driver and rendered by the `/metrics` endpoint.

use crate::error::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Collectors exposed by the driver
pub struct DriverMetrics {
    registry: Registry,
    transitions: IntCounterVec,
    evictions: IntCounterVec,
    sweep_duration: Histogram,
    remaining_pods: IntGauge,
    active_drain: IntGauge,
}

impl DriverMetrics {
    /// Create and register all collectors
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let transitions = IntCounterVec::new(
            Opts::new(
                "drain_driver_transitions_total",
                "Lifecycle transition calls by transition, phase and outcome",
            ),
            &["transition", "phase", "outcome"],
        )?;
        let evictions = IntCounterVec::new(
            Opts::new("drain_driver_evictions_total", "Pod eviction attempts by outcome"),
            &["outcome"],
        )?;
        let sweep_duration = Histogram::with_opts(
            HistogramOpts::new(
                "drain_driver_sweep_duration_seconds",
                "Wall-clock duration of background eviction sweeps",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        )?;
        let remaining_pods = IntGauge::new(
            "drain_driver_remaining_pods",
            "Evictable pods observed on the node at the last drain poll",
        )?;
        let active_drain = IntGauge::new(
            "drain_driver_active_drain",
            "1 while a drain event is being tracked",
        )?;

        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(evictions.clone()))?;
        registry.register(Box::new(sweep_duration.clone()))?;
        registry.register(Box::new(remaining_pods.clone()))?;
        registry.register(Box::new(active_drain.clone()))?;

        Ok(Self {
            registry,
            transitions,
            evictions,
            sweep_duration,
            remaining_pods,
            active_drain,
        })
    }

    pub fn record_transition(&self, transition: &str, phase: &str, outcome: &str) {
        self.transitions
            .with_label_values(&[transition, phase, outcome])
            .inc();
    }

    pub fn record_eviction(&self, outcome: &str) {
        self.evictions.with_label_values(&[outcome]).inc();
    }

    pub fn observe_sweep(&self, seconds: f64) {
        self.sweep_duration.observe(seconds);
    }

    pub fn set_remaining_pods(&self, count: usize) {
        self.remaining_pods.set(count as i64);
    }

    pub fn set_active_drain(&self, active: bool) {
        self.active_drain.set(i64::from(active));
    }

    /// Render all collectors in the text exposition format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }

    #[cfg(test)]
    pub(crate) fn transition_count(&self, transition: &str, phase: &str, outcome: &str) -> u64 {
        self.transitions
            .with_label_values(&[transition, phase, outcome])
            .get()
    }

    #[cfg(test)]
    pub(crate) fn eviction_count(&self, outcome: &str) -> u64 {
        self.evictions.with_label_values(&[outcome]).get()
    }

    #[cfg(test)]
    pub(crate) fn sweeps_finished(&self) -> u64 {
        self.sweep_duration.get_sample_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_collectors() {
        let metrics = DriverMetrics::new().unwrap();
        metrics.record_transition("drain", "start", "started");
        metrics.record_eviction("evicted");
        metrics.set_remaining_pods(3);

        let (content_type, body) = metrics.encode().unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("drain_driver_transitions_total"));
        assert!(text.contains("drain_driver_evictions_total{outcome=\"evicted\"} 1"));
        assert!(text.contains("drain_driver_remaining_pods 3"));
    }
}
