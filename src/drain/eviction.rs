//! Eviction Coordinator
//!
//! Lists the evictable pods on a node and evicts them one at a time.
//! Sequential eviction bounds the rate of disruption. A pod that refuses to
//! leave (e.g. blocked by a PodDisruptionBudget) is recorded and skipped so
//! it never holds up the rest of the node.
//!
//! A sweep runs as a detached background task with its own cancellation
//! token and a fixed deadline. It outlives the call that started it and is
//! never the judge of drain completion; the End phase re-reads the pods.

use crate::domain::ports::{ClusterAccessRef, EvictOutcome, PodRecord};
use crate::drain::filter::skip_reason;
use crate::drain::progress::{DrainProgress, SweepJoinHandle, SweepReport};
use crate::error::{Error, Result};
use crate::metrics::DriverMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Upper bound on the lifetime of one background sweep
pub const SWEEP_DEADLINE: Duration = Duration::from_secs(10 * 60);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for evictions
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    /// Grace period override; `None` keeps each pod's own
    pub grace_period_seconds: Option<u32>,
    /// Lifetime ceiling of a background sweep
    pub sweep_deadline: Duration,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: None,
            sweep_deadline: SWEEP_DEADLINE,
        }
    }
}

/// Interpret the `--grace-period` flag, where any negative value means
/// "use the pod's own grace period"
pub fn grace_period_from_flag(flag: i64) -> Result<Option<u32>> {
    if flag < 0 {
        return Ok(None);
    }
    u32::try_from(flag)
        .map(Some)
        .map_err(|_| Error::Configuration(format!("grace period {} is out of range", flag)))
}

// =============================================================================
// Eviction Coordinator
// =============================================================================

/// Runs eviction sweeps against a node
pub struct EvictionCoordinator {
    cluster: ClusterAccessRef,
    progress: Arc<DrainProgress>,
    metrics: Arc<DriverMetrics>,
    config: EvictionConfig,
}

impl EvictionCoordinator {
    pub fn new(
        cluster: ClusterAccessRef,
        progress: Arc<DrainProgress>,
        metrics: Arc<DriverMetrics>,
        config: EvictionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            progress,
            metrics,
            config,
        })
    }

    /// Pods on `node_name` that a drain still has to evict, read live
    pub async fn list_eligible(&self, node_name: &str) -> Result<Vec<PodRecord>> {
        let pods = self.cluster.list_pods_on_node(node_name).await?;

        Ok(pods
            .into_iter()
            .filter(|pod| match skip_reason(pod) {
                Some(reason) => {
                    trace!(pod = %pod.pod_ref(), %reason, "Skipping pod");
                    false
                }
                None => true,
            })
            .collect())
    }

    /// Evict every eligible pod on the node once
    pub async fn sweep(&self, event: &str, node_name: &str) -> SweepReport {
        let pods = match self.list_eligible(node_name).await {
            Ok(pods) => pods,
            Err(e) => {
                error!(node = node_name, error = %e, "Failed to list pods for eviction");
                return SweepReport::default();
            }
        };

        let mut report = SweepReport {
            total: pods.len(),
            ..Default::default()
        };

        for pod in pods {
            let pod_ref = pod.pod_ref();
            match self
                .cluster
                .evict(&pod_ref, self.config.grace_period_seconds)
                .await
            {
                Ok(outcome) => {
                    report.evicted += 1;
                    self.progress.clear_failure(event, &pod_ref);
                    let label = match outcome {
                        EvictOutcome::Evicted => "evicted",
                        EvictOutcome::AlreadyGone => "gone",
                    };
                    self.metrics.record_eviction(label);
                    debug!(pod = %pod_ref, outcome = label, "Pod evicted");
                }
                Err(e) => {
                    report.failed += 1;
                    self.progress.record_failure(event, &pod_ref, &e.to_string());
                    self.metrics.record_eviction("failed");
                    debug!(pod = %pod_ref, error = %e, "Eviction failed");
                }
            }
        }

        report
    }

    /// Launch a sweep in the background. The task ends when the sweep
    /// finishes, when `token` is cancelled, or at the sweep deadline,
    /// whichever comes first.
    pub fn spawn_sweep(
        self: &Arc<Self>,
        event: &str,
        node_name: &str,
        token: CancellationToken,
    ) -> SweepJoinHandle {
        let this = Arc::clone(self);
        let event = event.to_string();
        let node = node_name.to_string();
        let span = info_span!("eviction_sweep", event = %event, node = %node);

        tokio::spawn(
            async move {
                let started = Instant::now();
                let deadline = this.config.sweep_deadline;

                let outcome = tokio::select! {
                    _ = token.cancelled() => {
                        info!("Background eviction cancelled");
                        None
                    }
                    result = tokio::time::timeout(deadline, this.sweep(&event, &node)) => match result {
                        Ok(report) => Some(report),
                        Err(_) => {
                            warn!(deadline_secs = deadline.as_secs(), "Background eviction abandoned at deadline");
                            None
                        }
                    }
                };

                this.metrics.observe_sweep(started.elapsed().as_secs_f64());
                if let Some(report) = outcome {
                    info!(
                        total = report.total,
                        evicted = report.evicted,
                        failed = report.failed,
                        "Background eviction pass complete"
                    );
                    this.progress.finish_sweep(&event, report);
                }
                outcome
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::domain::ports::PodRef;

    fn coordinator(cluster: ClusterAccessRef, progress: Arc<DrainProgress>) -> Arc<EvictionCoordinator> {
        EvictionCoordinator::new(
            cluster,
            progress,
            Arc::new(DriverMetrics::new().unwrap()),
            EvictionConfig::default(),
        )
    }

    #[test]
    fn test_grace_period_flag() {
        assert_eq!(grace_period_from_flag(-1).unwrap(), None);
        assert_eq!(grace_period_from_flag(0).unwrap(), Some(0));
        assert_eq!(grace_period_from_flag(30).unwrap(), Some(30));
        assert!(grace_period_from_flag(i64::MAX).is_err());
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failures() {
        let cluster = InMemoryCluster::new();
        for i in 0..5 {
            cluster.add_pod(PodRecord::new("default", format!("web-{}", i), "w1"));
        }
        cluster.fail_evictions_for(&PodRef::new("default", "web-1"), "Cannot evict pod as it would violate the pod's disruption budget.");
        cluster.fail_evictions_for(&PodRef::new("default", "web-3"), "connection reset by peer");

        let progress = Arc::new(DrainProgress::new());
        progress.begin("event-1", |_| tokio::spawn(async { None }));
        let evictions = coordinator(cluster.clone(), progress.clone());

        let report = evictions.sweep("event-1", "w1").await;

        assert_eq!(report, SweepReport { evicted: 3, failed: 2, total: 5 });
        assert_eq!(cluster.evicted().len(), 3);

        let errors = progress.snapshot().eviction_errors;
        assert_eq!(errors.len(), 2);
        assert!(errors.contains_key("default/web-1"));
        assert!(errors.contains_key("default/web-3"));
    }

    #[tokio::test]
    async fn test_sweep_skips_ineligible_pods() {
        let cluster = InMemoryCluster::new();
        cluster.add_pod(PodRecord::new("kube-system", "etcd-w1", "w1").mirrored());
        cluster.add_pod(PodRecord::new("kube-system", "kube-proxy-abc", "w1").with_owner("DaemonSet"));
        cluster.add_pod(PodRecord::new("default", "web-0", "w1").with_owner("ReplicaSet"));
        cluster.add_pod(PodRecord::new("default", "web-1", "w2"));

        let progress = Arc::new(DrainProgress::new());
        let evictions = coordinator(cluster.clone(), progress);

        let report = evictions.sweep("event-1", "w1").await;

        assert_eq!(report, SweepReport { evicted: 1, failed: 0, total: 1 });
        assert_eq!(cluster.evicted(), vec![PodRef::new("default", "web-0")]);
    }

    #[tokio::test]
    async fn test_sweep_passes_grace_period() {
        let cluster = InMemoryCluster::new();
        cluster.add_pod(PodRecord::new("default", "web-0", "w1"));

        let evictions = EvictionCoordinator::new(
            cluster.clone(),
            Arc::new(DrainProgress::new()),
            Arc::new(DriverMetrics::new().unwrap()),
            EvictionConfig {
                grace_period_seconds: Some(15),
                ..Default::default()
            },
        );
        evictions.sweep("event-1", "w1").await;

        assert_eq!(cluster.grace_periods(), vec![Some(15)]);
    }

    #[tokio::test]
    async fn test_listing_failure_yields_empty_report() {
        let cluster = InMemoryCluster::new();
        cluster.add_pod(PodRecord::new("default", "web-0", "w1"));
        cluster.fail_listing(Some("the server is currently unable to handle the request"));

        let evictions = coordinator(cluster.clone(), Arc::new(DrainProgress::new()));
        let report = evictions.sweep("event-1", "w1").await;

        assert_eq!(report, SweepReport::default());
        assert!(cluster.evicted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_sweep_is_abandoned_at_deadline() {
        let cluster = InMemoryCluster::new();
        cluster.add_pod(PodRecord::new("default", "web-0", "w1"));
        cluster.stall_evictions();

        let evictions = coordinator(cluster, Arc::new(DrainProgress::new()));
        let handle = evictions.spawn_sweep("event-1", "w1", CancellationToken::new());

        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_sweep_stops() {
        let cluster = InMemoryCluster::new();
        cluster.add_pod(PodRecord::new("default", "web-0", "w1"));
        cluster.stall_evictions();

        let evictions = coordinator(cluster, Arc::new(DrainProgress::new()));
        let token = CancellationToken::new();
        let handle = evictions.spawn_sweep("event-1", "w1", token.clone());
        token.cancel();

        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_finished_sweep_reports_to_progress() {
        let cluster = InMemoryCluster::new();
        cluster.add_pod(PodRecord::new("default", "web-0", "w1"));

        let progress = Arc::new(DrainProgress::new());
        let evictions = coordinator(cluster, progress.clone());
        let launcher = evictions.clone();
        progress.begin("event-1", |token| launcher.spawn_sweep("event-1", "w1", token));

        let report = progress.take_sweep().unwrap().await.unwrap();
        assert_eq!(report, Some(SweepReport { evicted: 1, failed: 0, total: 1 }));
        assert_eq!(progress.snapshot().last_sweep, report);
    }
}
