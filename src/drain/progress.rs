//! Drain Progress State
//!
//! Process-local bookkeeping for the drain in flight: which event is being
//! drained, the last eviction error per pod, and the supervised sweep task.
//! Everything sits behind one lock so the active event and the error map
//! always change together. This state is diagnostic only; drain completion
//! is decided from live cluster state.

use crate::domain::ports::PodRef;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Counts from one eviction sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub evicted: usize,
    pub failed: usize,
    pub total: usize,
}

/// Handle of a running sweep. `None` from the task means it was cancelled
/// or abandoned at its deadline.
pub type SweepJoinHandle = JoinHandle<Option<SweepReport>>;

struct SweepTask {
    event: String,
    token: CancellationToken,
    handle: SweepJoinHandle,
}

#[derive(Default)]
struct ProgressState {
    active_event: Option<String>,
    /// pod key -> last eviction error
    eviction_errors: BTreeMap<String, String>,
    sweep: Option<SweepTask>,
    last_sweep: Option<SweepReport>,
}

/// Point-in-time copy of the progress state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub active_event: Option<String>,
    pub eviction_errors: BTreeMap<String, String>,
    pub sweep_running: bool,
    pub last_sweep: Option<SweepReport>,
}

/// Shared drain progress, guarded by a single lock
#[derive(Default)]
pub struct DrainProgress {
    state: Mutex<ProgressState>,
}

impl DrainProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `event` the active drain and launch its sweep through `launch`.
    ///
    /// Any previous sweep is cancelled and prior per-pod errors are dropped.
    /// The launch happens under the lock, so two concurrent starts can never
    /// leave a sweep running that is not tracked here.
    pub fn begin<F>(&self, event: &str, launch: F)
    where
        F: FnOnce(CancellationToken) -> SweepJoinHandle,
    {
        let mut state = self.state.lock();

        if let Some(previous) = state.sweep.take() {
            debug!(previous = %previous.event, event, "Cancelling superseded eviction sweep");
            previous.token.cancel();
        }

        state.active_event = Some(event.to_string());
        state.eviction_errors.clear();
        state.last_sweep = None;

        let token = CancellationToken::new();
        let handle = launch(token.clone());
        state.sweep = Some(SweepTask {
            event: event.to_string(),
            token,
            handle,
        });
    }

    #[cfg(test)]
    pub(crate) fn active_event(&self) -> Option<String> {
        self.state.lock().active_event.clone()
    }

    /// Record an eviction failure. Ignored unless `event` is still active.
    pub fn record_failure(&self, event: &str, pod: &PodRef, error: &str) -> bool {
        let mut state = self.state.lock();
        if state.active_event.as_deref() != Some(event) {
            return false;
        }
        state.eviction_errors.insert(pod.key(), error.to_string());
        true
    }

    /// Forget a stale failure after the pod was evicted
    pub fn clear_failure(&self, event: &str, pod: &PodRef) {
        let mut state = self.state.lock();
        if state.active_event.as_deref() == Some(event) {
            state.eviction_errors.remove(&pod.key());
        }
    }

    /// Store the report of a finished sweep for `event`
    pub fn finish_sweep(&self, event: &str, report: SweepReport) {
        let mut state = self.state.lock();
        if state.active_event.as_deref() == Some(event) {
            state.last_sweep = Some(report);
        }
    }

    pub fn failure_count(&self) -> usize {
        self.state.lock().eviction_errors.len()
    }

    /// Mark `event` finished: clears the active event and the error map.
    /// Returns false, changing nothing, when another event is active.
    /// The sweep, if still running, is left to run out on its own.
    pub fn complete(&self, event: &str) -> bool {
        let mut state = self.state.lock();
        if state.active_event.as_deref() != Some(event) {
            return false;
        }
        state.eviction_errors.clear();
        state.active_event = None;
        true
    }

    /// Take the running sweep's handle so the caller can await it
    #[cfg(test)]
    pub(crate) fn take_sweep(&self) -> Option<SweepJoinHandle> {
        self.state.lock().sweep.take().map(|task| task.handle)
    }

    /// Cancel the running sweep, if any
    pub fn cancel_sweep(&self) {
        if let Some(task) = self.state.lock().sweep.as_ref() {
            task.token.cancel();
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock();
        ProgressSnapshot {
            active_event: state.active_event.clone(),
            eviction_errors: state.eviction_errors.clone(),
            sweep_running: state
                .sweep
                .as_ref()
                .is_some_and(|task| !task.handle.is_finished()),
            last_sweep: state.last_sweep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn idle_sweep(_token: CancellationToken) -> SweepJoinHandle {
        tokio::spawn(async { None })
    }

    #[tokio::test]
    async fn test_begin_resets_errors() {
        let progress = DrainProgress::new();
        let pod = PodRef::new("default", "web-0");

        progress.begin("event-1", idle_sweep);
        assert!(progress.record_failure("event-1", &pod, "Cannot evict pod"));
        assert_eq!(progress.failure_count(), 1);

        progress.begin("event-2", idle_sweep);
        assert_eq!(progress.failure_count(), 0);
        assert_eq!(progress.active_event().as_deref(), Some("event-2"));
    }

    #[tokio::test]
    async fn test_superseded_sweep_is_cancelled_and_ignored() {
        let progress = DrainProgress::new();
        let pod = PodRef::new("default", "web-0");
        let first = Arc::new(Mutex::new(None::<CancellationToken>));

        let slot = first.clone();
        progress.begin("event-1", move |token| {
            *slot.lock() = Some(token);
            tokio::spawn(async { None })
        });
        progress.begin("event-2", idle_sweep);

        let token = first.lock().clone().unwrap();
        assert!(token.is_cancelled());
        assert!(!progress.record_failure("event-1", &pod, "late failure"));
        assert!(progress.snapshot().eviction_errors.is_empty());
    }

    #[tokio::test]
    async fn test_complete_clears_state() {
        let progress = DrainProgress::new();
        let pod = PodRef::new("default", "web-0");

        progress.begin("event-1", idle_sweep);
        progress.record_failure("event-1", &pod, "Cannot evict pod");
        progress.finish_sweep("event-1", SweepReport { evicted: 0, failed: 1, total: 1 });

        assert!(progress.complete("event-1"));
        assert_eq!(progress.active_event(), None);
        assert_eq!(progress.failure_count(), 0);

        // The last report survives for diagnostics.
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.last_sweep.map(|r| r.failed), Some(1));
    }

    #[tokio::test]
    async fn test_complete_of_older_event_keeps_newer_drain() {
        let progress = DrainProgress::new();
        let pod = PodRef::new("default", "web-0");

        progress.begin("event-1", idle_sweep);
        progress.begin("event-2", idle_sweep);
        assert!(progress.record_failure("event-2", &pod, "Cannot evict pod"));

        assert!(!progress.complete("event-1"));
        assert_eq!(progress.active_event().as_deref(), Some("event-2"));
        assert!(progress.record_failure("event-2", &PodRef::new("default", "web-1"), "Cannot evict pod"));
        assert_eq!(progress.failure_count(), 2);
    }

    #[tokio::test]
    async fn test_clear_failure_after_success() {
        let progress = DrainProgress::new();
        let pod = PodRef::new("default", "web-0");

        progress.begin("event-1", idle_sweep);
        progress.record_failure("event-1", &pod, "Cannot evict pod");
        progress.clear_failure("event-1", &pod);
        assert_eq!(progress.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_recording() {
        let progress = Arc::new(DrainProgress::new());
        progress.begin("event-1", idle_sweep);

        let mut handles = Vec::new();
        for i in 0..16 {
            let progress = progress.clone();
            handles.push(tokio::spawn(async move {
                let pod = PodRef::new("default", format!("web-{}", i));
                progress.record_failure("event-1", &pod, "Cannot evict pod")
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(progress.failure_count(), 16);
    }
}
