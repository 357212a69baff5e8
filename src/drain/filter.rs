//! Pod Eligibility Filter
//!
//! Decides which pods on a node a drain must evict. Pods are observed fresh
//! on every call; nothing here is cached.

use crate::domain::ports::{PodRecord, DAEMON_SET_KIND};

/// Why a pod is left alone by a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Static pod mirrored by the kubelet, not controlled by the scheduler
    MirrorPod,
    /// DaemonSet pods ignore cordons and would be recreated on the node
    DaemonSet,
    /// Already terminating
    Terminating,
    /// Succeeded or Failed
    Finished,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MirrorPod => write!(f, "mirror pod"),
            SkipReason::DaemonSet => write!(f, "daemonset pod"),
            SkipReason::Terminating => write!(f, "already terminating"),
            SkipReason::Finished => write!(f, "finished"),
        }
    }
}

/// Reason a pod is skipped, or `None` if it must be evicted
pub fn skip_reason(pod: &PodRecord) -> Option<SkipReason> {
    if pod.mirror {
        Some(SkipReason::MirrorPod)
    } else if pod.is_owned_by(DAEMON_SET_KIND) {
        Some(SkipReason::DaemonSet)
    } else if pod.deletion_timestamp.is_some() {
        Some(SkipReason::Terminating)
    } else if pod.phase.is_terminal() {
        Some(SkipReason::Finished)
    } else {
        None
    }
}

/// Whether a drain has to evict this pod
pub fn is_evictable(pod: &PodRecord) -> bool {
    skip_reason(pod).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::PodPhase;
    use chrono::Utc;

    fn pod() -> PodRecord {
        PodRecord::new("default", "web-0", "w1")
    }

    #[test]
    fn test_ordinary_pods_are_evictable() {
        assert!(is_evictable(&pod()));
        assert!(is_evictable(&pod().with_owner("ReplicaSet")));
        assert!(is_evictable(&pod().with_owner("StatefulSet")));
        assert!(is_evictable(&pod().with_phase(PodPhase::Pending)));
        assert!(is_evictable(&pod().with_phase(PodPhase::Unknown)));
    }

    #[test]
    fn test_skip_reasons() {
        assert_eq!(skip_reason(&pod().mirrored()), Some(SkipReason::MirrorPod));
        assert_eq!(
            skip_reason(&pod().with_owner("DaemonSet")),
            Some(SkipReason::DaemonSet)
        );
        assert_eq!(
            skip_reason(&pod().terminating(Utc::now())),
            Some(SkipReason::Terminating)
        );
        assert_eq!(
            skip_reason(&pod().with_phase(PodPhase::Succeeded)),
            Some(SkipReason::Finished)
        );
        assert_eq!(
            skip_reason(&pod().with_phase(PodPhase::Failed)),
            Some(SkipReason::Finished)
        );
    }

    #[test]
    fn test_any_daemonset_owner_excludes() {
        let pod = pod().with_owner("ReplicaSet").with_owner("DaemonSet");
        assert!(!is_evictable(&pod));
    }

    #[test]
    fn test_filter_matches_predicate_over_all_combinations() {
        let phases = [
            PodPhase::Pending,
            PodPhase::Running,
            PodPhase::Succeeded,
            PodPhase::Failed,
            PodPhase::Unknown,
        ];

        for mirror in [false, true] {
            for daemon in [false, true] {
                for deleting in [false, true] {
                    for phase in phases {
                        let mut p = pod().with_phase(phase);
                        if mirror {
                            p = p.mirrored();
                        }
                        if daemon {
                            p = p.with_owner("DaemonSet");
                        }
                        if deleting {
                            p = p.terminating(Utc::now());
                        }

                        let expected = !(mirror || daemon || deleting || phase.is_terminal());
                        assert_eq!(is_evictable(&p), expected, "{:?}", p);
                    }
                }
            }
        }
    }
}
