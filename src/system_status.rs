//! Aggregates snapshot histories into per-resource overload ratios and a
//! system-idle verdict, per `spec.md` §4.B.
//!
//! Grounded in `original_source/_autoscaling/system_status.py`: the
//! pairwise time-weighted ratio computation is carried over verbatim.

use std::time::{Duration, Instant};

use crate::snapshot::{LoadRatioInfo, Snapshot, SystemInfo};
use crate::snapshotter::Snapshotter;

/// Per-resource overload thresholds, defaults per `spec.md` §4.B.
#[derive(Debug, Clone, Copy)]
pub struct SystemStatusConfig {
    pub max_snapshot_age: Duration,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub event_loop_threshold: f64,
    pub client_threshold: f64,
}

impl Default for SystemStatusConfig {
    fn default() -> Self {
        Self {
            max_snapshot_age: Duration::from_secs(5),
            cpu_threshold: 0.4,
            memory_threshold: 0.2,
            event_loop_threshold: 0.6,
            client_threshold: 0.3,
        }
    }
}

pub struct SystemStatus {
    config: SystemStatusConfig,
}

impl SystemStatus {
    pub fn new(config: SystemStatusConfig) -> Self {
        Self { config }
    }

    /// Uses only the last `max_snapshot_age` of each resource's history.
    pub fn get_current_system_info(&self, snapshotter: &Snapshotter) -> SystemInfo {
        let age = Some(self.config.max_snapshot_age);
        SystemInfo {
            cpu_info: ratio_info(
                &snapshotter.get_cpu_sample(age),
                self.config.cpu_threshold,
            ),
            memory_info: ratio_info(
                &snapshotter.get_memory_sample(age),
                self.config.memory_threshold,
            ),
            event_loop_info: ratio_info(
                &snapshotter.get_event_loop_sample(age),
                self.config.event_loop_threshold,
            ),
            client_info: ratio_info(
                &snapshotter.get_client_sample(age),
                self.config.client_threshold,
            ),
        }
    }

    /// Uses the full retained history for each resource.
    pub fn get_historical_system_info(&self, snapshotter: &Snapshotter) -> SystemInfo {
        SystemInfo {
            cpu_info: ratio_info(&snapshotter.get_cpu_sample(None), self.config.cpu_threshold),
            memory_info: ratio_info(
                &snapshotter.get_memory_sample(None),
                self.config.memory_threshold,
            ),
            event_loop_info: ratio_info(
                &snapshotter.get_event_loop_sample(None),
                self.config.event_loop_threshold,
            ),
            client_info: ratio_info(
                &snapshotter.get_client_sample(None),
                self.config.client_threshold,
            ),
        }
    }
}

/// Time-weighted overload ratio over a sample list sorted by
/// `created_at` ascending. Matches `_is_sample_overloaded` in
/// `system_status.py`: empty -> 0, single-element -> that sample's
/// `is_overloaded` as 0.0/1.0, else pairwise time-weighted.
fn ratio_info<T>(samples: &[Snapshot<T>], threshold: f64) -> LoadRatioInfo {
    let actual_ratio = overloaded_ratio(samples);
    LoadRatioInfo::new(threshold, actual_ratio)
}

fn overloaded_ratio<T>(samples: &[Snapshot<T>]) -> f64 {
    match samples.len() {
        0 => 0.0,
        1 => {
            if samples[0].is_overloaded {
                1.0
            } else {
                0.0
            }
        }
        _ => {
            let mut overloaded_time = Duration::ZERO;
            let mut total_time = Duration::ZERO;
            for pair in samples.windows(2) {
                let (previous, current) = (&pair[0], &pair[1]);
                let elapsed = elapsed_between(previous.created_at, current.created_at);
                total_time += elapsed;
                if current.is_overloaded {
                    overloaded_time += elapsed;
                }
            }
            if total_time.is_zero() {
                0.0
            } else {
                overloaded_time.as_secs_f64() / total_time.as_secs_f64()
            }
        }
    }
}

/// `Instant` has no total order violation in practice on one monotonic
/// clock, but guard it anyway: the spec calls a negative delta a
/// violated ordering invariant that should fail loudly. `Instant`
/// subtraction saturates to zero rather than panicking, so we assert the
/// ordering explicitly here instead.
fn elapsed_between(previous: Instant, current: Instant) -> Duration {
    assert!(
        current >= previous,
        "sample history is not sorted by created_at ascending"
    );
    current - previous
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(overloaded: bool) -> Snapshot<f64> {
        Snapshot::new(0.0, overloaded)
    }

    #[test]
    fn empty_sample_is_not_overloaded() {
        let samples: Vec<Snapshot<f64>> = Vec::new();
        assert_eq!(overloaded_ratio(&samples), 0.0);
    }

    #[test]
    fn single_sample_reflects_its_own_flag() {
        assert_eq!(overloaded_ratio(&[sample(true)]), 1.0);
        assert_eq!(overloaded_ratio(&[sample(false)]), 0.0);
    }

    #[test]
    fn idle_when_all_resources_not_overloaded() {
        let info = SystemInfo {
            cpu_info: LoadRatioInfo::new(0.4, 0.0),
            memory_info: LoadRatioInfo::new(0.2, 0.0),
            event_loop_info: LoadRatioInfo::new(0.6, 0.0),
            client_info: LoadRatioInfo::new(0.3, 0.0),
        };
        assert!(info.is_system_idle());
    }

    #[test]
    fn not_idle_when_any_resource_overloaded() {
        let info = SystemInfo {
            cpu_info: LoadRatioInfo::new(0.4, 0.6),
            memory_info: LoadRatioInfo::new(0.2, 0.0),
            event_loop_info: LoadRatioInfo::new(0.6, 0.0),
            client_info: LoadRatioInfo::new(0.3, 0.0),
        };
        assert!(!info.is_system_idle());
    }
}
