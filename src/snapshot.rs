//! Data model for resource samples and aggregated load, per `spec.md` §3.

use std::time::Instant;

/// One resource-specific measurement, classified against a threshold at
/// the moment it was recorded.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<T> {
    pub created_at: Instant,
    pub data: T,
    pub is_overloaded: bool,
}

impl<T> Snapshot<T> {
    pub fn new(data: T, is_overloaded: bool) -> Self {
        Self {
            created_at: Instant::now(),
            data,
            is_overloaded,
        }
    }
}

/// Per-resource overload ratio, time-weighted over a sample window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadRatioInfo {
    pub limit_ratio: f64,
    pub actual_ratio: f64,
    pub is_overloaded: bool,
}

impl LoadRatioInfo {
    pub fn new(limit_ratio: f64, actual_ratio: f64) -> Self {
        Self {
            limit_ratio,
            actual_ratio,
            is_overloaded: actual_ratio >= limit_ratio,
        }
    }
}

/// Aggregated system load across the four monitored resources.
#[derive(Debug, Clone, Copy)]
pub struct SystemInfo {
    pub cpu_info: LoadRatioInfo,
    pub memory_info: LoadRatioInfo,
    pub event_loop_info: LoadRatioInfo,
    pub client_info: LoadRatioInfo,
}

impl SystemInfo {
    /// `spec.md` §3: idle iff none of the four resources are overloaded.
    pub fn is_system_idle(&self) -> bool {
        !self.cpu_info.is_overloaded
            && !self.memory_info.is_overloaded
            && !self.event_loop_info.is_overloaded
            && !self.client_info.is_overloaded
    }
}
