//! Samples CPU, memory, event-loop lag, and client-throttle errors at
//! fixed intervals; retains a bounded time window of samples, per
//! `spec.md` §4.A.
//!
//! Grounded in `original_source/_autoscaling/snapshotter.py`: interval and
//! window constants, the memory-warning-cooldown rate limit, and the
//! "2nd retry bucket" client-overload metric are all carried over.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::LifecycleError;
use crate::events::{Event, EventManager};
use crate::http_client::HttpClient;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy)]
pub struct SnapshotterConfig {
    pub event_loop_snapshot_interval: Duration,
    pub client_snapshot_interval: Duration,
    pub snapshot_history: Duration,
    pub max_used_cpu_ratio: f64,
    pub max_used_memory_ratio: f64,
    pub max_memory_bytes: u64,
    pub max_event_loop_delay: Duration,
    pub max_client_errors: u64,
    pub memory_warning_cooldown: Duration,
    /// Which bucket of the client's `retry_count -> error_count`
    /// histogram the client-overload sample tracks. `spec.md` §9
    /// recommends exposing this rather than hard-coding it.
    pub client_error_retry_bucket: u32,
}

impl Default for SnapshotterConfig {
    fn default() -> Self {
        Self {
            event_loop_snapshot_interval: Duration::from_millis(500),
            client_snapshot_interval: Duration::from_secs(1),
            snapshot_history: Duration::from_secs(30),
            max_used_cpu_ratio: 0.95,
            max_used_memory_ratio: 0.90,
            max_memory_bytes: default_max_memory_bytes(),
            max_event_loop_delay: Duration::from_millis(50),
            max_client_errors: 1,
            memory_warning_cooldown: Duration::from_secs(10),
            client_error_retry_bucket: 2,
        }
    }
}

/// `CRAWLEE_MEMORY_MBYTES` overrides autodetected available memory
/// (`spec.md` §6). Autodetection itself is out of scope for the core
/// (no OS probe is shipped); callers without the env var get a
/// conservative 1 GiB default they're expected to override.
fn default_max_memory_bytes() -> u64 {
    std::env::var("CRAWLEE_MEMORY_MBYTES")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(|mb| mb * 1024 * 1024)
        .unwrap_or(1024 * 1024 * 1024)
}

struct Histories {
    cpu: Mutex<Vec<Snapshot<f64>>>,
    memory: Mutex<Vec<Snapshot<u64>>>,
    event_loop: Mutex<Vec<Snapshot<Duration>>>,
    client: Mutex<Vec<Snapshot<u64>>>,
}

impl Default for Histories {
    fn default() -> Self {
        Self {
            cpu: Mutex::new(Vec::new()),
            memory: Mutex::new(Vec::new()),
            event_loop: Mutex::new(Vec::new()),
            client: Mutex::new(Vec::new()),
        }
    }
}

pub struct Snapshotter {
    config: SnapshotterConfig,
    http_client: Option<Arc<dyn HttpClient>>,
    events: Option<Arc<EventManager>>,
    histories: Arc<Histories>,
    started: AtomicBool,
    last_memory_warning: Mutex<Option<Instant>>,
    last_event_loop_sample: Mutex<Option<Instant>>,
    last_client_error_count: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Returned by [`Snapshotter::start`]; dropping it without calling
/// [`Snapshotter::stop`] logs a warning (the design note's "drop-safety
/// wrapper" for the ported scoped-context-manager idiom).
pub struct StartedGuard {
    stopped: bool,
}

impl Drop for StartedGuard {
    fn drop(&mut self) {
        if !self.stopped {
            log::warn!("Snapshotter::StartedGuard dropped without calling stop()");
        }
    }
}

impl Snapshotter {
    pub fn new(
        config: SnapshotterConfig,
        http_client: Option<Arc<dyn HttpClient>>,
        events: Option<Arc<EventManager>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            http_client,
            events,
            histories: Arc::new(Histories::default()),
            started: AtomicBool::new(false),
            last_memory_warning: Mutex::new(None),
            last_event_loop_sample: Mutex::new(None),
            last_client_error_count: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts the periodic event-loop/client samplers and, if an
    /// `EventManager` was supplied, subscribes to `SystemInfo` for the
    /// event-driven CPU/memory samplers.
    ///
    /// # Errors
    /// Returns [`LifecycleError::AlreadyStarted`] if called twice.
    pub fn start(self: &Arc<Self>) -> Result<StartedGuard, LifecycleError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(LifecycleError::AlreadyStarted);
        }

        let mut tasks = self.tasks.lock();

        let event_loop_self = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(event_loop_self.config.event_loop_snapshot_interval);
            loop {
                interval.tick().await;
                event_loop_self.snapshot_event_loop();
            }
        }));

        let client_self = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(client_self.config.client_snapshot_interval);
            loop {
                interval.tick().await;
                client_self.snapshot_client();
            }
        }));

        if let Some(events) = &self.events {
            let (listener_id, mut rx) = events.on();
            let system_info_self = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let Event::SystemInfo {
                        cpu_used_ratio,
                        memory_used_bytes,
                    } = event
                    {
                        system_info_self.snapshot_cpu(cpu_used_ratio);
                        system_info_self.snapshot_memory(memory_used_bytes);
                    }
                }
                log::debug!("snapshotter system-info listener {listener_id} channel closed");
            }));
        }

        Ok(StartedGuard { stopped: false })
    }

    /// # Errors
    /// Returns [`LifecycleError::NotStarted`] if `start` was never called.
    pub fn stop(&self, mut guard: StartedGuard) -> Result<(), LifecycleError> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Err(LifecycleError::NotStarted);
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        guard.stopped = true;
        Ok(())
    }

    fn snapshot_cpu(&self, used_ratio: f64) {
        let overloaded = used_ratio > self.config.max_used_cpu_ratio;
        self.push(&self.histories.cpu, Snapshot::new(used_ratio, overloaded));
    }

    fn snapshot_memory(&self, current_bytes: u64) {
        let overload_threshold =
            (self.config.max_used_memory_ratio * self.config.max_memory_bytes as f64) as u64;
        let overloaded = current_bytes > overload_threshold;

        let buffer = self.config.max_memory_bytes as f64
            * (1.0 - self.config.max_used_memory_ratio)
            * 0.5;
        let warn_threshold = overload_threshold as f64 + buffer;
        if current_bytes as f64 > warn_threshold {
            let mut last_warning = self.last_memory_warning.lock();
            let now = Instant::now();
            let should_warn = match *last_warning {
                None => true,
                Some(t) => now.duration_since(t) >= self.config.memory_warning_cooldown,
            };
            if should_warn {
                log::warn!(
                    "memory usage {current_bytes} bytes is approaching the overload threshold"
                );
                *last_warning = Some(now);
            }
        }

        self.push(&self.histories.memory, Snapshot::new(current_bytes, overloaded));
    }

    fn snapshot_event_loop(&self) {
        let now = Instant::now();
        let mut last = self.last_event_loop_sample.lock();
        let delay = match *last {
            Some(previous) => {
                let elapsed = now.duration_since(previous);
                elapsed.saturating_sub(self.config.event_loop_snapshot_interval)
            }
            None => Duration::ZERO,
        };
        *last = Some(now);
        drop(last);

        let overloaded = delay > self.config.max_event_loop_delay;
        self.push(&self.histories.event_loop, Snapshot::new(delay, overloaded));
    }

    fn snapshot_client(&self) {
        let Some(client) = &self.http_client else {
            return;
        };
        let histogram = client.get_rate_limit_errors();
        let bucket_count = histogram
            .get(&self.config.client_error_retry_bucket)
            .copied()
            .unwrap_or(0);

        let previous = self.last_client_error_count.swap(bucket_count, Ordering::AcqRel);
        let new_error_count = bucket_count.saturating_sub(previous);
        let overloaded = new_error_count > self.config.max_client_errors;
        self.push(&self.histories.client, Snapshot::new(new_error_count, overloaded));
    }

    /// Prunes entries older than the history window, then appends.
    fn push<T>(&self, history: &Mutex<Vec<Snapshot<T>>>, snapshot: Snapshot<T>) {
        let mut history = history.lock();
        let cutoff = snapshot.created_at.checked_sub(self.config.snapshot_history);
        if let Some(cutoff) = cutoff {
            history.retain(|s| s.created_at >= cutoff);
        }
        history.push(snapshot);
    }

    fn sample_within<T: Clone>(history: &Mutex<Vec<Snapshot<T>>>, duration: Option<Duration>) -> Vec<Snapshot<T>> {
        let history = history.lock();
        match (duration, history.last()) {
            (Some(duration), Some(latest)) => {
                let cutoff = latest.created_at.checked_sub(duration);
                match cutoff {
                    Some(cutoff) => history.iter().filter(|s| s.created_at >= cutoff).cloned().collect(),
                    None => history.clone(),
                }
            }
            _ => history.clone(),
        }
    }

    pub fn get_cpu_sample(&self, duration: Option<Duration>) -> Vec<Snapshot<f64>> {
        Self::sample_within(&self.histories.cpu, duration)
    }

    pub fn get_memory_sample(&self, duration: Option<Duration>) -> Vec<Snapshot<u64>> {
        Self::sample_within(&self.histories.memory, duration)
    }

    pub fn get_event_loop_sample(&self, duration: Option<Duration>) -> Vec<Snapshot<Duration>> {
        Self::sample_within(&self.histories.event_loop, duration)
    }

    pub fn get_client_sample(&self, duration: Option<Duration>) -> Vec<Snapshot<u64>> {
        Self::sample_within(&self.histories.client, duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_overload_threshold_uses_configured_ratio() {
        let snapshotter = Snapshotter::new(
            SnapshotterConfig {
                max_used_memory_ratio: 0.5,
                max_memory_bytes: 1000,
                ..Default::default()
            },
            None,
            None,
        );
        snapshotter.snapshot_memory(600);
        let sample = snapshotter.get_memory_sample(None);
        assert_eq!(sample.len(), 1);
        assert!(sample[0].is_overloaded, "600 > 0.5*1000 must be overloaded");
    }

    #[test]
    fn cpu_overload_uses_configured_ratio() {
        let snapshotter = Snapshotter::new(
            SnapshotterConfig {
                max_used_cpu_ratio: 0.8,
                ..Default::default()
            },
            None,
            None,
        );
        snapshotter.snapshot_cpu(0.9);
        snapshotter.snapshot_cpu(0.5);
        let sample = snapshotter.get_cpu_sample(None);
        assert_eq!(sample.len(), 2);
        assert!(sample[0].is_overloaded);
        assert!(!sample[1].is_overloaded);
    }

    #[test]
    fn stop_without_start_is_a_lifecycle_error() {
        let snapshotter = Snapshotter::new(SnapshotterConfig::default(), None, None);
        let err = snapshotter
            .stop(StartedGuard { stopped: false })
            .expect_err("stop before start must fail");
        assert!(matches!(err, LifecycleError::NotStarted));
    }

    #[tokio::test]
    async fn start_twice_is_a_lifecycle_error() {
        let snapshotter = Snapshotter::new(SnapshotterConfig::default(), None, None);
        let guard = snapshotter.start().expect("first start must succeed");
        let err = snapshotter.start().expect_err("second start must fail");
        assert!(matches!(err, LifecycleError::AlreadyStarted));
        snapshotter.stop(guard).expect("stop must succeed");
    }
}
