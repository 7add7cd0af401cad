//! Self-tuning worker pool, per `spec.md` §4.F.
//!
//! Grounded in `autoscaled_pool.py`'s autoscale rule and per-tick
//! orchestrator loop, adapted to `tokio`'s task model: workers are
//! spawned `tokio::task`s tracked in a `FuturesUnordered`, and the
//! "workers changed" event is a `tokio::sync::Notify` rather than an
//! asyncio `Event` (matches the teacher's own preference for `Notify`
//! over channel-as-signal in `crawl_engine/orchestrator.rs`).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::snapshotter::Snapshotter;
use crate::system_status::{SystemStatus, SystemStatusConfig};

#[derive(Debug, Clone, Copy)]
pub struct AutoscaledPoolConfig {
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub desired_concurrency: usize,
    /// `None` means unbounded.
    pub max_tasks_per_minute: Option<f64>,
    pub autoscale_interval: Duration,
    pub logging_interval: Duration,
    pub desired_concurrency_ratio: f64,
    pub scale_up_step_ratio: f64,
    pub scale_down_step_ratio: f64,
}

impl AutoscaledPoolConfig {
    pub fn new(min_concurrency: usize, max_concurrency: usize) -> Result<Self, crate::error::ValidationError> {
        if max_concurrency < min_concurrency || min_concurrency < 1 {
            return Err(crate::error::ValidationError::InvalidConcurrencyBounds {
                min: min_concurrency,
                max: max_concurrency,
            });
        }
        Ok(Self {
            min_concurrency,
            max_concurrency,
            desired_concurrency: min_concurrency,
            max_tasks_per_minute: None,
            autoscale_interval: Duration::from_secs(10),
            logging_interval: Duration::from_secs(60),
            desired_concurrency_ratio: 0.9,
            scale_up_step_ratio: 0.05,
            scale_down_step_ratio: 0.05,
        })
    }

    /// Convenience constructor for hosts without an explicit concurrency
    /// ceiling in mind: `min_concurrency = 1`, `max_concurrency` scaled off
    /// the number of logical CPUs (crawling is I/O-bound, so this is a
    /// generous multiple rather than a 1:1 mapping).
    pub fn with_host_concurrency() -> Self {
        let max_concurrency = (num_cpus::get() * 4).max(1);
        Self::new(1, max_concurrency).expect("min_concurrency=1 is always valid")
    }
}

type WorkerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type BoolFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Latched first fatal error from any worker; once set, the orchestrator
/// stops scheduling new work and winds down (`spec.md` §4.F).
struct FatalSlot(parking_lot::Mutex<Option<anyhow::Error>>);

impl FatalSlot {
    fn new() -> Self {
        Self(parking_lot::Mutex::new(None))
    }

    fn set_if_empty(&self, err: anyhow::Error) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take(&self) -> Option<anyhow::Error> {
        self.0.lock().take()
    }
}

/// Self-tuning pool of concurrent worker tasks.
///
/// `is_task_ready`, `is_finished`, and `run_task` are supplied as
/// `Fn`/`FnMut`-style callbacks via `Arc<dyn Fn...>`, matching the
/// teacher's callback-object shape in `crawl_engine/orchestrator.rs`
/// rather than requiring a bespoke trait per caller.
pub struct AutoscaledPool {
    config: parking_lot::Mutex<AutoscaledPoolConfig>,
    system_status: SystemStatus,
    snapshotter: Arc<Snapshotter>,
    current_concurrency: AtomicUsize,
    paused: AtomicBool,
    workers_changed: Notify,
    abort_requested: AtomicBool,
}

impl AutoscaledPool {
    pub fn new(config: AutoscaledPoolConfig, snapshotter: Arc<Snapshotter>) -> Self {
        Self {
            config: parking_lot::Mutex::new(config),
            system_status: SystemStatus::new(SystemStatusConfig::default()),
            snapshotter,
            current_concurrency: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            workers_changed: Notify::new(),
            abort_requested: AtomicBool::new(false),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.workers_changed.notify_one();
    }

    pub fn abort(&self) {
        self.abort_requested.store(true, Ordering::Release);
        self.workers_changed.notify_one();
    }

    pub fn current_concurrency(&self) -> usize {
        self.current_concurrency.load(Ordering::Acquire)
    }

    pub fn desired_concurrency(&self) -> usize {
        self.config.lock().desired_concurrency
    }

    /// Applies the autoscale rule once, using current vs. historical
    /// system-idle state. Exposed separately from `run` so it can be
    /// driven by an external interval task (as the teacher drives its
    /// own periodic maintenance tasks) or called directly in tests.
    pub fn autoscale_tick(&self, system_idle: bool) {
        let mut config = self.config.lock();
        let current = self.current_concurrency.load(Ordering::Acquire);
        let desired = config.desired_concurrency;
        let min_current = ((config.desired_concurrency_ratio * desired as f64).floor()) as usize;

        if system_idle && desired < config.max_concurrency && current >= min_current {
            let step = (config.scale_up_step_ratio * desired as f64).ceil() as usize;
            config.desired_concurrency = config.max_concurrency.min(desired + step.max(1));
        } else if !system_idle && desired > config.min_concurrency {
            let step = (config.scale_down_step_ratio * desired as f64).ceil() as usize;
            config.desired_concurrency = config.min_concurrency.max(desired.saturating_sub(step.max(1)));
        }
    }

    /// Runs the pool to completion: the per-tick orchestrator loop from
    /// `spec.md` §4.F, spawning workers as capacity and readiness allow,
    /// until `is_finished()` is true with no outstanding workers, or
    /// `abort()` is called, or a worker's `run_task` returns an error
    /// (which is propagated as this call's result).
    pub async fn run<IsReady, IsFinished, RunTask>(
        &self,
        is_task_ready: IsReady,
        is_finished: IsFinished,
        run_task: RunTask,
    ) -> anyhow::Result<()>
    where
        IsReady: Fn() -> BoolFuture,
        IsFinished: Fn() -> BoolFuture,
        RunTask: Fn() -> WorkerFuture,
    {
        let fatal = Arc::new(FatalSlot::new());
        let mut workers: FuturesUnordered<tokio::task::JoinHandle<()>> = FuturesUnordered::new();
        let mut last_autoscale_tick = tokio::time::Instant::now();

        loop {
            if self.abort_requested.load(Ordering::Acquire) {
                break;
            }
            if let Some(err) = fatal.take() {
                self.abort_requested.store(true, Ordering::Release);
                while workers.next().await.is_some() {}
                return Err(err);
            }
            if is_finished().await && workers.is_empty() {
                break;
            }

            let autoscale_interval = self.config.lock().autoscale_interval;
            if last_autoscale_tick.elapsed() >= autoscale_interval {
                let idle = self
                    .system_status
                    .get_historical_system_info(&self.snapshotter)
                    .is_system_idle();
                self.autoscale_tick(idle);
                last_autoscale_tick = tokio::time::Instant::now();
            }

            let overloaded = !self
                .system_status
                .get_current_system_info(&self.snapshotter)
                .is_system_idle();
            let paused = self.paused.load(Ordering::Acquire);
            let current = self.current_concurrency.load(Ordering::Acquire);
            let desired = self.config.lock().desired_concurrency;

            let should_wait_only = overloaded || paused || current >= desired || !is_task_ready().await;

            if !should_wait_only {
                self.current_concurrency.fetch_add(1, Ordering::AcqRel);
                let task_future = run_task();
                let fatal_for_worker = Arc::clone(&fatal);
                workers.push(tokio::spawn(Self::run_worker(task_future, fatal_for_worker)));

                if let Some(per_minute) = self.config.lock().max_tasks_per_minute {
                    if per_minute.is_finite() && per_minute > 0.0 {
                        tokio::time::sleep(Duration::from_secs_f64(60.0 / per_minute)).await;
                    }
                }
            }

            // Wait for either a worker to finish (which flips the
            // "workers changed" notify) or a 500ms poll timeout,
            // whichever comes first; either way loop back around.
            if workers.is_empty() {
                let wait = self.workers_changed.notified();
                tokio::pin!(wait);
                let _ = timeout(Duration::from_millis(500), &mut wait).await;
            } else {
                tokio::select! {
                    Some(_) = workers.next() => {
                        self.current_concurrency.fetch_sub(1, Ordering::AcqRel);
                        self.workers_changed.notify_one();
                    }
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                }
            }
        }

        while workers.next().await.is_some() {
            self.current_concurrency.fetch_sub(1, Ordering::AcqRel);
        }

        if let Some(err) = fatal.take() {
            return Err(err);
        }
        Ok(())
    }

    async fn run_worker(task: WorkerFuture, fatal: Arc<FatalSlot>) {
        if let Err(err) = task.await {
            log::warn!("worker task failed: {err}");
            fatal.set_if_empty(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;

    fn test_snapshotter() -> Arc<Snapshotter> {
        Snapshotter::new(Default::default(), None, None)
    }

    #[test]
    fn with_host_concurrency_scales_off_cpu_count() {
        let config = AutoscaledPoolConfig::with_host_concurrency();
        assert_eq!(config.min_concurrency, 1);
        assert!(config.max_concurrency >= 1);
    }

    #[test]
    fn scale_up_respects_min_current_gate() {
        let pool = AutoscaledPool::new(AutoscaledPoolConfig::new(1, 10).unwrap(), test_snapshotter());
        pool.current_concurrency.store(0, Ordering::Release);
        pool.autoscale_tick(true);
        assert_eq!(pool.desired_concurrency(), 1, "current 0 < min_current gate, no scale-up yet");
    }

    #[test]
    fn scale_up_when_idle_and_gate_satisfied() {
        let pool = AutoscaledPool::new(AutoscaledPoolConfig::new(4, 10).unwrap(), test_snapshotter());
        pool.current_concurrency.store(4, Ordering::Release);
        pool.autoscale_tick(true);
        assert!(pool.desired_concurrency() > 4);
    }

    #[test]
    fn scale_down_when_overloaded() {
        let pool = AutoscaledPool::new(AutoscaledPoolConfig::new(1, 10).unwrap(), test_snapshotter());
        {
            let mut cfg = pool.config.lock();
            cfg.desired_concurrency = 8;
        }
        pool.autoscale_tick(false);
        assert!(pool.desired_concurrency() < 8);
    }

    #[tokio::test]
    async fn run_completes_when_finished_with_no_ready_tasks() {
        let pool = AutoscaledPool::new(AutoscaledPoolConfig::new(1, 2).unwrap(), test_snapshotter());
        let ran = Arc::new(Counter::new(0));
        let ran_clone = Arc::clone(&ran);
        let finished = Arc::new(AtomicBool::new(false));
        let finished_clone = Arc::clone(&finished);
        finished.store(true, Ordering::Release);

        pool.run(
            || Box::pin(async { false }) as BoolFuture,
            move || {
                let finished_clone = Arc::clone(&finished_clone);
                Box::pin(async move { finished_clone.load(Ordering::Acquire) }) as BoolFuture
            },
            move || {
                let ran_inner = Arc::clone(&ran_clone);
                Box::pin(async move {
                    ran_inner.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }) as WorkerFuture
            },
        )
        .await
        .unwrap();

        assert_eq!(ran.load(Ordering::Relaxed), 0, "already finished, no task should run");
    }

    #[tokio::test]
    async fn worker_error_propagates_and_aborts_run() {
        let pool = AutoscaledPool::new(AutoscaledPoolConfig::new(1, 2).unwrap(), test_snapshotter());
        let attempts = Arc::new(Counter::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = pool
            .run(
                || Box::pin(async { true }) as BoolFuture,
                {
                    let attempts = Arc::clone(&attempts);
                    move || {
                        let attempts = Arc::clone(&attempts);
                        Box::pin(async move { attempts.load(Ordering::Relaxed) > 0 }) as BoolFuture
                    }
                },
                move || {
                    attempts_clone.fetch_add(1, Ordering::Relaxed);
                    Box::pin(async move { anyhow::bail!("boom") }) as WorkerFuture
                },
            )
            .await;

        assert!(result.is_err());
    }
}
