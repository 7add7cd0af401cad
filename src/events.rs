//! Event manager interface for system-info events, per `spec.md` §6.
//!
//! Shaped after the teacher's `crawl_events` pub/sub module, but backed by
//! per-listener `mpsc` channels (see DESIGN.md Open Question 5) rather than
//! a single broadcast channel, so one slow listener can't stall delivery
//! to the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::snapshot::Snapshot;

/// Events the core cares about (`spec.md` §6).
#[derive(Debug, Clone)]
pub enum Event {
    /// Carries the OS probe's latest cpu/memory readings for the
    /// snapshotter's event-driven samplers.
    SystemInfo {
        cpu_used_ratio: f64,
        memory_used_bytes: u64,
    },
    /// Fired periodically and on graceful shutdown; consumers checkpoint
    /// their state.
    PersistState,
}

pub type ListenerId = u64;

/// In-memory pub/sub event manager. One reference implementation is
/// enough to exercise the core's contract; hosted/distributed event
/// managers are out of scope.
#[derive(Default)]
pub struct EventManager {
    listeners: DashMap<ListenerId, mpsc::UnboundedSender<Event>>,
    next_id: AtomicU64,
}

impl EventManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a listener, returning its id (for `off`) and a receiver
    /// it can poll or forward into a task.
    pub fn on(&self) -> (ListenerId, mpsc::UnboundedReceiver<Event>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.insert(id, tx);
        (id, rx)
    }

    pub fn off(&self, id: ListenerId) {
        self.listeners.remove(&id);
    }

    /// Delivers `event` to every registered listener. A dropped receiver
    /// (closed channel) is logged and unregistered rather than treated as
    /// an error.
    pub fn emit(&self, event: Event) {
        let mut dead = Vec::new();
        for entry in self.listeners.iter() {
            if entry.value().send(event.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            log::debug!("event listener {id} dropped its receiver, unregistering");
            self.listeners.remove(&id);
        }
    }
}

pub fn cpu_snapshot_from_event(used_ratio: f64, threshold: f64) -> Snapshot<f64> {
    Snapshot::new(used_ratio, used_ratio > threshold)
}
