//! Per-session interrupt signals
//!
//! Each active run publishes a one-shot flag keyed by session id. The
//! loop polls it cooperatively at iteration boundaries and between
//! stream deltas; `interrupt` only reports true while a run is active.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Default)]
pub struct InterruptRegistry {
    signals: DashMap<Uuid, Arc<AtomicBool>>,
}

impl InterruptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh signal for a run. Replaces any stale entry.
    pub fn register(&self, session_id: Uuid) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.signals.insert(session_id, flag.clone());
        flag
    }

    /// Set the signal. Returns true iff a run had registered one;
    /// repeated calls are no-ops that still return true.
    pub fn interrupt(&self, session_id: Uuid) -> bool {
        match self.signals.get(&session_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!(session_id = %session_id, "session interrupted");
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, session_id: Uuid) -> bool {
        self.signals.contains_key(&session_id)
    }

    /// Drop the signal when a run finishes.
    pub fn clear(&self, session_id: Uuid) {
        self.signals.remove(&session_id);
    }
}
