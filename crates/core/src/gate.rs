//! Pause flag shared by the source poller and state persistence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cloneable boolean gate. While paused, the poller stops producing events
/// and the state file refuses to write; bulk rebuilds hold it closed.
#[derive(Clone, Debug, Default)]
pub struct SyncGate {
    paused: Arc<AtomicBool>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Pause until the returned guard is dropped.
    pub fn hold(&self) -> PauseGuard {
        self.pause();
        PauseGuard { gate: self.clone() }
    }
}

#[must_use = "the gate resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    gate: SyncGate,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.gate.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let gate = SyncGate::new();
        let other = gate.clone();
        assert!(!other.is_paused());
        gate.pause();
        assert!(other.is_paused());
        other.resume();
        assert!(!gate.is_paused());
    }

    #[test]
    fn guard_resumes_on_drop() {
        let gate = SyncGate::new();
        {
            let _guard = gate.hold();
            assert!(gate.is_paused());
        }
        assert!(!gate.is_paused());
    }
}
