use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Delayed actions the bridge core can arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Close the join window and query devices once the bridge settled.
    Settle,
    /// Give up on a discover session.
    PairingTimeout,
}

/// An armed timer. The generation identifies which arming it belongs to,
/// so an expiry that was already in flight when it got cancelled or
/// re-armed is recognised as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Runs timers on behalf of the bridge core.
///
/// An expiry must be delivered back through the same serialized context
/// that handles messages, never concurrently with it.
pub trait Scheduler: Send {
    fn schedule(&mut self, timer: Timer, after: Duration);

    /// Cancel the pending timer of `kind`, if any.
    fn cancel(&mut self, kind: TimerKind);
}

/// Arming state of one timer kind.
#[derive(Debug)]
pub(crate) struct TimerSlot {
    kind: TimerKind,
    generation: u64,
    armed: bool,
}

impl TimerSlot {
    pub(crate) fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            generation: 0,
            armed: false,
        }
    }

    pub(crate) fn arm(&mut self) -> Timer {
        self.generation += 1;
        self.armed = true;
        Timer {
            kind: self.kind,
            generation: self.generation,
        }
    }

    /// Returns whether the slot was armed.
    pub(crate) fn disarm(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }

    /// Consume an expiry. True only for the current arming.
    pub(crate) fn fire(&mut self, timer: Timer) -> bool {
        if timer.kind != self.kind || timer.generation != self.generation || !self.armed {
            return false;
        }
        self.armed = false;
        true
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }
}

/// Scheduler that only records requests; tests fire timers by hand.
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<Vec<(Timer, Duration)>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timers scheduled and not cancelled, oldest first.
    pub fn pending(&self) -> Vec<(Timer, Duration)> {
        self.inner.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Remove and return the pending timer of `kind`.
    pub fn take(&self, kind: TimerKind) -> Option<Timer> {
        let mut pending = self.inner.lock().ok()?;
        let idx = pending.iter().position(|(t, _)| t.kind == kind)?;
        Some(pending.remove(idx).0)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, timer: Timer, after: Duration) {
        if let Ok(mut pending) = self.inner.lock() {
            pending.retain(|(t, _)| t.kind != timer.kind);
            pending.push((timer, after));
        }
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Ok(mut pending) = self.inner.lock() {
            pending.retain(|(t, _)| t.kind != kind);
        }
    }
}
