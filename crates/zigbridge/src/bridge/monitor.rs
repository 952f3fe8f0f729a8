use tracing::info;

use super::payload::BridgeConnection;
use super::timer::Timer;
use super::timer::TimerKind;
use super::timer::TimerSlot;

/// Outcome of a state report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Bridge came online; the settle timer was armed.
    Online(Timer),
    /// Bridge went offline. `cancelled` tells whether a settle timer was
    /// still pending.
    Offline { cancelled: bool },
    Unchanged,
}

/// Tracks whether the bridge is reachable.
///
/// Starts unknown; only `bridge/state` reports move it.
#[derive(Debug)]
pub struct BridgeStateMonitor {
    state: Option<BridgeConnection>,
    settle: TimerSlot,
}

impl Default for BridgeStateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeStateMonitor {
    pub fn new() -> Self {
        Self {
            state: None,
            settle: TimerSlot::new(TimerKind::Settle),
        }
    }

    pub fn state(&self) -> Option<BridgeConnection> {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state == Some(BridgeConnection::Online)
    }

    pub fn settle_pending(&self) -> bool {
        self.settle.is_armed()
    }

    pub fn report(&mut self, reported: BridgeConnection) -> Transition {
        if self.state == Some(reported) {
            return Transition::Unchanged;
        }
        self.state = Some(reported);

        match reported {
            BridgeConnection::Online => {
                info!("Zigbee bridge online");
                Transition::Online(self.settle.arm())
            }
            BridgeConnection::Offline => {
                info!("Zigbee bridge offline");
                Transition::Offline {
                    cancelled: self.settle.disarm(),
                }
            }
        }
    }

    /// Consume a settle expiry. False if it was cancelled or superseded.
    pub fn settle_elapsed(&mut self, timer: Timer) -> bool {
        self.settle.fire(timer) && self.is_online()
    }
}
